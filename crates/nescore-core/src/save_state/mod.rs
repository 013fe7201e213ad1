//! Save state system for the NES emulation core.
//!
//! A save state is the concatenation, in a fixed order, of every mutable
//! byte the emulator owns: CPU registers/flags/cycle count, internal RAM,
//! PPU registers/OAM/palette/frame buffer, APU channel and frame-counter
//! state, and the cartridge mapper's bank-select registers and CHR/PRG-RAM.
//! [`nescore_savestate::Dump`] walks that tree in a fixed order; this
//! module only owns the buffer allocation and the size check at `load`
//! time — see [`Console::save`](crate::Console::save) and
//! [`Console::load`](crate::Console::load).
//!
//! The format has no header, magic, or checksum: it is opaque and valid
//! only for the handle (and ROM configuration) that produced it. Loading a
//! buffer captured from a different ROM, or from before a mapper/CHR-RAM
//! reconfiguration, is undefined.

pub mod error;

pub use error::SaveStateError;
