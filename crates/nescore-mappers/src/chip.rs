//! Tagged-variant mapper dispatch.
//!
//! [`Mapper`] is still implemented by every concrete cartridge type, since
//! that is the natural place to put each mapper's bank-switching logic. But
//! the hot path — one `read_prg`/`write_prg`/`read_chr`/`write_chr`/`clock`
//! call per CPU and PPU cycle — should not pay for a vtable indirection on
//! every access. [`MapperChip`] wraps the concrete mapper in a sum type and
//! dispatches through a `match`, which the compiler can inline and devirtualize
//! since each arm calls the concrete type's (statically known) methods
//! directly rather than through `&dyn Mapper`.
//!
//! [`create_mapper`](crate::create_mapper) returns a `MapperChip`; reach for
//! `Box<dyn Mapper>` only if a caller genuinely needs an open-ended mapper
//! type unknown to this crate.

use crate::{Axrom, Cnrom, Gxrom, Mapper, Mirroring, Mmc1, Mmc2, Mmc3, Mmc4, Nrom, Unrom512, Uxrom};

/// Statically dispatched cartridge mapper.
///
/// One variant per mapper class in `create_mapper`'s support table. Each
/// variant owns the concrete mapper struct; all `MapperChip` methods match
/// on the variant and forward to that struct's own (non-trait-object)
/// methods.
pub enum MapperChip {
    /// Mapper 0 (NROM).
    Nrom(Nrom),
    /// Mapper 1 (MMC1).
    Mmc1(Mmc1),
    /// Mapper 2 (UxROM).
    Uxrom(Uxrom),
    /// Mapper 3 (CNROM).
    Cnrom(Cnrom),
    /// Mapper 4 (MMC3).
    Mmc3(Mmc3),
    /// Mapper 7 (AxROM).
    Axrom(Axrom),
    /// Mapper 9 (MMC2).
    Mmc2(Mmc2),
    /// Mapper 10 (MMC4).
    Mmc4(Mmc4),
    /// Mapper 30 (UNROM512).
    Unrom512(Unrom512),
    /// Mapper 66 (GxROM).
    Gxrom(Gxrom),
}

/// Applies `$method(...)` to whichever variant `self` holds.
macro_rules! dispatch {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Nrom(m) => m.$method($($arg),*),
            Self::Mmc1(m) => m.$method($($arg),*),
            Self::Uxrom(m) => m.$method($($arg),*),
            Self::Cnrom(m) => m.$method($($arg),*),
            Self::Mmc3(m) => m.$method($($arg),*),
            Self::Axrom(m) => m.$method($($arg),*),
            Self::Mmc2(m) => m.$method($($arg),*),
            Self::Mmc4(m) => m.$method($($arg),*),
            Self::Unrom512(m) => m.$method($($arg),*),
            Self::Gxrom(m) => m.$method($($arg),*),
        }
    };
}

impl MapperChip {
    /// Reads a byte from PRG memory (CPU address space, `$6000-$FFFF`).
    #[inline]
    #[must_use]
    pub fn read_prg(&self, addr: u16) -> u8 {
        dispatch!(self, read_prg, addr)
    }

    /// Writes a byte to PRG memory (CPU address space, `$6000-$FFFF`).
    #[inline]
    pub fn write_prg(&mut self, addr: u16, val: u8) {
        dispatch!(self, write_prg, addr, val);
    }

    /// Reads a byte from CHR memory (PPU address space, `$0000-$1FFF`).
    #[inline]
    #[must_use]
    pub fn read_chr(&self, addr: u16) -> u8 {
        dispatch!(self, read_chr, addr)
    }

    /// Writes a byte to CHR memory (PPU address space, `$0000-$1FFF`).
    #[inline]
    pub fn write_chr(&mut self, addr: u16, val: u8) {
        dispatch!(self, write_chr, addr, val);
    }

    /// Current nametable mirroring mode.
    #[inline]
    #[must_use]
    pub fn mirroring(&self) -> Mirroring {
        dispatch!(self, mirroring)
    }

    /// Whether the mapper has a pending IRQ.
    #[inline]
    #[must_use]
    pub fn irq_pending(&self) -> bool {
        dispatch!(self, irq_pending)
    }

    /// Acknowledges/clears the mapper's IRQ line.
    #[inline]
    pub fn irq_acknowledge(&mut self) {
        dispatch!(self, irq_acknowledge);
    }

    /// Clocks any cartridge-internal counters (called every CPU cycle).
    #[inline]
    pub fn clock(&mut self, cycles: u8) {
        dispatch!(self, clock, cycles);
    }

    /// Notifies the mapper of a scanline boundary.
    #[inline]
    pub fn scanline(&mut self) {
        dispatch!(self, scanline);
    }

    /// Notifies the mapper of a PPU A12 rising edge (MMC3 scanline clock).
    #[inline]
    pub fn ppu_a12_rising(&mut self) {
        dispatch!(self, ppu_a12_rising);
    }

    /// The iNES mapper number.
    #[inline]
    #[must_use]
    pub fn mapper_number(&self) -> u16 {
        dispatch!(self, mapper_number)
    }

    /// The mapper's human-readable name.
    #[inline]
    #[must_use]
    pub fn mapper_name(&self) -> &'static str {
        dispatch!(self, mapper_name)
    }

    /// Whether the cartridge has battery-backed PRG-RAM.
    #[inline]
    #[must_use]
    pub fn has_battery(&self) -> bool {
        dispatch!(self, has_battery)
    }

    /// The battery-backed RAM contents, if any.
    #[inline]
    #[must_use]
    pub fn battery_ram(&self) -> Option<&[u8]> {
        dispatch!(self, battery_ram)
    }

    /// Restores battery-backed RAM contents (e.g. from a save file).
    #[inline]
    pub fn set_battery_ram(&mut self, data: &[u8]) {
        dispatch!(self, set_battery_ram, data);
    }

    /// Resets the mapper to its post-power-on state, keeping cartridge memory.
    #[inline]
    pub fn reset(&mut self) {
        dispatch!(self, reset);
    }

    /// Deep-clones this mapper into a fresh, independently owned `MapperChip`.
    #[inline]
    #[must_use]
    pub fn clone_chip(&self) -> Self {
        match self {
            Self::Nrom(m) => Self::Nrom(m.clone()),
            Self::Mmc1(m) => Self::Mmc1(m.clone()),
            Self::Uxrom(m) => Self::Uxrom(m.clone()),
            Self::Cnrom(m) => Self::Cnrom(m.clone()),
            Self::Mmc3(m) => Self::Mmc3(m.clone()),
            Self::Axrom(m) => Self::Axrom(m.clone()),
            Self::Mmc2(m) => Self::Mmc2(m.clone()),
            Self::Mmc4(m) => Self::Mmc4(m.clone()),
            Self::Unrom512(m) => Self::Unrom512(m.clone()),
            Self::Gxrom(m) => Self::Gxrom(m.clone()),
        }
    }
}

impl nescore_savestate::Dump for MapperChip {
    /// Walks whichever concrete mapper variant is held. Bank-select
    /// registers, CHR-RAM, and PRG-RAM are dumped; the ROM data backing
    /// each mapper is fixed for the cartridge's lifetime and never dumped.
    fn dump(&mut self, cursor: &mut nescore_savestate::Cursor<'_>) {
        dispatch!(self, dump, cursor);
    }
}
