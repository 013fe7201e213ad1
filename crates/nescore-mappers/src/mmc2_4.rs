//! MMC2/MMC4 Mappers (Mappers 9 and 10).
//!
//! Both variants share the same latch-driven CHR banking scheme and differ
//! only in how much PRG-ROM is switchable:
//!
//! - **MMC2** (mapper 9): 8 KiB switchable PRG bank at `$8000`, fixed last
//!   three 8 KiB banks at `$A000-$FFFF`. Used only by *Punch-Out!!*.
//! - **MMC4** (mapper 10): 16 KiB switchable PRG bank at `$8000`, fixed last
//!   16 KiB bank at `$C000`. Used by *Fire Emblem* and *Famicom Wars*.
//!
//! Both have two independent 4 KiB CHR banks, each toggled between two
//! latched sources by the PPU's own pattern-table fetches: reading tile
//! `$FD` or `$FE` at specific addresses flips the latch for that half of
//! the pattern table. Because `Mapper::read_chr` takes `&self` (PPU reads
//! must not require the bus to hand out a mutable borrow) and `Mapper`
//! requires `Send + Sync`, the latches live behind `AtomicBool` rather than
//! `Cell` — this is the one place in the mapper family where a "read" has
//! an observable side effect, mirroring the real hardware.
//!
//! Writes to `$A000-$FFFF` configure PRG bank, CHR bank selects, and
//! mirroring, identically for both variants.

use crate::mapper::{Mapper, Mirroring};
use crate::rom::Rom;
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec, vec::Vec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// PRG-ROM switchable-bank granularity in KiB: 8 for MMC2, 16 for MMC4.
pub trait PrgGranularity {
    /// Size in bytes of the switchable PRG window at `$8000`.
    const WINDOW: usize;
    /// Mapper number reported to callers.
    const NUMBER: u16;
    /// Mapper name reported to callers.
    const NAME: &'static str;
}

/// MMC2 (mapper 9): 8 KiB switchable PRG window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mmc2Granularity;
impl PrgGranularity for Mmc2Granularity {
    const WINDOW: usize = 0x2000;
    const NUMBER: u16 = 9;
    const NAME: &'static str = "MMC2";
}

/// MMC4 (mapper 10): 16 KiB switchable PRG window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mmc4Granularity;
impl PrgGranularity for Mmc4Granularity {
    const WINDOW: usize = 0x4000;
    const NUMBER: u16 = 10;
    const NAME: &'static str = "MMC4";
}

/// Shared MMC2/MMC4 implementation, parameterized on PRG window size.
///
/// `Clone` is implemented by hand: `AtomicBool` doesn't derive `Clone`, and a
/// cloned mapper should start with the current latch values, not shared
/// atomics.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MmcLatch<G> {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    prg_ram: Vec<u8>,
    chr_is_ram: bool,

    prg_bank: u8,
    /// CHR bank selected when latch 0/1 reads `$FD`.
    chr_bank_0_fd: u8,
    /// CHR bank selected when latch 0/1 reads `$FE`.
    chr_bank_0_fe: u8,
    chr_bank_1_fd: u8,
    chr_bank_1_fe: u8,

    /// Latch for the `$0000-$0FFF` half: false selects the `$FD` bank.
    latch_0: AtomicBool,
    /// Latch for the `$1000-$1FFF` half.
    latch_1: AtomicBool,

    mirroring: Mirroring,

    #[cfg_attr(feature = "serde", serde(skip))]
    _granularity: core::marker::PhantomData<G>,
}

impl<G> Clone for MmcLatch<G> {
    fn clone(&self) -> Self {
        Self {
            prg_rom: self.prg_rom.clone(),
            chr: self.chr.clone(),
            prg_ram: self.prg_ram.clone(),
            chr_is_ram: self.chr_is_ram,
            prg_bank: self.prg_bank,
            chr_bank_0_fd: self.chr_bank_0_fd,
            chr_bank_0_fe: self.chr_bank_0_fe,
            chr_bank_1_fd: self.chr_bank_1_fd,
            chr_bank_1_fe: self.chr_bank_1_fe,
            latch_0: AtomicBool::new(self.latch_0.load(Ordering::Relaxed)),
            latch_1: AtomicBool::new(self.latch_1.load(Ordering::Relaxed)),
            mirroring: self.mirroring,
            _granularity: core::marker::PhantomData,
        }
    }
}

impl<G: PrgGranularity> MmcLatch<G> {
    /// Create a new mapper instance from ROM data.
    #[must_use]
    pub fn new(rom: &Rom) -> Self {
        let chr_is_ram = rom.chr_rom.is_empty();
        let chr = if chr_is_ram {
            vec![0u8; 0x2000]
        } else {
            rom.chr_rom.clone()
        };

        Self {
            prg_rom: rom.prg_rom.clone(),
            chr,
            prg_ram: vec![0u8; 0x2000],
            chr_is_ram,
            prg_bank: 0,
            chr_bank_0_fd: 0,
            chr_bank_0_fe: 0,
            chr_bank_1_fd: 0,
            chr_bank_1_fe: 0,
            latch_0: AtomicBool::new(false),
            latch_1: AtomicBool::new(false),
            mirroring: rom.header.mirroring,
            _granularity: core::marker::PhantomData,
        }
    }

    fn prg_bank_count(&self) -> usize {
        (self.prg_rom.len() / G::WINDOW).max(1)
    }

    fn chr_bank_count(&self) -> usize {
        (self.chr.len() / 0x1000).max(1)
    }

    /// Update the read latch in response to a pattern-table fetch. Mirrors
    /// the PPU hardware behavior: reading the tile data at `$xFD8-$xFDF` or
    /// `$xFE8-$xFEF` (within either half of the pattern table) toggles the
    /// corresponding latch for subsequent fetches in that half.
    fn observe_read(&self, addr: u16) {
        match addr {
            0x0FD8..=0x0FDF => self.latch_0.store(false, Ordering::Relaxed),
            0x0FE8..=0x0FEF => self.latch_0.store(true, Ordering::Relaxed),
            0x1FD8..=0x1FDF => self.latch_1.store(false, Ordering::Relaxed),
            0x1FE8..=0x1FEF => self.latch_1.store(true, Ordering::Relaxed),
            _ => {}
        }
    }

    fn chr_half_bank(&self, half: u8) -> u8 {
        if half == 0 {
            if self.latch_0.load(Ordering::Relaxed) {
                self.chr_bank_0_fe
            } else {
                self.chr_bank_0_fd
            }
        } else if self.latch_1.load(Ordering::Relaxed) {
            self.chr_bank_1_fe
        } else {
            self.chr_bank_1_fd
        }
    }

    /// Walk this mapper's mutable state with a save-state cursor. PRG-ROM
    /// and CHR-ROM (when not CHR-RAM) are fixed and not dumped.
    pub(crate) fn dump(&mut self, cursor: &mut nescore_savestate::Cursor<'_>) {
        cursor.bytes(&mut self.prg_ram);
        if self.chr_is_ram {
            cursor.bytes(&mut self.chr);
        }

        cursor.u8(&mut self.prg_bank);
        cursor.u8(&mut self.chr_bank_0_fd);
        cursor.u8(&mut self.chr_bank_0_fe);
        cursor.u8(&mut self.chr_bank_1_fd);
        cursor.u8(&mut self.chr_bank_1_fe);

        let mut latch_0 = self.latch_0.load(Ordering::Relaxed);
        cursor.bool(&mut latch_0);
        self.latch_0.store(latch_0, Ordering::Relaxed);

        let mut latch_1 = self.latch_1.load(Ordering::Relaxed);
        cursor.bool(&mut latch_1);
        self.latch_1.store(latch_1, Ordering::Relaxed);

        let mut mirroring = self.mirroring.to_u8();
        cursor.u8(&mut mirroring);
        self.mirroring = Mirroring::from_u8(mirroring);
    }
}

impl<G: PrgGranularity + core::fmt::Debug + 'static> Mapper for MmcLatch<G> {
    fn read_prg(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr - 0x6000) as usize],
            _ if (addr as usize) >= 0x8000 => {
                let rel = addr as usize - 0x8000;
                if rel < G::WINDOW {
                    let bank = (self.prg_bank as usize) % self.prg_bank_count();
                    self.prg_rom
                        .get(bank * G::WINDOW + rel)
                        .copied()
                        .unwrap_or(0)
                } else {
                    // Fixed region: the last banks of PRG-ROM, filling out
                    // to $FFFF regardless of window size.
                    let fixed_len = 0x10000 - (0x8000 + G::WINDOW);
                    let fixed_start = self.prg_rom.len().saturating_sub(fixed_len);
                    let offset = rel - G::WINDOW;
                    self.prg_rom.get(fixed_start + offset).copied().unwrap_or(0)
                }
            }
            _ => 0,
        }
    }

    fn write_prg(&mut self, addr: u16, val: u8) {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr - 0x6000) as usize] = val,
            0xA000..=0xAFFF => {
                self.prg_bank = val & 0x0F;
            }
            0xB000..=0xBFFF => {
                self.chr_bank_0_fd = val & 0x1F;
            }
            0xC000..=0xCFFF => {
                self.chr_bank_0_fe = val & 0x1F;
            }
            0xD000..=0xDFFF => {
                self.chr_bank_1_fd = val & 0x1F;
            }
            0xE000..=0xEFFF => {
                self.chr_bank_1_fe = val & 0x1F;
            }
            0xF000..=0xFFFF => {
                self.mirroring = if val & 0x01 != 0 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                };
            }
            _ => {}
        }
    }

    fn read_chr(&self, addr: u16) -> u8 {
        let half = (addr >> 12) as u8 & 1;
        let bank = (self.chr_half_bank(half) as usize) % self.chr_bank_count();
        let in_bank = (addr & 0x0FFF) as usize;
        let value = self.chr.get(bank * 0x1000 + in_bank).copied().unwrap_or(0);
        self.observe_read(addr);
        value
    }

    fn write_chr(&mut self, addr: u16, val: u8) {
        if self.chr_is_ram {
            let half = (addr >> 12) as u8 & 1;
            let bank = (self.chr_half_bank(half) as usize) % self.chr_bank_count();
            let in_bank = (addr & 0x0FFF) as usize;
            if let Some(byte) = self.chr.get_mut(bank * 0x1000 + in_bank) {
                *byte = val;
            }
        }
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn mapper_number(&self) -> u16 {
        G::NUMBER
    }

    fn mapper_name(&self) -> &'static str {
        G::NAME
    }

    fn reset(&mut self) {
        self.prg_bank = 0;
        self.chr_bank_0_fd = 0;
        self.chr_bank_0_fe = 0;
        self.chr_bank_1_fd = 0;
        self.chr_bank_1_fe = 0;
        self.latch_0.store(false, Ordering::Relaxed);
        self.latch_1.store(false, Ordering::Relaxed);
    }

    fn clone_mapper(&self) -> Box<dyn Mapper> {
        Box::new(self.clone())
    }
}

/// MMC2 (mapper 9): Punch-Out!! 8 KiB switchable PRG bank.
pub type Mmc2 = MmcLatch<Mmc2Granularity>;
/// MMC4 (mapper 10): Fire Emblem/Famicom Wars, 16 KiB switchable PRG bank.
pub type Mmc4 = MmcLatch<Mmc4Granularity>;
