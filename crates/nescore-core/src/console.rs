//! NES Console Implementation.
//!
//! The Console struct provides the high-level emulation API, managing the
//! CPU, PPU, APU, and mapper integration with proper timing.

use crate::bus::{ControllerState, NesBus};
use crate::save_state::SaveStateError;
use nescore_cpu::{Cpu, StatusFlags};
use nescore_mappers::{MapperChip, Rom, RomError, create_mapper};
use nescore_savestate::{Cursor, Dump};

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

/// NES emulation timing constants.
pub mod timing {
    /// Master clock frequency (NTSC).
    pub const MASTER_CLOCK_NTSC: u32 = 21_477_272;
    /// CPU clock frequency (NTSC).
    pub const CPU_CLOCK_NTSC: u32 = MASTER_CLOCK_NTSC / 12;
    /// PPU clock frequency (NTSC).
    pub const PPU_CLOCK_NTSC: u32 = MASTER_CLOCK_NTSC / 4;
    /// Nominal CPU cycles per frame (NTSC), for informational/timing
    /// purposes only. The real frame boundary — and what `step_frame`
    /// actually stops on — is the PPU's own dot-0-of-pre-render
    /// transition; a true frame is ~29,780.67 cycles and shortens by one
    /// PPU dot on odd frames while rendering is enabled.
    pub const CPU_CYCLES_PER_FRAME: u32 = 29_780;
    /// PPU dots per scanline.
    pub const PPU_DOTS_PER_SCANLINE: u16 = 341;
    /// Total scanlines (including vblank).
    pub const PPU_SCANLINES: u16 = 262;
    /// Target frame rate (NTSC).
    pub const FRAME_RATE_NTSC: f64 = 60.0988;
}

/// Console error type.
#[derive(Debug, Clone)]
pub enum ConsoleError {
    /// ROM loading error.
    RomError(RomError),
    /// Invalid state.
    InvalidState(String),
}

impl From<RomError> for ConsoleError {
    fn from(err: RomError) -> Self {
        Self::RomError(err)
    }
}

impl core::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::RomError(e) => write!(f, "ROM error: {e}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConsoleError {}

/// NES console emulator.
pub struct Console {
    /// 6502 CPU.
    cpu: Cpu,
    /// System bus (PPU, APU, mapper, RAM).
    bus: NesBus,
    /// Frame buffer (240×256×3 bytes, row-major RGB).
    framebuffer: Vec<u8>,
    /// Audio sample buffer.
    audio_buffer: Vec<f32>,
    /// Total CPU cycles executed.
    total_cycles: u64,
    /// Frame counter.
    frame_count: u64,
    /// Is emulation running?
    running: bool,
    /// Set by `step_components` when a PPU dot just ticked crosses a
    /// frame boundary; consumed and cleared by `step_frame`.
    frame_complete: bool,
}

impl Console {
    /// Create a new console with the given ROM.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn new(rom_data: &[u8]) -> Result<Self, ConsoleError> {
        let rom = Rom::load(rom_data)?;
        let mapper = create_mapper(&rom)?;
        Self::with_mapper(mapper)
    }

    /// Create a new console from ROM bytes (alias for `new`).
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn from_rom_bytes(rom_data: &[u8]) -> Result<Self, ConsoleError> {
        Self::new(rom_data)
    }

    /// Create a new console from ROM bytes with sample rate configuration.
    ///
    /// Note: The sample rate is currently unused as the APU handles resampling internally.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM cannot be loaded or uses an unsupported mapper.
    pub fn from_rom_bytes_with_sample_rate(
        rom_data: &[u8],
        _sample_rate: u32,
    ) -> Result<Self, ConsoleError> {
        Self::new(rom_data)
    }

    /// Create a console with a pre-created mapper.
    ///
    /// # Errors
    ///
    /// Returns an error if the console cannot be initialized.
    pub fn with_mapper(mapper: MapperChip) -> Result<Self, ConsoleError> {
        let bus = NesBus::new(mapper);
        let cpu = Cpu::new();

        Ok(Self {
            cpu,
            bus,
            framebuffer: vec![0; crate::screen::FRAMEBUFFER_SIZE],
            audio_buffer: Vec::with_capacity(2048),
            total_cycles: 0,
            frame_count: 0,
            running: true,
            frame_complete: false,
        })
    }

    /// Reset the console to initial state.
    pub fn reset(&mut self) {
        self.cpu.reset(&mut self.bus);
        self.bus.reset();
        self.total_cycles = 0;
        self.running = true;
        self.frame_complete = false;
    }

    /// Power on the console (cold boot).
    pub fn power_on(&mut self) {
        self.reset();
    }

    /// Run emulation for one CPU instruction (or one stall/DMA cycle).
    ///
    /// Returns the number of CPU cycles executed. Sets the internal
    /// frame-complete latch (consumed by `step_frame`) if any of the PPU
    /// dots ticked during this call crossed a frame boundary.
    pub fn step(&mut self) -> u16 {
        if !self.running {
            return 0;
        }

        // Handle DMC DMA stall
        if self.bus.dmc_stall_active() {
            self.bus.decrement_dmc_stall();
            self.frame_complete |= self.step_components(1);
            self.bus.add_cpu_cycles(1);
            self.total_cycles += 1;
            return 1;
        }

        // Handle OAM DMA
        if self.bus.oam_dma_pending() {
            let dma_cycles = self.bus.execute_oam_dma();
            self.frame_complete |= self.step_components(dma_cycles);
            self.total_cycles += u64::from(dma_cycles);
            return dma_cycles;
        }

        // Handle interrupts
        if self.bus.nmi_pending() {
            self.bus.acknowledge_nmi();
            self.cpu.trigger_nmi();
        } else if self.bus.irq_pending() && !self.cpu.status().contains(StatusFlags::INTERRUPT_DISABLE) {
            self.cpu.set_irq(true);
        }

        // Execute one CPU instruction
        let cycles = self.cpu.step(&mut self.bus);
        self.frame_complete |= self.step_components(u16::from(cycles));
        self.bus.add_cpu_cycles(cycles);
        self.total_cycles += u64::from(cycles);

        u16::from(cycles)
    }

    /// Step PPU and APU for the given number of CPU cycles.
    ///
    /// Returns true if any of the PPU dots ticked crossed a frame
    /// boundary (the transition past dot 0 of the pre-render scanline).
    fn step_components(&mut self, cpu_cycles: u16) -> bool {
        let mut frame_complete = false;

        for _ in 0..cpu_cycles {
            // Step PPU (3 dots per CPU cycle)
            let (dot_frame_complete, _nmi) = self.bus.step_ppu();
            if dot_frame_complete {
                frame_complete = true;
            }

            // Step APU (1:1 with CPU)
            if let Some(sample) = self.bus.step_apu() {
                self.audio_buffer.push(sample);
            }
        }

        frame_complete
    }

    /// Run emulation for one frame, stopping at the PPU-defined frame
    /// boundary (the transition past dot 0 of the pre-render scanline)
    /// rather than a fixed CPU cycle count.
    ///
    /// Returns the actual number of CPU cycles executed.
    pub fn step_frame(&mut self) -> u64 {
        let start_cycles = self.total_cycles;
        self.frame_complete = false;

        while self.running && !self.frame_complete {
            self.step();
        }

        // Copy PPU framebuffer
        self.update_framebuffer();
        self.frame_count += 1;

        self.total_cycles - start_cycles
    }

    /// Run emulation for one frame with cycle-accurate timing.
    ///
    /// This is an alias for `step_frame()` for API compatibility.
    /// Returns the actual number of CPU cycles executed.
    pub fn step_frame_accurate(&mut self) -> u64 {
        self.step_frame()
    }

    /// Run emulation for `frames` whole frames and return the resulting
    /// frame buffer (240×256×3, row-major RGB). Stops early, without
    /// error, if the CPU crashes partway through.
    pub fn step_frames(&mut self, frames: u32) -> &[u8] {
        for _ in 0..frames {
            if self.has_crashed() {
                break;
            }
            self.step_frame();
        }
        self.framebuffer()
    }

    /// Read a byte through the CPU's bus, with the same side effects a
    /// real CPU read has (PPU register reads, mapper-visible accesses).
    pub fn read(&mut self, addr: u16) -> u8 {
        use nescore_cpu::Bus;
        self.bus.read(addr)
    }

    /// Write a byte through the CPU's bus, with the same side effects a
    /// real CPU write has.
    pub fn write(&mut self, addr: u16, val: u8) {
        use nescore_cpu::Bus;
        self.bus.write(addr, val);
    }

    /// The console's 2 KiB of internal work RAM.
    #[must_use]
    pub fn get_all_ram(&self) -> &[u8; 2048] {
        &self.bus.ram
    }

    /// Whether the CPU has executed a `KIL`-class opcode and jammed.
    /// Stays true until `reset` or `load`.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.cpu.is_jammed()
    }

    /// Walk the CPU and bus state trees in the same fixed order `save`
    /// and `load` both use. The order is the save-state format.
    fn dump_all(&mut self, cursor: &mut Cursor<'_>) {
        self.cpu.dump(cursor);
        self.bus.dump(cursor);
    }

    /// Serialize the complete emulator state into a freshly allocated
    /// buffer. The buffer's size depends on this ROM's CHR-RAM presence
    /// and PRG-RAM size, so it is only valid for this handle.
    #[must_use]
    pub fn save(&mut self) -> Vec<u8> {
        let size = {
            let mut sizer = Cursor::for_size();
            self.dump_all(&mut sizer);
            sizer.position()
        };

        let mut buf = vec![0u8; size];
        let mut cursor = Cursor::for_write(&mut buf);
        self.dump_all(&mut cursor);
        buf
    }

    /// Restore complete emulator state from a buffer previously produced
    /// by [`Console::save`] on this same handle, and clear the crash flag.
    ///
    /// # Errors
    ///
    /// Returns [`SaveStateError::InvalidSaveState`] if `buf`'s length
    /// doesn't match this handle's current state-tree size. The handle is
    /// left unchanged in that case.
    pub fn load(&mut self, buf: &[u8]) -> Result<(), SaveStateError> {
        let expected = {
            let mut sizer = Cursor::for_size();
            self.dump_all(&mut sizer);
            sizer.position()
        };

        if buf.len() != expected {
            return Err(SaveStateError::InvalidSaveState {
                expected,
                actual: buf.len(),
            });
        }

        let mut owned = buf.to_vec();
        let mut cursor = Cursor::for_read(&mut owned);
        self.dump_all(&mut cursor);

        self.cpu.jammed = false;
        self.running = true;
        Ok(())
    }

    /// Update the framebuffer from PPU output.
    fn update_framebuffer(&mut self) {
        let ppu_buffer = self.bus.ppu.frame_buffer();

        // Convert PPU palette indices to row-major RGB.
        for (i, &palette_idx) in ppu_buffer.iter().enumerate() {
            let rgb = crate::palette::NES_PALETTE[palette_idx as usize & 0x3F];
            let offset = i * 3;
            self.framebuffer[offset] = rgb.0; // R
            self.framebuffer[offset + 1] = rgb.1; // G
            self.framebuffer[offset + 2] = rgb.2; // B
        }
    }

    /// Get the current framebuffer (240×256×3 bytes, row-major RGB).
    #[must_use]
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    /// Take the audio buffer (drains accumulated samples).
    pub fn take_audio(&mut self) -> Vec<f32> {
        core::mem::take(&mut self.audio_buffer)
    }

    /// Get the audio buffer without draining.
    #[must_use]
    pub fn audio_buffer(&self) -> &[f32] {
        &self.audio_buffer
    }

    /// Get audio samples (alias for `audio_buffer`).
    #[must_use]
    pub fn audio_samples(&self) -> &[f32] {
        &self.audio_buffer
    }

    /// Clear the audio sample buffer.
    pub fn clear_audio_samples(&mut self) {
        self.audio_buffer.clear();
    }

    /// Set controller 1 state from button byte.
    pub fn set_controller_1(&mut self, buttons: u8) {
        self.bus.controller1 = ControllerState { buttons };
    }

    /// Set controller 2 state from button byte.
    pub fn set_controller_2(&mut self, buttons: u8) {
        self.bus.controller2 = ControllerState { buttons };
    }

    /// Set controller 1 state.
    pub fn set_controller1(&mut self, state: ControllerState) {
        self.bus.controller1 = state;
    }

    /// Set controller 2 state.
    pub fn set_controller2(&mut self, state: ControllerState) {
        self.bus.controller2 = state;
    }

    /// Get controller 1 state.
    #[must_use]
    pub fn controller1(&self) -> ControllerState {
        self.bus.controller1
    }

    /// Get controller 2 state.
    #[must_use]
    pub fn controller2(&self) -> ControllerState {
        self.bus.controller2
    }

    /// Press or release a single button on controller 1.
    pub fn set_button_1(&mut self, button: crate::Button, pressed: bool) {
        set_button(&mut self.bus.controller1, button, pressed);
    }

    /// Press or release a single button on controller 2.
    pub fn set_button_2(&mut self, button: crate::Button, pressed: bool) {
        set_button(&mut self.bus.controller2, button, pressed);
    }

    /// Get the total CPU cycles executed.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Get the frame count.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Check if emulation is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pause emulation.
    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Resume emulation.
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Get a reference to the CPU for debugging.
    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get a reference to the PPU for debugging.
    #[must_use]
    pub fn ppu(&self) -> &nescore_ppu::Ppu {
        &self.bus.ppu
    }

    /// Get a reference to the APU for debugging.
    #[must_use]
    pub fn apu(&self) -> &nescore_apu::Apu {
        &self.bus.apu
    }

    /// Get the total CPU cycles (alias for `total_cycles`).
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Peek at memory without side effects.
    ///
    /// This is useful for debugging/display purposes where we don't want
    /// to trigger PPU register side effects or mapper state changes.
    #[must_use]
    pub fn peek_memory(&self, addr: u16) -> u8 {
        self.bus.peek(addr)
    }

    /// Get a reference to the bus for debugging.
    #[must_use]
    pub fn bus(&self) -> &NesBus {
        &self.bus
    }

    /// Get a mutable reference to the bus.
    pub fn bus_mut(&mut self) -> &mut NesBus {
        &mut self.bus
    }

    /// Get the mapper number.
    #[must_use]
    pub fn mapper_number(&self) -> u16 {
        self.bus.mapper.mapper_number()
    }

    /// Get the mapper name.
    #[must_use]
    pub fn mapper_name(&self) -> &'static str {
        self.bus.mapper.mapper_name()
    }

    /// Check if the ROM has battery-backed RAM.
    #[must_use]
    pub fn has_battery(&self) -> bool {
        self.bus.mapper.has_battery()
    }

    /// Get battery-backed RAM for saving.
    #[must_use]
    pub fn battery_ram(&self) -> Option<&[u8]> {
        self.bus.mapper.battery_ram()
    }

    /// Load battery-backed RAM.
    pub fn load_battery_ram(&mut self, data: &[u8]) {
        self.bus.mapper.set_battery_ram(data);
    }
}

fn set_button(state: &mut ControllerState, button: crate::Button, pressed: bool) {
    let mask = button as u8;
    if pressed {
        state.buttons |= mask;
    } else {
        state.buttons &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nescore_mappers::{MapperChip, Mirroring, Nrom, RomHeader};

    #[cfg(not(feature = "std"))]
    use alloc::{vec, vec::Vec};

    fn create_test_console() -> Console {
        let rom = Rom {
            header: RomHeader {
                prg_rom_size: 32768,
                chr_rom_size: 8192,
                mapper_number: 0,
                submapper: 0,
                mirroring: Mirroring::Vertical,
                has_battery: false,
                has_trainer: false,
                nes2_format: false,
                prg_ram_size: 8192,
                prg_nvram_size: 0,
                chr_ram_size: 0,
                chr_nvram_size: 0,
            },
            // Simple program: NOP loop at $8000
            prg_rom: {
                let mut prg = vec![0xEA; 32768]; // Fill with NOPs
                // Reset vector at $FFFC points to $8000
                prg[0x7FFC] = 0x00;
                prg[0x7FFD] = 0x80;
                prg
            },
            chr_rom: vec![0; 8192],
            trainer: None,
        };
        Console::with_mapper(MapperChip::Nrom(Nrom::new(&rom))).unwrap()
    }

    #[test]
    fn test_console_creation() {
        let console = create_test_console();
        assert_eq!(console.mapper_number(), 0);
        assert_eq!(console.mapper_name(), "NROM");
    }

    #[test]
    fn test_console_step() {
        let mut console = create_test_console();
        console.reset();

        let cycles = console.step();
        assert!(cycles > 0);
        assert!(console.total_cycles() > 0);
    }

    #[test]
    fn test_console_framebuffer() {
        let console = create_test_console();
        let fb = console.framebuffer();
        assert_eq!(fb.len(), 240 * 256 * 3);
    }

    #[test]
    fn test_console_pause_resume() {
        let mut console = create_test_console();
        assert!(console.is_running());

        console.pause();
        assert!(!console.is_running());

        console.resume();
        assert!(console.is_running());
    }

    #[test]
    fn test_controller_state() {
        let mut console = create_test_console();

        let state = ControllerState {
            buttons: ControllerState::A | ControllerState::START,
        };
        console.set_controller1(state);

        assert_eq!(console.controller1().buttons, 0x09);
    }

    #[test]
    fn test_console_reset() {
        let mut console = create_test_console();

        // Run some cycles
        for _ in 0..100 {
            console.step();
        }

        let cycles_before = console.total_cycles();
        assert!(cycles_before > 0);

        console.reset();
        assert_eq!(console.total_cycles(), 0);
    }

    #[test]
    fn test_save_load_round_trip_is_noop() {
        let mut console = create_test_console();
        console.reset();

        for _ in 0..500 {
            console.step();
        }

        let state = console.save();
        let before = console.save();

        console.load(&state).unwrap();
        let after = console.save();

        assert_eq!(before, after);
    }

    #[test]
    fn test_load_rejects_wrong_length_buffer() {
        let mut console = create_test_console();
        console.reset();

        let mut bad = console.save();
        bad.push(0);

        let cycles_before = console.total_cycles();
        let err = console.load(&bad).unwrap_err();
        assert!(matches!(err, SaveStateError::InvalidSaveState { .. }));

        // Handle state is unchanged by a rejected load.
        assert_eq!(console.total_cycles(), cycles_before);
    }

    #[test]
    fn test_get_all_ram_is_2048_bytes_and_reflects_writes() {
        let mut console = create_test_console();
        console.reset();

        console.write(0x0042, 0xAB);
        assert_eq!(console.get_all_ram().len(), 2048);
        assert_eq!(console.get_all_ram()[0x0042], 0xAB);
    }

    #[test]
    fn test_has_crashed_initially_false() {
        let console = create_test_console();
        assert!(!console.has_crashed());
    }

    #[test]
    fn test_step_frames_stops_after_requested_count() {
        let mut console = create_test_console();
        console.reset();

        let frame_before = console.frame_count();
        console.step_frames(2);
        assert_eq!(console.frame_count(), frame_before + 2);
    }
}
