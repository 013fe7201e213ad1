//! APU Delta Modulation Channel (DMC).
//!
//! Plays 1-bit delta-encoded PCM samples fetched via DMA from CPU memory.
//! This type only tracks timing and the delta output level; the memory
//! fetch itself is driven by the bus, which polls [`Dmc::needs_sample`] /
//! [`Dmc::sample_addr`] and supplies bytes back through
//! [`Dmc::fill_sample_buffer`] after paying the DMA stall cycles.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// DMC rate table (NTSC), in CPU cycles per timer tick.
const RATE_TABLE: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

/// Delta modulation channel.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dmc {
    /// IRQ-on-completion enable.
    irq_enabled: bool,
    /// Loop sample on completion.
    loop_enabled: bool,
    /// Index into `RATE_TABLE` ($4010 low nibble).
    rate_index: u8,
    /// Raw `$4012` register value.
    sample_address: u8,
    /// Raw `$4013` register value.
    sample_length: u8,
    /// Current DMA read address.
    current_address: u16,
    /// Bytes left to fetch for the current sample.
    bytes_remaining: u16,
    /// 8-bit sample buffer shifted out one bit per timer tick.
    sample_buffer: u8,
    /// Whether `sample_buffer` has been fully consumed.
    sample_buffer_empty: bool,
    /// Bits left to shift out of `sample_buffer`.
    bits_remaining: u8,
    /// 7-bit delta output level.
    output_level: u8,
    /// Timer period, from `RATE_TABLE[rate_index]`.
    timer_period: u16,
    /// Timer countdown.
    timer_counter: u16,
    /// IRQ pending flag.
    irq_flag: bool,
    /// Enabled flag (from `$4015`).
    enabled: bool,
}

impl Dmc {
    /// Create a new DMC channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            irq_enabled: false,
            loop_enabled: false,
            rate_index: 0,
            sample_address: 0,
            sample_length: 0,
            current_address: 0xC000,
            bytes_remaining: 0,
            sample_buffer: 0,
            sample_buffer_empty: true,
            bits_remaining: 0,
            output_level: 0,
            timer_period: RATE_TABLE[0],
            timer_counter: RATE_TABLE[0],
            irq_flag: false,
            enabled: false,
        }
    }

    /// Write to register `$4010` (IRQ enable, loop, rate index).
    pub fn write_ctrl(&mut self, value: u8) {
        self.irq_enabled = value & 0x80 != 0;
        self.loop_enabled = value & 0x40 != 0;
        self.rate_index = value & 0x0F;
        self.timer_period = RATE_TABLE[self.rate_index as usize];

        if !self.irq_enabled {
            self.irq_flag = false;
        }
    }

    /// Write to register `$4011` (direct load, 7-bit output level).
    pub fn write_direct_load(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    /// Write to register `$4012` (sample address = `$C000 + A*$40`).
    pub fn write_sample_address(&mut self, value: u8) {
        self.sample_address = value;
    }

    /// Write to register `$4013` (sample length = `L*$10 + 1` bytes).
    pub fn write_sample_length(&mut self, value: u8) {
        self.sample_length = value;
    }

    /// Set the enabled state (from `$4015`). Restarts sample playback if no
    /// bytes are currently pending; disabling clears the bytes remaining.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;

        if enabled {
            if self.bytes_remaining == 0 {
                self.restart_sample();
            }
        } else {
            self.bytes_remaining = 0;
        }
    }

    fn restart_sample(&mut self) {
        self.current_address = 0xC000 | (u16::from(self.sample_address) << 6);
        self.bytes_remaining = (u16::from(self.sample_length) << 4) | 1;
    }

    /// Clock the timer. Should be called every APU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer_counter == 0 {
            self.timer_counter = self.timer_period;

            if self.bits_remaining > 0 {
                self.clock_output_shifter();
            }
        } else {
            self.timer_counter -= 1;
        }
    }

    /// Process one bit from the sample buffer, or the silence bit if empty.
    fn clock_output_shifter(&mut self) {
        if self.sample_buffer_empty {
            if self.output_level >= 2 {
                self.output_level -= 2;
            }
        } else {
            if self.sample_buffer & 1 == 1 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
            self.sample_buffer >>= 1;
        }

        self.bits_remaining -= 1;
        if self.bits_remaining == 0 {
            self.sample_buffer_empty = true;
        }
    }

    /// True if the channel needs a sample byte fetched via DMA.
    #[must_use]
    pub fn needs_sample(&self) -> bool {
        self.sample_buffer_empty && self.bytes_remaining > 0
    }

    /// The CPU address the next DMA fetch should read from.
    #[must_use]
    pub fn sample_addr(&self) -> u16 {
        self.current_address
    }

    /// Supplies a DMA-fetched sample byte, advancing playback state.
    ///
    /// Address wraps `$FFFF -> $8000`, not `$0000`, matching hardware.
    pub fn fill_sample_buffer(&mut self, byte: u8) {
        self.sample_buffer = byte;
        self.sample_buffer_empty = false;
        self.bits_remaining = 8;

        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };
        self.bytes_remaining -= 1;

        if self.bytes_remaining == 0 {
            if self.loop_enabled {
                self.restart_sample();
            } else if self.irq_enabled {
                self.irq_flag = true;
            }
        }
    }

    /// Check if a sample is currently playing (for `$4015` status read).
    #[must_use]
    pub fn active(&self) -> bool {
        self.bytes_remaining > 0
    }

    /// Get the current output value (0-127). Zero if disabled.
    #[must_use]
    pub fn output(&self) -> u8 {
        if self.enabled { self.output_level } else { 0 }
    }

    /// Check if the DMC IRQ flag is set.
    #[must_use]
    pub fn irq_pending(&self) -> bool {
        self.irq_flag
    }

    /// Bytes remaining in the current sample.
    #[must_use]
    pub fn bytes_remaining(&self) -> u16 {
        self.bytes_remaining
    }

    /// Walk DMC state with a save-state cursor.
    pub(crate) fn dump(&mut self, cursor: &mut nescore_savestate::Cursor<'_>) {
        cursor.bool(&mut self.irq_enabled);
        cursor.bool(&mut self.loop_enabled);
        cursor.u8(&mut self.rate_index);
        cursor.u8(&mut self.sample_address);
        cursor.u8(&mut self.sample_length);
        cursor.u16(&mut self.current_address);
        cursor.u16(&mut self.bytes_remaining);
        cursor.u8(&mut self.sample_buffer);
        cursor.bool(&mut self.sample_buffer_empty);
        cursor.u8(&mut self.bits_remaining);
        cursor.u8(&mut self.output_level);
        cursor.u16(&mut self.timer_period);
        cursor.u16(&mut self.timer_counter);
        cursor.bool(&mut self.irq_flag);
        cursor.bool(&mut self.enabled);
    }
}

impl Default for Dmc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_load_sets_output_level() {
        let mut dmc = Dmc::new();
        dmc.set_enabled(true);
        dmc.write_direct_load(0x7F);
        assert_eq!(dmc.output(), 127);

        // Only 7 bits used.
        dmc.write_direct_load(0xFF);
        assert_eq!(dmc.output(), 127);
    }

    #[test]
    fn rate_index_selects_timer_period() {
        let mut dmc = Dmc::new();
        dmc.write_ctrl(0x0F);
        assert_eq!(dmc.timer_period, RATE_TABLE[15]);

        dmc.write_ctrl(0x00);
        assert_eq!(dmc.timer_period, RATE_TABLE[0]);
    }

    #[test]
    fn clearing_irq_enable_clears_pending_flag() {
        let mut dmc = Dmc::new();
        dmc.irq_flag = true;
        dmc.write_ctrl(0x00); // IRQ disabled
        assert!(!dmc.irq_pending());
    }

    #[test]
    fn sample_address_and_length_decode() {
        let mut dmc = Dmc::new();
        dmc.write_sample_address(0x01);
        dmc.write_sample_length(0x01);
        dmc.set_enabled(true);

        assert_eq!(dmc.current_address, 0xC040);
        assert_eq!(dmc.bytes_remaining, 17);
    }

    #[test]
    fn enabling_starts_sample_when_idle() {
        let mut dmc = Dmc::new();
        dmc.write_sample_address(0x00);
        dmc.write_sample_length(0x10);
        assert_eq!(dmc.bytes_remaining, 0);

        dmc.set_enabled(true);
        assert_eq!(dmc.bytes_remaining, 257);
        assert_eq!(dmc.current_address, 0xC000);
    }

    #[test]
    fn disabling_clears_bytes_remaining() {
        let mut dmc = Dmc::new();
        dmc.set_enabled(true);
        dmc.bytes_remaining = 100;

        dmc.set_enabled(false);
        assert_eq!(dmc.bytes_remaining, 0);
        assert!(!dmc.active());
    }

    #[test]
    fn needs_sample_until_buffer_filled() {
        let mut dmc = Dmc::new();
        dmc.set_enabled(true);
        dmc.write_sample_length(0x00); // 1 byte
        dmc.set_enabled(true);
        assert!(dmc.needs_sample());

        dmc.fill_sample_buffer(0xAA);
        assert!(!dmc.needs_sample());
    }

    #[test]
    fn fill_sample_wraps_address_and_decrements_bytes() {
        let mut dmc = Dmc::new();
        dmc.current_address = 0xFFFF;
        dmc.bytes_remaining = 2;
        dmc.enabled = true;

        dmc.fill_sample_buffer(0xAA);
        assert_eq!(dmc.current_address, 0x8000);
        assert_eq!(dmc.bytes_remaining, 1);
    }

    #[test]
    fn sample_completion_sets_irq_without_loop() {
        let mut dmc = Dmc::new();
        dmc.write_ctrl(0x80); // IRQ enabled, no loop
        dmc.bytes_remaining = 1;
        dmc.enabled = true;

        dmc.fill_sample_buffer(0x00);
        assert_eq!(dmc.bytes_remaining, 0);
        assert!(dmc.irq_pending());
    }

    #[test]
    fn sample_completion_restarts_when_looping() {
        let mut dmc = Dmc::new();
        dmc.write_ctrl(0x40); // loop, no IRQ
        dmc.write_sample_address(0x01);
        dmc.write_sample_length(0x01);
        dmc.bytes_remaining = 1;
        dmc.current_address = 0xD000;
        dmc.enabled = true;

        dmc.fill_sample_buffer(0x00);
        assert_eq!(dmc.bytes_remaining, 17);
        assert_eq!(dmc.current_address, 0xC040);
        assert!(!dmc.irq_pending());
    }

    #[test]
    fn output_shifter_increments_and_decrements() {
        let mut dmc = Dmc::new();
        dmc.output_level = 64;
        dmc.fill_sample_buffer(0xFF);

        dmc.clock_output_shifter();
        assert_eq!(dmc.output_level, 66);

        dmc.output_level = 64;
        dmc.fill_sample_buffer(0x00);
        dmc.clock_output_shifter();
        assert_eq!(dmc.output_level, 62);
    }

    #[test]
    fn output_level_clamps_at_bounds() {
        let mut dmc = Dmc::new();
        dmc.output_level = 127;
        dmc.fill_sample_buffer(0xFF);
        dmc.clock_output_shifter();
        assert_eq!(dmc.output_level, 127);

        dmc.output_level = 0;
        dmc.fill_sample_buffer(0x00);
        dmc.clock_output_shifter();
        assert_eq!(dmc.output_level, 0);
    }

    #[test]
    fn timer_clocking_reloads_period() {
        let mut dmc = Dmc::new();
        dmc.write_ctrl(0x0F); // fastest rate, 54 cycles
        dmc.timer_counter = 2;
        dmc.bits_remaining = 0;

        dmc.clock_timer();
        assert_eq!(dmc.timer_counter, 1);
        dmc.clock_timer();
        assert_eq!(dmc.timer_counter, 0);
        dmc.clock_timer();
        assert_eq!(dmc.timer_counter, 54);
    }
}
