//! APU Triangle Channel.
//!
//! The triangle channel generates a fixed-volume 32-step triangle wave. It
//! has no envelope; output is gated by the usual length counter plus a
//! linear counter that is reloaded from register `$4008` each time the
//! timer high byte (`$400B`) is written.

use crate::{length_counter::LengthCounter, timer::Timer};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Triangle wave sequence (32 steps): descends 15..0, then ascends 0..15.
const SEQUENCE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15,
];

/// Triangle channel.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Triangle {
    /// Length counter (also halted by the linear counter's control flag).
    length_counter: LengthCounter,
    /// Timer driving the sequencer.
    timer: Timer,
    /// Current position in `SEQUENCE` (0-31).
    sequencer: u8,
    /// Linear counter (7-bit).
    linear_counter: u8,
    /// Value loaded into the linear counter on reload.
    linear_reload: u8,
    /// Control flag: halts the length counter and holds the linear reload.
    control_flag: bool,
    /// Set by a `$400B` write; consumed on the next linear counter clock.
    linear_reload_flag: bool,
}

impl Triangle {
    /// Create a new triangle channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            length_counter: LengthCounter::new(),
            timer: Timer::new(),
            sequencer: 0,
            linear_counter: 0,
            linear_reload: 0,
            control_flag: false,
            linear_reload_flag: false,
        }
    }

    /// Write to register `$4008` (control flag, linear counter reload value).
    pub fn write_linear_counter(&mut self, value: u8) {
        self.control_flag = value & 0x80 != 0;
        self.linear_reload = value & 0x7F;
        self.length_counter.set_halt(self.control_flag);
    }

    /// Write to register `$400A` (timer low byte).
    pub fn write_timer_lo(&mut self, value: u8) {
        self.timer.set_period_lo(value);
    }

    /// Write to register `$400B` (length counter load, timer high byte).
    pub fn write_timer_hi(&mut self, value: u8) {
        self.timer.set_period_hi(value);
        self.length_counter.load(value >> 3);
        self.linear_reload_flag = true;
    }

    /// Set the enabled state (from `$4015`).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.length_counter.set_enabled(enabled);
    }

    /// Check if the channel is active (length counter > 0).
    #[must_use]
    pub fn active(&self) -> bool {
        self.length_counter.active()
    }

    /// Clock the timer. Should be called every CPU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer.clock() && self.length_counter.active() && self.linear_counter > 0 {
            self.sequencer = (self.sequencer + 1) % 32;
        }
    }

    /// Clock the linear counter. Should be called on quarter frames.
    pub fn clock_linear_counter(&mut self) {
        if self.linear_reload_flag {
            self.linear_counter = self.linear_reload;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }

        if !self.control_flag {
            self.linear_reload_flag = false;
        }
    }

    /// Clock the length counter. Should be called on half frames.
    pub fn clock_length(&mut self) {
        self.length_counter.clock();
    }

    /// Get the current output value (0-15).
    #[must_use]
    pub fn output(&self) -> u8 {
        if !self.length_counter.active() || self.linear_counter == 0 {
            return 0;
        }

        // Silencing ultrasonic periods avoids an audible click some games
        // trigger by parking the timer at 0 or 1.
        if self.timer.period() < 2 {
            return 0;
        }

        SEQUENCE[self.sequencer as usize]
    }

    /// Get the length counter value.
    #[must_use]
    pub fn length_counter_value(&self) -> u8 {
        self.length_counter.value()
    }

    /// Walk triangle channel state with a save-state cursor.
    pub(crate) fn dump(&mut self, cursor: &mut nescore_savestate::Cursor<'_>) {
        self.length_counter.dump(cursor);
        self.timer.dump(cursor);
        cursor.u8(&mut self.sequencer);
        cursor.u8(&mut self.linear_counter);
        cursor.u8(&mut self.linear_reload);
        cursor.bool(&mut self.control_flag);
        cursor.bool(&mut self.linear_reload_flag);
    }
}

impl Default for Triangle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_a_symmetric_triangle() {
        for i in 0..16 {
            assert_eq!(SEQUENCE[i], 15 - i as u8);
        }
        for i in 16..32 {
            assert_eq!(SEQUENCE[i], (i - 16) as u8);
        }
    }

    #[test]
    fn silent_until_enabled_with_counters_loaded() {
        let mut t = Triangle::new();
        t.write_timer_lo(100);
        t.write_timer_hi(0x08);
        assert_eq!(t.output(), 0);

        t.set_enabled(true);
        t.write_timer_hi(0x08); // reload length counter now that it's enabled
        t.write_linear_counter(0x7F); // control=0, reload=127
        t.clock_linear_counter(); // consumes the reload flag set above
        assert!(t.active());
        assert!(t.output() > 0);
    }

    #[test]
    fn linear_counter_reloads_and_counts_down() {
        let mut t = Triangle::new();
        t.set_enabled(true);
        t.write_timer_hi(0x08);

        t.write_linear_counter(0x05); // control=0, reload=5
        t.write_timer_hi(0x08); // sets linear_reload_flag

        t.clock_linear_counter();
        assert_eq!(t.linear_counter, 5);
        assert!(!t.linear_reload_flag); // cleared since control flag is 0

        t.clock_linear_counter();
        assert_eq!(t.linear_counter, 4);
    }

    #[test]
    fn control_flag_holds_the_reload_flag_set() {
        let mut t = Triangle::new();
        t.write_linear_counter(0x85); // control=1, reload=5
        t.write_timer_hi(0x00);

        for _ in 0..10 {
            t.clock_linear_counter();
        }
        assert_eq!(t.linear_counter, 5);
        assert!(t.linear_reload_flag);
    }

    #[test]
    fn ultrasonic_period_is_silenced() {
        let mut t = Triangle::new();
        t.set_enabled(true);
        t.write_timer_hi(0x08);
        t.linear_counter = 10;

        t.write_timer_lo(1);
        t.write_timer_hi(0x00);
        assert_eq!(t.output(), 0);
    }

    #[test]
    fn sequencer_wraps_at_32() {
        let mut t = Triangle::new();
        t.set_enabled(true);
        t.write_timer_hi(0x08);
        t.linear_counter = 10;
        t.sequencer = 31;
        t.write_timer_lo(0);
        t.write_timer_hi(0x00);

        t.clock_timer();
        assert_eq!(t.sequencer, 0);
    }

    #[test]
    fn disabling_clears_length_counter() {
        let mut t = Triangle::new();
        t.set_enabled(true);
        t.write_timer_hi(0x08);
        assert!(t.active());

        t.set_enabled(false);
        assert!(!t.active());
    }
}
