/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! T-state counting and the ULA contention model.
use core::num::{NonZeroU8, NonZeroU16};

use z80emu::{Clock, host::cycles::*};

/// A linear T-state timestamp type.
///
/// Timestamps count T-states from the start of the current frame. During a
/// frame the value stays within `[0, frame_tstates)`; an instruction that
/// crosses the frame boundary leaves an overshoot which the scheduler carries
/// over into the next frame.
pub type FTs = i32;

/// The number of pixel (paper) lines on every supported model.
pub const PAPER_LINE_COUNT: FTs = 192;

/// The delay table of the early ULA models (16k/48k/128k/+2).
///
/// Indexed by the low 3 bits of the contention phase; a phase with bit 7 set
/// is past the video fetch window and yields no delay.
pub static CONTENTION_EARLY: [u8; 8] = [6, 5, 4, 3, 2, 1, 0, 0];
/// The delay table of the +2A/+3 gate array which shifts the phase by 2.
pub static CONTENTION_LATE: [u8; 8] = [1, 0, 7, 6, 5, 4, 3, 2];

/// Per-model timing constants consumed by [FrameClock].
///
/// Built by [MachineProfile::frame_timings][crate::chip::profile::MachineProfile::frame_timings];
/// all contention windows derive from these values alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTimings {
    /// T-states per scan line.
    pub line_tstates: FTs,
    /// T-states per frame.
    pub frame_tstates: FTs,
    /// The T-state at which the delay pattern of the first paper line begins.
    pub contention_start: FTs,
    /// The 8 T-state delay pattern, `None` on models without contention.
    pub contention_table: Option<&'static [u8; 8]>,
    /// Whether internal (no-MREQ) cycles on a contended address are delayed.
    pub contend_internal: bool,
    /// Whether I/O cycles are subject to the ULA contention patterns.
    pub contend_io: bool,
}

impl FrameTimings {
    /// Returns the delay the ULA imposes on a contended access at `ts`.
    #[inline]
    pub fn contention_delay(&self, ts: FTs) -> FTs {
        if let Some(table) = self.contention_table {
            let delta = ts - self.contention_start;
            if delta >= 0 && delta < PAPER_LINE_COUNT * self.line_tstates {
                let phase = delta % self.line_tstates;
                if phase & !0x7f == 0 {
                    return table[(phase & 7) as usize] as FTs;
                }
            }
        }
        0
    }
}

/// Identifies which of the four 16K address slots are currently backed by
/// contended RAM banks.
///
/// The mask is derived from the paging state by
/// [BankedMemory::contention][crate::memory::BankedMemory::contention] and
/// must be refreshed on the clock whenever paging changes.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotContention {
    mask: u8,
}

impl SlotContention {
    /// No address is contended (Pentagon, Scorpion).
    pub const NONE: SlotContention = SlotContention { mask: 0 };
    /// Only the screen slot 0x4000..=0x7FFF is contended.
    pub const SLOT1: SlotContention = SlotContention { mask: 0b0010 };

    /// Builds a mask from per-slot flags, slot 0 first.
    pub fn from_slots(slots: [bool; 4]) -> Self {
        let mut mask = 0;
        for (slot, contended) in slots.iter().enumerate() {
            if *contended {
                mask |= 1 << slot;
            }
        }
        SlotContention { mask }
    }

    /// Returns `true` when the given address (or I/O port high byte) selects
    /// a contended bank.
    #[inline(always)]
    pub fn is_contended_address(self, address: u16) -> bool {
        self.mask & 1 << (address >> 14) != 0
    }
}

/// A frame-relative T-state counter implementing [z80emu::Clock].
///
/// Inserts the additional T-states imposed by the ULA when the CPU accesses
/// contended memory or I/O ports, according to [FrameTimings] and the current
/// [SlotContention]. Every inserted T-state is also added to a per-frame
/// accumulator so tests and debuggers can observe the exact penalty paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameClock {
    ts: FTs,
    timings: FrameTimings,
    contention: SlotContention,
    contention_acc: FTs,
}

impl FrameClock {
    pub fn new(timings: FrameTimings) -> Self {
        FrameClock {
            ts: 0,
            timings,
            contention: SlotContention::NONE,
            contention_acc: 0,
        }
    }

    /// The current timestamp.
    #[inline(always)]
    pub fn ts(&self) -> FTs {
        self.ts
    }

    /// Overrides the current timestamp.
    pub fn set_ts(&mut self, ts: FTs) {
        self.ts = ts;
    }

    #[inline(always)]
    pub fn timings(&self) -> &FrameTimings {
        &self.timings
    }

    /// Replaces the contention mask; to be called after any paging change.
    #[inline(always)]
    pub fn set_contention(&mut self, contention: SlotContention) {
        self.contention = contention;
    }

    #[inline(always)]
    pub fn contention(&self) -> SlotContention {
        self.contention
    }

    /// Returns `true` once the counter has reached the end of the frame.
    #[inline(always)]
    pub fn is_frame_over(&self) -> bool {
        self.ts >= self.timings.frame_tstates
    }

    /// Subtracts one frame from the counter, carrying the overshoot into the
    /// next frame, and clears the per-frame contention accumulator.
    ///
    /// A counter that went astray (e.g. set from a corrupted snapshot) is
    /// reset to the frame start.
    pub fn wrap_frame(&mut self) {
        if self.ts >= self.timings.frame_tstates {
            self.ts -= self.timings.frame_tstates;
        }
        if self.ts < 0 {
            self.ts = 0;
        }
        self.contention_acc = 0;
    }

    /// The total delay inserted by contention since the frame started.
    #[inline(always)]
    pub fn accumulated_contention(&self) -> FTs {
        self.contention_acc
    }

    /// Returns the delay a memory request at `address` would suffer now.
    #[inline]
    pub fn mreq_delay(&self, address: u16) -> FTs {
        if self.contention.is_contended_address(address) {
            self.timings.contention_delay(self.ts)
        }
        else {
            0
        }
    }

    #[inline]
    fn contend_mreq(&mut self, address: u16) {
        if self.contention.is_contended_address(address) {
            let delay = self.timings.contention_delay(self.ts);
            self.ts += delay;
            self.contention_acc += delay;
        }
    }

    /// Applies the contention delay at the current position, then advances
    /// the counter by `add_ts`.
    #[inline]
    fn tick_contended(&mut self, add_ts: FTs) {
        let delay = self.timings.contention_delay(self.ts);
        self.ts += delay + add_ts;
        self.contention_acc += delay;
    }
}

impl Clock for FrameClock {
    type Limit = FTs;
    type Timestamp = FTs;

    #[inline(always)]
    fn is_past_limit(&self, limit: Self::Limit) -> bool {
        self.ts >= limit
    }

    fn add_irq(&mut self, _pc: u16) -> FTs {
        self.ts += IRQ_ACK_CYCLE_TS as FTs;
        self.ts
    }

    fn add_no_mreq(&mut self, address: u16, add_ts: NonZeroU8) {
        if self.timings.contend_internal && self.contention.is_contended_address(address) {
            for _ in 0..add_ts.get() {
                self.tick_contended(1);
            }
        }
        else {
            self.ts += add_ts.get() as FTs;
        }
    }

    fn add_m1(&mut self, address: u16) -> FTs {
        self.contend_mreq(address);
        self.ts += M1_CYCLE_TS as FTs;
        self.ts
    }

    fn add_mreq(&mut self, address: u16) -> FTs {
        self.contend_mreq(address);
        self.ts += MEMRW_CYCLE_TS as FTs;
        self.ts
    }

    fn add_io(&mut self, port: u16) -> FTs {
        const IO_TAIL_TS: FTs = (IO_CYCLE_TS - IO_IORQ_LOW_TS) as FTs;
        let data_ts;
        if self.timings.contend_io {
            if self.contention.is_contended_address(port) {
                self.tick_contended(IO_IORQ_LOW_TS as FTs);
                data_ts = self.ts;
                if port & 1 == 0 {
                    // C:1, C:3
                    self.tick_contended(IO_TAIL_TS);
                }
                else {
                    // C:1, C:1, C:1, C:1
                    for _ in 0..IO_TAIL_TS {
                        self.tick_contended(1);
                    }
                }
            }
            else {
                self.ts += IO_IORQ_LOW_TS as FTs;
                data_ts = self.ts;
                if port & 1 == 0 {
                    // N:1, C:3
                    self.tick_contended(IO_TAIL_TS);
                }
                else {
                    // N:4
                    self.ts += IO_TAIL_TS;
                }
            }
        }
        else {
            self.ts += IO_IORQ_LOW_TS as FTs;
            data_ts = self.ts;
            self.ts += IO_TAIL_TS;
        }
        data_ts
    }

    fn add_wait_states(&mut self, _bus: u16, wait_states: NonZeroU16) {
        self.ts += wait_states.get() as FTs;
    }

    #[inline(always)]
    fn as_timestamp(&self) -> FTs {
        self.ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::profile::MachineModel;

    fn clock_48k() -> FrameClock {
        let mut clock = FrameClock::new(MachineModel::Spectrum48.profile().frame_timings());
        clock.set_contention(SlotContention::SLOT1);
        clock
    }

    #[test]
    fn contention_pattern_48k() {
        let timings = clock_48k().timings;
        let targets = [(14335, 14341), (14336, 14341), (14337, 14341),
                       (14338, 14341), (14339, 14341), (14340, 14341),
                       (14341, 14341), (14342, 14342)];
        for offset in (0..16).map(|x| x * 8) {
            for (testing, target) in targets.iter().copied() {
                let ts = testing + offset;
                assert_eq!(ts + timings.contention_delay(ts), target + offset);
            }
        }
        // before the window and in the line retrace no delay applies
        for ts in (14335 - 96..14335).chain(14335 + 128..14335 + 224) {
            assert_eq!(timings.contention_delay(ts), 0);
        }
        // past the last paper line no delay applies
        let past = 14335 + 192 * 224;
        assert_eq!(timings.contention_delay(past), 0);
    }

    #[test]
    fn contended_m1_applies_only_to_contended_banks() {
        let mut clock = clock_48k();
        clock.set_ts(14335);
        clock.add_m1(0x8000);
        assert_eq!(clock.ts(), 14339);
        assert_eq!(clock.accumulated_contention(), 0);
        let mut clock = clock_48k();
        clock.set_ts(14335);
        clock.add_m1(0x4000);
        assert_eq!(clock.ts(), 14345);
        assert_eq!(clock.accumulated_contention(), 6);
    }

    #[test]
    fn io_cycle_timestamp_is_the_data_tstate() {
        let mut clock = clock_48k();
        clock.set_ts(1000);
        let data_ts = clock.add_io(0x80FE);
        assert_eq!(data_ts, 1001);
        assert_eq!(clock.ts(), 1004);
    }

    #[test]
    fn io_contention_patterns() {
        // contended high byte, odd port: C:1, C:1, C:1, C:1
        let mut clock = clock_48k();
        clock.set_ts(14335);
        clock.add_io(0x40FF);
        assert_eq!(clock.ts(), 14335 + 6+1 + 0+1 + 6+1 + 0+1);
        // contended high byte, even port: C:1, C:3
        let mut clock = clock_48k();
        clock.set_ts(14335);
        clock.add_io(0x40FE);
        assert_eq!(clock.ts(), 14335 + 6+1 + 0+3);
        // uncontended high byte, even port: N:1, C:3
        let mut clock = clock_48k();
        clock.set_ts(14335);
        clock.add_io(0x80FE);
        assert_eq!(clock.ts(), 14335 + 1 + 5+3);
        // uncontended high byte, odd port: N:4
        let mut clock = clock_48k();
        clock.set_ts(14335);
        clock.add_io(0x80FF);
        assert_eq!(clock.ts(), 14339);
    }

    #[test]
    fn frame_wrapping_carries_the_overshoot() {
        let mut clock = clock_48k();
        clock.set_ts(69888 + 3);
        assert!(clock.is_frame_over());
        clock.wrap_frame();
        assert_eq!(clock.ts(), 3);
        assert!(!clock.is_frame_over());
    }
}
