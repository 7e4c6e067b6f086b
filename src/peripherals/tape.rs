/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The tape player: EAR input edges and the instant-load ROM trap.
use core::num::{NonZeroU32, Wrapping};
use std::collections::VecDeque;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use z80emu::{Cpu, CpuFlags, Prefix, StkReg16};

use crate::clock::FTs;
use crate::memory::BankedMemory;

/// The entry address of the 48k BASIC ROM tape loading routine.
pub const LD_BYTES_TRAP: u16 = 0x0556;

/// Provides tape blocks for the instant-load trap.
///
/// Tape file parsing is not part of this crate; an implementation feeds raw
/// blocks (flag byte, data, checksum) in tape order.
pub trait TapeAccess {
    /// The next block on the tape, or `None` past the end.
    fn next_block(&mut self) -> Option<Vec<u8>>;
}

/// Replays tape pulses as EAR input edge transitions.
///
/// Pulses are buffered as ∆T intervals after which the EAR level toggles.
/// The player is fast-forwarded to the machine's T-state whenever the CPU
/// probes the EAR bit, and once more when the frame closes; consumed edges
/// are recorded for the audio sink.
#[derive(Clone, Debug, Default)]
pub struct TapePlayer {
    ear_in: bool,
    pulses: VecDeque<u32>,
    /// The frame T-state of the most recently consumed edge; may be
    /// negative right after a frame wrap.
    last_edge: FTs,
    edges: Vec<(FTs, bool)>,
    read_count: Wrapping<u32>,
}

impl TapePlayer {
    /// The current EAR level without advancing the player.
    #[inline]
    pub fn ear_level(&self) -> bool {
        self.ear_in
    }

    /// Returns `true` while buffered pulses remain.
    #[inline]
    pub fn is_playing(&self) -> bool {
        !self.pulses.is_empty()
    }

    /// Appends EAR toggle intervals measured in ∆ T-states.
    pub fn feed_pulses<I: Iterator<Item=NonZeroU32>>(&mut self, pulses: I) {
        self.pulses.extend(pulses.map(NonZeroU32::get));
    }

    /// Sets the EAR level after the provided interval counted from the last
    /// recorded change.
    pub fn set_ear_in(&mut self, ear_in: bool, delta_fts: u32) {
        let pending_level = self.ear_in ^ (self.pulses.len() & 1 == 1);
        if pending_level != ear_in {
            self.pulses.push_back(delta_fts.max(1));
        }
    }

    /// Drops all buffered pulses, forcing the EAR level.
    pub fn purge(&mut self, ear_in: bool) {
        self.pulses.clear();
        self.ear_in = ear_in;
    }

    /// Advances the player to `ts`, consuming due edges.
    pub fn update_to(&mut self, ts: FTs) {
        while let Some(&delta) = self.pulses.front() {
            let edge_ts = self.last_edge + delta as FTs;
            if edge_ts > ts {
                break;
            }
            self.pulses.pop_front();
            self.ear_in = !self.ear_in;
            self.last_edge = edge_ts;
            self.edges.push((edge_ts, self.ear_in));
        }
    }

    /// Probes the EAR level at `ts`, counting the read.
    pub fn read_ear_in(&mut self, ts: FTs) -> bool {
        self.read_count += Wrapping(1);
        self.update_to(ts);
        self.ear_in
    }

    /// How many times the EAR input was probed since the frame began.
    ///
    /// Auto-start heuristics use this to detect a running loader.
    pub fn read_ear_in_count(&self) -> u32 {
        self.read_count.0
    }

    /// Takes the EAR edges consumed during the current frame.
    pub fn take_edges(&mut self) -> Vec<(FTs, bool)> {
        core::mem::take(&mut self.edges)
    }

    /// Closes the frame: consumes edges up to the frame boundary and
    /// rebases the edge clock into the next frame.
    pub fn next_frame(&mut self, frame_tstates: FTs) {
        self.update_to(frame_tstates - 1);
        self.last_edge -= frame_tstates;
        if self.pulses.is_empty() && self.last_edge < -frame_tstates {
            self.last_edge = 0;
        }
        self.read_count = Wrapping(0);
    }
}

/// Services a trapped LD-BYTES call with an instant block load.
///
/// Implements the 48k ROM register contract: `A` carries the expected flag
/// byte, carry set selects LOAD over VERIFY, `IX` the destination and `DE`
/// the requested length. On exit carry reports success, `IX` and `DE` are
/// advanced and the CPU returns to the caller.
pub fn rom_load_trap<C: Cpu>(
        cpu: &mut C,
        memory: &mut BankedMemory,
        tape: &mut dyn TapeAccess,
    ) -> bool
{
    let block = match tape.next_block() {
        Some(block) if !block.is_empty() => block,
        _ => return false,
    };
    let expected_flag = cpu.get_acc();
    let requested = cpu.get_reg16(StkReg16::DE);
    let mut flags = cpu.get_flags();
    let load = flags.contains(CpuFlags::C);
    let mut success = block[0] == expected_flag;
    if success {
        let data = &block[1..block.len().saturating_sub(1).max(1)];
        let copied = (requested as usize).min(data.len());
        if load {
            let mut ix = cpu.get_index16(Prefix::Xdd);
            for byte in data[..copied].iter() {
                memory.write(ix, *byte);
                ix = ix.wrapping_add(1);
            }
            cpu.set_index16(Prefix::Xdd, ix);
        }
        else {
            cpu.set_index16(Prefix::Xdd,
                            cpu.get_index16(Prefix::Xdd).wrapping_add(copied as u16));
        }
        cpu.set_reg16(StkReg16::DE, requested - copied as u16);
        success = copied == requested as usize;
    }
    flags.set(CpuFlags::C, success);
    cpu.set_flags(flags);
    debug!("tape block load trapped: flag: {:02x} requested: {} ok: {}",
           expected_flag, requested, success);
    // RET to the caller of LD-BYTES
    let sp = cpu.get_sp();
    cpu.set_pc(memory.read16(sp));
    cpu.set_sp(sp.wrapping_add(2));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulses_toggle_the_ear_level_in_order() {
        let mut tape = TapePlayer::default();
        tape.feed_pulses([100u32, 50, 25].iter()
                         .map(|&d| NonZeroU32::new(d).unwrap()));
        assert!(tape.is_playing());
        assert!(!tape.read_ear_in(99));
        assert!(tape.read_ear_in(100));
        assert!(!tape.read_ear_in(150));
        assert!(tape.read_ear_in(200));
        assert_eq!(tape.read_ear_in_count(), 4);
        assert_eq!(tape.take_edges(), vec![(100, true), (150, false), (175, true)]);
        assert!(!tape.is_playing());
    }

    #[test]
    fn frame_wrap_rebases_the_edge_clock() {
        let mut tape = TapePlayer::default();
        tape.feed_pulses([70000u32].iter().map(|&d| NonZeroU32::new(d).unwrap()));
        tape.update_to(69887);
        assert!(!tape.ear_level());
        tape.next_frame(69888);
        // the pending edge now falls 112 T-states into the new frame
        tape.update_to(111);
        assert!(!tape.ear_level());
        tape.update_to(112);
        assert!(tape.ear_level());
    }
}
