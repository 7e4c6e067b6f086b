/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The **AY-3-8910** programmable sound generator register file.
//!
//! Sound synthesis is not part of this crate: every accepted register write
//! is recorded with its frame timestamp and drained by the audio component
//! at frame boundaries.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::clock::FTs;

/// An enumeration of AY-3-8910 registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum AyRegister {
      ToneFineA      =  0,
      ToneCoarseA    =  1,
      ToneFineB      =  2,
      ToneCoarseB    =  3,
      ToneFineC      =  4,
      ToneCoarseC    =  5,
      NoisePeriod    =  6,
      MixerControl   =  7,
      AmpLevelA      =  8,
      AmpLevelB      =  9,
      AmpLevelC      = 10,
      EnvPerFine     = 11,
      EnvPerCoarse   = 12,
      EnvShape       = 13,
      IoA            = 14,
      IoB            = 15,
}

/// Masks of the significant bits of each register.
const REG_MASKS: [u8; 16] = [
    0xff, 0x0f, 0xff, 0x0f, 0xff, 0x0f, 0x1f, 0xff,
    0x1f, 0x1f, 0x1f, 0xff, 0xff, 0x0f, 0xff, 0xff
];

/// A recorded change of one of the AY registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct AyRegChange {
    pub ts: FTs,
    pub reg: AyRegister,
    pub val: u8,
}

/// The AY-3-8910 I/O interface: a selected register latch, the register
/// file, and the per-frame change recording.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct Ay3891xIo {
    selected_reg: AyRegister,
    regs: [u8; 16],
    #[cfg_attr(feature = "snapshot", serde(skip))]
    changes: Vec<AyRegChange>,
}

impl Default for Ay3891xIo {
    fn default() -> Self {
        Ay3891xIo {
            selected_reg: AyRegister::ToneFineA,
            regs: [0; 16],
            changes: Vec::new(),
        }
    }
}

impl Ay3891xIo {
    pub fn reset(&mut self) {
        self.selected_reg = AyRegister::ToneFineA;
        self.regs = [0; 16];
        self.changes.clear();
    }

    /// Handles a write to the register select function.
    #[inline]
    pub fn select_port_write(&mut self, data: u8) {
        self.selected_reg = AyRegister::from(data & 15);
    }

    /// Handles a write to the data function: masks the value, stores it and
    /// records the change.
    pub fn data_port_write(&mut self, ts: FTs, data: u8) {
        let reg = self.selected_reg;
        let val = data & REG_MASKS[usize::from(reg)];
        self.regs[usize::from(reg)] = val;
        self.changes.push(AyRegChange { ts, reg, val });
    }

    /// Handles a read from the data function.
    #[inline]
    pub fn data_port_read(&self) -> u8 {
        self.regs[usize::from(self.selected_reg)]
    }

    #[inline]
    pub fn selected_register(&self) -> AyRegister {
        self.selected_reg
    }

    #[inline]
    pub fn get(&self, reg: AyRegister) -> u8 {
        self.regs[usize::from(reg)]
    }

    pub fn set(&mut self, reg: AyRegister, val: u8) {
        self.regs[usize::from(reg)] = val & REG_MASKS[usize::from(reg)];
    }

    /// All 16 register values.
    #[inline]
    pub fn registers(&self) -> &[u8; 16] {
        &self.regs
    }

    /// Takes the register changes recorded during the current frame.
    pub fn take_changes(&mut self) -> Vec<AyRegChange> {
        core::mem::take(&mut self.changes)
    }
}

impl From<u8> for AyRegister {
    #[inline]
    fn from(value: u8) -> Self {
        use AyRegister::*;
        match value & 15 {
             0 => ToneFineA,
             1 => ToneCoarseA,
             2 => ToneFineB,
             3 => ToneCoarseB,
             4 => ToneFineC,
             5 => ToneCoarseC,
             6 => NoisePeriod,
             7 => MixerControl,
             8 => AmpLevelA,
             9 => AmpLevelB,
            10 => AmpLevelC,
            11 => EnvPerFine,
            12 => EnvPerCoarse,
            13 => EnvShape,
            14 => IoA,
             _ => IoB,
        }
    }
}

macro_rules! impl_ay_register_from {
    ($($ty:ty),*) => {$(
        impl From<AyRegister> for $ty {
            #[inline]
            fn from(reg: AyRegister) -> $ty {
                reg as $ty
            }
        }
    )*};
}

impl_ay_register_from!(u8, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_writes_are_masked_and_recorded() {
        let mut ay = Ay3891xIo::default();
        ay.select_port_write(1);
        ay.data_port_write(100, 0xFF);
        assert_eq!(ay.get(AyRegister::ToneCoarseA), 0x0F);
        assert_eq!(ay.data_port_read(), 0x0F);
        ay.select_port_write(7);
        ay.data_port_write(200, 0x38);
        assert_eq!(ay.take_changes(), vec![
            AyRegChange { ts: 100, reg: AyRegister::ToneCoarseA, val: 0x0F },
            AyRegChange { ts: 200, reg: AyRegister::MixerControl, val: 0x38 },
        ]);
        assert!(ay.take_changes().is_empty());
    }

    #[test]
    fn select_wraps_to_16_registers() {
        let mut ay = Ay3891xIo::default();
        ay.select_port_write(0x1D);
        assert_eq!(ay.selected_register(), AyRegister::EnvShape);
    }
}
