/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Kempston joystick interface.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use bitflags::bitflags;

bitflags! {
    /// Kempston joystick line states, active high.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct KempstonDirs: u8 {
        const RIGHT = 0b0000_0001;
        const LEFT  = 0b0000_0010;
        const DOWN  = 0b0000_0100;
        const UP    = 0b0000_1000;
        const FIRE  = 0b0001_0000;
    }
}

impl From<u8> for KempstonDirs {
    fn from(bits: u8) -> Self {
        KempstonDirs::from_bits_truncate(bits)
    }
}

impl From<KempstonDirs> for u8 {
    fn from(dirs: KempstonDirs) -> u8 {
        dirs.bits()
    }
}

/// A Kempston joystick read through port 0x1F.
///
/// The embedder snapshots gamepad state into it at frame boundaries.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct KempstonJoystick {
    state: KempstonDirs,
}

impl KempstonJoystick {
    #[inline]
    pub fn set_state(&mut self, state: KempstonDirs) {
        self.state = state;
    }

    #[inline]
    pub fn state(&self) -> KempstonDirs {
        self.state
    }

    /// The port data byte: pressed directions high, the rest low.
    #[inline]
    pub fn read(&self) -> u8 {
        self.state.bits()
    }
}
