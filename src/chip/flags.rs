/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Bit layouts of the hardware latches and ports.
use core::fmt;
use core::convert::TryFrom;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use bitflags::bitflags;

bitflags! {
    /// ZX Spectrum's ULA port (0xFE) output flags.
    #[derive(Default)]
    pub struct UlaPortFlags: u8 {
        const BORDER_MASK   = 0b0000_0111;
        const MIC_OUT       = 0b0000_1000;
        const EAR_OUT       = 0b0001_0000;
        const EAR_MIC_MASK  = 0b0001_1000;
        const KEYBOARD_MASK = 0b0001_1111;
        const EAR_IN        = 0b0100_0000;
        const UNUSED_MASK   = 0b1010_0000;
    }
}

bitflags! {
    /// This type represents packed EAR and MIC output line states.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(try_from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct EarMic: u8 {
        const MIC    = 0b01;
        const EAR    = 0b10;
        const EARMIC = 0b11;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryFromU8EarMicError(pub u8);

bitflags! {
    /// The primary memory control latch: port 0x7FFD.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct Mem128Flags: u8 {
        const RAM_BANK_MASK = 0b00_0111;
        const SCREEN_SHADOW = 0b00_1000;
        const ROM_BANK      = 0b01_0000;
        const LOCK_PAGING   = 0b10_0000;
    }
}

bitflags! {
    /// The +2A/+3 secondary control latch: port 0x1FFD.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct Ctrl1ffdFlags: u8 {
        const SPECIAL_PAGING   = 0b0_0001;
        const PAGE_LAYOUT_MASK = 0b0_0110;
        const ROM_BANK_HI      = 0b0_0100;
        const DISC_MOTOR       = 0b0_1000;
        const PRINTER_STROBE   = 0b1_0000;
    }
}

bitflags! {
    /// The Scorpion extension latch: port 0x1FFD.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct ScorpionCtrlFlags: u8 {
        const RAM_OVER_ROM = 0b0_0001;
        const SERVICE_ROM  = 0b0_0010;
        const RAM_BANK_HI  = 0b1_0000;
    }
}

bitflags! {
    /// The Pentagon 1024 extension latch widening the RAM bank selection.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct PentagonExtFlags: u8 {
        const RAM_EXT_MASK = 0b0111;
    }
}

bitflags! {
    /// The ULAplus register select port (0xBF3B) value layout.
    #[derive(Default)]
    pub struct UlaPlusRegFlags: u8 {
        const GROUP_MASK   = 0b1100_0000;
        const MODE_GROUP   = 0b0100_0000;
        const PALETTE_MASK = 0b0011_1111;
    }
}

/// One of the four fixed slot layouts of the +2A/+3 special paging mode.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(try_from = "u8", into = "u8"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SpecialPaging {
    Banks0123 = 0,
    Banks4567 = 1,
    Banks4563 = 2,
    Banks4763 = 3,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryFromU8SpecialPagingError(pub u8);

impl Mem128Flags {
    /// The RAM bank selected for slot 3.
    #[inline]
    pub fn ram_bank(self) -> u8 {
        (self & Mem128Flags::RAM_BANK_MASK).bits()
    }

    /// The selected ROM bank (low bit).
    #[inline]
    pub fn rom_bank(self) -> u8 {
        u8::from(self.contains(Mem128Flags::ROM_BANK))
    }

    #[inline]
    pub fn is_screen_shadow(self) -> bool {
        self.contains(Mem128Flags::SCREEN_SHADOW)
    }

    #[inline]
    pub fn is_paging_locked(self) -> bool {
        self.contains(Mem128Flags::LOCK_PAGING)
    }
}

impl Ctrl1ffdFlags {
    #[inline]
    pub fn is_special_paging(self) -> bool {
        self.contains(Ctrl1ffdFlags::SPECIAL_PAGING)
    }

    /// The high bit of the ROM bank selection.
    #[inline]
    pub fn rom_bank_hi(self) -> u8 {
        u8::from(self.contains(Ctrl1ffdFlags::ROM_BANK_HI)) << 1
    }

    /// The special paging layout selected by bits 1..2.
    #[inline]
    pub fn special_paging(self) -> SpecialPaging {
        SpecialPaging::try_from((self & Ctrl1ffdFlags::PAGE_LAYOUT_MASK).bits() >> 1).unwrap()
    }
}

impl ScorpionCtrlFlags {
    /// The extension bit joined to the 0x7FFD 3-bit RAM selector.
    #[inline]
    pub fn ram_bank_hi(self) -> u8 {
        u8::from(self.contains(ScorpionCtrlFlags::RAM_BANK_HI)) << 3
    }
}

impl SpecialPaging {
    /// RAM banks mapped to the four slots.
    pub fn layout(self) -> [u8; 4] {
        match self {
            SpecialPaging::Banks0123 => [0, 1, 2, 3],
            SpecialPaging::Banks4567 => [4, 5, 6, 7],
            SpecialPaging::Banks4563 => [4, 5, 6, 3],
            SpecialPaging::Banks4763 => [4, 7, 6, 3],
        }
    }
}

impl From<UlaPortFlags> for EarMic {
    #[inline]
    fn from(flags: UlaPortFlags) -> Self {
        EarMic::from_bits_truncate((flags & UlaPortFlags::EAR_MIC_MASK).bits() >> 3)
    }
}

impl From<EarMic> for u8 {
    fn from(earmic: EarMic) -> u8 {
        earmic.bits()
    }
}

impl std::error::Error for TryFromU8EarMicError {}

impl fmt::Display for TryFromU8EarMicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "converted integer ({}) out of range for `EarMic`", self.0)
    }
}

impl TryFrom<u8> for EarMic {
    type Error = TryFromU8EarMicError;
    fn try_from(earmic: u8) -> Result<Self, Self::Error> {
        EarMic::from_bits(earmic).ok_or(TryFromU8EarMicError(earmic))
    }
}

macro_rules! impl_from_bits_truncate {
    ($($ty:ty),*) => {$(
        impl From<u8> for $ty {
            #[inline]
            fn from(bits: u8) -> Self {
                Self::from_bits_truncate(bits)
            }
        }
        impl From<$ty> for u8 {
            #[inline]
            fn from(flags: $ty) -> u8 {
                flags.bits()
            }
        }
    )*};
}

impl_from_bits_truncate!(Mem128Flags, Ctrl1ffdFlags, ScorpionCtrlFlags,
                         PentagonExtFlags, UlaPlusRegFlags, UlaPortFlags);

impl std::error::Error for TryFromU8SpecialPagingError {}

impl fmt::Display for TryFromU8SpecialPagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "converted integer ({}) out of range for `SpecialPaging`", self.0)
    }
}

impl TryFrom<u8> for SpecialPaging {
    type Error = TryFromU8SpecialPagingError;
    fn try_from(layout: u8) -> Result<Self, Self::Error> {
        Ok(match layout {
            0 => SpecialPaging::Banks0123,
            1 => SpecialPaging::Banks4567,
            2 => SpecialPaging::Banks4563,
            3 => SpecialPaging::Banks4763,
            _ => return Err(TryFromU8SpecialPagingError(layout)),
        })
    }
}

impl From<SpecialPaging> for u8 {
    fn from(layout: SpecialPaging) -> u8 {
        layout as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem128_flags_decode() {
        let flags = Mem128Flags::from(0b0011_0101u8);
        assert_eq!(flags.ram_bank(), 5);
        assert_eq!(flags.rom_bank(), 1);
        assert!(!flags.is_screen_shadow());
        assert!(flags.is_paging_locked());
    }

    #[test]
    fn special_paging_layouts() {
        assert_eq!(Ctrl1ffdFlags::from(0b0101u8).special_paging().layout(), [4, 5, 6, 3]);
        assert_eq!(Ctrl1ffdFlags::from(0b0111u8).special_paging().layout(), [4, 7, 6, 3]);
    }

    #[test]
    fn earmic_from_ula_port() {
        assert_eq!(EarMic::from(UlaPortFlags::EAR_OUT), EarMic::EAR);
        assert_eq!(EarMic::from(UlaPortFlags::MIC_OUT), EarMic::MIC);
        assert_eq!(EarMic::from(UlaPortFlags::from(0xFFu8)), EarMic::EARMIC);
    }
}
