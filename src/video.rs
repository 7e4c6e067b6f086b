/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Pixel geometry, palettes and color math.
pub mod frame_cache;

use core::convert::TryFrom;
use core::fmt;
use core::ops::{BitAnd, BitOr, Shl, Shr};

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use bitflags::bitflags;

use crate::chip::flags::UlaPortFlags;
use crate::clock::FTs;

/// The width of the rendered frame in pixels, borders included.
pub const SCREEN_WIDTH: u32 = 352;
/// The height of the rendered frame in pixels, borders included.
pub const SCREEN_HEIGHT: u32 = 288;
/// The number of INK/PAPER pixel lines.
pub const PIXEL_LINES: u32 = 192;
/// The size of the rendered border in pixels on each edge.
pub const BORDER_SIZE: u32 = 48;
/// Bytes per rendered pixel (RGBA8888).
pub const PIXEL_BYTES: u32 = 4;

/// The horizontal T-state at which the leftmost rendered border pixel pair
/// is beamed, relative to the start of the paper area of a line.
pub const LEFT_BORDER_HTS: FTs = -(BORDER_SIZE as FTs / 2);
/// One past the horizontal T-state of the last rendered pixel pair.
pub const RIGHT_BORDER_END_HTS: FTs = 128 + BORDER_SIZE as FTs / 2;

bitflags! {
    /// Bitflags defining ZX Spectrum's border colors.
    #[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "snapshot", serde(try_from = "u8", into = "u8"))]
    #[derive(Default)]
    pub struct BorderColor: u8 {
        const BLACK   = 0b000;
        const BLUE    = 0b001;
        const RED     = 0b010;
        const MAGENTA = 0b011;
        const GREEN   = 0b100;
        const CYAN    = 0b101;
        const YELLOW  = 0b110;
        const WHITE   = 0b111;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryFromU8BorderColorError(pub u8);

/// The 16 Spectrum colors as RGBA8888, bright variants in the upper half.
pub static PALETTE_RGBA: [[u8; 4]; 16] = [
    [0x00, 0x00, 0x00, 0xFF],
    [0x00, 0x00, 0xD7, 0xFF],
    [0xD7, 0x00, 0x00, 0xFF],
    [0xD7, 0x00, 0xD7, 0xFF],
    [0x00, 0xD7, 0x00, 0xFF],
    [0x00, 0xD7, 0xD7, 0xFF],
    [0xD7, 0xD7, 0x00, 0xFF],
    [0xD7, 0xD7, 0xD7, 0xFF],
    [0x00, 0x00, 0x00, 0xFF],
    [0x00, 0x00, 0xFF, 0xFF],
    [0xFF, 0x00, 0x00, 0xFF],
    [0xFF, 0x00, 0xFF, 0xFF],
    [0x00, 0xFF, 0x00, 0xFF],
    [0x00, 0xFF, 0xFF, 0xFF],
    [0xFF, 0xFF, 0x00, 0xFF],
    [0xFF, 0xFF, 0xFF, 0xFF],
];

const FLASH_MASK : u8 = 0b1000_0000;
const BRIGHT_MASK: u8 = 0b0100_0000;
const INK_MASK   : u8 = 0b0000_0111;
const PAPER_MASK : u8 = 0b0011_1000;

/// Decoded INK and PAPER colors of a single attribute cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellColors {
    pub ink: [u8; 4],
    pub paper: [u8; 4],
}

/// Returns the INK/PAPER colors of `attr` in the standard palette.
#[inline]
pub fn attr_colors(attr: u8, invert_flash: bool) -> (CellColors, u8) {
    let bright = if attr & BRIGHT_MASK != 0 { 8 } else { 0 };
    let ink = PALETTE_RGBA[(attr & INK_MASK | bright) as usize];
    let paper = PALETTE_RGBA[((attr & PAPER_MASK) >> 3 | bright) as usize];
    let flash = u8::from(invert_flash && attr & FLASH_MASK != 0) * 0xFF;
    (CellColors { ink, paper }, flash)
}

/// Returns the INK/PAPER colors of `attr` resolved through the ULAplus CLUT.
///
/// The attribute's FLASH and BRIGHT bits select one of four sub-palettes;
/// FLASH has no blinking effect in this mode.
#[inline]
pub fn attr_colors_ulaplus(attr: u8, clut: &[u8; 64]) -> CellColors {
    let group = (attr & 0b1100_0000) >> 2;
    let ink = g3r3b2_to_rgba(clut[(group | attr & INK_MASK) as usize]);
    let paper = g3r3b2_to_rgba(clut[(group | 8 | (attr & PAPER_MASK) >> 3) as usize]);
    CellColors { ink, paper }
}

/// Expands a ULAplus G3R3B2 color to RGBA8888.
#[inline]
pub fn g3r3b2_to_rgba(color: u8) -> [u8; 4] {
    let g = color >> 5 & 7;
    let r = color >> 2 & 7;
    let b = color << 1 & 6 | color & 1;
    [r << 5 | r << 2 | r >> 1,
     g << 5 | g << 2 | g >> 1,
     b << 5 | b << 2 | b >> 1,
     0xFF]
}

/// Returns an offset into INK/PAPER bitmap memory of the given vertical
/// coordinate `y` [0, 192) (0 on top).
#[inline(always)]
pub fn pixel_line_offset<T>(y: T) -> T
    where T: Copy + From<u16> + BitAnd<Output=T> + Shl<u16, Output=T> + BitOr<Output=T>
{
    (y & T::from(0b0000_0111)) << 8 |
    (y & T::from(0b0011_1000)) << 2 |
    (y & T::from(0b1100_0000)) << 5
}

/// Returns an offset into attributes memory of the given vertical coordinate
/// `y` [0, 192) (0 on top).
#[inline(always)]
pub fn color_line_offset<T>(y: T) -> T
    where T: Copy + From<u16> + Shr<u16, Output=T> + Shl<u16, Output=T>
{
    (y >> 3) << 5
}

impl std::error::Error for TryFromU8BorderColorError {}

impl fmt::Display for TryFromU8BorderColorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "converted integer ({}) out of range for `BorderColor`", self.0)
    }
}

impl TryFrom<u8> for BorderColor {
    type Error = TryFromU8BorderColorError;
    fn try_from(color: u8) -> core::result::Result<Self, Self::Error> {
        BorderColor::from_bits(color).ok_or(TryFromU8BorderColorError(color))
    }
}

impl From<UlaPortFlags> for BorderColor {
    #[inline]
    fn from(flags: UlaPortFlags) -> Self {
        BorderColor::from_bits_truncate((flags & UlaPortFlags::BORDER_MASK).bits())
    }
}

impl From<BorderColor> for u8 {
    fn from(color: BorderColor) -> u8 {
        color.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_offsets_works() {
        assert_eq!(pixel_line_offset(0usize), 0usize);
        assert_eq!(pixel_line_offset(1usize), 256usize);
        assert_eq!(pixel_line_offset(8usize), 32usize);
        assert_eq!(color_line_offset(0usize), 0usize);
        assert_eq!(color_line_offset(7usize), 0usize);
        assert_eq!(color_line_offset(191usize), 736usize);
    }

    #[test]
    fn attr_decoding() {
        let (colors, flash) = attr_colors(0b0011_1000, false);
        assert_eq!(colors.ink, PALETTE_RGBA[0]);
        assert_eq!(colors.paper, PALETTE_RGBA[7]);
        assert_eq!(flash, 0);
        let (colors, _) = attr_colors(0b0100_0111, false);
        assert_eq!(colors.ink, PALETTE_RGBA[15]);
        assert_eq!(colors.paper, PALETTE_RGBA[8]);
        let (_, flash) = attr_colors(0b1000_0000, true);
        assert_eq!(flash, 0xFF);
    }

    #[test]
    fn ulaplus_colors() {
        assert_eq!(g3r3b2_to_rgba(0), [0, 0, 0, 0xFF]);
        assert_eq!(g3r3b2_to_rgba(0xFF), [0xFF, 0xFF, 0xFF, 0xFF]);
        let mut clut = [0u8; 64];
        clut[7] = 0b111_000_00;  // bright green ink, subpalette 0
        clut[8 + 2] = 0b000_111_00; // red paper
        let colors = attr_colors_ulaplus(0b0001_0111, &clut);
        assert_eq!(colors.ink, [0, 0xFF, 0, 0xFF]);
        assert_eq!(colors.paper, [0xFF, 0, 0, 0xFF]);
    }
}
