/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! A per-frame cache of screen cell values as the ULA beam fetched them.
//!
//! When the CPU overwrites a bitmap or attribute cell *after* the ULA has
//! already fetched it in the current frame, the pre-write value is captured
//! here so the renderer shows what the beam actually displayed. This is what
//! makes rainbow and multicolor effects come out right regardless of whether
//! scanlines are rendered eagerly or at the end of a frame.
use core::fmt;

use crate::clock::FTs;
use crate::memory::ATTRS_OFFSET;
use crate::video::{pixel_line_offset, color_line_offset};

const LINE_SIZE: usize = 32;
const PIXEL_LINES: usize = 192;

/// The horizontal T-state at which the ULA fetches the bitmap byte of each
/// cell column, relative to the start of the paper area of a line.
pub static COL_INK_HTS: [FTs; 32] = [
    1, 3,  9, 11, 17, 19, 25, 27, 33, 35, 41, 43, 49, 51, 57, 59,
    65, 67, 73, 75, 81, 83, 89, 91, 97, 99, 105, 107, 113, 115, 121, 123];
/// The horizontal T-state at which the ULA fetches the attribute byte of
/// each cell column.
pub static COL_ATTR_HTS: [FTs; 32] = [
    2, 4, 10, 12, 18, 20, 26, 28, 34, 36, 42, 44, 50, 52, 58, 60,
    66, 68, 74, 76, 82, 84, 90, 92, 98, 100, 106, 108, 114, 116, 122, 124];

/// Decomposes a screen bitmap offset [0, 0x1800) into cell coordinates.
#[inline(always)]
pub fn pixel_offset_coords(offset: u16) -> (usize, FTs) {
    let column = (offset & 0b11111) as usize;
    let line = (offset >> 5 & 0b1100_0000 |
                offset >> 2 & 0b0011_1000 |
                offset >> 8 & 0b0000_0111) as FTs;
    (column, line)
}

/// Decomposes an attribute offset [0x1800, 0x1B00) into cell coordinates,
/// the line being the coarse (8 pixel line) row.
#[inline(always)]
pub fn color_offset_coords(offset: u16) -> (usize, FTs) {
    let offset = offset - ATTRS_OFFSET;
    ((offset & 0b11111) as usize, (offset >> 5) as FTs)
}

#[derive(Clone)]
pub struct FrameCache {
    pub frame_pixels: [(u32, [u8; 32]); 192],
    pub frame_colors: [(u32, [u8; 32]); 192],
    pub frame_colors_coarse: [(u32, [u8; 32]); 24],
}

impl Default for FrameCache {
    fn default() -> Self {
        FrameCache {
            frame_pixels: [(0, [0; 32]); 192],
            frame_colors: [(0, [0; 32]); 192],
            frame_colors_coarse: [(0, [0; 32]); 24],
        }
    }
}

impl fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameCache { }")
    }
}

impl FrameCache {
    pub fn clear(&mut self) {
        for p in self.frame_pixels.iter_mut() {
            p.0 = 0;
        }
        for p in self.frame_colors.iter_mut() {
            p.0 = 0;
        }
        for p in self.frame_colors_coarse.iter_mut() {
            p.0 = 0;
        }
    }

    /// Called before a bitmap byte at screen `offset` is overwritten at the
    /// paper-area position (`cur_line_index`, `hc`); captures the old value
    /// if the beam has already passed the cell this frame.
    pub fn update_frame_pixels(
            &mut self,
            screen: &[u8],
            offset: u16,
            cur_line_index: FTs,
            hc: FTs,
        )
    {
        let (column, line) = pixel_offset_coords(offset);
        if line < cur_line_index || line == cur_line_index && hc > COL_INK_HTS[column] {
            let (mask, pixels) = &mut self.frame_pixels[line as usize];
            let mbit = 1 << column;
            if *mask & mbit == 0 {
                pixels[column] = screen[offset as usize];
                *mask |= mbit;
            }
        }
    }

    /// Called before an attribute byte at screen `offset` is overwritten,
    /// with the same position arguments as [FrameCache::update_frame_pixels].
    ///
    /// An attribute covers 8 pixel lines fetched on 8 separate scanlines, so
    /// fully passed cells park the old value in the coarse plane while a
    /// partially displayed cell backfills the per-line plane.
    pub fn update_frame_colors(
            &mut self,
            screen: &[u8],
            offset: u16,
            cur_line_index: FTs,
            hc: FTs,
        )
    {
        let (column, line) = color_offset_coords(offset);
        let coarse_cur_line_index = cur_line_index >> 3;
        let memval = screen[offset as usize];
        let mbit = 1 << column;
        if line < coarse_cur_line_index ||
                line == coarse_cur_line_index &&
                cur_line_index & 0b111 == 0b111 &&
                hc > COL_ATTR_HTS[column] {
            let (mask, colors) = &mut self.frame_colors_coarse[line as usize];
            if *mask & mbit == 0 {
                *mask |= mbit;
                colors[column] = memval;
            }
        }
        else if line == coarse_cur_line_index {
            let line_top = coarse_cur_line_index << 3;
            let line_bot = if hc > COL_ATTR_HTS[column] {
                cur_line_index
            }
            else {
                cur_line_index - 1
            };
            if line_top <= line_bot {
                for (mask, colors) in self.frame_colors[line_top as usize..=line_bot as usize]
                                      .iter_mut().rev() {
                    if *mask & mbit == 0 {
                        *mask |= mbit;
                        colors[column] = memval;
                    }
                }
            }
        }
    }

    /// The bitmap byte the beam fetched for the given cell.
    #[inline]
    pub fn ink_at(&self, screen: &[u8], line: usize, column: usize) -> u8 {
        let (mask, pixels) = &self.frame_pixels[line];
        if mask & 1 << column != 0 {
            pixels[column]
        }
        else {
            screen[pixel_line_offset(line) + column]
        }
    }

    /// The attribute byte the beam fetched for the given cell.
    #[inline]
    pub fn attr_at(&self, screen: &[u8], line: usize, column: usize) -> u8 {
        let (mask, colors) = &self.frame_colors[line];
        if mask & 1 << column != 0 {
            return colors[column];
        }
        let (mask, colors) = &self.frame_colors_coarse[line >> 3];
        if mask & 1 << column != 0 {
            return colors[column];
        }
        screen[ATTRS_OFFSET as usize + color_line_offset(line) + column]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen_with(offset: usize, val: u8) -> Vec<u8> {
        let mut screen = vec![0u8; 0x1B00];
        screen[offset] = val;
        screen
    }

    #[test]
    fn offset_coords_decompose() {
        assert_eq!(pixel_offset_coords(0x0000), (0, 0));
        assert_eq!(pixel_offset_coords(0x0100), (0, 1));
        assert_eq!(pixel_offset_coords(0x0020), (0, 8));
        assert_eq!(pixel_offset_coords(0x17FF), (31, 191));
        assert_eq!(color_offset_coords(0x1800), (0, 0));
        assert_eq!(color_offset_coords(0x1820), (0, 1));
        assert_eq!(color_offset_coords(0x1AFF), (31, 23));
    }

    #[test]
    fn pixels_cache_only_after_the_beam_passed() {
        let mut cache = FrameCache::default();
        let screen = screen_with(0, 0b1010_1010);
        // beam on line 0 before the first cell was fetched
        cache.update_frame_pixels(&screen, 0, 0, 0);
        assert_eq!(cache.frame_pixels[0].0, 0);
        assert_eq!(cache.ink_at(&screen, 0, 0), 0b1010_1010);
        // beam just past the fetch of cell 0
        cache.update_frame_pixels(&screen, 0, 0, 2);
        assert_eq!(cache.frame_pixels[0].0, 1);
        // the cached value wins even after the memory changes
        let screen = screen_with(0, 0x00);
        assert_eq!(cache.ink_at(&screen, 0, 0), 0b1010_1010);
        // only the first capture of a cell in a frame sticks
        cache.update_frame_pixels(&screen, 0, 5, 0);
        assert_eq!(cache.ink_at(&screen, 0, 0), 0b1010_1010);
    }

    #[test]
    fn colors_cache_split_between_planes() {
        let mut cache = FrameCache::default();
        let screen = screen_with(0x1800, 0x38);
        // beam mid-cell: pixel lines 0..=2 already displayed the old attr
        cache.update_frame_colors(&screen, 0x1800, 3, 0);
        let screen = screen_with(0x1800, 0x07);
        assert_eq!(cache.attr_at(&screen, 0, 0), 0x38);
        assert_eq!(cache.attr_at(&screen, 2, 0), 0x38);
        assert_eq!(cache.attr_at(&screen, 3, 0), 0x07);
        // a write long past the cell parks it in the coarse plane
        let mut cache = FrameCache::default();
        let screen = screen_with(0x1800, 0x38);
        cache.update_frame_colors(&screen, 0x1800, 100, 0);
        let screen = screen_with(0x1800, 0x07);
        for line in 0..8 {
            assert_eq!(cache.attr_at(&screen, line, 0), 0x38);
        }
        assert_eq!(cache.attr_at(&screen, 8, 0), 0x07);
    }
}
