/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Kempston mouse interface.
#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// A Kempston mouse: buttons at port 0xFADF, X axis at 0xFBDF and Y axis
/// at 0xFFDF.
///
/// Axis counters wrap around; software tracks deltas between reads.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
pub struct KempstonMouse {
    buttons: u8,
    x: u8,
    y: u8,
}

impl Default for KempstonMouse {
    fn default() -> Self {
        KempstonMouse { buttons: 0xFF, x: 0, y: 0 }
    }
}

impl KempstonMouse {
    /// Applies a movement delta; up is positive `dy`.
    pub fn move_mouse(&mut self, dx: i8, dy: i8) {
        self.x = self.x.wrapping_add(dx as u8);
        self.y = self.y.wrapping_add(dy as u8);
    }

    /// Updates the button lines, pressed buttons read low.
    pub fn set_buttons(&mut self, left: bool, right: bool) {
        self.buttons = !(u8::from(left) << 1 | u8::from(right));
    }

    #[inline]
    pub fn read_buttons(&self) -> u8 {
        self.buttons
    }

    #[inline]
    pub fn read_x(&self) -> u8 {
        self.x
    }

    #[inline]
    pub fn read_y(&self) -> u8 {
        self.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_wrap_and_buttons_read_low() {
        let mut mouse = KempstonMouse::default();
        assert_eq!(mouse.read_buttons(), 0xFF);
        mouse.set_buttons(true, false);
        assert_eq!(mouse.read_buttons(), 0xFD);
        mouse.move_mouse(-3, 5);
        assert_eq!(mouse.read_x(), 0xFD);
        assert_eq!(mouse.read_y(), 5);
    }
}
