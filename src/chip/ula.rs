/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The ULA: border, screen and attribute timing, scanline rendering,
//! keyboard matrix and the floating bus.
use core::fmt;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use crate::chip::flags::{EarMic, UlaPortFlags, UlaPlusRegFlags};
use crate::chip::profile::{BorderQuantization, MachineProfile};
use crate::clock::FTs;
use crate::memory::BankedMemory;
use crate::video::{
    attr_colors, attr_colors_ulaplus, color_line_offset, pixel_line_offset,
    BORDER_SIZE, LEFT_BORDER_HTS, PALETTE_RGBA, PIXEL_BYTES, PIXEL_LINES,
    RIGHT_BORDER_END_HTS, SCREEN_HEIGHT, SCREEN_WIDTH,
    frame_cache::{FrameCache, COL_INK_HTS},
};

/// A ULAplus register write recorded with its timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UlaPlusChange {
    Mode(bool),
    Entry(u8, u8),
}

/// The ULA chip state.
///
/// All visible side effects of a frame arrive as timestamped changes; the
/// renderer consumes them strictly in time order, so scanlines may be
/// rendered eagerly between instructions or lazily at the end of a frame
/// with the same result.
#[derive(Clone)]
pub struct Ula {
    line_tstates: FTs,
    first_screen_line: FTs,
    quantize_border: bool,
    floating_bus_enabled: bool,
    border_only: bool,
    // border
    border: u8,      // at frame start
    last_border: u8, // last recorded change
    border_changes: Vec<(FTs, u8)>,
    // visible screen bank switches
    screen_shadow: bool, // at frame start
    last_screen_shadow: bool,
    screen_changes: Vec<(FTs, bool)>,
    // ULAplus
    ulaplus_enabled: bool,
    ulaplus_mode_group: bool,
    ulaplus_register: u8,
    ulaplus_palette: [u8; 64],
    ulaplus_changes: Vec<(FTs, UlaPlusChange)>,
    // beam-time cell snapshots
    frame_cache: FrameCache,
    shadow_frame_cache: FrameCache,
    // EAR/MIC output
    earmic_start: EarMic,
    last_earmic: EarMic,
    earmic_changes: Vec<(FTs, u8)>,
    // keyboard
    keyboard_rows: [u8; 8],
    // rendering state
    frame_buffer: Vec<u8>,
    next_visible_line: u32,
    border_index: usize,
    render_border: u8,
    screen_index: usize,
    render_shadow: bool,
    plus_index: usize,
    render_ulaplus: bool,
    render_palette: [u8; 64],
}

impl fmt::Debug for Ula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ula")
            .field("border", &self.last_border)
            .field("border_changes", &self.border_changes.len())
            .field("screen_shadow", &self.last_screen_shadow)
            .field("ulaplus_enabled", &self.ulaplus_enabled)
            .field("earmic", &self.last_earmic)
            .field("next_visible_line", &self.next_visible_line)
            .finish()
    }
}

impl Ula {
    pub fn new(profile: &'static MachineProfile) -> Self {
        Ula {
            line_tstates: profile.tstates_per_line,
            first_screen_line: profile.first_screen_line,
            quantize_border: profile.border_quantization == BorderQuantization::FourTStates,
            floating_bus_enabled: profile.has_floating_bus,
            border_only: false,
            border: 7,
            last_border: 7,
            border_changes: Vec::new(),
            screen_shadow: false,
            last_screen_shadow: false,
            screen_changes: Vec::new(),
            ulaplus_enabled: false,
            ulaplus_mode_group: false,
            ulaplus_register: 0,
            ulaplus_palette: [0; 64],
            ulaplus_changes: Vec::new(),
            frame_cache: Default::default(),
            shadow_frame_cache: Default::default(),
            earmic_start: EarMic::empty(),
            last_earmic: EarMic::empty(),
            earmic_changes: Vec::new(),
            keyboard_rows: [0; 8],
            frame_buffer: vec![0; (SCREEN_WIDTH * SCREEN_HEIGHT * PIXEL_BYTES) as usize],
            next_visible_line: 0,
            border_index: 0,
            render_border: 7,
            screen_index: 0,
            render_shadow: false,
            plus_index: 0,
            render_ulaplus: false,
            render_palette: [0; 64],
        }
    }

    /// Prepares the change lists and the render state for a new frame.
    pub fn start_frame(&mut self) {
        self.border = self.last_border;
        self.border_changes.clear();
        self.border_changes.push((0, self.border));
        self.screen_shadow = self.last_screen_shadow;
        self.screen_changes.clear();
        self.ulaplus_changes.clear();
        self.frame_cache.clear();
        self.shadow_frame_cache.clear();
        self.earmic_start = self.last_earmic;
        self.earmic_changes.clear();
        self.next_visible_line = 0;
        self.border_index = 0;
        self.render_border = self.border;
        self.screen_index = 0;
        self.render_shadow = self.screen_shadow;
        self.plus_index = 0;
        self.render_ulaplus = self.ulaplus_enabled;
        self.render_palette = self.ulaplus_palette;
    }

    /// The current border color.
    #[inline]
    pub fn border_color(&self) -> u8 {
        self.last_border
    }

    /// Force sets the border color outside of frame execution, re-seeding
    /// the current frame's change list.
    pub fn set_border_color(&mut self, color: u8) {
        self.border = color & 7;
        self.last_border = self.border;
        self.border_changes.clear();
        self.border_changes.push((0, self.border));
        self.border_index = 0;
        self.render_border = self.border;
    }

    /// Records a border color change at the given frame T-state.
    pub fn set_border_at(&mut self, ts: FTs, color: u8) {
        let color = color & 7;
        if self.last_border != color {
            let ts = if self.quantize_border { ts & !3 } else { ts };
            self.border_changes.push((ts, color));
            self.last_border = color;
        }
    }

    /// Records a visible screen bank switch at the given frame T-state.
    pub fn set_screen_shadow_at(&mut self, ts: FTs, shadow: bool) {
        if self.last_screen_shadow != shadow {
            self.screen_changes.push((ts, shadow));
            self.last_screen_shadow = shadow;
        }
    }

    #[inline]
    pub fn is_screen_shadow(&self) -> bool {
        self.last_screen_shadow
    }

    /// Records EAR/MIC line changes from a ULA port write.
    #[inline]
    pub fn write_earmic(&mut self, ts: FTs, flags: UlaPortFlags) {
        let earmic = EarMic::from(flags);
        if self.last_earmic != earmic {
            self.last_earmic = earmic;
            self.earmic_changes.push((ts, earmic.bits()));
        }
    }

    /// The EAR/MIC output level the frame began with.
    #[inline]
    pub fn earmic_frame_start(&self) -> EarMic {
        self.earmic_start
    }

    /// Takes the EAR/MIC (beeper) changes recorded during the current frame.
    pub fn take_earmic_changes(&mut self) -> Vec<(FTs, u8)> {
        core::mem::take(&mut self.earmic_changes)
    }

    /// A view of the border changes recorded so far, time ordered.
    pub fn border_changes(&self) -> &[(FTs, u8)] {
        &self.border_changes
    }

    // --- ULAplus ---

    /// Handles a write to the ULAplus register select port 0xBF3B.
    pub fn ulaplus_select(&mut self, val: u8) {
        let flags = UlaPlusRegFlags::from(val);
        self.ulaplus_mode_group = flags.contains(UlaPlusRegFlags::MODE_GROUP);
        self.ulaplus_register = (flags & UlaPlusRegFlags::PALETTE_MASK).bits();
    }

    /// Handles a write to the ULAplus data port 0xFF3B.
    pub fn ulaplus_write(&mut self, ts: FTs, val: u8) {
        if self.ulaplus_mode_group {
            let enabled = val & 1 != 0;
            if self.ulaplus_enabled != enabled {
                self.ulaplus_enabled = enabled;
                self.ulaplus_changes.push((ts, UlaPlusChange::Mode(enabled)));
            }
        }
        else {
            let index = self.ulaplus_register;
            if self.ulaplus_palette[index as usize] != val {
                self.ulaplus_palette[index as usize] = val;
                self.ulaplus_changes.push((ts, UlaPlusChange::Entry(index, val)));
            }
        }
    }

    /// Handles a read from the ULAplus data port 0xFF3B.
    pub fn ulaplus_read(&self) -> u8 {
        if self.ulaplus_mode_group {
            u8::from(self.ulaplus_enabled)
        }
        else {
            self.ulaplus_palette[self.ulaplus_register as usize]
        }
    }

    #[inline]
    pub fn is_ulaplus_enabled(&self) -> bool {
        self.ulaplus_enabled
    }

    // --- keyboard ---

    /// Sets the pressed-keys mask (bits 0..4) of one of the 8 keyboard rows.
    pub fn set_key_row(&mut self, row: usize, pressed: u8) {
        self.keyboard_rows[row & 7] = pressed & 0x1F;
    }

    pub fn clear_keys(&mut self) {
        self.keyboard_rows = [0; 8];
    }

    /// Decodes a read from port 0xFE: the active-low AND of the pressed keys
    /// in every row addressed by a zero bit of `high_byte`, bit 6 from the
    /// EAR input, bits 5 and 7 always set.
    pub fn read_keyboard(&self, high_byte: u8, ear_in: bool) -> u8 {
        let mut keys = 0b0001_1111u8;
        for (row, pressed) in self.keyboard_rows.iter().enumerate() {
            if high_byte & 1 << row == 0 {
                keys &= !pressed;
            }
        }
        keys | 0b1010_0000 | u8::from(ear_in) << 6
    }

    // --- screen write tracking ---

    /// Called before a write into one of the screen areas lands, with the
    /// pre-write screen contents; captures beam-passed cell values.
    pub fn screen_write(&mut self, shadow: bool, offset: u16, ts: FTs, screen: &[u8]) {
        let cur_line_index = ts / self.line_tstates - self.first_screen_line;
        let hc = ts % self.line_tstates;
        let cache = if shadow { &mut self.shadow_frame_cache } else { &mut self.frame_cache };
        if offset < 0x1800 {
            cache.update_frame_pixels(screen, offset, cur_line_index, hc);
        }
        else {
            cache.update_frame_colors(screen, offset, cur_line_index, hc);
        }
    }

    // --- floating bus ---

    /// The byte the ULA is fetching from video memory at `ts`, or 0xFF when
    /// the bus is idle or the model does not expose it.
    pub fn floating_bus(&self, memory: &BankedMemory, ts: FTs) -> u8 {
        if !self.floating_bus_enabled {
            return u8::max_value();
        }
        let y = ts / self.line_tstates - self.first_screen_line;
        let hc = ts % self.line_tstates;
        if (0..PIXEL_LINES as FTs).contains(&y) && (0..=123).contains(&hc) && hc & 4 == 0 {
            let col = ((hc >> 3) << 1) as u16;
            let y = y as u16;
            let offset = match hc & 3 {
                0 => pixel_line_offset(y) + col,
                1 => 0x1800 + color_line_offset(y) + col,
                2 => 0x0001 + pixel_line_offset(y) + col,
                _ => 0x1801 + color_line_offset(y) + col,
            };
            memory.screen_ref(self.last_screen_shadow)[offset as usize]
        }
        else {
            u8::max_value()
        }
    }

    // --- rendering ---

    /// The frame T-state of the leftmost rendered pixel of a visible line.
    pub fn visible_line_start_ts(&self, visible_line: u32) -> FTs {
        let scan_line = self.first_screen_line - BORDER_SIZE as FTs + visible_line as FTs;
        scan_line * self.line_tstates + LEFT_BORDER_HTS
    }

    /// Renders every visible scanline the beam has fully passed at `ts`.
    pub fn render_scanlines_upto(&mut self, ts: FTs, memory: &BankedMemory, invert_flash: bool) {
        while self.next_visible_line < SCREEN_HEIGHT {
            let line = self.next_visible_line;
            let scan_line = self.first_screen_line - BORDER_SIZE as FTs + line as FTs;
            if ts < scan_line * self.line_tstates + RIGHT_BORDER_END_HTS {
                break;
            }
            self.render_scanline(line, memory, invert_flash);
            self.next_visible_line += 1;
        }
    }

    /// Renders the remaining scanlines of the frame.
    pub fn end_frame(&mut self, memory: &BankedMemory, invert_flash: bool) {
        while self.next_visible_line < SCREEN_HEIGHT {
            self.render_scanline(self.next_visible_line, memory, invert_flash);
            self.next_visible_line += 1;
        }
    }

    /// The rendered frame: RGBA8888, [SCREEN_WIDTH]×[SCREEN_HEIGHT],
    /// scanline-major.
    pub fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    #[inline]
    fn border_color_upto(&mut self, ts: FTs) -> [u8; 4] {
        while let Some(&(change_ts, color)) = self.border_changes.get(self.border_index) {
            if change_ts <= ts {
                self.render_border = color;
                self.border_index += 1;
            }
            else {
                break;
            }
        }
        PALETTE_RGBA[self.render_border as usize]
    }

    #[inline]
    fn screen_shadow_upto(&mut self, ts: FTs) -> bool {
        while let Some(&(change_ts, shadow)) = self.screen_changes.get(self.screen_index) {
            if change_ts <= ts {
                self.render_shadow = shadow;
                self.screen_index += 1;
            }
            else {
                break;
            }
        }
        self.render_shadow
    }

    fn apply_ulaplus_upto(&mut self, ts: FTs) {
        while let Some(&(change_ts, change)) = self.ulaplus_changes.get(self.plus_index) {
            if change_ts <= ts {
                match change {
                    UlaPlusChange::Mode(enabled) => self.render_ulaplus = enabled,
                    UlaPlusChange::Entry(index, val) => {
                        self.render_palette[index as usize] = val
                    }
                }
                self.plus_index += 1;
            }
            else {
                break;
            }
        }
    }

    /// Renders the paper area as border color, visualizing the beam timing
    /// of border effects across the whole screen.
    pub fn set_border_only_mode(&mut self, border_only: bool) {
        self.border_only = border_only;
    }

    fn render_scanline(&mut self, visible_line: u32, memory: &BankedMemory, invert_flash: bool) {
        let scan_line = self.first_screen_line - BORDER_SIZE as FTs + visible_line as FTs;
        let line_ts = scan_line * self.line_tstates;
        self.apply_ulaplus_upto(line_ts + LEFT_BORDER_HTS);
        let row = (visible_line * SCREEN_WIDTH * PIXEL_BYTES) as usize;
        let paper_line = scan_line - self.first_screen_line;
        if !self.border_only && (0..PIXEL_LINES as FTs).contains(&paper_line) {
            let mut offset = row;
            offset = self.render_border_span(offset, line_ts, LEFT_BORDER_HTS..0);
            offset = self.render_paper_span(offset, line_ts, paper_line as usize,
                                            memory, invert_flash);
            self.render_border_span(offset, line_ts, 128..RIGHT_BORDER_END_HTS);
        }
        else {
            self.render_border_span(row, line_ts, LEFT_BORDER_HTS..RIGHT_BORDER_END_HTS);
        }
    }

    /// Renders a border span, two pixels per T-state. Returns the buffer
    /// offset one past the rendered span.
    fn render_border_span(
            &mut self,
            mut offset: usize,
            line_ts: FTs,
            hts: core::ops::Range<FTs>,
        ) -> usize
    {
        for hc in hts {
            let rgba = self.border_color_upto(line_ts + hc);
            for _ in 0..2 {
                self.frame_buffer[offset..offset + 4].copy_from_slice(&rgba);
                offset += 4;
            }
        }
        offset
    }

    fn render_paper_span(
            &mut self,
            mut offset: usize,
            line_ts: FTs,
            paper_line: usize,
            memory: &BankedMemory,
            invert_flash: bool,
        ) -> usize
    {
        for column in 0..32 {
            let fetch_ts = line_ts + COL_INK_HTS[column];
            let shadow = self.screen_shadow_upto(fetch_ts);
            let screen: &[u8] = memory.screen_ref(shadow);
            let cache = if shadow { &self.shadow_frame_cache } else { &self.frame_cache };
            let ink = cache.ink_at(screen, paper_line, column);
            let attr = cache.attr_at(screen, paper_line, column);
            let (colors, flash) = if self.render_ulaplus {
                (attr_colors_ulaplus(attr, &self.render_palette), 0)
            }
            else {
                attr_colors(attr, invert_flash)
            };
            let pixels = ink ^ flash;
            for i in 0..8 {
                let rgba = if pixels & 0x80 >> i != 0 { colors.ink } else { colors.paper };
                self.frame_buffer[offset..offset + 4].copy_from_slice(&rgba);
                offset += 4;
            }
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::profile::MachineModel;

    fn ula_48k() -> (Ula, BankedMemory) {
        let profile = MachineModel::Spectrum48.profile();
        (Ula::new(profile), BankedMemory::new(profile, false))
    }

    fn pixel(ula: &Ula, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * SCREEN_WIDTH + x) * 4) as usize;
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&ula.frame_buffer()[offset..offset + 4]);
        rgba
    }

    #[test]
    fn empty_frame_renders_uniform_border() {
        let (mut ula, memory) = ula_48k();
        ula.set_border_color(5);
        ula.start_frame();
        assert_eq!(ula.border_changes()[0], (0, 5));
        ula.end_frame(&memory, false);
        for (x, y) in [(0u32, 0u32), (351, 0), (0, 287), (351, 287), (10, 100)].iter().copied() {
            assert_eq!(pixel(&ula, x, y), PALETTE_RGBA[5]);
        }
        // the paper area shows attr 0 paper color over zeroed memory: black
        assert_eq!(pixel(&ula, 100, 100), PALETTE_RGBA[0]);
    }

    #[test]
    fn border_split_carries_the_exact_tstate() {
        let (mut ula, memory) = ula_48k();
        ula.set_border_color(0);
        ula.start_frame();
        // the first paper line is visible line 48; its leftmost pixel pair
        // is beamed 24 T-states before the paper area
        let line = 48u32;
        let line_start = ula.visible_line_start_ts(line);
        assert_eq!(line_start, 64 * 224 - 24);
        // switch to red in the middle of the left border of that line
        let split_ts = line_start + 14;
        ula.set_border_at(split_ts, 2);
        ula.end_frame(&memory, false);
        let split_x = ((split_ts - line_start) * 2) as u32;
        assert_eq!(pixel(&ula, split_x - 2, line), PALETTE_RGBA[0]);
        assert_eq!(pixel(&ula, split_x, line), PALETTE_RGBA[2]);
        // the right border of the same line is red as well
        assert_eq!(pixel(&ula, 308, line), PALETTE_RGBA[2]);
        // the next line is red from the left edge on
        assert_eq!(pixel(&ula, 0, line + 1), PALETTE_RGBA[2]);
        // the line above completed before the switch
        assert_eq!(pixel(&ula, 300, line - 1), PALETTE_RGBA[0]);
    }

    #[test]
    fn keyboard_matrix_decodes_rows() {
        let (mut ula, _) = ula_48k();
        ula.set_key_row(0, 0b00001); // CAPS
        ula.set_key_row(7, 0b00100); // M
        assert_eq!(ula.read_keyboard(0xFF, false), 0b1011_1111);
        assert_eq!(ula.read_keyboard(!0x01, false), 0b1011_1110);
        assert_eq!(ula.read_keyboard(!0x80, false), 0b1011_1011);
        assert_eq!(ula.read_keyboard(0x00, true), 0b1111_1010);
    }

    #[test]
    fn floating_bus_follows_the_fetch_pattern() {
        let (ula, mut memory) = ula_48k();
        memory.write(0x4000, 0xA7);
        memory.write(0x5800, 0x12);
        // bitmap byte of the first cell, fetched at the start of the first
        // paper line
        assert_eq!(ula.floating_bus(&memory, 64 * 224), 0xA7);
        // its attribute follows one T-state later
        assert_eq!(ula.floating_bus(&memory, 64 * 224 + 1), 0x12);
        // idle half of the fetch cycle
        assert_eq!(ula.floating_bus(&memory, 64 * 224 + 4), 0xFF);
        // outside the paper area
        assert_eq!(ula.floating_bus(&memory, 10 * 224), 0xFF);
    }

    #[test]
    fn earmic_changes_record_on_edges() {
        let (mut ula, _) = ula_48k();
        ula.start_frame();
        ula.write_earmic(100, UlaPortFlags::EAR_OUT);
        ula.write_earmic(200, UlaPortFlags::EAR_OUT);
        ula.write_earmic(300, UlaPortFlags::empty());
        assert_eq!(ula.take_earmic_changes(),
                   vec![(100, EarMic::EAR.bits()), (300, 0)]);
    }
}
