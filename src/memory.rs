/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! 16K bank mapped memory with model-specific paging latches.
use core::fmt;
use std::io;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::chip::flags::{Mem128Flags, Ctrl1ffdFlags, ScorpionCtrlFlags, PentagonExtFlags, SpecialPaging};
use crate::chip::profile::{MachineProfile, PagingModel};
use crate::clock::SlotContention;

/// The size of a single memory bank and of an address slot.
pub const BANK_SIZE: usize = 0x4000;
/// The size of a single screen: bitmap and attributes.
pub const SCREEN_SIZE: u16 = 0x1B00;
/// The offset of the attribute area within a screen.
pub const ATTRS_OFFSET: u16 = 0x1800;

/// A single 16 KiB memory bank.
pub type MemBank = [u8; BANK_SIZE];

/// The memory bank backing an address slot.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankSource {
    Rom(u8),
    TrDosRom,
    Ram(u8),
}

/// Describes what one of the four 16K address slots resolves to.
///
/// Slot `s` covers addresses `[s * 0x4000, s * 0x4000 + 0x3FFF]`.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSlot {
    pub source: BankSource,
    pub writable: bool,
}

/// The complete paging latch state, as used by snapshot loaders and savers.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagingState {
    pub rom_bank: u8,
    pub ram_bank_c000: u8,
    /// High bits of the RAM bank selection (Scorpion, Pentagon 1024).
    pub ram_bank_ext: u8,
    pub screen_shadow: bool,
    pub paging_locked: bool,
    pub special_paging: Option<SpecialPaging>,
    pub ram_over_rom: bool,
    pub trdos_active: bool,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum MemoryError {
    /// A ROM bank index outside of the current profile.
    InvalidRomBank { bank: u8, model: &'static str },
    /// A RAM bank index outside of the current profile.
    InvalidRamBank { bank: u8, model: &'static str },
    /// Loaded ROM data does not fill a whole bank.
    InvalidRomSize,
    Io(io::Error),
}

impl std::error::Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::InvalidRomBank { bank, model } => {
                write!(f, "ROM bank {} is out of range for the {} model", bank, model)
            }
            MemoryError::InvalidRamBank { bank, model } => {
                write!(f, "RAM bank {} is out of range for the {} model", bank, model)
            }
            MemoryError::InvalidRomSize => f.write_str("ROM data size differs from the bank size"),
            MemoryError::Io(err) => err.fmt(f),
        }
    }
}

impl From<MemoryError> for io::Error {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Io(err) => err,
            e => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}

pub type Result<T> = core::result::Result<T, MemoryError>;

/// ZX Spectrum's banked memory.
///
/// Four 16K address slots resolve to ROM banks or RAM banks according to the
/// profile's [PagingModel] and the latch values written to the paging ports.
/// The TR-DOS ROM is kept outside the regular ROM banks and overlays slot 0
/// while the Beta-Disk interface has control.
#[derive(Clone)]
pub struct BankedMemory {
    profile: &'static MachineProfile,
    roms: Vec<Box<MemBank>>,
    rams: Vec<Box<MemBank>>,
    trdos_rom: Option<Box<MemBank>>,
    slots: [PageSlot; 4],
    rom_bank: u8,
    ram_bank_c000: u8,
    ram_bank_ext: u8,
    screen_shadow: bool,
    paging_locked: bool,
    special_paging: Option<SpecialPaging>,
    ram_over_rom: bool,
    trdos_active: bool,
    trdos_available: bool,
}

impl fmt::Debug for BankedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankedMemory")
            .field("model", &self.profile.tag)
            .field("slots", &self.slots)
            .field("rom_bank", &self.rom_bank)
            .field("ram_bank_c000", &self.ram_bank_c000)
            .field("ram_bank_ext", &self.ram_bank_ext)
            .field("screen_shadow", &self.screen_shadow)
            .field("paging_locked", &self.paging_locked)
            .field("special_paging", &self.special_paging)
            .field("ram_over_rom", &self.ram_over_rom)
            .field("trdos_active", &self.trdos_active)
            .finish()
    }
}

fn new_bank() -> Box<MemBank> {
    Box::new([0u8; BANK_SIZE])
}

impl BankedMemory {
    pub fn new(profile: &'static MachineProfile, beta_disk: bool) -> Self {
        let roms = (0..profile.rom_bank_count).map(|_| new_bank()).collect();
        let rams = (0..profile.ram_bank_count).map(|_| new_bank()).collect();
        let trdos_rom = if beta_disk { Some(new_bank()) } else { None };
        let mut memory = BankedMemory {
            profile,
            roms,
            rams,
            trdos_rom,
            slots: [PageSlot { source: BankSource::Rom(0), writable: false }; 4],
            rom_bank: 0,
            ram_bank_c000: 0,
            ram_bank_ext: 0,
            screen_shadow: false,
            paging_locked: false,
            special_paging: None,
            ram_over_rom: false,
            trdos_active: false,
            trdos_available: beta_disk,
        };
        memory.remap();
        memory
    }

    /// Resets all paging latches as a hardware **RESET** signal would.
    pub fn reset(&mut self) {
        self.rom_bank = 0;
        self.ram_bank_c000 = 0;
        self.ram_bank_ext = 0;
        self.screen_shadow = false;
        self.paging_locked = false;
        self.special_paging = None;
        self.ram_over_rom = false;
        self.trdos_active = false;
        self.remap();
    }

    #[inline(always)]
    pub fn profile(&self) -> &'static MachineProfile {
        self.profile
    }

    #[inline(always)]
    fn bank_ref(&self, source: BankSource) -> &MemBank {
        match source {
            BankSource::Rom(bank) => &self.roms[bank as usize],
            BankSource::TrDosRom => self.trdos_rom.as_deref().unwrap(),
            BankSource::Ram(bank) => &self.rams[bank as usize],
        }
    }

    #[inline(always)]
    pub fn read(&self, addr: u16) -> u8 {
        let slot = self.slots[(addr >> 14) as usize];
        self.bank_ref(slot.source)[(addr & 0x3FFF) as usize]
    }

    #[inline(always)]
    pub fn read16(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    /// Writes to slots mapped to ROM are silently ignored.
    #[inline(always)]
    pub fn write(&mut self, addr: u16, val: u8) {
        let slot = self.slots[(addr >> 14) as usize];
        if slot.writable {
            if let BankSource::Ram(bank) = slot.source {
                self.rams[bank as usize][(addr & 0x3FFF) as usize] = val;
            }
        }
    }

    #[inline(always)]
    pub fn write16(&mut self, addr: u16, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write(addr, lo);
        self.write(addr.wrapping_add(1), hi);
    }

    /// Returns the slot descriptor covering the given address.
    #[inline]
    pub fn slot_at(&self, addr: u16) -> PageSlot {
        self.slots[(addr >> 14) as usize]
    }

    /// Recomputes the slot map from the current latch values.
    fn remap(&mut self) {
        if let Some(layout) = self.special_paging {
            for (slot, bank) in self.slots.iter_mut().zip(layout.layout().iter()) {
                *slot = PageSlot { source: BankSource::Ram(*bank), writable: true };
            }
            return;
        }
        self.slots[0] = if self.ram_over_rom {
            PageSlot { source: BankSource::Ram(0), writable: true }
        }
        else if self.trdos_active {
            PageSlot { source: BankSource::TrDosRom, writable: false }
        }
        else {
            PageSlot { source: BankSource::Rom(self.rom_bank), writable: false }
        };
        match self.profile.paging_model {
            PagingModel::None => {
                self.slots[1] = PageSlot { source: BankSource::Ram(0), writable: true };
                self.slots[2] = PageSlot { source: BankSource::Ram(1), writable: true };
                self.slots[3] = PageSlot { source: BankSource::Ram(2), writable: true };
            }
            _ => {
                self.slots[1] = PageSlot { source: BankSource::Ram(5), writable: true };
                self.slots[2] = PageSlot { source: BankSource::Ram(2), writable: true };
                let bank = self.ram_bank_ext << 3 | self.ram_bank_c000;
                self.slots[3] = PageSlot { source: BankSource::Ram(bank), writable: true };
            }
        }
    }

    /// Handles a write to the primary paging port 0x7FFD.
    ///
    /// Returns `true` if the visible screen bank changed.
    pub fn write_paging_7ffd(&mut self, val: u8) -> bool {
        if self.profile.paging_model == PagingModel::None || self.paging_locked {
            return false;
        }
        let flags = Mem128Flags::from(val);
        self.ram_bank_c000 = flags.ram_bank();
        let rom_hi = self.rom_bank & !1;
        self.rom_bank = rom_hi | flags.rom_bank();
        let screen_changed = self.screen_shadow != flags.is_screen_shadow();
        self.screen_shadow = flags.is_screen_shadow();
        if flags.is_paging_locked() {
            debug!("paging locked until reset");
            self.paging_locked = true;
        }
        self.remap();
        screen_changed
    }

    /// Handles a write to the +2A/+3 secondary paging port 0x1FFD.
    ///
    /// The disc motor bit is not interpreted here; the caller forwards it to
    /// the FDC.
    pub fn write_paging_1ffd(&mut self, val: u8) {
        if self.paging_locked {
            return;
        }
        let flags = Ctrl1ffdFlags::from(val);
        self.rom_bank = self.rom_bank & 1 | flags.rom_bank_hi();
        self.special_paging = if flags.is_special_paging() {
            Some(flags.special_paging())
        }
        else {
            None
        };
        self.remap();
    }

    /// Handles a write to the Scorpion extension port 0x1FFD.
    pub fn write_paging_scorpion_1ffd(&mut self, val: u8) {
        let flags = ScorpionCtrlFlags::from(val);
        self.ram_bank_ext = flags.ram_bank_hi() >> 3;
        self.rom_bank = self.rom_bank & 1 |
                        u8::from(flags.contains(ScorpionCtrlFlags::SERVICE_ROM)) << 1;
        self.ram_over_rom = flags.contains(ScorpionCtrlFlags::RAM_OVER_ROM);
        self.remap();
    }

    /// Handles a write to the Pentagon 1024 extension port.
    pub fn write_paging_pentagon1024(&mut self, val: u8) {
        let flags = PentagonExtFlags::from(val);
        self.ram_bank_ext = (flags & PentagonExtFlags::RAM_EXT_MASK).bits();
        self.remap();
    }

    /// Arms or disarms the TR-DOS ROM overlay for an opcode fetch at `pc`.
    ///
    /// The overlay activates when the CPU fetches inside the magic window
    /// [0x3D00, 0x3DFF] while 48k BASIC is paged in, and deactivates as soon
    /// as the CPU fetches at or above 0x4000. Returns `true` when the
    /// overlay state changed.
    #[inline]
    pub fn update_trdos_overlay(&mut self, pc: u16) -> bool {
        if !self.trdos_available {
            return false;
        }
        if !self.trdos_active {
            if pc & 0xFF00 == 0x3D00
                    && self.rom_bank == self.profile.basic_rom_bank
                    && self.special_paging.is_none()
                    && !self.ram_over_rom {
                trace!("TR-DOS ROM paged in at pc: {:04x}", pc);
                self.trdos_active = true;
                self.remap();
                return true;
            }
        }
        else if pc >= 0x4000 {
            trace!("TR-DOS ROM paged out at pc: {:04x}", pc);
            self.trdos_active = false;
            self.remap();
            return true;
        }
        false
    }

    #[inline(always)]
    pub fn is_trdos_active(&self) -> bool {
        self.trdos_active
    }

    #[inline(always)]
    pub fn is_paging_locked(&self) -> bool {
        self.paging_locked
    }

    /// The contention mask derived from the current paging state.
    pub fn contention(&self) -> SlotContention {
        if !self.profile.has_contention {
            return SlotContention::NONE;
        }
        match self.profile.paging_model {
            PagingModel::None => SlotContention::SLOT1,
            PagingModel::Plus2A => {
                // banks 4..=7 live on the gate array side of the bus
                SlotContention::from_slots(self.contended_slots(|bank| bank >= 4))
            }
            _ => {
                // banks 1, 3, 5 and 7 are contended
                SlotContention::from_slots(self.contended_slots(|bank| bank & 1 == 1))
            }
        }
    }

    fn contended_slots<F: Fn(u8) -> bool>(&self, is_contended_bank: F) -> [bool; 4] {
        let mut slots = [false; 4];
        for (flag, slot) in slots.iter_mut().zip(self.slots.iter()) {
            if let BankSource::Ram(bank) = slot.source {
                *flag = is_contended_bank(bank);
            }
        }
        slots
    }

    /// Returns `true` if the shadow screen bank (7) is selected for display.
    #[inline(always)]
    pub fn is_screen_shadow(&self) -> bool {
        self.screen_shadow
    }

    /// Returns a reference to the memory bank holding the requested screen.
    ///
    /// Models without paging have a single screen in the bank mapped at
    /// 0x4000; the others keep screens in banks 5 and 7.
    pub fn screen_ref(&self, shadow: bool) -> &MemBank {
        match self.profile.paging_model {
            PagingModel::None => &self.rams[0],
            _ => &self.rams[if shadow { 7 } else { 5 }],
        }
    }

    /// If a write to `addr` lands inside one of the screen areas, returns
    /// the screen identification (`true` for the shadow screen) and the
    /// offset into the screen.
    #[inline]
    pub fn screen_coords_of_write(&self, addr: u16) -> Option<(bool, u16)> {
        let offset = addr & 0x3FFF;
        if offset >= SCREEN_SIZE {
            return None;
        }
        match self.slots[(addr >> 14) as usize].source {
            BankSource::Ram(bank) => match self.profile.paging_model {
                PagingModel::None if bank == 0 => Some((false, offset)),
                _ if bank == 5 => Some((false, offset)),
                _ if bank == 7 => Some((true, offset)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn rom_bank_ref(&self, bank: u8) -> Result<&MemBank> {
        self.roms.get(bank as usize).map(|b| &**b)
            .ok_or(MemoryError::InvalidRomBank { bank, model: self.profile.tag })
    }

    pub fn ram_bank_ref(&self, bank: u8) -> Result<&MemBank> {
        self.rams.get(bank as usize).map(|b| &**b)
            .ok_or(MemoryError::InvalidRamBank { bank, model: self.profile.tag })
    }

    pub fn ram_bank_mut(&mut self, bank: u8) -> Result<&mut MemBank> {
        let model = self.profile.tag;
        self.rams.get_mut(bank as usize).map(|b| &mut **b)
            .ok_or(MemoryError::InvalidRamBank { bank, model })
    }

    /// Loads a whole 16K ROM image into the given ROM bank.
    pub fn load_rom_bank(&mut self, bank: u8, data: &[u8]) -> Result<()> {
        if data.len() != BANK_SIZE {
            return Err(MemoryError::InvalidRomSize);
        }
        let model = self.profile.tag;
        let slot = self.roms.get_mut(bank as usize)
                    .ok_or(MemoryError::InvalidRomBank { bank, model })?;
        slot.copy_from_slice(data);
        Ok(())
    }

    /// Loads the TR-DOS ROM image; requires the Beta-Disk interface.
    pub fn load_trdos_rom(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != BANK_SIZE {
            return Err(MemoryError::InvalidRomSize);
        }
        match self.trdos_rom.as_mut() {
            Some(bank) => {
                bank.copy_from_slice(data);
                Ok(())
            }
            None => Err(MemoryError::InvalidRomBank {
                bank: self.profile.rom_bank_count, model: self.profile.tag
            }),
        }
    }

    /// Captures the paging latches for a snapshot.
    pub fn paging_state(&self) -> PagingState {
        PagingState {
            rom_bank: self.rom_bank,
            ram_bank_c000: self.ram_bank_c000,
            ram_bank_ext: self.ram_bank_ext,
            screen_shadow: self.screen_shadow,
            paging_locked: self.paging_locked,
            special_paging: self.special_paging,
            ram_over_rom: self.ram_over_rom,
            trdos_active: self.trdos_active,
        }
    }

    /// Restores the paging latches from a snapshot.
    ///
    /// Bank indexes are validated against the profile: a snapshot taken from
    /// a machine with more memory fails here instead of mapping garbage.
    pub fn set_paging_state(&mut self, state: PagingState) -> Result<()> {
        let model = self.profile.tag;
        if state.rom_bank >= self.profile.rom_bank_count {
            return Err(MemoryError::InvalidRomBank { bank: state.rom_bank, model });
        }
        let bank = state.ram_bank_ext << 3 | state.ram_bank_c000;
        if bank >= self.profile.ram_bank_count {
            return Err(MemoryError::InvalidRamBank { bank, model });
        }
        if state.trdos_active && self.trdos_rom.is_none() {
            return Err(MemoryError::InvalidRomBank {
                bank: self.profile.rom_bank_count, model
            });
        }
        self.rom_bank = state.rom_bank;
        self.ram_bank_c000 = state.ram_bank_c000;
        self.ram_bank_ext = state.ram_bank_ext;
        self.screen_shadow = state.screen_shadow;
        self.paging_locked = state.paging_locked;
        self.special_paging = state.special_paging;
        self.ram_over_rom = state.ram_over_rom;
        self.trdos_active = state.trdos_active;
        self.remap();
        Ok(())
    }

    /// Fills all RAM banks with the bytes produced by the closure.
    pub fn fill_ram<F: FnMut() -> u8>(&mut self, mut f: F) {
        for bank in self.rams.iter_mut() {
            for p in bank.iter_mut() {
                *p = f();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::profile::MachineModel;

    fn memory(model: MachineModel) -> BankedMemory {
        BankedMemory::new(model.profile(), false)
    }

    #[test]
    fn ram_round_trip_and_rom_write_ignored() {
        let mut mem = memory(MachineModel::Spectrum48);
        for addr in [0x4000u16, 0x7FFF, 0x8000, 0xC000, 0xFFFF].iter().copied() {
            mem.write(addr, 0xA5);
            assert_eq!(mem.read(addr), 0xA5);
        }
        mem.write(0x1000, 0x55);
        assert_eq!(mem.read(0x1000), 0);
        mem.write16(0x7FFF, 0xBEEF);
        assert_eq!(mem.read16(0x7FFF), 0xBEEF);
        assert_eq!(mem.read(0x8000), 0xBE);
    }

    #[test]
    fn standard_paging_128k() {
        let mut mem = memory(MachineModel::Spectrum128);
        assert_eq!(mem.slot_at(0x4000).source, BankSource::Ram(5));
        assert_eq!(mem.slot_at(0x8000).source, BankSource::Ram(2));
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(0));
        mem.write_paging_7ffd(0b0001_0011);
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(3));
        assert_eq!(mem.slot_at(0x0000).source, BankSource::Rom(1));
        // bank 3 is contended, so is bank 5 in the fixed slot 1
        let contention = mem.contention();
        assert!(contention.is_contended_address(0x4000));
        assert!(contention.is_contended_address(0xC000));
        assert!(!contention.is_contended_address(0x8000));
        mem.write_paging_7ffd(0b0000_0010);
        assert!(!mem.contention().is_contended_address(0xC000));
    }

    #[test]
    fn paging_lock_holds_until_reset() {
        let mut mem = memory(MachineModel::Spectrum128);
        mem.write_paging_7ffd(0x20);
        assert!(mem.is_paging_locked());
        let before = mem.paging_state();
        mem.write_paging_7ffd(0x01);
        mem.write_paging_7ffd(0x17);
        assert_eq!(mem.paging_state(), before);
        mem.reset();
        assert!(!mem.is_paging_locked());
        mem.write_paging_7ffd(0x01);
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(1));
    }

    #[test]
    fn plus2a_special_paging_and_rom_banks() {
        let mut mem = memory(MachineModel::SpectrumPlus2A);
        mem.write_paging_7ffd(0b0001_0000);
        mem.write_paging_1ffd(0b0100);
        assert_eq!(mem.slot_at(0x0000).source, BankSource::Rom(3));
        mem.write_paging_1ffd(0b0111);
        for (slot, bank) in [4u8, 7, 6, 3].iter().enumerate() {
            assert_eq!(mem.slot_at((slot as u16) << 14).source, BankSource::Ram(*bank));
            assert!(mem.slot_at((slot as u16) << 14).writable);
        }
        // banks 4 and 7 are contended in special paging mode, 6 and 3 too
        let contention = mem.contention();
        assert!(contention.is_contended_address(0x0000));
        assert!(contention.is_contended_address(0x4000));
        assert!(contention.is_contended_address(0x8000));
        assert!(!contention.is_contended_address(0xC000));
        mem.write_paging_1ffd(0);
        assert_eq!(mem.slot_at(0x4000).source, BankSource::Ram(5));
    }

    #[test]
    fn scorpion_extended_ram_and_ram_over_rom() {
        let mut mem = memory(MachineModel::Scorpion);
        mem.write_paging_7ffd(0b0000_0101);
        mem.write_paging_scorpion_1ffd(0b0001_0000);
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(13));
        mem.write_paging_scorpion_1ffd(0b0001_0001);
        assert_eq!(mem.slot_at(0x0000).source, BankSource::Ram(0));
        assert!(mem.slot_at(0x0000).writable);
        mem.write(0x0002, 0x42);
        assert_eq!(mem.read(0x0002), 0x42);
        mem.write_paging_scorpion_1ffd(0);
        assert_eq!(mem.slot_at(0x0000).source, BankSource::Rom(0));
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(5));
    }

    #[test]
    fn pentagon1024_wide_banks() {
        let mut mem = memory(MachineModel::Pentagon1024);
        mem.write_paging_7ffd(0b0000_0111);
        mem.write_paging_pentagon1024(0b0000_0111);
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(63));
        // pentagon is never contended
        assert!(!mem.contention().is_contended_address(0x4000));
    }

    #[test]
    fn trdos_overlay_window() {
        let mut mem = BankedMemory::new(MachineModel::Pentagon.profile(), true);
        mem.write_paging_7ffd(0b0001_0000);
        assert!(mem.update_trdos_overlay(0x3D00));
        assert!(mem.is_trdos_active());
        assert_eq!(mem.slot_at(0x0000).source, BankSource::TrDosRom);
        // fetches below 0x4000 keep the overlay in place
        assert!(!mem.update_trdos_overlay(0x0123));
        assert!(mem.is_trdos_active());
        assert!(mem.update_trdos_overlay(0x4000));
        assert!(!mem.is_trdos_active());
        assert_eq!(mem.slot_at(0x0000).source, BankSource::Rom(1));
        // with the 128k BASIC ROM paged in the magic window is inert
        mem.write_paging_7ffd(0b0000_0000);
        assert!(!mem.update_trdos_overlay(0x3D2F));
        assert!(!mem.is_trdos_active());
    }

    #[test]
    fn snapshot_paging_state_validation() {
        let mut mem = memory(MachineModel::Spectrum128);
        let mut state = mem.paging_state();
        state.ram_bank_c000 = 3;
        state.screen_shadow = true;
        mem.set_paging_state(state).unwrap();
        assert_eq!(mem.slot_at(0xC000).source, BankSource::Ram(3));
        assert!(mem.is_screen_shadow());
        let mut bad = mem.paging_state();
        bad.ram_bank_ext = 1;
        assert!(matches!(mem.set_paging_state(bad),
                         Err(MemoryError::InvalidRamBank { bank: 11, .. })));
    }

    #[test]
    fn screen_write_coordinates() {
        let mut mem = memory(MachineModel::Spectrum128);
        assert_eq!(mem.screen_coords_of_write(0x4000), Some((false, 0)));
        assert_eq!(mem.screen_coords_of_write(0x5AFF), Some((false, 0x1AFF)));
        assert_eq!(mem.screen_coords_of_write(0x5B00), None);
        assert_eq!(mem.screen_coords_of_write(0xC000), None);
        // shadow screen paged at 0xC000
        mem.write_paging_7ffd(0b0000_0111);
        assert_eq!(mem.screen_coords_of_write(0xC100), Some((true, 0x100)));
    }
}
