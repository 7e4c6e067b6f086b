/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The Beta-Disk interface: a WD1793 floppy controller façade.
//!
//! Commands execute instantly against a [DiskAccess] surface; sector data
//! still moves byte-by-byte through the data register so TR-DOS transfer
//! loops behave normally. Head movement timing is not emulated.
use core::fmt;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use super::DiskAccess;

/// TR-DOS formats 256 byte sectors.
pub const SECTOR_SIZE: usize = 256;

/// WD1793 status bits. Some bits share a position between command types.
pub mod status {
    pub const BUSY             : u8 = 0b0000_0001;
    /// Type I: the index hole passes under the head.
    pub const INDEX            : u8 = 0b0000_0010;
    /// Type II/III: a data byte awaits transfer.
    pub const DRQ              : u8 = 0b0000_0010;
    pub const TRACK0           : u8 = 0b0000_0100;
    pub const LOST_DATA        : u8 = 0b0000_0100;
    pub const CRC_ERROR        : u8 = 0b0000_1000;
    pub const RECORD_NOT_FOUND : u8 = 0b0001_0000;
    pub const SEEK_ERROR       : u8 = 0b0001_0000;
    pub const HEAD_LOADED      : u8 = 0b0010_0000;
    pub const WRITE_PROTECT    : u8 = 0b0100_0000;
    pub const NOT_READY        : u8 = 0b1000_0000;
}

/// The low bytes of the four TR-DOS register ports and the system port.
pub const PORT_COMMAND: u8 = 0x1F;
pub const PORT_TRACK  : u8 = 0x3F;
pub const PORT_SECTOR : u8 = 0x5F;
pub const PORT_DATA   : u8 = 0x7F;
pub const PORT_SYSTEM : u8 = 0xFF;

enum DataPhase {
    Idle,
    Reading,
    Writing,
}

/// The WD1793 register file and data-transfer state.
pub struct BetaDisk {
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    system: u8,
    intrq: bool,
    step_in: bool,
    phase: DataPhase,
    buffer: Vec<u8>,
    buffer_pos: usize,
    drives: [Option<Box<dyn DiskAccess>>; 4],
}

impl fmt::Debug for BetaDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BetaDisk")
            .field("status", &self.status)
            .field("track", &self.track)
            .field("sector", &self.sector)
            .field("system", &self.system)
            .field("intrq", &self.intrq)
            .finish()
    }
}

impl Default for BetaDisk {
    fn default() -> Self {
        BetaDisk {
            status: 0,
            track: 0,
            sector: 1,
            data: 0,
            system: 0,
            intrq: false,
            step_in: true,
            phase: DataPhase::Idle,
            buffer: Vec::new(),
            buffer_pos: 0,
            drives: [None, None, None, None],
        }
    }
}

impl BetaDisk {
    /// Inserts a disk surface into one of the four drives.
    pub fn insert_disk(&mut self, drive: usize, disk: Box<dyn DiskAccess>) {
        self.drives[drive & 3] = Some(disk);
    }

    /// Removes the disk from a drive, returning its surface.
    pub fn eject_disk(&mut self, drive: usize) -> Option<Box<dyn DiskAccess>> {
        self.drives[drive & 3].take()
    }

    pub fn reset(&mut self) {
        let drives = core::mem::replace(&mut self.drives, [None, None, None, None]);
        *self = BetaDisk { drives, ..Default::default() };
    }

    #[inline]
    fn selected_drive(&mut self) -> Option<&mut Box<dyn DiskAccess>> {
        self.drives[(self.system & 3) as usize].as_mut()
    }

    /// The side selected by the system register; the select line is
    /// inverted on the interface.
    #[inline]
    fn side(&self) -> u8 {
        !(self.system >> 4) & 1
    }

    /// Handles a read from one of the interface ports (low byte decoded).
    pub fn read_io(&mut self, port_low: u8) -> u8 {
        match port_low {
            PORT_COMMAND => {
                self.intrq = false;
                self.status
            }
            PORT_TRACK => self.track,
            PORT_SECTOR => self.sector,
            PORT_DATA => self.read_data(),
            PORT_SYSTEM => {
                let mut val = 0b0011_1111;
                if self.intrq {
                    val |= 0x80;
                }
                if self.status & status::DRQ != 0 && !matches!(self.phase, DataPhase::Idle) {
                    val |= 0x40;
                }
                val
            }
            _ => 0xFF,
        }
    }

    /// Handles a write to one of the interface ports (low byte decoded).
    pub fn write_io(&mut self, port_low: u8, val: u8) {
        match port_low {
            PORT_COMMAND => self.command(val),
            PORT_TRACK => self.track = val,
            PORT_SECTOR => self.sector = val,
            PORT_DATA => self.write_data(val),
            PORT_SYSTEM => {
                self.system = val;
                if val & 0b0100 == 0 {
                    // /RESET held low
                    let drives = core::mem::replace(&mut self.drives,
                                                    [None, None, None, None]);
                    *self = BetaDisk { system: val, drives, ..Default::default() };
                }
            }
            _ => {}
        }
    }

    fn read_data(&mut self) -> u8 {
        if let DataPhase::Reading = self.phase {
            if let Some(&byte) = self.buffer.get(self.buffer_pos) {
                self.buffer_pos += 1;
                self.data = byte;
                if self.buffer_pos == self.buffer.len() {
                    self.finish_data_phase();
                }
            }
        }
        self.data
    }

    fn write_data(&mut self, val: u8) {
        self.data = val;
        if let DataPhase::Writing = self.phase {
            self.buffer.push(val);
            if self.buffer.len() == SECTOR_SIZE {
                let (track, side, sector) = (self.track, self.side(), self.sector);
                let buffer = core::mem::take(&mut self.buffer);
                let ok = match self.selected_drive() {
                    Some(disk) => disk.write_sector(track, side, sector, &buffer),
                    None => false,
                };
                if !ok {
                    self.status |= status::RECORD_NOT_FOUND;
                }
                self.finish_data_phase();
            }
        }
    }

    fn finish_data_phase(&mut self) {
        self.phase = DataPhase::Idle;
        self.buffer.clear();
        self.buffer_pos = 0;
        self.status &= !(status::BUSY | status::DRQ);
        self.intrq = true;
    }

    fn command(&mut self, cmd: u8) {
        if cmd & 0xF0 == 0xD0 {
            // force interrupt
            self.phase = DataPhase::Idle;
            self.status &= !(status::BUSY | status::DRQ);
            self.intrq = true;
            return;
        }
        if self.status & status::BUSY != 0 {
            return;
        }
        self.intrq = false;
        match cmd >> 4 {
            // type I
            0x0..=0x7 => self.command_type1(cmd),
            // read sector
            0x8 | 0x9 => self.begin_read_sector(),
            // write sector
            0xA | 0xB => self.begin_write_sector(),
            // read address
            0xC => self.read_address(),
            // read/write track are not supported by the façade
            _ => {
                self.status = status::RECORD_NOT_FOUND;
                self.intrq = true;
            }
        }
    }

    fn command_type1(&mut self, cmd: u8) {
        match cmd >> 4 {
            0x0 => self.track = 0,
            0x1 => self.track = self.data,
            0x2 | 0x3 => {
                // step retains the previous direction
                let dir = if self.step_in { 1i16 } else { -1 };
                self.track = (self.track as i16 + dir).max(0) as u8;
            }
            0x4 | 0x5 => {
                self.step_in = true;
                self.track = self.track.saturating_add(1);
            }
            _ => {
                self.step_in = false;
                self.track = self.track.saturating_sub(1);
            }
        }
        let mut status = status::HEAD_LOADED;
        if self.track == 0 {
            status |= status::TRACK0;
        }
        match self.selected_drive() {
            Some(disk) => {
                if disk.is_write_protected() {
                    status |= status::WRITE_PROTECT;
                }
            }
            None => status |= status::NOT_READY,
        }
        self.status = status;
        self.intrq = true;
    }

    fn begin_read_sector(&mut self) {
        let (track, side, sector) = (self.track, self.side(), self.sector);
        let block = match self.selected_drive() {
            Some(disk) => disk.read_sector(track, side, sector),
            None => {
                self.status = status::NOT_READY;
                self.intrq = true;
                return;
            }
        };
        match block {
            Some(data) => {
                trace!("read sector t:{} s:{} sec:{} ({} bytes)",
                       track, side, sector, data.len());
                self.buffer = data;
                self.buffer_pos = 0;
                self.phase = DataPhase::Reading;
                self.status = status::BUSY | status::DRQ;
            }
            None => {
                self.status = status::RECORD_NOT_FOUND;
                self.intrq = true;
            }
        }
    }

    fn begin_write_sector(&mut self) {
        match self.selected_drive() {
            Some(disk) => {
                if disk.is_write_protected() {
                    self.status = status::WRITE_PROTECT;
                    self.intrq = true;
                    return;
                }
            }
            None => {
                self.status = status::NOT_READY;
                self.intrq = true;
                return;
            }
        }
        self.buffer.clear();
        self.phase = DataPhase::Writing;
        self.status = status::BUSY | status::DRQ;
    }

    fn read_address(&mut self) {
        if self.selected_drive().is_none() {
            self.status = status::NOT_READY;
            self.intrq = true;
            return;
        }
        // track, side, sector, size code (1 = 256 bytes), CRC
        self.buffer = vec![self.track, self.side(), self.sector, 1, 0, 0];
        self.buffer_pos = 0;
        self.phase = DataPhase::Reading;
        self.status = status::BUSY | status::DRQ;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestDisk {
        sectors: Vec<(u8, u8, u8, Vec<u8>)>,
    }

    impl DiskAccess for TestDisk {
        fn read_sector(&mut self, track: u8, side: u8, sector: u8) -> Option<Vec<u8>> {
            self.sectors.iter()
                .find(|(t, s, sec, _)| (*t, *s, *sec) == (track, side, sector))
                .map(|(_, _, _, data)| data.clone())
        }
        fn write_sector(&mut self, track: u8, side: u8, sector: u8, data: &[u8]) -> bool {
            self.sectors.push((track, side, sector, data.to_vec()));
            true
        }
    }

    fn controller_with_disk() -> BetaDisk {
        let mut fdc = BetaDisk::default();
        let disk = TestDisk {
            sectors: vec![(0, 0, 9, (0..=255u8).collect())],
        };
        fdc.insert_disk(0, Box::new(disk));
        // drive 0, /RESET high, side 0 selected (inverted line)
        fdc.write_io(PORT_SYSTEM, 0b0001_0100);
        fdc
    }

    #[test]
    fn restore_reports_track0() {
        let mut fdc = controller_with_disk();
        fdc.write_io(PORT_COMMAND, 0x08);
        let status = fdc.read_io(PORT_COMMAND);
        assert_eq!(status & status::TRACK0, status::TRACK0);
        assert_eq!(status & status::BUSY, 0);
    }

    #[test]
    fn read_sector_streams_through_the_data_register() {
        let mut fdc = controller_with_disk();
        fdc.write_io(PORT_SECTOR, 9);
        fdc.write_io(PORT_COMMAND, 0x80);
        assert_eq!(fdc.read_io(PORT_COMMAND) & status::BUSY, status::BUSY);
        let mut data = Vec::new();
        for _ in 0..SECTOR_SIZE {
            data.push(fdc.read_io(PORT_DATA));
        }
        assert_eq!(data, (0..=255u8).collect::<Vec<_>>());
        assert_eq!(fdc.read_io(PORT_COMMAND) & status::BUSY, 0);
        assert_eq!(fdc.read_io(PORT_SYSTEM) & 0x80, 0x80);
    }

    #[test]
    fn write_sector_commits_after_a_full_sector() {
        let mut fdc = controller_with_disk();
        fdc.write_io(PORT_SECTOR, 2);
        fdc.write_io(PORT_COMMAND, 0xA0);
        for i in 0..SECTOR_SIZE {
            fdc.write_io(PORT_DATA, i as u8 ^ 0x55);
        }
        assert_eq!(fdc.read_io(PORT_COMMAND) & status::BUSY, 0);
        let disk = fdc.eject_disk(0).unwrap();
        let mut disk = disk;
        let data = disk.read_sector(0, 0, 2).unwrap();
        assert_eq!(data[0], 0x55);
        assert_eq!(data.len(), SECTOR_SIZE);
    }

    #[test]
    fn missing_sector_sets_record_not_found() {
        let mut fdc = controller_with_disk();
        fdc.write_io(PORT_SECTOR, 1);
        fdc.write_io(PORT_COMMAND, 0x80);
        assert_eq!(fdc.read_io(PORT_COMMAND) & status::RECORD_NOT_FOUND,
                   status::RECORD_NOT_FOUND);
    }
}
