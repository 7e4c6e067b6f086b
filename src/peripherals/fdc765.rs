/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The µPD765 floppy controller façade of the +2A/+3.
//!
//! Commands move through the standard command/execution/result phases over
//! the data register at port 0x3FFD; sector operations complete instantly
//! against a [DiskAccess] surface. The motor line is driven from bit 3 of
//! port 0x1FFD by the machine.
use core::fmt;
use std::collections::VecDeque;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use super::DiskAccess;

/// Main status register bits.
pub mod main_status {
    pub const FDD0_BUSY: u8 = 0b0000_0001;
    pub const FDD1_BUSY: u8 = 0b0000_0010;
    pub const CB       : u8 = 0b0001_0000;
    pub const EXM      : u8 = 0b0010_0000;
    pub const DIO      : u8 = 0b0100_0000;
    pub const RQM      : u8 = 0b1000_0000;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Command,
    ExecRead,
    ExecWrite,
    Result,
}

/// The µPD765 FDC state.
pub struct Upd765 {
    motor: bool,
    phase: Phase,
    command: Vec<u8>,
    data: VecDeque<u8>,
    results: VecDeque<u8>,
    write_target: Option<(u8, u8, u8, usize)>,
    track: [u8; 2],
    pending_seek_end: Option<u8>,
    drives: [Option<Box<dyn DiskAccess>>; 2],
}

impl fmt::Debug for Upd765 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upd765")
            .field("motor", &self.motor)
            .field("phase", &self.phase)
            .field("track", &self.track)
            .finish()
    }
}

impl Default for Upd765 {
    fn default() -> Self {
        Upd765 {
            motor: false,
            phase: Phase::Idle,
            command: Vec::new(),
            data: VecDeque::new(),
            results: VecDeque::new(),
            write_target: None,
            track: [0; 2],
            pending_seek_end: None,
            drives: [None, None],
        }
    }
}

/// The total command length in bytes by the low 5 bits of the command code.
fn command_length(code: u8) -> usize {
    match code & 0x1F {
        0x03 => 3,        // specify
        0x04 => 2,        // sense drive status
        0x07 => 2,        // recalibrate
        0x08 => 1,        // sense interrupt status
        0x0F => 3,        // seek
        0x0A => 2,        // read id
        0x05 | 0x06 | 0x09 | 0x0C | 0x11 => 9, // write/read data variants
        _ => 1,           // invalid commands resolve immediately
    }
}

impl Upd765 {
    pub fn insert_disk(&mut self, drive: usize, disk: Box<dyn DiskAccess>) {
        self.drives[drive & 1] = Some(disk);
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<Box<dyn DiskAccess>> {
        self.drives[drive & 1].take()
    }

    pub fn reset(&mut self) {
        let drives = core::mem::replace(&mut self.drives, [None, None]);
        *self = Upd765 { drives, ..Default::default() };
    }

    pub fn set_motor(&mut self, on: bool) {
        if self.motor != on {
            trace!("disc motor: {}", on);
            self.motor = on;
        }
    }

    #[inline]
    pub fn is_motor_on(&self) -> bool {
        self.motor
    }

    /// A read from the main status register at port 0x2FFD.
    pub fn read_main_status(&self) -> u8 {
        use main_status::*;
        match self.phase {
            Phase::Idle => RQM,
            Phase::Command => RQM | CB,
            Phase::ExecRead => RQM | DIO | EXM | CB,
            Phase::ExecWrite => RQM | EXM | CB,
            Phase::Result => RQM | DIO | CB,
        }
    }

    /// A read from the data register at port 0x3FFD.
    pub fn read_data(&mut self) -> u8 {
        match self.phase {
            Phase::ExecRead => {
                let byte = self.data.pop_front().unwrap_or(0xFF);
                if self.data.is_empty() {
                    self.phase = Phase::Result;
                }
                byte
            }
            Phase::Result => {
                let byte = self.results.pop_front().unwrap_or(0xFF);
                if self.results.is_empty() {
                    self.phase = Phase::Idle;
                }
                byte
            }
            _ => 0xFF,
        }
    }

    /// A write to the data register at port 0x3FFD.
    pub fn write_data(&mut self, val: u8) {
        match self.phase {
            Phase::Idle => {
                self.command.clear();
                self.command.push(val);
                if command_length(val) == 1 {
                    self.execute();
                }
                else {
                    self.phase = Phase::Command;
                }
            }
            Phase::Command => {
                self.command.push(val);
                if self.command.len() == command_length(self.command[0]) {
                    self.execute();
                }
            }
            Phase::ExecWrite => {
                self.data.push_back(val);
                if let Some((drive, track, side, len)) = self.write_target {
                    if self.data.len() == len {
                        let sector = self.command[4];
                        let buffer: Vec<u8> = core::mem::take(&mut self.data).into();
                        let ok = match self.drives[drive as usize].as_mut() {
                            Some(disk) => disk.write_sector(track, side, sector, &buffer),
                            None => false,
                        };
                        self.finish_rw(drive, side, ok);
                    }
                }
            }
            _ => {}
        }
    }

    fn execute(&mut self) {
        let code = self.command[0] & 0x1F;
        match code {
            0x03 => {
                // specify: step rate and head timings are irrelevant here
                self.phase = Phase::Idle;
            }
            0x04 => {
                let drive = self.command[1] & 1;
                let mut st3 = drive | 0b0010_0000; // ready
                if self.track[drive as usize] == 0 {
                    st3 |= 0b0001_0000; // track 0
                }
                if self.drives[drive as usize].as_ref()
                       .map_or(false, |d| d.is_write_protected()) {
                    st3 |= 0b0100_0000;
                }
                self.results_from(&[st3]);
            }
            0x07 => {
                let drive = self.command[1] & 1;
                self.track[drive as usize] = 0;
                self.pending_seek_end = Some(0x20 | drive); // ST0: seek end
                self.phase = Phase::Idle;
            }
            0x0F => {
                let drive = self.command[1] & 1;
                self.track[drive as usize] = self.command[2];
                self.pending_seek_end = Some(0x20 | drive);
                self.phase = Phase::Idle;
            }
            0x08 => {
                match self.pending_seek_end.take() {
                    Some(st0) => {
                        let pcn = self.track[(st0 & 1) as usize];
                        self.results_from(&[st0, pcn]);
                    }
                    // no interrupt pending: invalid command response
                    None => self.results_from(&[0x80]),
                }
            }
            0x0A => {
                let drive = self.command[1] & 1;
                let side = self.command[1] >> 2 & 1;
                let track = self.track[drive as usize];
                self.results_from(&[0x20 | drive, 0, 0, track, side, 1, 2]);
            }
            0x06 | 0x0C | 0x11 => self.begin_read(),
            0x05 | 0x09 => self.begin_write(),
            _ => {
                debug!("invalid FDC command: {:02x}", self.command[0]);
                self.results_from(&[0x80]);
            }
        }
    }

    fn rw_params(&self) -> (u8, u8, u8, u8, usize) {
        let drive = self.command[1] & 1;
        let side = self.command[3];
        let track = self.command[2];
        let sector = self.command[4];
        let size = 128usize << (self.command[5] & 7).min(6);
        (drive, track, side, sector, size)
    }

    fn begin_read(&mut self) {
        let (drive, track, side, sector, _) = self.rw_params();
        let block = match self.drives[drive as usize].as_mut() {
            Some(disk) if self.motor => disk.read_sector(track, side, sector),
            _ => None,
        };
        match block {
            Some(data) => {
                self.data = data.into();
                // the result phase follows once the data is drained
                self.results = [drive, 0, 0, track, side, sector, 2]
                               .iter().copied().collect();
                self.phase = Phase::ExecRead;
            }
            // ST0 abnormal termination, ST1 no data
            None => self.results_from(&[0x40 | drive, 0x04, 0, track, side, sector, 2]),
        }
    }

    fn begin_write(&mut self) {
        let (drive, track, side, sector, size) = self.rw_params();
        let writable = self.drives[drive as usize].as_ref()
                           .map_or(false, |d| !d.is_write_protected());
        if !self.motor || !writable {
            self.results_from(&[0x40 | drive, 0x02, 0, track, side, sector, 2]);
            return;
        }
        self.data.clear();
        self.write_target = Some((drive, track, side, size));
        self.phase = Phase::ExecWrite;
    }

    fn finish_rw(&mut self, drive: u8, side: u8, ok: bool) {
        let (_, track, _, sector, _) = self.rw_params();
        self.write_target = None;
        let st0 = if ok { drive } else { 0x40 | drive };
        let st1 = if ok { 0 } else { 0x04 };
        self.results_from(&[st0, st1, 0, track, side, sector, 2]);
    }

    fn results_from(&mut self, results: &[u8]) {
        self.results = results.iter().copied().collect();
        self.phase = Phase::Result;
    }
}
