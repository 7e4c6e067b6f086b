/*
    Copyright (C) 2022-2023  the ZXCORE developers

    ZXCORE is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    ZXCORE is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/
//! ZXCORE is the machine core of a cycle-accurate ZX Spectrum emulator.
//!
//! The crate composes a [Z80][z80emu] CPU, a banked memory subsystem, a ULA
//! and supporting peripherals into a deterministic frame-stepping state
//! machine. Emulated hardware advances by whole display frames (or single
//! instructions when debugging) while preserving T-state-accurate side
//! effects on every component:
//!
//! * [clock] - the frame T-state counter with the ULA memory and I/O
//!   contention model,
//! * [chip::profile] - static per-model constants,
//! * [memory] - 16K bank mapped memory with model-specific paging latches,
//! * [video] and [chip::ula] - border, pixel and attribute timing with a
//!   scanline renderer,
//! * [chip::machine] - the frame scheduler,
//! * [debug] - execution, memory and I/O port triggers with conditions,
//! * [peripherals] - AY-3-8910, tape player, Beta-Disk and µPD765 façades,
//!   Kempston devices.
//!
//! File format parsers, rendering targets, audio devices and OS input
//! plumbing are deliberately not part of this crate; they communicate with
//! the core through data fed in and drained out at frame boundaries.
pub mod clock;
pub mod chip;
pub mod debug;
pub mod memory;
pub mod peripherals;
pub mod video;

pub use z80emu;

pub use chip::machine::Machine;
pub use chip::profile::{MachineModel, MachineProfile};
pub use clock::{FTs, FrameClock};
pub use memory::BankedMemory;
