/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Memory and I/O request handling: the [z80emu] host trait implementations
//! and the port decode chain.
use core::num::NonZeroU16;

use z80emu::{Io, Memory};

use crate::chip::flags::{Ctrl1ffdFlags, UlaPortFlags};
use crate::chip::profile::PagingModel;
use crate::clock::FTs;
use crate::debug::{FetchMap, TriggerEngine};
use crate::video::BorderColor;
use super::MachineCore;

impl MachineCore {
    fn write_7ffd(&mut self, data: u8, ts: FTs) {
        if self.memory.write_paging_7ffd(data) {
            self.ula.set_screen_shadow_at(ts, self.memory.is_screen_shadow());
        }
    }

    /// `true` when the port belongs to the Beta-Disk register file and the
    /// interface currently has control of the bus.
    #[inline]
    fn is_beta_port(&self, port_low: u8) -> bool {
        self.beta.is_some() && self.memory.is_trdos_active()
            && matches!(port_low, 0x1F | 0x3F | 0x5F | 0x7F | 0xFF)
    }

    fn port_read(&mut self, port: u16, ts: FTs) -> u8 {
        let low = port as u8;
        if self.is_beta_port(low) {
            return self.beta.as_mut().unwrap().read_io(low);
        }
        if low == 0x1F {
            if let Some(joystick) = self.joystick.as_ref() {
                return joystick.read();
            }
        }
        if let Some(mouse) = self.mouse.as_ref() {
            match port {
                0xFADF => return mouse.read_buttons(),
                0xFBDF => return mouse.read_x(),
                0xFFDF => return mouse.read_y(),
                _ => {}
            }
        }
        if port == 0xFF3B {
            return self.ula.ulaplus_read();
        }
        if port & 0xC002 == 0xC000 {
            return self.ay.data_port_read();
        }
        let profile = self.profile;
        if profile.paging_model == PagingModel::Standard128 && profile.has_contention
                && port & 0x8002 == 0 {
            // the 128k HAL10H8 treats a read of 0x7FFD as a write of
            // whatever floats on the data bus
            let data = self.ula.floating_bus(&self.memory, ts);
            self.write_7ffd(data, ts);
            return data;
        }
        if profile.has_fdc {
            if port & 0xF002 == 0x2000 {
                return self.fdc.as_ref()
                           .map_or(0xFF, |fdc| fdc.read_main_status());
            }
            if port & 0xF002 == 0x3000 {
                if let Some(fdc) = self.fdc.as_mut() {
                    return fdc.read_data();
                }
            }
        }
        if port & 1 == 0 {
            let ear_in = self.tape.read_ear_in(ts);
            return self.ula.read_keyboard((port >> 8) as u8, ear_in);
        }
        self.ula.floating_bus(&self.memory, ts)
    }

    fn port_write(&mut self, port: u16, data: u8, ts: FTs) {
        if port & 1 == 0 {
            let flags = UlaPortFlags::from(data);
            self.ula.set_border_at(ts, BorderColor::from(flags).bits());
            self.ula.write_earmic(ts, flags);
            return;
        }
        let low = port as u8;
        if self.is_beta_port(low) {
            self.beta.as_mut().unwrap().write_io(low, data);
            return;
        }
        match self.profile.paging_model {
            PagingModel::None => {}
            PagingModel::Standard128 => {
                if port & 0x8002 == 0 {
                    return self.write_7ffd(data, ts);
                }
            }
            PagingModel::Pentagon1024 => {
                if port & 0xF000 == 0xE000 {
                    return self.memory.write_paging_pentagon1024(data);
                }
                if port & 0x8002 == 0 {
                    return self.write_7ffd(data, ts);
                }
            }
            PagingModel::Scorpion => {
                if port & 0xF002 == 0x1000 {
                    return self.memory.write_paging_scorpion_1ffd(data);
                }
                if port & 0x8002 == 0 {
                    return self.write_7ffd(data, ts);
                }
            }
            PagingModel::Plus2A => {
                if port & 0xF002 == 0x1000 {
                    self.memory.write_paging_1ffd(data);
                    if let Some(fdc) = self.fdc.as_mut() {
                        let motor = Ctrl1ffdFlags::from(data)
                                    .contains(Ctrl1ffdFlags::DISC_MOTOR);
                        fdc.set_motor(motor);
                    }
                    return;
                }
                if port & 0xC002 == 0x4000 {
                    return self.write_7ffd(data, ts);
                }
            }
        }
        if port & 0xC002 == 0xC000 {
            return self.ay.select_port_write(data);
        }
        if port & 0xC002 == 0x8000 {
            return self.ay.data_port_write(ts, data);
        }
        if port == 0xBF3B {
            return self.ula.ulaplus_select(data);
        }
        if port == 0xFF3B {
            return self.ula.ulaplus_write(ts, data);
        }
        if self.profile.has_fdc && port & 0xF002 == 0x3000 {
            if let Some(fdc) = self.fdc.as_mut() {
                fdc.write_data(data);
            }
        }
    }
}

impl Io for MachineCore {
    type Timestamp = FTs;
    type WrIoBreak = ();
    type RetiBreak = ();

    #[inline(always)]
    fn is_irq(&mut self, ts: FTs) -> bool {
        self.irq_active(ts)
    }

    #[inline]
    fn read_io(&mut self, port: u16, ts: FTs) -> (u8, Option<NonZeroU16>) {
        (self.port_read(port, ts), None)
    }

    #[inline]
    fn write_io(&mut self, port: u16, data: u8, ts: FTs) -> (Option<()>, Option<NonZeroU16>) {
        self.port_write(port, data, ts);
        (None, None)
    }
}

impl Memory for MachineCore {
    type Timestamp = FTs;

    #[inline(always)]
    fn read_debug(&self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    #[inline(always)]
    fn read_mem(&self, addr: u16, _ts: FTs) -> u8 {
        self.memory.read(addr)
    }

    #[inline(always)]
    fn read_mem16(&self, addr: u16, _ts: FTs) -> u16 {
        self.memory.read16(addr)
    }

    #[inline(always)]
    fn read_opcode(&mut self, pc: u16, _ir: u16, _ts: FTs) -> u8 {
        self.fetches += 1;
        self.memory.update_trdos_overlay(pc);
        self.memory.read(pc)
    }

    #[inline(always)]
    fn write_mem(&mut self, addr: u16, val: u8, ts: FTs) {
        if let Some((shadow, offset)) = self.memory.screen_coords_of_write(addr) {
            self.ula.screen_write(shadow, offset, ts, self.memory.screen_ref(shadow));
        }
        self.memory.write(addr, val);
    }
}

/// Wraps the core with the debug hooks while any of them are active; the
/// pump builds one per instruction so the plain path never pays for the
/// checks.
pub(super) struct GuardedCore<'a> {
    pub core: &'a mut MachineCore,
    pub triggers: &'a TriggerEngine,
    pub fetch_map: Option<&'a mut FetchMap>,
}

impl<'a> Io for GuardedCore<'a> {
    type Timestamp = FTs;
    type WrIoBreak = ();
    type RetiBreak = ();

    #[inline(always)]
    fn is_irq(&mut self, ts: FTs) -> bool {
        self.core.irq_active(ts)
    }

    fn read_io(&mut self, port: u16, ts: FTs) -> (u8, Option<NonZeroU16>) {
        let val = self.core.port_read(port, ts);
        if self.triggers.watches_ports() {
            self.triggers.latch_port_access(port, val, false, ts);
        }
        (val, None)
    }

    fn write_io(&mut self, port: u16, data: u8, ts: FTs) -> (Option<()>, Option<NonZeroU16>) {
        if self.triggers.watches_ports() {
            self.triggers.latch_port_access(port, data, true, ts);
        }
        self.core.port_write(port, data, ts);
        (None, None)
    }
}

impl<'a> Memory for GuardedCore<'a> {
    type Timestamp = FTs;

    #[inline(always)]
    fn read_debug(&self, addr: u16) -> u8 {
        self.core.memory.read(addr)
    }

    fn read_mem(&self, addr: u16, ts: FTs) -> u8 {
        let val = self.core.memory.read(addr);
        if self.triggers.watches_memory() {
            self.triggers.latch_mem_access(&self.core.memory, addr, val, false, ts);
        }
        val
    }

    fn read_mem16(&self, addr: u16, ts: FTs) -> u16 {
        let lo = self.read_mem(addr, ts);
        let hi = self.read_mem(addr.wrapping_add(1), ts);
        u16::from_le_bytes([lo, hi])
    }

    fn read_opcode(&mut self, pc: u16, ir: u16, ts: FTs) -> u8 {
        if let Some(fetch_map) = self.fetch_map.as_mut() {
            fetch_map.mark(pc);
        }
        self.core.read_opcode(pc, ir, ts)
    }

    fn write_mem(&mut self, addr: u16, val: u8, ts: FTs) {
        if self.triggers.watches_memory() {
            self.triggers.latch_mem_access(&self.core.memory, addr, val, true, ts);
        }
        self.core.write_mem(addr, val, ts);
    }
}
