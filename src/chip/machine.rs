/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The frame scheduler: composes the CPU, memory, ULA and peripherals into
//! a deterministic frame-stepping machine.
mod io;

use core::fmt;
use core::num::Wrapping;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use bitflags::bitflags;

use z80emu::{Clock, Cpu, CpuDebug, CpuDebugFn, BreakCause, Z80NMOS, opconsts};

use crate::chip::profile::{MachineModel, MachineProfile, ParseMachineModelError};
use crate::chip::ula::Ula;
use crate::clock::{FTs, FrameClock};
use crate::debug::{CallStackShadow, FetchMap, Trigger, TriggerEngine, TriggerHit, TriggerSpecError};
use crate::memory::{BankSource, BankedMemory, MemoryError, PagingState};
use crate::peripherals::{
    Ay3891xIo, BetaDisk, DiskAccess, KempstonJoystick, KempstonMouse, TapeAccess,
    TapePlayer, Upd765,
    tape::{rom_load_trap, LD_BYTES_TRAP},
};

bitflags! {
    /// Which optional engines are active; when empty, the instruction pump
    /// dispatches the CPU through the bare core and the hot path pays for
    /// nothing.
    #[derive(Default)]
    pub struct RunFlags: u8 {
        const TRIGGERS      = 0b001;
        const AUTO_MAP      = 0b010;
        const RUNTIME_TRACE = 0b100;
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub enum MachineError {
    UnknownModel(ParseMachineModelError),
    Memory(MemoryError),
}

impl std::error::Error for MachineError {}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::UnknownModel(err) => err.fmt(f),
            MachineError::Memory(err) => err.fmt(f),
        }
    }
}

impl From<MemoryError> for MachineError {
    fn from(err: MemoryError) -> Self {
        MachineError::Memory(err)
    }
}

impl From<ParseMachineModelError> for MachineError {
    fn from(err: ParseMachineModelError) -> Self {
        MachineError::UnknownModel(err)
    }
}

/// The hardware the CPU talks to: everything reachable through memory and
/// I/O requests.
///
/// Implements [z80emu::Memory] and [z80emu::Io]; the scheduler borrows it
/// together with the CPU and the clock for every instruction.
pub struct MachineCore {
    pub(crate) profile: &'static MachineProfile,
    pub(crate) memory: BankedMemory,
    pub(crate) ula: Ula,
    pub(crate) tape: TapePlayer,
    pub(crate) ay: Ay3891xIo,
    pub(crate) beta: Option<BetaDisk>,
    pub(crate) fdc: Option<Upd765>,
    pub(crate) joystick: Option<KempstonJoystick>,
    pub(crate) mouse: Option<KempstonMouse>,
    pub(crate) late_timings: bool,
    pub(crate) fetches: u64,
}

impl MachineCore {
    /// Returns `true` while the INT line is asserted at `ts`.
    ///
    /// The pulse starts at the frame boundary, or 4 T-states before it on
    /// the early-timing 48k; late ULA timings shift the pulse by one
    /// T-state.
    #[inline]
    pub(crate) fn irq_active(&self, ts: FTs) -> bool {
        let profile = self.profile;
        let offset = if self.late_timings {
            1
        }
        else if profile.early_int_timing {
            4
        }
        else {
            0
        };
        let mut adj = ts + offset;
        if adj >= profile.tstates_per_frame {
            adj -= profile.tstates_per_frame;
        }
        adj >= 0 && adj < profile.int_pulse_duration
    }
}

/// A complete emulated machine advancing by whole display frames or single
/// instructions.
pub struct Machine {
    pub cpu: Z80NMOS,
    core: MachineCore,
    clock: FrameClock,
    frames: Wrapping<u64>,
    run_flags: RunFlags,
    auto_map: bool,
    runtime_trace: bool,
    triggers: TriggerEngine,
    fetch_map: FetchMap,
    call_stack: CallStackShadow,
    instructions: u64,
    halt_traced: bool,
    stop_requested: bool,
    model: MachineModel,
    tape_access: Option<Box<dyn TapeAccess>>,
    tape_trap_enabled: bool,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("model", &self.model)
            .field("frames", &self.frames.0)
            .field("ts", &self.clock.ts())
            .field("run_flags", &self.run_flags)
            .field("instructions", &self.instructions)
            .finish()
    }
}

impl Machine {
    /// Creates a machine of the given model with its default peripherals.
    pub fn new(model: MachineModel) -> Self {
        Machine::with_beta_disk(model, model.profile().beta_disk_default)
    }

    /// Creates a machine of the given model, overriding whether the
    /// Beta-Disk interface is attached.
    pub fn with_beta_disk(model: MachineModel, beta_disk: bool) -> Self {
        let profile = model.profile();
        let mut cpu = Z80NMOS::default();
        cpu.reset();
        let memory = BankedMemory::new(profile, beta_disk);
        let mut ula = Ula::new(profile);
        ula.start_frame();
        let mut clock = FrameClock::new(profile.frame_timings());
        clock.set_contention(memory.contention());
        Machine {
            cpu,
            core: MachineCore {
                profile,
                memory,
                ula,
                tape: TapePlayer::default(),
                ay: Ay3891xIo::default(),
                beta: if beta_disk { Some(BetaDisk::default()) } else { None },
                fdc: if profile.has_fdc { Some(Upd765::default()) } else { None },
                joystick: None,
                mouse: None,
                late_timings: false,
                fetches: 0,
            },
            clock,
            frames: Wrapping(0),
            run_flags: RunFlags::empty(),
            auto_map: false,
            runtime_trace: false,
            triggers: TriggerEngine::default(),
            fetch_map: FetchMap::default(),
            call_stack: CallStackShadow::default(),
            instructions: 0,
            halt_traced: false,
            stop_requested: false,
            model,
            tape_access: None,
            tape_trap_enabled: false,
        }
    }

    /// Creates a machine from a model tag; an unknown tag is fatal.
    pub fn from_tag(tag: &str) -> Result<Self, MachineError> {
        Ok(Machine::new(tag.parse::<MachineModel>()?))
    }

    #[inline]
    pub fn model(&self) -> MachineModel {
        self.model
    }

    #[inline]
    pub fn profile(&self) -> &'static MachineProfile {
        self.core.profile
    }

    // --- frame execution ---

    /// Conditionally prepares the internal state for the next frame:
    /// wraps the T-state counter carrying over the overshoot, advances the
    /// frame counter, rebases the tape player and resets the ULA change
    /// lists.
    pub fn ensure_next_frame(&mut self) {
        if self.clock.is_frame_over() {
            let frame_tstates = self.core.profile.tstates_per_frame;
            self.clock.wrap_frame();
            self.frames += Wrapping(1);
            self.core.tape.next_frame(frame_tstates);
            self.core.ula.start_frame();
            self.halt_traced = false;
        }
        self.clock.set_contention(self.core.memory.contention());
        self.sync_run_flags();
    }

    /// Executes instructions until the end of the current frame, emitting
    /// scanlines as the beam passes them.
    ///
    /// Returns early with the hit when a debug trigger fires; the frame is
    /// closed cleanly first (remaining scanlines rendered, the pixel buffer
    /// complete), and the next call resumes the interrupted frame.
    pub fn execute_next_frame(&mut self) -> Option<TriggerHit> {
        self.ensure_next_frame();
        self.stop_requested = false;
        let limit = self.core.profile.tstates_per_frame;
        while self.clock.ts() < limit && !self.stop_requested {
            let invert_flash = self.flash_state();
            self.core.ula.render_scanlines_upto(self.clock.ts(), &self.core.memory,
                                                invert_flash);
            let pc = self.cpu.get_pc();
            if self.run_flags.contains(RunFlags::TRIGGERS)
                    && self.triggers.matches_exec_addr(pc) {
                let ts = self.clock.ts();
                if let Some(hit) = self.triggers.check_exec(pc, &self.cpu,
                                                            &self.core.memory, ts) {
                    self.close_frame();
                    return Some(hit);
                }
            }
            if self.try_tape_trap(pc) {
                continue;
            }
            if self.cpu.is_halt()
                    && !(self.cpu.get_iffs().0 && self.core.irq_active(self.clock.ts())) {
                self.run_halted(limit);
                continue;
            }
            self.step_instruction::<CpuDebugFn>(None);
            if self.run_flags.contains(RunFlags::TRIGGERS) && self.triggers.has_latched() {
                if let Some(hit) = self.triggers.resolve_latched(&self.cpu,
                                                                  &self.core.memory) {
                    self.close_frame();
                    return Some(hit);
                }
            }
            self.core.tape.update_to(self.clock.ts());
        }
        self.close_frame();
        None
    }

    /// Executes a single instruction, handling the frame boundary exactly
    /// like the frame loop does.
    ///
    /// Watchpoint and port-trigger hits are resolved and returned;
    /// execution breakpoints are not consulted when stepping manually.
    pub fn execute_single_step<F: FnOnce(CpuDebug)>(
            &mut self,
            debug: Option<F>,
        ) -> Option<TriggerHit>
    {
        self.ensure_next_frame();
        let pc = self.cpu.get_pc();
        if self.try_tape_trap(pc) {
            return None;
        }
        self.step_instruction(debug);
        let invert_flash = self.flash_state();
        self.core.ula.render_scanlines_upto(self.clock.ts(), &self.core.memory,
                                            invert_flash);
        self.core.tape.update_to(self.clock.ts());
        if self.run_flags.contains(RunFlags::TRIGGERS) && self.triggers.has_latched() {
            return self.triggers.resolve_latched(&self.cpu, &self.core.memory);
        }
        None
    }

    /// Requests the frame loop to stop before the frame completes.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// Triggers a non-maskable interrupt; see [z80emu::Cpu::nmi].
    pub fn nmi(&mut self) -> bool {
        self.ensure_next_frame();
        let res = self.cpu.nmi(&mut self.core, &mut self.clock);
        self.clock.set_contention(self.core.memory.contention());
        res
    }

    /// Performs a system reset: a **RESET** signal when `hard`, otherwise
    /// an `RST 0` executed on the CPU.
    pub fn reset(&mut self, hard: bool) {
        if hard {
            self.cpu.reset();
            self.core.memory.reset();
            self.core.ay.reset();
            if let Some(beta) = self.core.beta.as_mut() {
                beta.reset();
            }
            if let Some(fdc) = self.core.fdc.as_mut() {
                fdc.reset();
            }
            self.clock.set_contention(self.core.memory.contention());
        }
        else {
            const DEBUG: Option<CpuDebugFn> = None;
            let _ = self.cpu.execute_instruction(&mut self.core, &mut self.clock,
                                                 DEBUG, opconsts::RST_00H_OPCODE);
        }
    }

    fn close_frame(&mut self) {
        let invert_flash = self.flash_state();
        self.core.ula.end_frame(&self.core.memory, invert_flash);
    }

    fn step_instruction<F: FnOnce(CpuDebug)>(&mut self, debug: Option<F>) {
        let observe_stack = self.run_flags.contains(RunFlags::RUNTIME_TRACE);
        let (old_pc, old_sp) = if observe_stack {
            (self.cpu.get_pc(), self.cpu.get_sp())
        }
        else {
            (0, 0)
        };
        let res = if self.run_flags.is_empty() {
            self.cpu.execute_next(&mut self.core, &mut self.clock, debug)
        }
        else {
            let mut guarded = io::GuardedCore {
                core: &mut self.core,
                triggers: &self.triggers,
                fetch_map: if self.run_flags.contains(RunFlags::AUTO_MAP) {
                    Some(&mut self.fetch_map)
                }
                else {
                    None
                },
            };
            self.cpu.execute_next(&mut guarded, &mut self.clock, debug)
        };
        match res {
            Ok(()) | Err(BreakCause::Halt) => {}
            Err(_) => {}
        }
        self.instructions += 1;
        if observe_stack {
            let (new_pc, new_sp) = (self.cpu.get_pc(), self.cpu.get_sp());
            self.call_stack.observe(&self.core.memory, old_pc, old_sp, new_pc, new_sp);
        }
        if self.cpu.is_halt() && !self.halt_traced {
            self.halt_traced = true;
            trace!("CPU halted at {:04x}, ts {}", self.cpu.get_pc(), self.clock.ts());
        }
        // paging writes may have moved a contended bank
        self.clock.set_contention(self.core.memory.contention());
    }

    /// Burns HALT no-op cycles until the INT wake-up point or the frame
    /// limit, applying M1 contention at the halted PC and incrementing R
    /// once per cycle.
    fn run_halted(&mut self, limit: FTs) {
        let iff1 = self.cpu.get_iffs().0;
        let pc = self.cpu.get_pc();
        let mut r_incr = 0i32;
        while self.clock.ts() < limit {
            if iff1 && self.core.irq_active(self.clock.ts()) {
                break;
            }
            self.clock.add_m1(pc);
            r_incr += 1;
        }
        if r_incr > 0 {
            self.cpu.add_r(r_incr);
            self.core.fetches += r_incr as u64;
        }
    }

    fn try_tape_trap(&mut self, pc: u16) -> bool {
        if !self.tape_trap_enabled || pc != LD_BYTES_TRAP {
            return false;
        }
        match self.core.memory.slot_at(pc).source {
            BankSource::Rom(bank) if bank == self.core.profile.basic_rom_bank => {}
            _ => return false,
        }
        let tape = match self.tape_access.as_mut() {
            Some(tape) => tape,
            None => return false,
        };
        rom_load_trap(&mut self.cpu, &mut self.core.memory, tape.as_mut())
    }

    fn sync_run_flags(&mut self) {
        let mut flags = RunFlags::empty();
        if !self.triggers.is_empty() {
            flags |= RunFlags::TRIGGERS;
        }
        if self.auto_map {
            flags |= RunFlags::AUTO_MAP;
        }
        if self.runtime_trace {
            flags |= RunFlags::RUNTIME_TRACE;
        }
        self.run_flags = flags;
    }

    // --- frame state ---

    /// The value of the execution frame counter, wrapping at 2^64.
    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.frames.0
    }

    /// A normalized frame counter and T-state counter pair.
    pub fn frame_tstate(&self) -> (u64, FTs) {
        let frame_tstates = self.core.profile.tstates_per_frame;
        let ts = self.clock.ts();
        if ts >= frame_tstates {
            (self.frames.0.wrapping_add(1), ts - frame_tstates)
        }
        else {
            (self.frames.0, ts)
        }
    }

    /// The raw T-state counter; can exceed the frame total before the next
    /// frame begins.
    #[inline]
    pub fn current_tstate(&self) -> FTs {
        self.clock.ts()
    }

    /// Overrides the T-state counter, e.g. when restoring a snapshot.
    pub fn set_frame_tstate(&mut self, ts: FTs) {
        let ts = ts.rem_euclid(self.core.profile.tstates_per_frame);
        self.clock.set_ts(ts);
    }

    #[inline]
    pub fn is_frame_over(&self) -> bool {
        self.clock.is_frame_over()
    }

    /// The temporary video flash attribute state, toggling every 16 frames.
    #[inline]
    pub fn flash_state(&self) -> bool {
        self.frames.0 & 16 != 0
    }

    /// Instructions executed since the machine was created.
    #[inline]
    pub fn instruction_count(&self) -> u64 {
        self.instructions
    }

    /// Opcode fetches (M1 cycles, including HALT no-ops) since the machine
    /// was created.
    #[inline]
    pub fn fetch_count(&self) -> u64 {
        self.core.fetches
    }

    /// The total delay inserted by contention since the frame started.
    #[inline]
    pub fn accumulated_contention(&self) -> FTs {
        self.clock.accumulated_contention()
    }

    pub fn has_late_timings(&self) -> bool {
        self.core.late_timings
    }

    pub fn set_late_timings(&mut self, late_timings: bool) {
        self.core.late_timings = late_timings;
    }

    // --- component access ---

    #[inline]
    pub fn memory(&self) -> &BankedMemory {
        &self.core.memory
    }

    #[inline]
    pub fn memory_mut(&mut self) -> &mut BankedMemory {
        &mut self.core.memory
    }

    #[inline]
    pub fn ula(&self) -> &Ula {
        &self.core.ula
    }

    #[inline]
    pub fn ula_mut(&mut self) -> &mut Ula {
        &mut self.core.ula
    }

    /// Renders the paper area as border color; see
    /// [Ula::set_border_only_mode].
    pub fn set_border_only_mode(&mut self, border_only: bool) {
        self.core.ula.set_border_only_mode(border_only);
    }

    #[inline]
    pub fn ay(&self) -> &Ay3891xIo {
        &self.core.ay
    }

    #[inline]
    pub fn ay_mut(&mut self) -> &mut Ay3891xIo {
        &mut self.core.ay
    }

    #[inline]
    pub fn tape(&self) -> &TapePlayer {
        &self.core.tape
    }

    #[inline]
    pub fn tape_mut(&mut self) -> &mut TapePlayer {
        &mut self.core.tape
    }

    pub fn beta_disk_mut(&mut self) -> Option<&mut BetaDisk> {
        self.core.beta.as_mut()
    }

    pub fn fdc_mut(&mut self) -> Option<&mut Upd765> {
        self.core.fdc.as_mut()
    }

    /// Inserts a disk into the appropriate controller for this model.
    pub fn insert_disk(&mut self, drive: usize, disk: Box<dyn DiskAccess>) {
        if let Some(beta) = self.core.beta.as_mut() {
            beta.insert_disk(drive, disk);
        }
        else if let Some(fdc) = self.core.fdc.as_mut() {
            fdc.insert_disk(drive, disk);
        }
    }

    pub fn enable_kempston_joystick(&mut self, enabled: bool) {
        self.core.joystick = if enabled { Some(KempstonJoystick::default()) } else { None };
    }

    pub fn joystick_mut(&mut self) -> Option<&mut KempstonJoystick> {
        self.core.joystick.as_mut()
    }

    pub fn enable_kempston_mouse(&mut self, enabled: bool) {
        self.core.mouse = if enabled { Some(KempstonMouse::default()) } else { None };
    }

    pub fn mouse_mut(&mut self) -> Option<&mut KempstonMouse> {
        self.core.mouse.as_mut()
    }

    // --- frame products ---

    /// The rendered frame; valid after [Machine::execute_next_frame].
    pub fn frame_buffer(&self) -> &[u8] {
        self.core.ula.frame_buffer()
    }

    /// Takes the beeper (EAR/MIC) changes of the rendered frame.
    pub fn take_beeper_changes(&mut self) -> Vec<(FTs, u8)> {
        self.core.ula.take_earmic_changes()
    }

    /// Takes the AY register writes of the rendered frame.
    pub fn take_ay_changes(&mut self) -> Vec<crate::peripherals::AyRegChange> {
        self.core.ay.take_changes()
    }

    /// Takes the tape EAR edges consumed during the rendered frame.
    pub fn take_tape_edges(&mut self) -> Vec<(FTs, bool)> {
        self.core.tape.take_edges()
    }

    // --- tape loading ---

    /// Attaches a tape block source used by the instant-load trap.
    pub fn set_tape_access(&mut self, tape: Option<Box<dyn TapeAccess>>) {
        self.tape_access = tape;
    }

    /// Enables the LD-BYTES ROM trap that loads tape blocks instantly.
    pub fn set_tape_trap_enabled(&mut self, enabled: bool) {
        self.tape_trap_enabled = enabled;
    }

    // --- debugging ---

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    /// Mutable trigger access; flag gating is refreshed when the next
    /// frame or step begins.
    pub fn triggers_mut(&mut self) -> &mut TriggerEngine {
        &mut self.triggers
    }

    pub fn add_trigger(&mut self, trigger: Trigger) -> usize {
        let index = self.triggers.add_trigger(trigger);
        self.sync_run_flags();
        index
    }

    pub fn add_trigger_spec(&mut self, spec: &str) -> Result<usize, TriggerSpecError> {
        let index = self.triggers.add_trigger_spec(spec)?;
        self.sync_run_flags();
        Ok(index)
    }

    pub fn last_trigger_hit(&self) -> Option<&TriggerHit> {
        self.triggers.last_hit()
    }

    /// Enables marking of every opcode fetch address.
    pub fn set_auto_map(&mut self, enabled: bool) {
        self.auto_map = enabled;
        self.sync_run_flags();
    }

    pub fn fetch_map(&self) -> &FetchMap {
        &self.fetch_map
    }

    pub fn fetch_map_mut(&mut self) -> &mut FetchMap {
        &mut self.fetch_map
    }

    /// Enables the advisory call-stack shadow.
    pub fn set_runtime_trace(&mut self, enabled: bool) {
        self.runtime_trace = enabled;
        if !enabled {
            self.call_stack.clear();
        }
        self.sync_run_flags();
    }

    pub fn call_stack(&self) -> &CallStackShadow {
        &self.call_stack
    }

    // --- snapshot plumbing ---

    pub fn paging_state(&self) -> PagingState {
        self.core.memory.paging_state()
    }

    pub fn set_paging_state(&mut self, state: PagingState) -> Result<(), MachineError> {
        self.core.memory.set_paging_state(state)?;
        self.clock.set_contention(self.core.memory.contention());
        self.core.ula.set_screen_shadow_at(self.clock.ts(),
                                           self.core.memory.is_screen_shadow());
        Ok(())
    }

    pub fn load_rom_bank(&mut self, bank: u8, data: &[u8]) -> Result<(), MachineError> {
        Ok(self.core.memory.load_rom_bank(bank, data)?)
    }

    pub fn load_trdos_rom(&mut self, data: &[u8]) -> Result<(), MachineError> {
        Ok(self.core.memory.load_trdos_rom(data)?)
    }
}
