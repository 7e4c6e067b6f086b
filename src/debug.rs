/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The debug trigger engine: execution breakpoints, memory watchpoints and
//! I/O port breakpoints with conditions.
pub mod expr;

use core::cell::RefCell;
use core::fmt;
use core::str::FromStr;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use arrayvec::ArrayVec;
use z80emu::Cpu;

use crate::clock::FTs;
use crate::memory::{BankSource, BankedMemory};

pub use expr::{CondParseError, Condition, EvalContext};

/// The event class a trigger watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Exec,
    Read,
    Write,
    ReadWrite,
    PortIn,
    PortOut,
    PortIo,
}

/// A single debug trigger.
#[derive(Clone, Debug)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// The first address (or masked port value) of the watched range.
    pub start: u16,
    /// The last address of the watched range, inclusive.
    pub end: u16,
    /// Restricts memory triggers to accesses landing in the given RAM bank.
    pub page: Option<u8>,
    /// Port triggers compare `port & mask` against the range.
    pub mask: u16,
    pub condition: Option<Condition>,
    pub enabled: bool,
    pub name: String,
    /// How many times the trigger matched with a true condition.
    pub hit_count: u64,
    /// The trigger fires only once the hit count exceeds this.
    pub skip_count: u64,
}

impl Trigger {
    /// An execution breakpoint at a single address.
    pub fn exec(addr: u16) -> Self {
        Trigger::range(TriggerKind::Exec, addr, addr)
    }

    pub fn range(kind: TriggerKind, start: u16, end: u16) -> Self {
        Trigger {
            kind,
            start,
            end,
            page: None,
            mask: !0,
            condition: None,
            enabled: true,
            name: String::new(),
            hit_count: 0,
            skip_count: 0,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_skip_count(mut self, skip_count: u64) -> Self {
        self.skip_count = skip_count;
        self
    }

    fn same_slot(&self, other: &Trigger) -> bool {
        (self.kind, self.start, self.end, self.page, self.mask) ==
        (other.kind, other.start, other.end, other.page, other.mask)
    }

    #[inline]
    fn matches_addr(&self, addr: u16) -> bool {
        (self.start..=self.end).contains(&addr)
    }

    #[inline]
    fn matches_port(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&(port & self.mask))
    }
}

/// An error reported when a trigger specification string is rejected.
#[derive(Clone, Debug)]
pub enum TriggerSpecError {
    BadKind(String),
    BadAddress(String),
    BadCondition(CondParseError),
}

impl std::error::Error for TriggerSpecError {}

impl fmt::Display for TriggerSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSpecError::BadKind(kind) => write!(f, "unknown trigger type: {}", kind),
            TriggerSpecError::BadAddress(addr) => write!(f, "bad trigger address: {}", addr),
            TriggerSpecError::BadCondition(err) => err.fmt(f),
        }
    }
}

impl From<CondParseError> for TriggerSpecError {
    fn from(err: CondParseError) -> Self {
        TriggerSpecError::BadCondition(err)
    }
}

impl FromStr for Trigger {
    type Err = TriggerSpecError;
    /// Parses a trigger specification: `[TYPE:]ADDR[-END][ if COND]` with a
    /// hexadecimal address range and `TYPE` one of `E`, `R`, `W`, `RW`,
    /// `PI`, `PO`, `PIO`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let (head, condition) = match spec.find(" if ") {
            Some(pos) => (&spec[..pos], Some(Condition::parse(spec[pos + 4..].trim())?)),
            None => (spec, None),
        };
        let head = head.trim();
        let (kind, range) = match head.find(':') {
            Some(pos) => {
                let kind = match head[..pos].to_ascii_uppercase().as_str() {
                    "E" => TriggerKind::Exec,
                    "R" => TriggerKind::Read,
                    "W" => TriggerKind::Write,
                    "RW" => TriggerKind::ReadWrite,
                    "PI" => TriggerKind::PortIn,
                    "PO" => TriggerKind::PortOut,
                    "PIO" => TriggerKind::PortIo,
                    other => return Err(TriggerSpecError::BadKind(other.into())),
                };
                (kind, &head[pos + 1..])
            }
            None => (TriggerKind::Exec, head),
        };
        let bad_addr = || TriggerSpecError::BadAddress(range.into());
        let (start, end) = match range.find('-') {
            Some(pos) => (&range[..pos], &range[pos + 1..]),
            None => (range, range),
        };
        let start = u16::from_str_radix(start.trim(), 16).map_err(|_| bad_addr())?;
        let end = u16::from_str_radix(end.trim(), 16).map_err(|_| bad_addr())?;
        if start > end {
            return Err(bad_addr());
        }
        let mut trigger = Trigger::range(kind, start, end);
        trigger.condition = condition;
        trigger.name = spec.into();
        Ok(trigger)
    }
}

/// The access that made a trigger fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerHit {
    /// The index of the trigger in the table.
    pub index: usize,
    pub kind: TriggerKind,
    /// The matched PC, memory address or port.
    pub addr: u16,
    /// The transferred data, absent for execution triggers.
    pub val: Option<u8>,
    /// The frame T-state of the access.
    pub ts: FTs,
}

/// A candidate hit latched during instruction execution; its condition is
/// evaluated once the instruction completes.
#[derive(Clone, Copy, Debug)]
struct LatchedAccess {
    index: usize,
    kind: TriggerKind,
    addr: u16,
    val: u8,
    is_port: bool,
    ts: FTs,
}

/// The unified trigger table with a fast lookup set for execution triggers.
#[derive(Clone, Debug, Default)]
pub struct TriggerEngine {
    triggers: Vec<Trigger>,
    exec_set: ExecAddressSet,
    // interior mutability: accesses are latched from the CPU's read hooks
    // which only see a shared reference
    latched: RefCell<Vec<LatchedAccess>>,
    last_hit: Option<TriggerHit>,
    mem_watch: bool,
    port_watch: bool,
}

/// A 65536-bit set of addresses with an enabled execution trigger.
#[derive(Clone)]
struct ExecAddressSet {
    bits: Box<[u64; 1024]>,
}

impl Default for ExecAddressSet {
    fn default() -> Self {
        ExecAddressSet { bits: Box::new([0; 1024]) }
    }
}

impl fmt::Debug for ExecAddressSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecAddressSet { }")
    }
}

impl ExecAddressSet {
    fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }

    fn insert_range(&mut self, start: u16, end: u16) {
        for addr in start..=end {
            self.bits[(addr >> 6) as usize] |= 1 << (addr & 63);
        }
    }

    #[inline(always)]
    fn contains(&self, addr: u16) -> bool {
        self.bits[(addr >> 6) as usize] & 1 << (addr & 63) != 0
    }
}

impl TriggerEngine {
    /// Inserts a trigger, deduplicating by kind, range, page and mask.
    ///
    /// Adding an already present trigger replaces its condition and counts,
    /// leaving the table unchanged otherwise. Returns the trigger's index.
    pub fn add_trigger(&mut self, trigger: Trigger) -> usize {
        let index = match self.triggers.iter().position(|t| t.same_slot(&trigger)) {
            Some(index) => {
                self.triggers[index] = trigger;
                index
            }
            None => {
                self.triggers.push(trigger);
                self.triggers.len() - 1
            }
        };
        self.rebuild();
        index
    }

    /// Parses and inserts a trigger specification string.
    pub fn add_trigger_spec(&mut self, spec: &str) -> Result<usize, TriggerSpecError> {
        Ok(self.add_trigger(spec.parse()?))
    }

    pub fn remove_trigger(&mut self, index: usize) -> Option<Trigger> {
        if index < self.triggers.len() {
            let trigger = self.triggers.remove(index);
            self.rebuild();
            Some(trigger)
        }
        else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
        self.rebuild();
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(trigger) = self.triggers.get_mut(index) {
            trigger.enabled = enabled;
        }
        self.rebuild();
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// `true` when any enabled memory watchpoint exists.
    #[inline(always)]
    pub fn watches_memory(&self) -> bool {
        self.mem_watch
    }

    /// `true` when any enabled port breakpoint exists.
    #[inline(always)]
    pub fn watches_ports(&self) -> bool {
        self.port_watch
    }

    /// The most recent hit that stopped the machine.
    pub fn last_hit(&self) -> Option<&TriggerHit> {
        self.last_hit.as_ref()
    }

    fn rebuild(&mut self) {
        self.exec_set.clear();
        self.mem_watch = false;
        self.port_watch = false;
        for trigger in self.triggers.iter().filter(|t| t.enabled) {
            match trigger.kind {
                TriggerKind::Exec => self.exec_set.insert_range(trigger.start, trigger.end),
                TriggerKind::Read | TriggerKind::Write | TriggerKind::ReadWrite => {
                    self.mem_watch = true
                }
                TriggerKind::PortIn | TriggerKind::PortOut | TriggerKind::PortIo => {
                    self.port_watch = true
                }
            }
        }
    }

    /// O(1) pre-check consulted before every instruction when execution
    /// triggers exist.
    #[inline(always)]
    pub fn matches_exec_addr(&self, pc: u16) -> bool {
        self.exec_set.contains(pc)
    }

    /// Resolves an execution trigger at `pc`, evaluating conditions and
    /// honoring skip counts. Records and returns the hit when one fires.
    pub fn check_exec<C: Cpu>(
            &mut self,
            pc: u16,
            cpu: &C,
            memory: &BankedMemory,
            ts: FTs,
        ) -> Option<TriggerHit>
    {
        if !self.exec_set.contains(pc) {
            return None;
        }
        for (index, trigger) in self.triggers.iter_mut().enumerate() {
            if !trigger.enabled || trigger.kind != TriggerKind::Exec
                    || !trigger.matches_addr(pc)
                    || !page_matches(trigger.page, memory, pc) {
                continue;
            }
            let ctx = EvalContext { memory, ts, val: None, port: None };
            match trigger.condition.as_ref() {
                Some(cond) if cond.evaluate(cpu, &ctx) != Some(true) => continue,
                _ => {}
            }
            trigger.hit_count += 1;
            if trigger.hit_count > trigger.skip_count {
                let hit = TriggerHit {
                    index, kind: TriggerKind::Exec, addr: pc, val: None, ts,
                };
                debug!("exec trigger {} hit at {:04x}", index, pc);
                self.last_hit = Some(hit);
                return Some(hit);
            }
        }
        None
    }

    /// Latches memory-access candidates; called from the memory hooks
    /// while an instruction executes.
    pub fn latch_mem_access(
            &self,
            memory: &BankedMemory,
            addr: u16,
            val: u8,
            is_write: bool,
            ts: FTs,
        )
    {
        for (index, trigger) in self.triggers.iter().enumerate() {
            let kind_matches = match trigger.kind {
                TriggerKind::Read => !is_write,
                TriggerKind::Write => is_write,
                TriggerKind::ReadWrite => true,
                _ => false,
            };
            if trigger.enabled && kind_matches && trigger.matches_addr(addr)
                    && page_matches(trigger.page, memory, addr) {
                self.latched.borrow_mut().push(LatchedAccess {
                    index, kind: trigger.kind, addr, val, is_port: false, ts,
                });
            }
        }
    }

    /// Latches port-access candidates; called from the I/O hooks.
    pub fn latch_port_access(&self, port: u16, val: u8, is_out: bool, ts: FTs) {
        for (index, trigger) in self.triggers.iter().enumerate() {
            let kind_matches = match trigger.kind {
                TriggerKind::PortIn => !is_out,
                TriggerKind::PortOut => is_out,
                TriggerKind::PortIo => true,
                _ => false,
            };
            if trigger.enabled && kind_matches && trigger.matches_port(port) {
                self.latched.borrow_mut().push(LatchedAccess {
                    index, kind: trigger.kind, addr: port, val, is_port: true, ts,
                });
            }
        }
    }

    #[inline(always)]
    pub fn has_latched(&self) -> bool {
        !self.latched.borrow().is_empty()
    }

    /// Resolves the accesses latched during the last instruction. The
    /// first latch whose condition holds fires; the rest are dropped.
    pub fn resolve_latched<C: Cpu>(
            &mut self,
            cpu: &C,
            memory: &BankedMemory,
        ) -> Option<TriggerHit>
    {
        let mut fired = None;
        for latch in self.latched.take() {
            if fired.is_some() {
                break;
            }
            let trigger = &mut self.triggers[latch.index];
            let ctx = EvalContext {
                memory,
                ts: latch.ts,
                val: Some(latch.val),
                port: if latch.is_port { Some(latch.addr) } else { None },
            };
            match trigger.condition.as_ref() {
                Some(cond) if cond.evaluate(cpu, &ctx) != Some(true) => continue,
                _ => {}
            }
            trigger.hit_count += 1;
            if trigger.hit_count > trigger.skip_count {
                fired = Some(TriggerHit {
                    index: latch.index,
                    kind: latch.kind,
                    addr: latch.addr,
                    val: Some(latch.val),
                    ts: latch.ts,
                });
            }
        }
        if let Some(hit) = fired {
            debug!("trigger {} hit: {:?} at {:04x}", hit.index, hit.kind, hit.addr);
            self.last_hit = Some(hit);
        }
        fired
    }
}

#[inline]
fn page_matches(page: Option<u8>, memory: &BankedMemory, addr: u16) -> bool {
    match page {
        None => true,
        Some(bank) => memory.slot_at(addr).source == BankSource::Ram(bank),
    }
}

/// A bitmap of every address the CPU fetched an opcode from.
///
/// Feeds auto-mapping disassemblers; maintained only while the matching
/// run flag is active.
#[derive(Clone)]
pub struct FetchMap {
    bits: Box<[u64; 1024]>,
}

impl Default for FetchMap {
    fn default() -> Self {
        FetchMap { bits: Box::new([0; 1024]) }
    }
}

impl fmt::Debug for FetchMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FetchMap {{ {} addresses }}", self.count())
    }
}

impl FetchMap {
    #[inline(always)]
    pub fn mark(&mut self, pc: u16) {
        self.bits[(pc >> 6) as usize] |= 1 << (pc & 63);
    }

    #[inline]
    pub fn is_marked(&self, addr: u16) -> bool {
        self.bits[(addr >> 6) as usize] & 1 << (addr & 63) != 0
    }

    pub fn count(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }
}

/// One entry of the advisory runtime call stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallFrame {
    pub target_pc: u16,
    pub caller_pc: u16,
    pub is_interrupt: bool,
}

/// A best-effort shadow of the machine stack, reconstructed by watching SP
/// deltas around instructions.
///
/// The heuristic can be fooled (a PUSH whose value happens to look like a
/// return address); nothing may depend on it being right.
#[derive(Clone, Debug, Default)]
pub struct CallStackShadow {
    frames: ArrayVec<[CallFrame; 32]>,
}

impl CallStackShadow {
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Observes one executed instruction: `old` values sampled before, the
    /// `new` ones after. A ±2 SP move whose stacked value matches a return
    /// address grows or shrinks the shadow; anything else discards it.
    pub fn observe(
            &mut self,
            memory: &BankedMemory,
            old_pc: u16,
            old_sp: u16,
            new_pc: u16,
            new_sp: u16,
        )
    {
        let delta = old_sp.wrapping_sub(new_sp);
        match delta {
            0 => {}
            2 => {
                let stacked = memory.read16(new_sp);
                let call_ret = stacked.wrapping_sub(old_pc);
                if (1..=4).contains(&call_ret) {
                    self.push(CallFrame {
                        target_pc: new_pc,
                        caller_pc: old_pc,
                        is_interrupt: false,
                    });
                }
                else if stacked == old_pc {
                    // an interrupt acknowledge stacks the unadvanced PC
                    self.push(CallFrame {
                        target_pc: new_pc,
                        caller_pc: old_pc,
                        is_interrupt: true,
                    });
                }
                else {
                    self.frames.clear();
                }
            }
            0xFFFE => {
                let popped = memory.read16(old_sp);
                if popped == new_pc {
                    self.frames.pop();
                }
                else {
                    self.frames.clear();
                }
            }
            _ => self.frames.clear(),
        }
    }

    fn push(&mut self, frame: CallFrame) {
        if self.frames.is_full() {
            self.frames.remove(0);
        }
        self.frames.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z80emu::{Z80NMOS, StkReg16};
    use crate::chip::profile::MachineModel;

    fn memory() -> BankedMemory {
        BankedMemory::new(MachineModel::Spectrum48.profile(), false)
    }

    fn cpu() -> Z80NMOS {
        let mut cpu = Z80NMOS::default();
        cpu.reset();
        cpu
    }

    #[test]
    fn add_trigger_is_idempotent() {
        let mut engine = TriggerEngine::default();
        let a = engine.add_trigger(Trigger::exec(0x8000));
        let b = engine.add_trigger(Trigger::exec(0x8000));
        assert_eq!(a, b);
        assert_eq!(engine.triggers().len(), 1);
        assert!(engine.matches_exec_addr(0x8000));
        assert!(!engine.matches_exec_addr(0x8001));
    }

    #[test]
    fn exec_trigger_fires_with_condition() {
        let mut engine = TriggerEngine::default();
        let cond = Condition::parse("HL == 1234h").unwrap();
        engine.add_trigger(Trigger::exec(0x8000).with_condition(cond));
        let mut cpu = cpu();
        let memory = memory();
        assert!(engine.check_exec(0x8000, &cpu, &memory, 0).is_none());
        cpu.set_reg16(StkReg16::HL, 0x1234);
        let hit = engine.check_exec(0x8000, &cpu, &memory, 50).unwrap();
        assert_eq!((hit.addr, hit.kind, hit.ts), (0x8000, TriggerKind::Exec, 50));
        assert_eq!(engine.last_hit().unwrap().addr, 0x8000);
    }

    #[test]
    fn skip_count_defers_firing() {
        let mut engine = TriggerEngine::default();
        engine.add_trigger(Trigger::exec(0x6000).with_skip_count(2));
        let cpu = cpu();
        let memory = memory();
        assert!(engine.check_exec(0x6000, &cpu, &memory, 0).is_none());
        assert!(engine.check_exec(0x6000, &cpu, &memory, 0).is_none());
        assert!(engine.check_exec(0x6000, &cpu, &memory, 0).is_some());
    }

    #[test]
    fn watchpoints_latch_and_resolve() {
        let mut engine = TriggerEngine::default();
        engine.add_trigger(Trigger::range(TriggerKind::Write, 0x5800, 0x5AFF));
        assert!(engine.watches_memory() && !engine.watches_ports());
        let cpu = cpu();
        let memory = memory();
        engine.latch_mem_access(&memory, 0x4000, 0xFF, true, 10);
        assert!(!engine.has_latched());
        engine.latch_mem_access(&memory, 0x5900, 0x47, true, 20);
        engine.latch_mem_access(&memory, 0x5901, 0x47, false, 21);
        let hit = engine.resolve_latched(&cpu, &memory).unwrap();
        assert_eq!((hit.addr, hit.val), (0x5900, Some(0x47)));
        assert!(!engine.has_latched());
    }

    #[test]
    fn port_trigger_masks_the_port() {
        let mut engine = TriggerEngine::default();
        let mut trigger = Trigger::range(TriggerKind::PortOut, 0x00FE, 0x00FE);
        trigger.mask = 0x00FF;
        engine.add_trigger(trigger);
        let cpu = cpu();
        let memory = memory();
        engine.latch_port_access(0x12FE, 0x05, true, 7);
        let hit = engine.resolve_latched(&cpu, &memory).unwrap();
        assert_eq!(hit.addr, 0x12FE);
        engine.latch_port_access(0x12FE, 0x05, false, 8);
        assert!(engine.resolve_latched(&cpu, &memory).is_none());
    }

    #[test]
    fn trigger_specs_parse() {
        let trigger: Trigger = "8000".parse().unwrap();
        assert_eq!((trigger.kind, trigger.start, trigger.end),
                   (TriggerKind::Exec, 0x8000, 0x8000));
        let trigger: Trigger = "W:4000-57FF".parse().unwrap();
        assert_eq!((trigger.kind, trigger.start, trigger.end),
                   (TriggerKind::Write, 0x4000, 0x57FF));
        let trigger: Trigger = "PI:FE if A == 0".parse().unwrap();
        assert_eq!(trigger.kind, TriggerKind::PortIn);
        assert!(trigger.condition.is_some());
        assert!("X:1234".parse::<Trigger>().is_err());
        assert!("E:WXYZ".parse::<Trigger>().is_err());
        assert!("E:8000 if QQ == 1".parse::<Trigger>().is_err());
    }

    #[test]
    fn call_stack_shadow_tracks_calls_and_rets() {
        let mut memory = memory();
        let mut shadow = CallStackShadow::default();
        // CALL 0x9000 from 0x8000: pushes 0x8003
        memory.write16(0xFFFE, 0x8003);
        shadow.observe(&memory, 0x8000, 0x0000, 0x9000, 0xFFFE);
        assert_eq!(shadow.frames(), &[CallFrame {
            target_pc: 0x9000, caller_pc: 0x8000, is_interrupt: false,
        }]);
        // RET back
        shadow.observe(&memory, 0x9005, 0xFFFE, 0x8003, 0x0000);
        assert!(shadow.frames().is_empty());
        // a PUSH of an unrelated value clears the shadow
        shadow.observe(&memory, 0x8000, 0x0000, 0x9000, 0xFFFE);
        memory.write16(0xFFFC, 0x1234);
        shadow.observe(&memory, 0x9000, 0xFFFE, 0x9001, 0xFFFC);
        assert!(shadow.frames().is_empty());
    }
}
