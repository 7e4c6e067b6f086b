//! End-to-end debug scenarios: breakpoints, watchpoints, port triggers,
//! the instant tape load trap and the runtime tracing aids.
use zxcore::z80emu::{Cpu, CpuDebugFn, CpuFlags, Prefix, StkReg16};
use zxcore::debug::{Trigger, TriggerKind};
use zxcore::peripherals::TapeAccess;
use zxcore::{Machine, MachineModel};

fn machine_with_program(program: &[u8]) -> Machine {
    let mut machine = Machine::new(MachineModel::Spectrum48);
    for (i, byte) in program.iter().enumerate() {
        machine.memory_mut().write(0x8000 + i as u16, *byte);
    }
    machine.cpu.set_pc(0x8000);
    machine
}

#[test]
fn exec_trigger_with_condition_fires_once_armed() {
    let mut machine = machine_with_program(&[]);
    machine.add_trigger_spec("E:8000 if HL == 1234h").unwrap();
    // HL does not match: the whole frame runs through
    assert!(machine.execute_next_frame().is_none());
    machine.cpu.set_pc(0x8000);
    machine.cpu.set_reg16(StkReg16::HL, 0x1234);
    let hit = machine.execute_next_frame().expect("trigger should fire");
    assert_eq!((hit.kind, hit.addr), (TriggerKind::Exec, 0x8000));
    assert_eq!(machine.last_trigger_hit().unwrap().addr, 0x8000);
    // the interrupted frame was closed: the pixel buffer is complete
    assert_eq!(machine.frame_buffer().len(), 352 * 288 * 4);
}

#[test]
fn rejected_condition_reports_at_add_time() {
    let mut machine = machine_with_program(&[]);
    assert!(machine.add_trigger_spec("E:8000 if QQ == 1").is_err());
    assert!(machine.triggers().triggers().is_empty());
}

#[test]
fn write_watchpoint_stops_with_the_written_value() {
    let program = [
        0x21, 0x00, 0x58, // LD HL, 0x5800
        0x36, 0x47,       // LD (HL), 0x47
    ];
    let mut machine = machine_with_program(&program);
    machine.add_trigger(Trigger::range(TriggerKind::Write, 0x5800, 0x5AFF));
    let hit = machine.execute_next_frame().expect("watchpoint should fire");
    assert_eq!((hit.kind, hit.addr, hit.val),
               (TriggerKind::Write, 0x5800, Some(0x47)));
    // the write itself went through
    assert_eq!(machine.memory().read(0x5800), 0x47);
}

#[test]
fn port_breakpoint_masks_the_port() {
    let program = [
        0x3E, 0x05, // LD A, 5
        0xD3, 0xFE, // OUT (0xFE), A
    ];
    let mut machine = machine_with_program(&program);
    let mut trigger = Trigger::range(TriggerKind::PortOut, 0x00FE, 0x00FE);
    trigger.mask = 0x00FF;
    machine.add_trigger(trigger);
    let hit = machine.execute_next_frame().expect("port trigger should fire");
    assert_eq!((hit.kind, hit.val), (TriggerKind::PortOut, Some(0x05)));
    assert_eq!(hit.addr & 0xFF, 0xFE);
}

#[test]
fn trigger_on_val_condition() {
    let program = [
        0x21, 0x00, 0x60, // LD HL, 0x6000
        0x36, 0x01,       // LD (HL), 1
        0x36, 0x2A,       // LD (HL), 42
    ];
    let mut machine = machine_with_program(&program);
    machine.add_trigger_spec("W:6000 if val == 42").unwrap();
    let hit = machine.execute_next_frame().expect("trigger should fire");
    assert_eq!(hit.val, Some(42));
}

struct OneBlockTape {
    block: Vec<u8>,
}

impl TapeAccess for OneBlockTape {
    fn next_block(&mut self) -> Option<Vec<u8>> {
        Some(std::mem::take(&mut self.block)).filter(|b| !b.is_empty())
    }
}

#[test]
fn tape_trap_loads_a_block_instantly() {
    let mut machine = Machine::new(MachineModel::Spectrum48);
    // a headerless block: flag 0xFF, three data bytes, checksum
    machine.set_tape_access(Some(Box::new(OneBlockTape {
        block: vec![0xFF, 0x11, 0x22, 0x33, 0x00],
    })));
    machine.set_tape_trap_enabled(true);
    machine.cpu.set_pc(0x0556);
    machine.cpu.set_acc(0xFF);
    machine.cpu.set_flags(CpuFlags::C);
    machine.cpu.set_reg16(StkReg16::DE, 3);
    machine.cpu.set_index16(Prefix::Xdd, 0x9000);
    machine.cpu.set_sp(0xFEFE);
    machine.memory_mut().write16(0xFEFE, 0x1234);
    assert!(machine.execute_single_step::<CpuDebugFn>(None).is_none());
    assert_eq!(machine.cpu.get_pc(), 0x1234);
    assert_eq!(machine.cpu.get_sp(), 0xFF00);
    assert!(machine.cpu.get_flags().contains(CpuFlags::C));
    for (i, byte) in [0x11u8, 0x22, 0x33].iter().enumerate() {
        assert_eq!(machine.memory().read(0x9000 + i as u16), *byte);
    }
    assert_eq!(machine.cpu.get_index16(Prefix::Xdd), 0x9003);
    assert_eq!(machine.cpu.get_reg16(StkReg16::DE), 0);
}

#[test]
fn auto_map_marks_fetched_addresses() {
    let mut machine = machine_with_program(&[0x00, 0x00, 0x00]);
    machine.set_auto_map(true);
    for _ in 0..3 {
        machine.execute_single_step::<CpuDebugFn>(None);
    }
    assert!(machine.fetch_map().is_marked(0x8000));
    assert!(machine.fetch_map().is_marked(0x8002));
    assert!(!machine.fetch_map().is_marked(0x9000));
}

#[test]
fn call_stack_shadow_follows_call_and_ret() {
    let program = [
        0xCD, 0x00, 0x90, // CALL 0x9000
    ];
    let mut machine = machine_with_program(&program);
    machine.memory_mut().write(0x9000, 0xC9); // RET
    machine.cpu.set_sp(0xFF00);
    machine.set_runtime_trace(true);
    machine.execute_single_step::<CpuDebugFn>(None);
    let frames = machine.call_stack().frames();
    assert_eq!(frames.len(), 1);
    assert_eq!((frames[0].target_pc, frames[0].caller_pc, frames[0].is_interrupt),
               (0x9000, 0x8000, false));
    machine.execute_single_step::<CpuDebugFn>(None);
    assert!(machine.call_stack().frames().is_empty());
    assert_eq!(machine.cpu.get_pc(), 0x8003);
}
