//! Frame-level timing scenarios: interrupt delivery, T-state accounting,
//! contention measurement and beam-synchronized effects.
use zxcore::z80emu::{Cpu, StkReg16};
use zxcore::memory::BankSource;
use zxcore::{FTs, Machine, MachineModel};

/// A ROM with an IM0/IM1 compatible handler at 0x0038 incrementing the
/// byte at (HL): `INC (HL); EI; RET`.
fn interrupt_counter_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    rom[0x38] = 0x34;
    rom[0x39] = 0xFB;
    rom[0x3A] = 0xC9;
    rom
}

fn machine_48k() -> Machine {
    Machine::new(MachineModel::Spectrum48)
}

#[test]
fn nop_frame_acknowledges_one_interrupt_per_frame() {
    let mut machine = machine_48k();
    machine.load_rom_bank(0, &interrupt_counter_rom()).unwrap();
    machine.cpu.set_pc(0x8000);
    machine.cpu.set_sp(0xFF00);
    machine.cpu.set_reg16(StkReg16::HL, 0xC000);
    machine.cpu.set_iffs(true, true);
    for frame in 1..=4u8 {
        let before = machine.instruction_count();
        assert!(machine.execute_next_frame().is_none());
        assert_eq!(machine.memory().read(0xC000), frame);
        let executed = machine.instruction_count() - before;
        // a frame of NOPs at 4 T-states each, minus the handler overhead
        assert!((17_000..17_500).contains(&executed), "executed: {}", executed);
    }
}

#[test]
fn nop_frame_tstate_accounting_is_exact() {
    let mut machine = machine_48k();
    machine.cpu.set_pc(0x8000);
    let before = machine.instruction_count();
    machine.execute_next_frame();
    // 69888 is divisible by the NOP duration, no overshoot
    assert_eq!(machine.current_tstate(), 69_888);
    assert_eq!(machine.instruction_count() - before, 17_472);
    assert_eq!(machine.frame_tstate(), (1, 0));
    assert_eq!(machine.accumulated_contention(), 0);
    // the next frame carries over cleanly
    machine.execute_next_frame();
    assert_eq!(machine.current_tstate(), 69_888);
    assert_eq!(machine.current_frame(), 1);
}

#[test]
fn contended_nop_frame_matches_the_delay_table() {
    let mut machine = machine_48k();
    machine.cpu.set_pc(0x4000);
    machine.execute_next_frame();

    // replay the frame against an independent statement of the model
    const TABLE: [FTs; 8] = [6, 5, 4, 3, 2, 1, 0, 0];
    let delay = |ts: FTs| -> FTs {
        let delta = ts - 14_335;
        if (0..192 * 224).contains(&delta) {
            let phase = delta % 224;
            if phase & 0x80 == 0 {
                return TABLE[(phase & 7) as usize];
            }
        }
        0
    };
    let (mut ts, mut pc, mut contention) = (0 as FTs, 0x4000u16, 0 as FTs);
    while ts < 69_888 {
        let d = if (0x4000..0x8000).contains(&pc) { delay(ts) } else { 0 };
        ts += d + 4;
        contention += d;
        pc = pc.wrapping_add(1);
    }
    assert_eq!(machine.current_tstate(), ts);
    assert_eq!(machine.accumulated_contention(), contention);
    assert!(contention > 0);
}

#[test]
fn paging_lock_survives_further_writes() {
    let mut machine = Machine::new(MachineModel::Spectrum128);
    let program = [
        0x01, 0xFD, 0x7F, // LD BC, 0x7FFD
        0x3E, 0x20,       // LD A, 0x20
        0xED, 0x79,       // OUT (C), A
        0x3E, 0x01,       // LD A, 0x01
        0xED, 0x79,       // OUT (C), A
    ];
    for (i, byte) in program.iter().enumerate() {
        machine.memory_mut().write(0x8000 + i as u16, *byte);
    }
    machine.cpu.set_pc(0x8000);
    for _ in 0..5 {
        machine.execute_single_step::<zxcore::z80emu::CpuDebugFn>(None);
    }
    assert!(machine.memory().is_paging_locked());
    assert_eq!(machine.memory().slot_at(0xC000).source, BankSource::Ram(0));
}

#[test]
fn border_out_latches_at_the_io_data_tstate() {
    let mut machine = machine_48k();
    let program = [
        0x3E, 0x02, // LD A, 2
        0xD3, 0xFE, // OUT (0xFE), A
    ];
    for (i, byte) in program.iter().enumerate() {
        machine.memory_mut().write(0x8000 + i as u16, *byte);
    }
    machine.cpu.set_pc(0x8000);
    machine.set_frame_tstate(14_300);
    machine.execute_single_step::<zxcore::z80emu::CpuDebugFn>(None);
    machine.execute_single_step::<zxcore::z80emu::CpuDebugFn>(None);
    // LD A: 7 T, OUT fetches: 7 T, IORQ data one T-state in
    assert_eq!(machine.ula().border_changes().last(), Some(&(14_315, 2)));
    assert_eq!(machine.ula().border_color(), 2);
}

#[test]
fn floating_bus_returns_the_beamed_byte() {
    let mut machine = machine_48k();
    machine.memory_mut().write(0x4000, 0xA7);
    machine.memory_mut().write(0x8000, 0xDB); // IN A, (0xFF)
    machine.memory_mut().write(0x8001, 0xFF);
    machine.cpu.set_pc(0x8000);
    machine.cpu.set_acc(0x80);
    // the IN data read lands at 14328 + 7 + 1 = 14336: the bitmap fetch of
    // the first paper cell
    machine.set_frame_tstate(14_328);
    machine.execute_single_step::<zxcore::z80emu::CpuDebugFn>(None);
    assert_eq!(machine.cpu.get_acc(), 0xA7);
}

#[test]
fn halted_cpu_with_interrupts_disabled_burns_frames() {
    let mut machine = machine_48k();
    machine.memory_mut().write(0x8000, 0x76); // HALT
    machine.cpu.set_pc(0x8000);
    let r_before = machine.cpu.get_r();
    machine.execute_next_frame();
    assert!(machine.cpu.is_halt());
    assert_eq!(machine.current_tstate(), 69_888);
    assert_ne!(machine.cpu.get_r(), r_before);
    // and keeps burning
    machine.execute_next_frame();
    assert!(machine.cpu.is_halt());
    assert_eq!(machine.current_frame(), 1);
}

#[test]
fn halted_cpu_wakes_on_the_early_interrupt() {
    let mut machine = machine_48k();
    machine.load_rom_bank(0, &interrupt_counter_rom()).unwrap();
    machine.memory_mut().write(0x8000, 0x76); // HALT
    machine.cpu.set_pc(0x8000);
    machine.cpu.set_sp(0xFF00);
    machine.cpu.set_reg16(StkReg16::HL, 0xC000);
    machine.cpu.set_iffs(true, true);
    // the 48k INT rises 4 T-states before the frame boundary; the handler
    // of the interrupt accepted at frame N runs within frame N+1
    for _ in 0..4 {
        machine.execute_next_frame();
    }
    assert_eq!(machine.memory().read(0xC000), 3);
    assert!(!machine.cpu.is_halt());
}

#[test]
fn empty_frame_produces_a_uniform_border_image() {
    let mut machine = machine_48k();
    machine.memory_mut().write(0x8000, 0x76); // HALT
    machine.cpu.set_pc(0x8000);
    machine.ula_mut().set_border_color(1);
    machine.execute_next_frame();
    let buffer = machine.frame_buffer();
    // blue border everywhere outside the paper area
    let blue = [0x00, 0x00, 0xD7, 0xFF];
    for x in [0usize, 100, 351].iter().copied() {
        let offset = x * 4;
        assert_eq!(&buffer[offset..offset + 4], &blue);
    }
    let last_line = 287 * 352 * 4;
    assert_eq!(&buffer[last_line..last_line + 4], &blue);
}

#[cfg(feature = "snapshot")]
#[test]
fn paging_state_serde_round_trip() {
    let mut machine = Machine::new(MachineModel::Spectrum128);
    machine.memory_mut().write_paging_7ffd(0b0001_1011);
    let state = machine.paging_state();
    let json = serde_json::to_string(&state).unwrap();
    let back: zxcore::memory::PagingState = serde_json::from_str(&json).unwrap();
    assert_eq!(state, back);
}
