//! End-to-end CPU scenarios covering ALU flag setting, the RRX
//! barrel-shifter edge case, and ARM branch-with-link against the
//! pipeline's PC+8 addressing.

use gba_core::devices::bus::{MemoryBus, BIOS_SIZE};
use gba_core::devices::cpu::Cpu;
use gba_core::devices::gamepak::GamePak;

fn bus_with_bios_code(code: &[u8]) -> MemoryBus {
    let mut bios = vec![0u8; BIOS_SIZE];
    bios[..code.len()].copy_from_slice(code);
    MemoryBus::new(GamePak::new(vec![0; 0x1000]), bios)
}

/// `ADDS R2, R0, R1` with R0=0x7FFF_FFFF, R1=1: the signed-overflow edge of
/// a positive-plus-positive add.
#[test]
fn adds_overflowing_to_min_negative_sets_n_and_v_not_c() {
    let instr: u32 = 0xe090_2001;
    let mut bus = bus_with_bios_code(&instr.to_le_bytes());
    let mut cpu = Cpu::new();
    cpu.regs.regs[0] = 0x7FFF_FFFF;
    cpu.regs.regs[1] = 1;
    cpu.boot(&mut bus);

    cpu.step(&mut bus).unwrap();

    assert_eq!(cpu.regs.regs[2], 0x8000_0000);
    assert!(cpu.regs.cpsr.sign_flag());
    assert!(!cpu.regs.cpsr.zero_flag());
    assert!(!cpu.regs.cpsr.carry_flag());
    assert!(cpu.regs.cpsr.overflow_flag());
}

/// `MOVS R1, R0, RRX` with R0=1 and the incoming carry set: the vacated
/// carry-in becomes bit 31 of the result.
#[test]
fn movs_rrx_rotates_incoming_carry_into_bit31() {
    let instr: u32 = 0xe1b0_1060;
    let mut bus = bus_with_bios_code(&instr.to_le_bytes());
    let mut cpu = Cpu::new();
    cpu.regs.regs[0] = 1;
    cpu.regs.cpsr.set_carry_flag(true);
    cpu.boot(&mut bus);

    cpu.step(&mut bus).unwrap();

    assert_eq!(cpu.regs.regs[1], 0x8000_0000);
    assert!(cpu.regs.cpsr.carry_flag());
    assert!(cpu.regs.cpsr.sign_flag());
    assert!(!cpu.regs.cpsr.zero_flag());
}

/// `BL` executed with PC_execute=0x0800_0100 branches to PC_execute+8 (the
/// normal PC-read-ahead value, with no additional encoded displacement) and
/// stashes PC_execute+4 in LR.
#[test]
fn bl_targets_pc_execute_plus_8_and_links_pc_execute_plus_4() {
    let mut rom = vec![0u8; 0x1000];
    let bl: u32 = 0xeb00_0000;
    rom[0x100..0x104].copy_from_slice(&bl.to_le_bytes());
    let mut bus = MemoryBus::new(GamePak::new(rom), vec![0u8; BIOS_SIZE]);
    let mut cpu = Cpu::new();
    cpu.skip_bios_boot(&mut bus);

    // The pipeline holds two instructions ahead; 64 all-zero (ANDEQ, always
    // skipped since Z=0) filler words precede the BL at 0x100, so it takes
    // 65 steps for the BL itself to reach execution.
    for _ in 0..65 {
        cpu.step(&mut bus).unwrap();
    }

    assert_eq!(cpu.regs.pc(), 0x0800_0110);
    assert_eq!(cpu.regs.lr(), 0x0800_0104);
}
