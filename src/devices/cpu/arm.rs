//! ARM instruction decode and execution.
//!
//! The dispatch cascade in [`execute`] matches instruction families by bit
//! pattern (data processing, block/single data transfer, branch, halfword
//! transfer, multiply, PSR transfer) against a closed set of variants,
//! resolved once per call rather than through a lookup table of closures.

use crate::bits::{get_bit, get_bits, ror32, sign_extend};
use crate::devices::bus::{AccessKind, Bus, MemoryBus};
use crate::devices::cpu::shifter;
use crate::devices::cpu::structs::{CpuMode, ExceptionVector, PC};
use crate::devices::cpu::Cpu;
use crate::error::CoreError;

pub fn execute(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) -> Result<(), CoreError> {
    match get_bits(instr, 26, 27) {
        0b00 => execute_group_00(cpu, bus, instr),
        0b01 => {
            single_data_transfer(cpu, bus, instr);
            Ok(())
        }
        0b10 => {
            if get_bit(instr, 25) {
                branch(cpu, bus, instr);
            } else {
                block_data_transfer(cpu, bus, instr);
            }
            Ok(())
        }
        _ => {
            if get_bits(instr, 24, 25) == 0b11 {
                cpu.enter_exception(bus, ExceptionVector::Swi);
                Ok(())
            } else {
                Err(CoreError::CoprocessorInstruction { opcode: instr, pc: cpu.regs.pc() })
            }
        }
    }
}

fn execute_group_00(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) -> Result<(), CoreError> {
    if get_bits(instr, 4, 25) == 0b0000_0001_0010_1111_1111_1111_0001 {
        branch_exchange(cpu, bus, instr);
        return Ok(());
    }

    if get_bits(instr, 4, 7) == 0b1001 {
        if get_bits(instr, 23, 25) == 0b010 && get_bits(instr, 8, 11) == 0 {
            single_data_swap(cpu, bus, instr);
            return Ok(());
        } else if get_bits(instr, 22, 25) == 0 {
            multiply(cpu, instr);
            return Ok(());
        } else if get_bits(instr, 23, 25) == 0b001 {
            multiply_long(cpu, instr);
            return Ok(());
        }
    }

    if !get_bit(instr, 25) && get_bit(instr, 7) && get_bit(instr, 4) {
        return halfword_data_transfer(cpu, bus, instr);
    }

    let set_conditions = get_bit(instr, 20);
    let alu_opcode = get_bits(instr, 21, 24);
    if !set_conditions && matches!(alu_opcode, 0x8 | 0x9 | 0xA | 0xB) {
        if get_bit(instr, 21) {
            msr(cpu, instr);
        } else {
            mrs(cpu, instr);
        }
        return Ok(());
    }

    data_processing(cpu, bus, instr);
    Ok(())
}

fn branch(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) {
    let offset = sign_extend(get_bits(instr, 0, 23), 24).wrapping_mul(4);
    if get_bit(instr, 24) {
        cpu.regs.set_lr(cpu.regs.pc().wrapping_sub(4));
    }
    let target = cpu.regs.pc().wrapping_add(offset as u32);
    cpu.branch(bus, target);
}

fn branch_exchange(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) {
    let target = cpu.regs.regs[get_bits(instr, 0, 3) as usize];
    cpu.branch_exchange(bus, target);
}

fn single_data_swap(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) {
    let rn = get_bits(instr, 16, 19) as usize;
    let rd = get_bits(instr, 12, 15) as usize;
    let rm = get_bits(instr, 0, 3) as usize;
    let byte = get_bit(instr, 22);

    let addr = cpu.regs.regs[rn];
    if byte {
        let temp = bus.read_8(addr, AccessKind::NonSequential);
        bus.write_8(addr, cpu.regs.regs[rm] as u8, AccessKind::NonSequential);
        cpu.regs.regs[rd] = u32::from(temp);
    } else {
        let temp = bus.read_32_ror(addr, AccessKind::NonSequential);
        bus.write_32(addr, cpu.regs.regs[rm], AccessKind::NonSequential);
        cpu.regs.regs[rd] = temp;
    }
    cpu.extra_cycles += 1;
}

/// Internal multiply cycles: the ARM7TDMI's early-terminating Booth
/// multiplier costs 1-4 cycles depending on how many of `rs`'s top bits are
/// all 0 or all 1.
pub(crate) fn multiplier_cycles(rs: u32) -> u64 {
    if rs & 0xFFFF_FF00 == 0 || rs & 0xFFFF_FF00 == 0xFFFF_FF00 {
        1
    } else if rs & 0xFFFF_0000 == 0 || rs & 0xFFFF_0000 == 0xFFFF_0000 {
        2
    } else if rs & 0xFF00_0000 == 0 || rs & 0xFF00_0000 == 0xFF00_0000 {
        3
    } else {
        4
    }
}

fn multiply(cpu: &mut Cpu, instr: u32) {
    let rd = get_bits(instr, 16, 19) as usize;
    let rn = get_bits(instr, 12, 15) as usize;
    let rs = get_bits(instr, 8, 11) as usize;
    let rm = get_bits(instr, 0, 3) as usize;
    let accumulate = get_bit(instr, 21);
    let set_cond = get_bit(instr, 20);

    let rs_value = cpu.regs.regs[rs];
    let product = cpu.regs.regs[rm].wrapping_mul(rs_value);
    let result = if accumulate { product.wrapping_add(cpu.regs.regs[rn]) } else { product };
    cpu.regs.regs[rd] = result;

    if set_cond {
        cpu.regs.cpsr.set_sign_flag(get_bit(result, 31));
        cpu.regs.cpsr.set_zero_flag(result == 0);
    }

    cpu.extra_cycles += multiplier_cycles(rs_value) + u64::from(accumulate);
}

fn multiply_long(cpu: &mut Cpu, instr: u32) {
    let rd_hi = get_bits(instr, 16, 19) as usize;
    let rd_lo = get_bits(instr, 12, 15) as usize;
    let rs = get_bits(instr, 8, 11) as usize;
    let rm = get_bits(instr, 0, 3) as usize;
    let opcode = get_bits(instr, 21, 22);
    let set_cond = get_bit(instr, 20);

    let rm_value = cpu.regs.regs[rm];
    let rs_value = cpu.regs.regs[rs];

    let result: u64 = match opcode {
        0b00 => u64::from(rm_value) * u64::from(rs_value), // UMULL
        0b01 => {
            let acc = (u64::from(cpu.regs.regs[rd_hi]) << 32) | u64::from(cpu.regs.regs[rd_lo]);
            acc.wrapping_add(u64::from(rm_value) * u64::from(rs_value)) // UMLAL
        }
        0b10 => {
            ((rm_value as i32 as i64) * (rs_value as i32 as i64)) as u64 // SMULL
        }
        _ => {
            let acc =
                ((u64::from(cpu.regs.regs[rd_hi]) << 32) | u64::from(cpu.regs.regs[rd_lo])) as i64;
            acc.wrapping_add((rm_value as i32 as i64) * (rs_value as i32 as i64)) as u64 // SMLAL
        }
    };

    cpu.regs.regs[rd_lo] = result as u32;
    cpu.regs.regs[rd_hi] = (result >> 32) as u32;

    if set_cond {
        cpu.regs.cpsr.set_sign_flag(get_bit(cpu.regs.regs[rd_hi], 31));
        cpu.regs.cpsr.set_zero_flag(cpu.regs.regs[rd_hi] == 0 && cpu.regs.regs[rd_lo] == 0);
    }

    let accumulate = opcode == 0b01 || opcode == 0b11;
    cpu.extra_cycles += multiplier_cycles(rs_value) + 1 + u64::from(accumulate);
}

fn mrs(cpu: &mut Cpu, instr: u32) {
    let rd = get_bits(instr, 12, 15) as usize;
    cpu.regs.regs[rd] = if get_bit(instr, 22) { cpu.regs.spsr.reg } else { cpu.regs.cpsr.reg };
}

fn msr(cpu: &mut Cpu, instr: u32) {
    let value = if get_bit(instr, 25) {
        let imm = get_bits(instr, 0, 7);
        let rotate = get_bits(instr, 8, 11) * 2;
        ror32(imm, rotate)
    } else {
        cpu.regs.regs[get_bits(instr, 0, 3) as usize]
    };

    let mut mask = 0u32;
    if get_bit(instr, 19) {
        mask |= 0xFF00_0000;
    }
    if get_bit(instr, 18) {
        mask |= 0x00FF_0000;
    }
    if get_bit(instr, 17) {
        mask |= 0x0000_FF00;
    }
    if get_bit(instr, 16) {
        mask |= 0x0000_00FF;
    }

    if get_bit(instr, 22) {
        cpu.regs.spsr.reg = (cpu.regs.spsr.reg & !mask) | (value & mask);
        return;
    }

    // In User mode only the flag bits are writable through CPSR.
    if cpu.regs.cpsr.mode() == Some(CpuMode::User) {
        mask &= 0xFF00_0000;
    }

    let new_reg = (cpu.regs.cpsr.reg & !mask) | (value & mask);
    let new_mode = CpuMode::decode(new_reg).unwrap_or(CpuMode::System);
    cpu.regs.switch_mode(new_mode);
    cpu.regs.cpsr.reg = new_reg;
}

fn halfword_data_transfer(
    cpu: &mut Cpu,
    bus: &mut MemoryBus,
    instr: u32,
) -> Result<(), CoreError> {
    let rn = get_bits(instr, 16, 19) as usize;
    let rd = get_bits(instr, 12, 15) as usize;

    let pre = get_bit(instr, 24);
    let up = get_bit(instr, 23);
    let immediate = get_bit(instr, 22);
    let write_back = get_bit(instr, 21);
    let load = get_bit(instr, 20);

    let offset = if immediate {
        (get_bits(instr, 8, 11) << 4) | get_bits(instr, 0, 3)
    } else {
        cpu.regs.regs[get_bits(instr, 0, 3) as usize]
    };

    let base = cpu.regs.regs[rn];
    let address = if up { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
    let effective = if pre { address } else { base };

    // opcode 0 is LDRD/STRD, which the ARM7TDMI (ARMv4T) doesn't implement;
    // treated as a fatal unsupported-instruction condition.
    let opcode = get_bits(instr, 5, 6);
    if opcode == 0 {
        return Err(CoreError::UnsupportedInstruction { opcode: instr, pc: cpu.regs.pc() });
    }

    if load {
        if !pre || write_back {
            cpu.regs.regs[rn] = address;
        }

        let value = match opcode {
            1 => bus.read_16_ror(effective, AccessKind::NonSequential),
            2 => bus.read_8_signed(effective, AccessKind::NonSequential),
            _ => bus.read_16_signed(effective, AccessKind::NonSequential),
        };
        cpu.regs.regs[rd] = value;
        if rd == PC {
            cpu.branch(bus, value);
        }
    } else {
        bus.write_16(effective, cpu.regs.regs[rd] as u16, AccessKind::NonSequential);
        if !pre || write_back {
            cpu.regs.regs[rn] = address;
        }
    }
    Ok(())
}

pub(crate) fn add_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let c = u64::from(carry_in);
    let sum = u64::from(a) + u64::from(b) + c;
    let result = sum as u32;
    let carry = sum > 0xFFFF_FFFF;

    let signed_sum = i64::from(a as i32) + i64::from(b as i32) + c as i64;
    let overflow = signed_sum < i64::from(i32::MIN) || signed_sum > i64::from(i32::MAX);

    (result, carry, overflow)
}

/// `SBC`'s hardware trick: `a - b - !carry_in == a + !b + carry_in`, which is
/// exactly an add-with-carry against the bitwise complement of `b`. `SUB`
/// and `CMP` are the `carry_in = true` (no incoming borrow) special case.
pub(crate) fn sub_with_carry(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    add_with_carry(a, !b, carry_in)
}

fn data_processing(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) {
    let opcode = get_bits(instr, 21, 24);
    let s_bit = get_bit(instr, 20);
    let rn = get_bits(instr, 16, 19) as usize;
    let rd = get_bits(instr, 12, 15) as usize;
    let carry_in = cpu.regs.cpsr.carry_flag();

    let regs_snapshot = cpu.regs.regs;
    let (operand2, shifter_carry) = if get_bit(instr, 25) {
        let imm = get_bits(instr, 0, 7);
        let rotate = get_bits(instr, 8, 11) * 2;
        let value = ror32(imm, rotate);
        let carry = if rotate == 0 { carry_in } else { get_bit(value, 31) };
        (value, carry)
    } else {
        let operand = get_bits(instr, 0, 11);
        if get_bit(operand, 4) {
            cpu.extra_cycles += 1;
        }
        let result =
            shifter::decode_and_compute_shift(operand, carry_in, |i| regs_snapshot[i], 4);
        (result.value, result.carry_out)
    };

    let rn_value = regs_snapshot[rn];
    let is_test = matches!(opcode, 0x8 | 0x9 | 0xA | 0xB);
    let is_arithmetic = matches!(opcode, 0x2 | 0x3 | 0x4 | 0x5 | 0x6 | 0x7 | 0xA | 0xB);

    let (result, carry_out, overflow) = match opcode {
        0x0 | 0x8 => (rn_value & operand2, shifter_carry, false), // AND, TST
        0x1 | 0x9 => (rn_value ^ operand2, shifter_carry, false), // EOR, TEQ
        0x2 | 0xA => sub_with_carry(rn_value, operand2, true),   // SUB, CMP
        0x3 => sub_with_carry(operand2, rn_value, true),         // RSB
        0x4 | 0xB => add_with_carry(rn_value, operand2, false),  // ADD, CMN
        0x5 => add_with_carry(rn_value, operand2, carry_in),     // ADC
        0x6 => sub_with_carry(rn_value, operand2, carry_in),     // SBC
        0x7 => sub_with_carry(operand2, rn_value, carry_in),     // RSC
        0xC => (rn_value | operand2, shifter_carry, false),      // ORR
        0xD => (operand2, shifter_carry, false),                 // MOV
        0xE => (rn_value & !operand2, shifter_carry, false),     // BIC
        _ => (!operand2, shifter_carry, false),                  // MVN
    };

    if !is_test {
        cpu.regs.regs[rd] = result;
    }

    if s_bit {
        if rd == PC && !is_test {
            cpu.restore_cpsr_from_spsr();
        } else {
            cpu.regs.cpsr.set_sign_flag(get_bit(result, 31));
            cpu.regs.cpsr.set_zero_flag(result == 0);
            cpu.regs.cpsr.set_carry_flag(carry_out);
            if is_arithmetic {
                cpu.regs.cpsr.set_overflow_flag(overflow);
            }
        }
    }

    if !is_test && rd == PC {
        cpu.branch(bus, result);
    }
}

fn single_data_transfer(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) {
    let rn = get_bits(instr, 16, 19) as usize;
    let rd = get_bits(instr, 12, 15) as usize;

    let offset = if get_bit(instr, 25) {
        let rm = get_bits(instr, 0, 3) as u32;
        let shift = get_bits(instr, 4, 11);
        let regs_snapshot = cpu.regs.regs;
        let carry_in = cpu.regs.cpsr.carry_flag();
        shifter::decode_and_compute_shift((shift << 4) | rm, carry_in, |i| regs_snapshot[i], 4)
            .value
    } else {
        get_bits(instr, 0, 11)
    };

    let pre = get_bit(instr, 24);
    let up = get_bit(instr, 23);
    let byte = get_bit(instr, 22);
    let write_back = get_bit(instr, 21);
    let load = get_bit(instr, 20);

    let base = cpu.regs.regs[rn];
    let address = if up { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
    let effective = if pre { address } else { base };

    if load {
        let value = if byte {
            u32::from(bus.read_8(effective, AccessKind::NonSequential))
        } else {
            bus.read_32_ror(effective, AccessKind::NonSequential)
        };

        if !pre || write_back {
            cpu.regs.regs[rn] = address;
        }
        cpu.regs.regs[rd] = value;
        if rd == PC {
            cpu.branch(bus, value);
        }
    } else {
        let value = cpu.regs.regs[rd];
        if byte {
            bus.write_8(effective, value as u8, AccessKind::NonSequential);
        } else {
            bus.write_32(effective, value, AccessKind::NonSequential);
        }
        if !pre || write_back {
            cpu.regs.regs[rn] = address;
        }
    }
}

fn block_data_transfer(cpu: &mut Cpu, bus: &mut MemoryBus, instr: u32) {
    let mut pre = get_bit(instr, 24);
    let up = get_bit(instr, 23);
    let s_bit = get_bit(instr, 22);
    let write_back = get_bit(instr, 21);
    let load = get_bit(instr, 20);

    let base_reg = get_bits(instr, 16, 19) as usize;
    let mut reg_list = get_bits(instr, 0, 15);

    let mut reg_list_count = reg_list.count_ones();
    if reg_list_count == 0 {
        reg_list = 1 << PC;
        reg_list_count = 16;
    }
    let pc_in_list = get_bit(reg_list, PC as u32);

    let mut base = cpu.regs.regs[base_reg];
    let final_address;
    if up {
        final_address = base.wrapping_add(reg_list_count * 4);
    } else {
        final_address = base.wrapping_sub(reg_list_count * 4);
        base = final_address;
        pre = !pre;
    }

    let original_mode = cpu.regs.cpsr.mode();
    let force_user = s_bit && !(pc_in_list && load);
    if force_user {
        cpu.regs.switch_mode(CpuMode::User);
    }

    let mut first = true;
    let mut access = AccessKind::NonSequential;
    for reg in 0..16usize {
        if !get_bit(reg_list, reg as u32) {
            continue;
        }
        if pre {
            base = base.wrapping_add(4);
        }

        if load {
            if first && write_back {
                first = false;
                cpu.regs.regs[base_reg] = final_address;
            }
            cpu.regs.regs[reg] = bus.read_32(base, access);
        } else {
            bus.write_32(base, cpu.regs.regs[reg], access);
            if first && write_back {
                first = false;
                cpu.regs.regs[base_reg] = final_address;
            }
        }
        access = AccessKind::Sequential;

        if !pre {
            base = base.wrapping_add(4);
        }
    }

    if pc_in_list && load {
        if s_bit {
            cpu.restore_cpsr_from_spsr();
        }
        let target = cpu.regs.regs[PC];
        cpu.branch(bus, target);
    } else if force_user {
        if let Some(mode) = original_mode {
            cpu.regs.switch_mode(mode);
        }
    }

    if load {
        cpu.extra_cycles += 1;
    }
}
