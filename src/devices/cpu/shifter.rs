//! The ARM barrel shifter: shared by data-processing register operands and
//! single-data-transfer register offsets.
//!
//! Handles the shift-by-0, shift-by-32, shift-by->32 and immediate ROR #0
//! (RRX) edge cases precisely, since these are load-bearing for real GBA
//! software.

use crate::bits::{get_bit, get_bits, ror32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

impl ShiftType {
    pub fn decode(bits: u32) -> Self {
        match bits & 0b11 {
            0 => ShiftType::Lsl,
            1 => ShiftType::Lsr,
            2 => ShiftType::Asr,
            _ => ShiftType::Ror,
        }
    }
}

pub struct ShiftResult {
    pub value: u32,
    pub carry_out: bool,
}

/// Applies `shift_type` to `value` by `amount`, given the incoming carry
/// flag (used when `amount == 0`, where the shift is a no-op and carry is
/// unaffected). `immediate` distinguishes an immediate shift amount (where
/// LSR/ASR #0 mean #32, and ROR #0 means RRX) from a register-specified one
/// (where amount 0 is a true no-op, amount 32 and >32 have their own rules).
pub fn compute_shift(
    shift_type: ShiftType,
    value: u32,
    amount: u32,
    carry_in: bool,
    immediate: bool,
) -> ShiftResult {
    match shift_type {
        ShiftType::Lsl => compute_lsl(value, amount, carry_in),
        ShiftType::Lsr => compute_lsr(value, amount, carry_in, immediate),
        ShiftType::Asr => compute_asr(value, amount, carry_in, immediate),
        ShiftType::Ror => compute_ror(value, amount, carry_in, immediate),
    }
}

fn compute_lsl(value: u32, amount: u32, carry_in: bool) -> ShiftResult {
    if amount == 0 {
        ShiftResult { value, carry_out: carry_in }
    } else if amount < 32 {
        ShiftResult { value: value << amount, carry_out: get_bit(value, 32 - amount) }
    } else if amount == 32 {
        ShiftResult { value: 0, carry_out: get_bit(value, 0) }
    } else {
        ShiftResult { value: 0, carry_out: false }
    }
}

fn compute_lsr(value: u32, amount: u32, carry_in: bool, immediate: bool) -> ShiftResult {
    let effective = if immediate && amount == 0 { 32 } else { amount };
    if effective == 0 {
        ShiftResult { value, carry_out: carry_in }
    } else if effective < 32 {
        ShiftResult { value: value >> effective, carry_out: get_bit(value, effective - 1) }
    } else if effective == 32 {
        ShiftResult { value: 0, carry_out: get_bit(value, 31) }
    } else {
        ShiftResult { value: 0, carry_out: false }
    }
}

fn compute_asr(value: u32, amount: u32, carry_in: bool, immediate: bool) -> ShiftResult {
    let effective = if immediate && amount == 0 { 32 } else { amount };
    let signed = value as i32;
    if effective == 0 {
        ShiftResult { value, carry_out: carry_in }
    } else if effective < 32 {
        ShiftResult {
            value: (signed >> effective) as u32,
            carry_out: get_bit(value, effective - 1),
        }
    } else {
        let filled = if get_bit(value, 31) { u32::MAX } else { 0 };
        ShiftResult { value: filled, carry_out: get_bit(value, 31) }
    }
}

fn compute_ror(value: u32, amount: u32, carry_in: bool, immediate: bool) -> ShiftResult {
    if immediate && amount == 0 {
        // RRX: rotate right by 1 through the carry flag.
        let carry_out = get_bit(value, 0);
        let value = (value >> 1) | (u32::from(carry_in) << 31);
        return ShiftResult { value, carry_out };
    }
    if amount == 0 {
        return ShiftResult { value, carry_out: carry_in };
    }
    let effective = amount & 31;
    if effective == 0 {
        ShiftResult { value, carry_out: get_bit(value, 31) }
    } else {
        ShiftResult { value: ror32(value, effective), carry_out: get_bit(value, effective - 1) }
    }
}

/// Decodes a data-processing shifter operand (the low 12 bits of an ARM
/// instruction when bit 25 is clear) and computes it against the current
/// register file. `reg` fetches a GPR by index, used both for the shifted
/// register and (when register-specified) the shift amount register.
pub fn decode_and_compute_shift(
    operand: u32,
    carry_in: bool,
    reg: impl Fn(usize) -> u32,
    pc_ahead: u32,
) -> ShiftResult {
    let rm = get_bits(operand, 0, 3) as usize;
    let shift_type = ShiftType::decode(get_bits(operand, 5, 6));
    let register_specified = get_bit(operand, 4);

    // PC already reads as instruction address + 8 through `reg`; the extra
    // `pc_ahead` (instruction address + 12) only applies when the shift
    // amount itself comes from a register, since that costs an extra
    // internal cycle that delays the fetch one further instruction.
    let value = if rm == super::structs::PC && register_specified {
        reg(rm).wrapping_add(pc_ahead)
    } else {
        reg(rm)
    };

    let amount = if register_specified {
        let rs = get_bits(operand, 8, 11) as usize;
        reg(rs) & 0xFF
    } else {
        get_bits(operand, 7, 11)
    };

    compute_shift(shift_type, value, amount, carry_in, !register_specified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsl_by_32_clears_value_and_sets_carry_from_bit0() {
        let r = compute_shift(ShiftType::Lsl, 0b1, 32, false, false);
        assert_eq!(r.value, 0);
        assert!(r.carry_out);
    }

    #[test]
    fn lsl_by_more_than_32_clears_carry_too() {
        let r = compute_shift(ShiftType::Lsl, 0xFFFF_FFFF, 33, true, false);
        assert_eq!(r.value, 0);
        assert!(!r.carry_out);
    }

    #[test]
    fn immediate_lsr_0_means_32() {
        let r = compute_shift(ShiftType::Lsr, 0x8000_0000, 0, false, true);
        assert_eq!(r.value, 0);
        assert!(r.carry_out);
    }

    #[test]
    fn register_lsr_0_is_a_no_op() {
        let r = compute_shift(ShiftType::Lsr, 0x1234, 0, true, false);
        assert_eq!(r.value, 0x1234);
        assert!(r.carry_out);
    }

    #[test]
    fn immediate_asr_0_sign_extends_through_bit_31() {
        let r = compute_shift(ShiftType::Asr, 0x8000_0000, 0, false, true);
        assert_eq!(r.value, 0xFFFF_FFFF);
        assert!(r.carry_out);
    }

    #[test]
    fn immediate_ror_0_is_rrx_through_carry() {
        let r = compute_shift(ShiftType::Ror, 0b1, 0, true, true);
        assert_eq!(r.value, 0x8000_0000);
        assert!(r.carry_out);
    }

    #[test]
    fn ror_by_multiple_of_32_leaves_value_unchanged() {
        let r = compute_shift(ShiftType::Ror, 0x1234_5678, 32, false, false);
        assert_eq!(r.value, 0x1234_5678);
        assert!(r.carry_out);
    }
}
