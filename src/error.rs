//! Fatal-condition error type.
//!
//! Most anomalies (unmapped reads/writes, a short or oversized ROM) are
//! recovered locally and never reach this type. Only the handful of
//! conditions that well-formed GBA software cannot trigger - a decoder miss,
//! a reserved condition code, a coprocessor instruction - surface here and
//! end emulation.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unsupported instruction {opcode:#010x} at pc={pc:#010x}")]
    UnsupportedInstruction { opcode: u32, pc: u32 },

    #[error("reserved condition code NV at pc={pc:#010x}")]
    ReservedCondition { pc: u32 },

    #[error("coprocessor instruction {opcode:#010x} at pc={pc:#010x} (no coprocessor on ARM7TDMI)")]
    CoprocessorInstruction { opcode: u32, pc: u32 },

    #[error("decoder miss for opcode {opcode:#010x} at pc={pc:#010x}")]
    DecoderMiss { opcode: u32, pc: u32 },
}
