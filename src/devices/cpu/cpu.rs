//! The 3-stage pipeline, step function, and exception vectoring.

use crate::devices::bus::{AccessKind, Bus, MemoryBus};
use crate::devices::cpu::arm;
use crate::devices::cpu::structs::{
    check_condition, CpuMode, CpuState, ExceptionVector, Psr, Registers, ARM_PC_INCREMENT,
    THUMB_PC_INCREMENT,
};
use crate::devices::cpu::thumb;
use crate::devices::irq::PowerDownMode;
use crate::error::CoreError;

/// Filler value for both pipeline slots before the first real fetch; chosen
/// to be recognizably invalid if ever decoded by mistake.
const PIPELINE_FILL: u32 = 0xF000_0000;

pub struct Cpu {
    pub regs: Registers,
    pipeline: [u32; 2],

    /// Cycles an instruction handler charges beyond ordinary bus accesses
    /// (the data-processing register-specified-shift idle cycle, multiply
    /// internal cycles). Drained by `system.rs` into the scheduler.
    pub extra_cycles: u64,

    /// Set by `flush_pipeline` (via `branch`/`branch_exchange`/
    /// `enter_exception`) when an instruction has already retargeted PC and
    /// refilled the pipeline. `step_arm`/`step_thumb` check this after
    /// dispatch to know whether the ordinary one-instruction PC advance
    /// still needs to happen.
    branched: bool,

    /// Classification the next pipeline fetch should be charged at. A
    /// `flush_pipeline` opens with a fresh address (`NonSequential`) and its
    /// second fetch continues the burst (`Sequential`); every ordinary
    /// per-step refill after that is a burst continuation too, until the
    /// next flush resets it.
    next_fetch_access: AccessKind,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            regs: Registers::new(),
            pipeline: [PIPELINE_FILL, PIPELINE_FILL],
            extra_cycles: 0,
            branched: false,
            next_fetch_access: AccessKind::NonSequential,
        }
    }

    pub fn take_extra_cycles(&mut self) -> u64 {
        std::mem::take(&mut self.extra_cycles)
    }

    /// Sets PC/mode and refills the pipeline, used both at boot and after
    /// `Gba::new` decides whether to skip the BIOS intro.
    pub fn reset(&mut self, entry: u32, thumb_mode: bool) {
        self.regs.cpsr.set_state(if thumb_mode { CpuState::Thumb } else { CpuState::Arm });
        self.regs.set_pc(entry);
        self.pipeline = [PIPELINE_FILL, PIPELINE_FILL];
    }

    /// Primes the register banks the way the BIOS intro would have left them
    /// and jumps straight to the cartridge entry point, for `skip_bios`
    /// construction. Stack pointer presets match the values every retail
    /// BIOS leaves behind: 0x0300_7F00 for SYS/USR/ABORT/UNDEF/FIQ,
    /// 0x0300_7FA0 for IRQ, 0x0300_7FE0 for SWI.
    pub fn skip_bios_boot(&mut self, bus: &mut MemoryBus) {
        for (mode, sp) in [
            (CpuMode::Fiq, 0x0300_7F00),
            (CpuMode::Abort, 0x0300_7F00),
            (CpuMode::Undefined, 0x0300_7F00),
            (CpuMode::Irq, 0x0300_7FA0),
            (CpuMode::Swi, 0x0300_7FE0),
            (CpuMode::System, 0x0300_7F00),
        ] {
            self.regs.switch_mode(mode);
            self.regs.set_sp(sp);
        }
        self.reset(0x0800_0000, false);
        self.flush_pipeline(bus);
    }

    /// Primes the pipeline at the BIOS reset vector for a normal boot.
    pub fn boot(&mut self, bus: &mut MemoryBus) {
        self.reset(0, false);
        self.flush_pipeline(bus);
    }

    fn flush_pipeline(&mut self, bus: &mut MemoryBus) {
        self.branched = true;
        bus.cpu_thumb = self.regs.cpsr.state() == CpuState::Thumb;
        match self.regs.cpsr.state() {
            CpuState::Arm => {
                let pc = self.regs.pc() & !3;
                bus.cpu_pc = pc;
                self.pipeline[0] = bus.read_32(pc, AccessKind::NonSequential);
                bus.cpu_pipeline[0] = self.pipeline[0];
                let next = pc.wrapping_add(ARM_PC_INCREMENT);
                bus.cpu_pc = next;
                self.pipeline[1] = bus.read_32(next, AccessKind::Sequential);
                bus.cpu_pipeline[1] = self.pipeline[1];
                self.regs.set_pc(pc.wrapping_add(2 * ARM_PC_INCREMENT));
            }
            CpuState::Thumb => {
                let pc = self.regs.pc() & !1;
                bus.cpu_pc = pc;
                self.pipeline[0] = u32::from(bus.read_16(pc, AccessKind::NonSequential));
                bus.cpu_pipeline[0] = self.pipeline[0];
                let next = pc.wrapping_add(THUMB_PC_INCREMENT);
                bus.cpu_pc = next;
                self.pipeline[1] = u32::from(bus.read_16(next, AccessKind::Sequential));
                bus.cpu_pipeline[1] = self.pipeline[1];
                self.regs.set_pc(pc.wrapping_add(2 * THUMB_PC_INCREMENT));
            }
        }
        self.next_fetch_access = AccessKind::Sequential;
    }

    /// Runs exactly one pipeline step: take an IRQ if the line is live and
    /// unmasked, fast-forward through HALT, or fetch+decode+execute one
    /// instruction.
    pub fn step(&mut self, bus: &mut MemoryBus) -> Result<StepOutcome, CoreError> {
        if bus.irq.irq_line() && !self.regs.cpsr.irq_disable() {
            self.enter_exception(bus, ExceptionVector::Irq);
            return Ok(StepOutcome::InterruptTaken);
        }

        if bus.irq.power_down_mode() == PowerDownMode::Halt {
            return Ok(StepOutcome::Halted);
        }

        bus.cpu_pc = self.regs.pc();
        bus.cpu_thumb = self.regs.cpsr.state() == CpuState::Thumb;
        match self.regs.cpsr.state() {
            CpuState::Arm => self.step_arm(bus)?,
            CpuState::Thumb => self.step_thumb(bus)?,
        }
        Ok(StepOutcome::Executed)
    }

    fn step_arm(&mut self, bus: &mut MemoryBus) -> Result<(), CoreError> {
        let instruction = self.pipeline[0];
        self.pipeline[0] = self.pipeline[1];
        bus.cpu_pipeline[0] = self.pipeline[0];
        // `self.regs.pc()` is still PC_execute+8 here, the value instructions
        // must read during execution; it must not be overwritten until after
        // `execute()` returns (and only then if the instruction didn't already
        // branch and refill the pipeline itself).
        let fetch_pc = self.regs.pc() & !3;
        bus.cpu_pc = fetch_pc;
        self.pipeline[1] = bus.read_32(fetch_pc, self.next_fetch_access);
        bus.cpu_pipeline[1] = self.pipeline[1];

        let cond_bits = instruction >> 28;
        let cond = crate::devices::cpu::structs::Condition::decode(cond_bits);
        match check_condition(&self.regs.cpsr, cond) {
            None => Err(CoreError::ReservedCondition { pc: fetch_pc }),
            Some(false) => {
                self.regs.set_pc(fetch_pc.wrapping_add(ARM_PC_INCREMENT));
                Ok(())
            }
            Some(true) => {
                self.branched = false;
                let result = arm::execute(self, bus, instruction);
                if !self.branched {
                    self.regs.set_pc(fetch_pc.wrapping_add(ARM_PC_INCREMENT));
                }
                result
            }
        }
    }

    fn step_thumb(&mut self, bus: &mut MemoryBus) -> Result<(), CoreError> {
        let instruction = self.pipeline[0] as u16;
        self.pipeline[0] = self.pipeline[1];
        bus.cpu_pipeline[0] = self.pipeline[0];
        // See the ARM case above: PC must stay at PC_execute+4 until after
        // `execute()` returns.
        let fetch_pc = self.regs.pc() & !1;
        bus.cpu_pc = fetch_pc;
        self.pipeline[1] = u32::from(bus.read_16(fetch_pc, self.next_fetch_access));
        bus.cpu_pipeline[1] = self.pipeline[1];

        self.branched = false;
        let result = thumb::execute(self, bus, instruction);
        if !self.branched {
            self.regs.set_pc(fetch_pc.wrapping_add(THUMB_PC_INCREMENT));
        }
        result
    }

    /// Branch targets (B, BX, BL, LDM/POP-into-PC, MOV PC,...) call this to
    /// retarget PC and discard the stale prefetch.
    pub fn branch(&mut self, bus: &mut MemoryBus, target: u32) {
        match self.regs.cpsr.state() {
            CpuState::Arm => self.regs.set_pc(target & !3),
            CpuState::Thumb => self.regs.set_pc(target & !1),
        }
        self.flush_pipeline(bus);
    }

    /// BX: PC and CPSR.state both come from the exchange register.
    pub fn branch_exchange(&mut self, bus: &mut MemoryBus, target: u32) {
        let thumb_mode = target & 1 != 0;
        self.regs.cpsr.set_state(if thumb_mode { CpuState::Thumb } else { CpuState::Arm });
        self.branch(bus, target);
    }

    pub fn enter_exception(&mut self, bus: &mut MemoryBus, vector: ExceptionVector) {
        let in_thumb = self.regs.cpsr.state() == CpuState::Thumb;
        let pc = self.regs.pc();
        log::trace!("exception entry: vector={:?} pc={:#010x}", vector, pc);
        let lr = match vector {
            ExceptionVector::Swi | ExceptionVector::UndefinedInstruction => {
                if in_thumb {
                    pc.wrapping_sub(2)
                } else {
                    pc.wrapping_sub(4)
                }
            }
            ExceptionVector::Irq
            | ExceptionVector::Fiq
            | ExceptionVector::PrefetchAbort
            | ExceptionVector::DataAbort => {
                if in_thumb {
                    pc
                } else {
                    pc.wrapping_sub(4)
                }
            }
            ExceptionVector::Reset => pc,
            _ => pc,
        };

        let saved_cpsr = self.regs.cpsr;
        self.regs.switch_mode(vector.target_mode());
        self.regs.spsr = saved_cpsr;
        self.regs.set_lr(lr);

        self.regs.cpsr.set_state(CpuState::Arm);
        self.regs.cpsr.set_irq_disable(true);
        if matches!(vector, ExceptionVector::Reset | ExceptionVector::Fiq) {
            self.regs.cpsr.set_fiq_disable(true);
        }

        self.regs.set_pc(vector as u32);
        self.flush_pipeline(bus);
    }

    /// Restores CPSR from SPSR, used by the exception-return idiom
    /// (`MOVS PC,LR` / `LDM ...,{PC}^`) once PC has already been updated.
    pub fn restore_cpsr_from_spsr(&mut self) {
        let spsr = self.regs.spsr;
        self.regs.switch_mode(spsr.mode().unwrap_or(CpuMode::System));
        self.regs.cpsr = spsr;
    }

    pub fn spsr(&self) -> Psr {
        self.regs.spsr
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Executed,
    Halted,
    InterruptTaken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::gamepak::GamePak;

    fn new_bus() -> MemoryBus {
        MemoryBus::new(GamePak::new(vec![0; 0x1000]), vec![0; 0x4000])
    }

    #[test]
    fn reset_fills_pipeline_and_advances_pc_by_two_instructions() {
        let mut cpu = Cpu::new();
        let mut bus = new_bus();
        cpu.reset(0x0800_0000, false);
        cpu.flush_pipeline(&mut bus);
        assert_eq!(cpu.regs.pc(), 0x0800_0008);
    }

    #[test]
    fn thumb_reset_advances_pc_by_two_halfwords() {
        let mut cpu = Cpu::new();
        let mut bus = new_bus();
        cpu.reset(0x0800_0000, true);
        cpu.flush_pipeline(&mut bus);
        assert_eq!(cpu.regs.pc(), 0x0800_0004);
    }
}
