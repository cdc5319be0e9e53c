//! Interrupt controller: IE/IF/IME with staged "pending" shadow registers.
//!
//! Writes to IE/IF/IME and calls to `signal` only touch the pending shadow
//! copies; the committed registers (the ones visible to
//! `read_ie`/`read_if`/`read_ime`, and the ones that actually gate the CPU's
//! IRQ line) only update after `WRITE_INTERRUPT_REGISTERS_DELAY` cycles,
//! scheduled by the caller (`system.rs`) through [`commit_registers`]. A
//! further `UPDATE_IRQ_LINE_DELAY` is charged before `irq_line` itself
//! changes, modeling the two-stage latency the real hardware exhibits.

/// Delay, in cycles, before a pending IE/IF/IME write becomes visible.
pub const WRITE_INTERRUPT_REGISTERS_DELAY: u64 = 1;
/// Delay, in cycles, before a change in interrupt availability reaches the
/// CPU's IRQ line.
pub const UPDATE_IRQ_LINE_DELAY: u64 = 2;

bitflags! {
    /// IE/IF bit assignments.
    pub struct Interrupt: u16 {
        const VBLANK  = 1 << 0;
        const HBLANK  = 1 << 1;
        const VCOUNT  = 1 << 2;
        const TIMER_0 = 1 << 3;
        const TIMER_1 = 1 << 4;
        const TIMER_2 = 1 << 5;
        const TIMER_3 = 1 << 6;
        const SERIAL  = 1 << 7;
        const DMA_0   = 1 << 8;
        const DMA_1   = 1 << 9;
        const DMA_2   = 1 << 10;
        const DMA_3   = 1 << 11;
        const KEYPAD  = 1 << 12;
        const GAMEPAK = 1 << 13;
        const ALL     = 0x3FFF;
    }
}

/// CPU power-down state driven by HALT/STOP writes to the system control
/// register and cleared by `commit_registers` when an enabled interrupt
/// becomes pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDownMode {
    None,
    Halt,
    Stop,
}

pub struct InterruptController {
    interrupt_enable: u16,
    interrupt_flags: u16,
    interrupt_master_enable: bool,

    pending_interrupt_enable: u16,
    pending_interrupt_flags: u16,
    pending_interrupt_master_enable: bool,

    /// The line the CPU actually observes; lags a register write by
    /// `WRITE_INTERRUPT_REGISTERS_DELAY + UPDATE_IRQ_LINE_DELAY` cycles.
    pub irq_line: bool,
    pub power_down_mode: PowerDownMode,
}

impl InterruptController {
    pub fn new() -> Self {
        InterruptController {
            interrupt_enable: 0,
            interrupt_flags: 0,
            interrupt_master_enable: false,
            pending_interrupt_enable: 0,
            pending_interrupt_flags: 0,
            pending_interrupt_master_enable: false,
            irq_line: false,
            power_down_mode: PowerDownMode::None,
        }
    }

    pub fn read_ie(&self) -> u16 {
        self.interrupt_enable
    }

    pub fn read_if(&self) -> u16 {
        self.interrupt_flags
    }

    pub fn read_ime(&self) -> bool {
        self.interrupt_master_enable
    }

    /// Stages an IE write; caller must schedule [`commit_registers`].
    pub fn write_ie(&mut self, value: u16) {
        self.pending_interrupt_enable = value & Interrupt::ALL.bits();
    }

    /// Stages an IF acknowledge (write-1-to-clear); caller must schedule
    /// [`commit_registers`].
    pub fn write_if(&mut self, value: u16) {
        self.pending_interrupt_flags &= !value;
    }

    /// Stages an IME write; caller must schedule [`commit_registers`].
    pub fn write_ime(&mut self, value: bool) {
        self.pending_interrupt_master_enable = value;
    }

    /// Raises `interrupt` in the pending IF shadow; caller must schedule
    /// [`commit_registers`].
    pub fn signal(&mut self, interrupt: Interrupt) {
        self.pending_interrupt_flags |= interrupt.bits();
    }

    /// Commits the pending shadow registers to the visible ones. Returns the
    /// new IRQ line value if it differs from the current one, in which case
    /// the caller must schedule [`update_irq_line`] after
    /// `UPDATE_IRQ_LINE_DELAY` cycles.
    pub fn commit_registers(&mut self) -> Option<bool> {
        self.interrupt_enable = self.pending_interrupt_enable;
        self.interrupt_flags = self.pending_interrupt_flags;
        self.interrupt_master_enable = self.pending_interrupt_master_enable;

        let interrupt_available = (self.interrupt_enable & self.interrupt_flags) != 0;

        if interrupt_available && self.power_down_mode == PowerDownMode::Halt {
            self.power_down_mode = PowerDownMode::None;
        }

        let new_irq_line = interrupt_available && self.interrupt_master_enable;
        if new_irq_line != self.irq_line {
            Some(new_irq_line)
        } else {
            None
        }
    }

    /// Applies a previously-scheduled IRQ line change.
    pub fn update_irq_line(&mut self, new_irq_line: bool) {
        self.irq_line = new_irq_line;
    }

    /// The line value the CPU samples every step.
    pub fn irq_line(&self) -> bool {
        self.irq_line
    }

    /// The power-down state HALTCNT last selected.
    pub fn power_down_mode(&self) -> PowerDownMode {
        self.power_down_mode
    }

    /// Called from HALTCNT's IO handler.
    pub fn set_power_down_mode(&mut self, mode: PowerDownMode) {
        self.power_down_mode = mode;
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_invisible_until_committed() {
        let mut irq = InterruptController::new();
        irq.write_ie(Interrupt::VBLANK.bits());
        assert_eq!(irq.read_ie(), 0);
        irq.commit_registers();
        assert_eq!(irq.read_ie(), Interrupt::VBLANK.bits());
    }

    #[test]
    fn signal_then_ack_clears_flag_after_commit() {
        let mut irq = InterruptController::new();
        irq.write_ie(Interrupt::VBLANK.bits());
        irq.commit_registers();
        irq.signal(Interrupt::VBLANK);
        irq.commit_registers();
        assert_eq!(irq.read_if(), Interrupt::VBLANK.bits());

        irq.write_if(Interrupt::VBLANK.bits());
        irq.commit_registers();
        assert_eq!(irq.read_if(), 0);
    }

    #[test]
    fn irq_line_rises_only_when_enabled_flagged_and_master_enabled() {
        let mut irq = InterruptController::new();
        irq.write_ie(Interrupt::VBLANK.bits());
        irq.write_ime(true);
        irq.commit_registers();
        assert_eq!(irq.irq_line, false);

        irq.signal(Interrupt::VBLANK);
        let changed = irq.commit_registers();
        assert_eq!(changed, Some(true));
        irq.update_irq_line(true);
        assert!(irq.irq_line);
    }

    #[test]
    fn halt_clears_when_interrupt_becomes_available() {
        let mut irq = InterruptController::new();
        irq.power_down_mode = PowerDownMode::Halt;
        irq.write_ie(Interrupt::TIMER_0.bits());
        irq.commit_registers();
        irq.signal(Interrupt::TIMER_0);
        irq.commit_registers();
        assert_eq!(irq.power_down_mode, PowerDownMode::None);
    }
}
