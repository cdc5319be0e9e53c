//! DMA controller: 4 independent channels with FIFO-DMA special-casing.
//!
//! Scheduling a channel's activation against the shared
//! [`crate::scheduler::Scheduler`] is the caller's job (`system.rs`) since
//! the scheduler is generic over the whole system; this module models the
//! per-channel register semantics, internal source/destination/count
//! latching, and the transfer loop itself.

use crate::devices::bus::{AccessKind, Bus};
use crate::devices::irq::Interrupt;

const SRC_MASK: [u32; 4] = [0x07FF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF];
const DST_MASK: [u32; 4] = [0x07FF_FFFF, 0x07FF_FFFF, 0x07FF_FFFF, 0x0FFF_FFFF];
const COUNT_MASK: [u32; 4] = [0x3FFF, 0x3FFF, 0x3FFF, 0xFFFF];
const CHANNEL_INTERRUPT: [Interrupt; 4] = [
    Interrupt::DMA_0,
    Interrupt::DMA_1,
    Interrupt::DMA_2,
    Interrupt::DMA_3,
];

pub const TRANSFER_DELAY: u64 = 2;
const FIFO_A_ADDR: u32 = 0x0400_00A0;
const FIFO_B_ADDR: u32 = 0x0400_00A4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressAdjustment {
    Increment,
    Decrement,
    LeaveUnchanged,
    IncrementReload,
}

impl AddressAdjustment {
    fn decode(bits: u32) -> Self {
        match bits {
            0 => AddressAdjustment::Increment,
            1 => AddressAdjustment::Decrement,
            2 => AddressAdjustment::LeaveUnchanged,
            3 => AddressAdjustment::IncrementReload,
            _ => unreachable!("2-bit field"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSize {
    Halfword,
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    Special,
}

impl StartTiming {
    fn decode(bits: u32) -> Self {
        match bits {
            0 => StartTiming::Immediate,
            1 => StartTiming::VBlank,
            2 => StartTiming::HBlank,
            3 => StartTiming::Special,
            _ => unreachable!("2-bit field"),
        }
    }
}

/// What the caller must do in response to a control-register write that
/// newly enables a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    Immediate,
    VBlank,
    HBlank,
}

#[derive(Debug, Clone, Copy, Default)]
struct ControlRegister {
    reg: u16,
}

impl ControlRegister {
    fn dst_adjustment(&self) -> AddressAdjustment {
        AddressAdjustment::decode(((self.reg >> 5) & 0b11) as u32)
    }
    fn src_adjustment(&self) -> AddressAdjustment {
        AddressAdjustment::decode(((self.reg >> 7) & 0b11) as u32)
    }
    fn repeat(&self) -> bool {
        (self.reg >> 9) & 1 != 0
    }
    fn size(&self) -> TransferSize {
        if (self.reg >> 10) & 1 != 0 {
            TransferSize::Word
        } else {
            TransferSize::Halfword
        }
    }
    fn start_timing(&self) -> StartTiming {
        StartTiming::decode(((self.reg >> 12) & 0b11) as u32)
    }
    fn irq_when_done(&self) -> bool {
        (self.reg >> 14) & 1 != 0
    }
    fn enable(&self) -> bool {
        (self.reg >> 15) & 1 != 0
    }
    fn set_enable(&mut self, enable: bool) {
        if enable {
            self.reg |= 1 << 15;
        } else {
            self.reg &= !(1 << 15);
        }
    }
}

pub struct DmaChannel {
    id: usize,
    control: ControlRegister,
    count: u16,
    src: u32,
    dst: u32,

    internal_src: u32,
    internal_dst: u32,
    internal_count: u32,

    fifo: bool,
    pub pending: bool,
    has_scheduled_event: bool,
}

impl DmaChannel {
    fn new(id: usize) -> Self {
        DmaChannel {
            id,
            control: ControlRegister::default(),
            count: 0,
            src: 0,
            dst: 0,
            internal_src: 0,
            internal_dst: 0,
            internal_count: 0,
            fifo: false,
            pending: false,
            has_scheduled_event: false,
        }
    }

    pub fn read_control(&self) -> u16 {
        self.control.reg
    }

    /// Writes the control register, latching internal src/dst/count and
    /// returning the activation the caller must schedule (or cancelling a
    /// previously-scheduled activation).
    pub fn write_control(&mut self, value: u16) -> Activation {
        let old_enable = self.control.enable();
        self.control.reg = value;

        if !old_enable && self.control.enable() {
            self.fifo = self.control.start_timing() == StartTiming::Special
                && (self.id == 1 || self.id == 2)
                && (self.dst == FIFO_A_ADDR || self.dst == FIFO_B_ADDR);

            self.internal_src = self.src;
            self.internal_dst = self.dst;
            self.internal_count = self.count as u32;
            if self.internal_count == 0 {
                self.internal_count = COUNT_MASK[self.id] + 1;
            }

            self.has_scheduled_event = true;
            match self.control.start_timing() {
                StartTiming::Immediate => Activation::Immediate,
                StartTiming::VBlank => Activation::VBlank,
                StartTiming::HBlank => Activation::HBlank,
                StartTiming::Special => Activation::None,
            }
        } else if old_enable && !self.control.enable() {
            self.has_scheduled_event = false;
            self.pending = false;
            Activation::None
        } else {
            Activation::None
        }
    }

    pub fn read_count(&self) -> u16 {
        self.count
    }

    pub fn write_count(&mut self, value: u16) {
        self.count = value & (COUNT_MASK[self.id] as u16);
    }

    pub fn write_src(&mut self, value: u32) {
        self.src = value & SRC_MASK[self.id];
    }

    pub fn write_src_lo(&mut self, value: u16) {
        self.write_src((self.src & 0xFFFF_0000) | u32::from(value));
    }

    pub fn write_src_hi(&mut self, value: u16) {
        self.write_src((self.src & 0x0000_FFFF) | (u32::from(value) << 16));
    }

    pub fn write_dst(&mut self, value: u32) {
        self.dst = value & DST_MASK[self.id];
    }

    pub fn write_dst_lo(&mut self, value: u16) {
        self.write_dst((self.dst & 0xFFFF_0000) | u32::from(value));
    }

    pub fn write_dst_hi(&mut self, value: u16) {
        self.write_dst((self.dst & 0x0000_FFFF) | (u32::from(value) << 16));
    }

    /// Marks the channel ready to run on the next `perform_transfers` pass,
    /// provided it hasn't been disabled since the activation was scheduled.
    pub fn activate(&mut self) {
        if self.control.enable() {
            self.pending = true;
        }
    }

    /// Runs the transfer if pending, returning the channel interrupt to
    /// signal once the caller has a free borrow of the interrupt controller
    /// (which, inside `MemoryBus`, is a sibling field of `dma` and so can't
    /// be borrowed at the same time as `bus: &mut impl Bus`).
    fn transfer(&mut self, bus: &mut impl Bus) -> Option<Interrupt> {
        if !self.pending {
            return None;
        }

        let size = self.control.size();
        let step_bytes: i32 = if size == TransferSize::Word { 4 } else { 2 };
        let align: u32 = if size == TransferSize::Word { !0b11 } else { !0b1 };
        self.internal_src &= align;
        self.internal_dst &= align;

        let src_step = match self.control.src_adjustment() {
            AddressAdjustment::Increment => step_bytes,
            AddressAdjustment::Decrement => -step_bytes,
            AddressAdjustment::LeaveUnchanged => 0,
            AddressAdjustment::IncrementReload => step_bytes,
        };
        let dst_adj = self.control.dst_adjustment();
        let dst_step = if self.fifo {
            0
        } else {
            match dst_adj {
                AddressAdjustment::Increment => step_bytes,
                AddressAdjustment::Decrement => -step_bytes,
                AddressAdjustment::LeaveUnchanged => 0,
                AddressAdjustment::IncrementReload => step_bytes,
            }
        };

        for i in 0..self.internal_count {
            let access = if i == 0 { AccessKind::NonSequential } else { AccessKind::Sequential };
            if size == TransferSize::Word {
                let value = bus.read_32(self.internal_src, access);
                bus.write_32(self.internal_dst, value, access);
            } else {
                let value = bus.read_16(self.internal_src, access);
                bus.write_16(self.internal_dst, value, access);
            }
            self.internal_src = (self.internal_src as i64 + src_step as i64) as u32;
            self.internal_dst = (self.internal_dst as i64 + dst_step as i64) as u32;
        }

        self.pending = false;

        if self.control.repeat() {
            if dst_adj == AddressAdjustment::IncrementReload {
                self.internal_dst = self.dst;
            }
            self.has_scheduled_event = matches!(
                self.control.start_timing(),
                StartTiming::VBlank | StartTiming::HBlank
            );
        } else {
            self.control.set_enable(false);
            self.has_scheduled_event = false;
        }

        if self.control.irq_when_done() {
            Some(CHANNEL_INTERRUPT[self.id])
        } else {
            None
        }
    }

    /// Whether this channel's repeat timing should re-arm on the next
    /// matching HBLANK/VBLANK trigger; used by `system.rs` to decide whether
    /// to reschedule after a repeat transfer.
    pub fn repeat_timing(&self) -> Option<StartTiming> {
        if self.has_scheduled_event && self.control.repeat() {
            Some(self.control.start_timing())
        } else {
            None
        }
    }
}

pub struct DmaController {
    pub channels: [DmaChannel; 4],
}

impl DmaController {
    pub fn new() -> Self {
        DmaController {
            channels: [
                DmaChannel::new(0),
                DmaChannel::new(1),
                DmaChannel::new(2),
                DmaChannel::new(3),
            ],
        }
    }

    pub fn active(&self) -> bool {
        self.channels.iter().any(|c| c.pending)
    }

    /// Runs every pending channel in order, returning the interrupts any of
    /// them signaled so the caller can apply them to the (separately
    /// borrowed) interrupt controller.
    pub fn perform_transfers(&mut self, bus: &mut impl Bus) -> Vec<Interrupt> {
        let mut fired = Vec::new();
        for channel in &mut self.channels {
            if let Some(interrupt) = channel.transfer(bus) {
                fired.push(interrupt);
            }
        }
        fired
    }
}

impl Default for DmaController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::bus::tests::FlatTestBus;
    use crate::devices::bus::AccessKind;

    #[test]
    fn zero_count_is_treated_as_max_plus_one() {
        let mut ch = DmaChannel::new(0);
        ch.write_count(0);
        ch.write_src(0x0200_0000);
        ch.write_dst(0x0300_0000);
        ch.write_control(1 << 15);
        assert_eq!(ch.internal_count, COUNT_MASK[0] + 1);
    }

    #[test]
    fn immediate_word_copy_transfers_requested_count() {
        let mut bus = FlatTestBus::new();
        bus.write_32(0x0200_0000, 0xCAFEBABE, AccessKind::NonSequential);
        bus.write_32(0x0200_0004, 0x0BAD_F00D, AccessKind::NonSequential);

        let mut ch = DmaChannel::new(0);
        ch.write_src(0x0200_0000);
        ch.write_dst(0x0300_0000);
        ch.write_count(2);
        let act = ch.write_control((1 << 15) | (1 << 10)); // enable, word size
        assert_eq!(act, Activation::Immediate);
        ch.activate();
        ch.transfer(&mut bus);

        assert_eq!(bus.read_32(0x0300_0000, AccessKind::NonSequential), 0xCAFEBABE);
        assert_eq!(bus.read_32(0x0300_0004, AccessKind::NonSequential), 0x0BAD_F00D);
        assert!(!ch.read_control() & (1 << 15) == 0 || !ch.control.enable());
    }

    #[test]
    fn irq_when_done_signals_channel_interrupt() {
        let mut bus = FlatTestBus::new();

        let mut ch = DmaChannel::new(0);
        ch.write_count(1);
        ch.write_control((1 << 15) | (1 << 14));
        ch.activate();
        let fired = ch.transfer(&mut bus);
        assert_eq!(fired, Some(Interrupt::DMA_0));
    }
}
