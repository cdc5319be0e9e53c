//! Top-level system: owns the CPU, bus and scheduler, and drives them
//! together into a `frame()` loop.
//!
//! `Gba` is the struct that wires every component's cross-cutting signals
//! (DMA activation, interrupt register commits, HBLANK/VBLANK) together via
//! the scheduler.
//!
//! `Scheduler<Gba>` and `DmaController` both live as fields of `Gba`/
//! `MemoryBus`, but their processing methods need a mutable borrow of the
//! struct that owns them. Every callback below takes the owner with
//! `std::mem::take` first and puts it back when the call returns.

use crate::devices::bus::{Bus, MemoryBus, BIOS_SIZE};
use crate::devices::cpu::{Cpu, StepOutcome};
use crate::devices::dma::{Activation, StartTiming, TRANSFER_DELAY};
use crate::devices::gamepak::GamePak;
use crate::devices::irq::{Interrupt, UPDATE_IRQ_LINE_DELAY, WRITE_INTERRUPT_REGISTERS_DELAY};
use crate::devices::keypad::Key;
use crate::devices::ppu::{CYCLES_PER_HBLANK, CYCLES_PER_HDRAW};
use crate::error::CoreError;
use crate::scheduler::{Scheduler, Trigger};

pub struct Gba {
    cpu: Cpu,
    bus: MemoryBus,
    scheduler: Scheduler<Gba>,
}

impl Gba {
    /// Builds a system from a ROM image and optional BIOS image. A missing
    /// BIOS is zero-filled rather than rejected; `skip_bios` jumps straight
    /// past the BIOS intro the way every GBA emulator's fast-boot option
    /// does.
    pub fn new(rom: Vec<u8>, bios: Option<Vec<u8>>, skip_bios: bool) -> Self {
        let gamepak = GamePak::new(rom);
        let bios = bios.unwrap_or_else(|| vec![0; BIOS_SIZE]);
        let mut bus = MemoryBus::new(gamepak, bios);
        let mut cpu = Cpu::new();
        if skip_bios {
            cpu.skip_bios_boot(&mut bus);
        } else {
            cpu.boot(&mut bus);
        }

        let mut gba = Gba {
            cpu,
            bus,
            scheduler: Scheduler::new(),
        };
        gba.schedule(Trigger::Immediate, CYCLES_PER_HDRAW, |gba: &mut Gba| gba.on_hblank_start());
        gba
    }

    /// Runs CPU steps until a full frame has been rendered, returning an
    /// error (and leaving the system halted mid-frame) if the CPU hits a
    /// fatal decode condition.
    pub fn frame(&mut self) -> Result<(), CoreError> {
        loop {
            self.advance_one()?;
            if self.bus.ppu.take_frame() {
                return Ok(());
            }
        }
    }

    /// BGR555, 240x160, row-major; the same layout the `wasm` binding hands
    /// to its `Uint16Array` view.
    pub fn framebuffer(&self) -> &[u16] {
        self.bus.ppu.buffer()
    }

    pub fn press_key(&mut self, key: Key) {
        if self.bus.keypad.press_key(key, &mut self.bus.irq) {
            self.schedule_irq_commit();
        }
    }

    pub fn release_key(&mut self, key: Key) {
        if self.bus.keypad.release_key(key, &mut self.bus.irq) {
            self.schedule_irq_commit();
        }
    }

    fn advance_one(&mut self) -> Result<(), CoreError> {
        let outcome = match self.cpu.step(&mut self.bus) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("fatal decode failure: {err}");
                return Err(err);
            }
        };

        match outcome {
            StepOutcome::Executed | StepOutcome::InterruptTaken => {
                let cycles = self.bus.take_cycles() + self.cpu.take_extra_cycles();
                self.scheduler.idle(cycles);
            }
            StepOutcome::Halted => {
                self.scheduler.idle_until_next_event();
            }
        }

        if self.bus.take_irq_commit_needed() {
            self.schedule_irq_commit();
        }
        if let Some((channel, activation)) = self.bus.take_pending_dma_activation() {
            self.schedule_dma_activation(channel, activation);
        }

        let mut scheduler = std::mem::take(&mut self.scheduler);
        scheduler.process_events(self);
        self.scheduler = scheduler;
        Ok(())
    }

    fn schedule(&mut self, trigger: Trigger, delay: u64, callback: impl FnOnce(&mut Gba) + 'static) {
        let mut scheduler = std::mem::take(&mut self.scheduler);
        scheduler.schedule(trigger, delay, callback);
        self.scheduler = scheduler;
    }

    fn on_hblank_start(&mut self) {
        let hblank_irq_enabled = self.bus.ppu.begin_hblank(&self.bus.vram, &self.bus.palette, &self.bus.oam);
        if hblank_irq_enabled {
            self.signal_interrupt(Interrupt::HBLANK);
        }

        let mut scheduler = std::mem::take(&mut self.scheduler);
        scheduler.trigger(Trigger::HBlank);
        scheduler.schedule(Trigger::Immediate, CYCLES_PER_HBLANK, |gba: &mut Gba| gba.on_hblank_end());
        self.scheduler = scheduler;
    }

    fn on_hblank_end(&mut self) {
        let event = self.bus.ppu.end_scanline();

        if event.vcount_irq {
            self.signal_interrupt(Interrupt::VCOUNT);
        }
        if event.entered_vblank {
            if event.vblank_irq {
                self.signal_interrupt(Interrupt::VBLANK);
            }
            let mut scheduler = std::mem::take(&mut self.scheduler);
            scheduler.trigger(Trigger::VBlank);
            self.scheduler = scheduler;
        }

        self.schedule(Trigger::Immediate, CYCLES_PER_HDRAW, |gba: &mut Gba| gba.on_hblank_start());
    }

    fn signal_interrupt(&mut self, interrupt: Interrupt) {
        self.bus.irq.signal(interrupt);
        self.schedule_irq_commit();
    }

    fn schedule_irq_commit(&mut self) {
        self.schedule(Trigger::Immediate, WRITE_INTERRUPT_REGISTERS_DELAY, |gba: &mut Gba| {
            gba.commit_irq_registers();
        });
    }

    fn commit_irq_registers(&mut self) {
        if let Some(new_line) = self.bus.irq.commit_registers() {
            self.schedule(Trigger::Immediate, UPDATE_IRQ_LINE_DELAY, move |gba: &mut Gba| {
                gba.bus.irq.update_irq_line(new_line);
            });
        }
    }

    fn schedule_dma_activation(&mut self, channel: usize, activation: Activation) {
        let trigger = match activation {
            Activation::None => return,
            Activation::Immediate => Trigger::Immediate,
            Activation::VBlank => Trigger::VBlank,
            Activation::HBlank => Trigger::HBlank,
        };
        self.schedule(trigger, TRANSFER_DELAY, move |gba: &mut Gba| gba.activate_dma(channel));
    }

    fn activate_dma(&mut self, channel: usize) {
        log::debug!("DMA{channel} activated");
        self.bus.dma.channels[channel].activate();
        self.perform_dma_transfers();
    }

    fn perform_dma_transfers(&mut self) {
        if !self.bus.dma.active() {
            return;
        }
        let mut dma = std::mem::take(&mut self.bus.dma);
        let fired = dma.perform_transfers(&mut self.bus);
        self.bus.dma = dma;

        for interrupt in fired {
            self.signal_interrupt(interrupt);
        }

        for channel in 0..self.bus.dma.channels.len() {
            let repeat_timing = self.bus.dma.channels[channel].repeat_timing();
            if let Some(timing) = repeat_timing {
                let activation = match timing {
                    StartTiming::VBlank => Activation::VBlank,
                    StartTiming::HBlank => Activation::HBlank,
                    StartTiming::Immediate | StartTiming::Special => Activation::None,
                };
                self.schedule_dma_activation(channel, activation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::bus::AccessKind;

    fn new_gba() -> Gba {
        Gba::new(vec![0; 0x1000], Some(vec![0; BIOS_SIZE]), true)
    }

    #[test]
    fn skip_bios_boot_lands_at_cartridge_entry() {
        let gba = new_gba();
        assert_eq!(gba.framebuffer().len(), 240 * 160);
    }

    #[test]
    fn frame_runs_to_completion_and_fills_a_framebuffer() {
        let mut gba = new_gba();
        gba.frame().expect("frame should run without a fatal decode error");
        assert_eq!(gba.framebuffer().len(), 240 * 160);
    }

    #[test]
    fn key_press_and_release_round_trip_through_key_input() {
        let mut gba = new_gba();
        gba.press_key(Key::BUTTON_A);
        assert_eq!(gba.bus.keypad.read_key_input() & Key::BUTTON_A.bits(), 0);
        gba.release_key(Key::BUTTON_A);
        assert_ne!(gba.bus.keypad.read_key_input() & Key::BUTTON_A.bits(), 0);
    }

    #[test]
    fn immediate_dma_copy_runs_within_the_same_frame() {
        let mut gba = new_gba();
        gba.bus.write_32(0x0200_0000, 0xCAFEBABE, AccessKind::NonSequential);
        gba.bus.write_32(0x0400_00B0, 0x0200_0000, AccessKind::NonSequential); // DMA0SAD
        gba.bus.write_32(0x0400_00B4, 0x0300_0000, AccessKind::NonSequential); // DMA0DAD
        gba.bus.write_16(0x0400_00B8, 1, AccessKind::NonSequential); // DMA0CNT_L: one word
        gba.bus.write_16(0x0400_00BA, (1 << 15) | (1 << 10), AccessKind::NonSequential); // enable, word size, immediate
        gba.advance_one().unwrap();
        assert_eq!(gba.bus.read_32(0x0300_0000, AccessKind::NonSequential), 0xCAFEBABE);
    }
}
