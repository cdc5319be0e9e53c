//! The system memory bus: region dispatch, waitstate charging, BIOS
//! protection and open-bus fallback.
//!
//! Regions are dispatched by the address's top byte. The `Bus` trait lets
//! components (DMA, CPU) stay generic over memory access without knowing
//! the concrete memory layout.

use crate::devices::dma::DmaController;
use crate::devices::gamepak::GamePak;
use crate::devices::irq::InterruptController;
use crate::devices::keypad::Keypad;
use crate::devices::io;
use crate::devices::ppu::Ppu;
use crate::devices::video_mem::{Oam, PaletteRam, VideoRam};

pub const BIOS_SIZE: usize = 16 * 1024;
const BIOS_MASK: u32 = (BIOS_SIZE - 1) as u32;
const BIOS_END: u32 = 0x0000_3FFF;

pub const EWRAM_SIZE: usize = 256 * 1024;
const EWRAM_MASK: u32 = (EWRAM_SIZE - 1) as u32;

pub const IWRAM_SIZE: usize = 32 * 1024;
const IWRAM_MASK: u32 = (IWRAM_SIZE - 1) as u32;

/// A byte/halfword/word-addressable bus. Misaligned accesses are forced down
/// to the next aligned address below, matching the ARM7TDMI's documented
/// (if quirky) behavior for unaligned loads/stores. Every access names its
/// `AccessKind` so GamePak ROM waitstate charging can tell a fresh address
/// from a burst continuation.
pub trait Bus {
    fn read_8(&mut self, addr: u32, access: AccessKind) -> u8;
    fn read_16(&mut self, addr: u32, access: AccessKind) -> u16;
    fn read_32(&mut self, addr: u32, access: AccessKind) -> u32;
    fn write_8(&mut self, addr: u32, value: u8, access: AccessKind);
    fn write_16(&mut self, addr: u32, value: u16, access: AccessKind);
    fn write_32(&mut self, addr: u32, value: u32, access: AccessKind);
}

/// Access-width/sequentiality charged against the cycle counter on every
/// access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    NonSequential,
    Sequential,
}

/// WAITCNT: configures the GamePak ROM/SRAM wait states. EWRAM, IWRAM,
/// PALRAM/VRAM/OAM and BIOS have fixed wait states on real hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitstateControl {
    reg: u16,
}

const SRAM_WAIT_TABLE: [u32; 4] = [4, 3, 2, 8];
const WS0_N_TABLE: [u32; 4] = [4, 3, 2, 8];
const WS0_S_TABLE: [u32; 2] = [2, 1];

impl WaitstateControl {
    pub fn read(&self) -> u16 {
        self.reg
    }

    pub fn write(&mut self, value: u16) {
        self.reg = value;
    }

    fn sram_wait(&self) -> u32 {
        SRAM_WAIT_TABLE[(self.reg & 0b11) as usize]
    }

    fn ws0_nonseq(&self) -> u32 {
        WS0_N_TABLE[((self.reg >> 2) & 0b11) as usize]
    }

    fn ws0_seq(&self) -> u32 {
        WS0_S_TABLE[((self.reg >> 4) & 1) as usize]
    }
}

/// Owns every addressable memory region and peripheral reachable through the
/// bus: general/display internal memory, the GamePak, and the four
/// components whose registers live in IO space (PPU, DMA, interrupts,
/// keypad). Timers, serial and audio are external Non-goals and read back as
/// open bus.
pub struct MemoryBus {
    bios: Vec<u8>,
    ewram: Vec<u8>,
    iwram: Vec<u8>,
    pub gamepak: GamePak,
    pub palette: PaletteRam,
    pub vram: VideoRam,
    pub oam: Oam,

    pub irq: InterruptController,
    pub dma: DmaController,
    pub keypad: Keypad,
    pub ppu: Ppu,
    pub waitcnt: WaitstateControl,
    /// SOUNDBIAS: stored verbatim so software that probes it reads back what
    /// it wrote. No APU lives behind it in this core.
    pub soundbias: u16,

    /// Tracks whether `pc` is currently executing out of BIOS, so reads from
    /// outside it fall back to the last fetched BIOS opcode instead of
    /// reading garbage.
    pub cpu_pc: u32,
    bios_last_opcode: u32,

    /// Mirrors the CPU's own pipeline slots, kept current by every fetch in
    /// `cpu.rs`. Used to reconstruct open-bus reads from genuinely unmapped
    /// addresses.
    pub cpu_pipeline: [u32; 2],
    pub cpu_thumb: bool,

    /// Cycles charged by bus accesses since the last drain; `system.rs`
    /// drains this into the scheduler after every CPU step.
    pending_cycles: u64,

    /// Set by an IO write to IE/IF/IME; `system.rs` drains this and
    /// schedules `InterruptController::commit_registers` after the
    /// register write delay.
    pub irq_commit_needed: bool,

    /// Set by a DMA control-register write that newly enables a channel;
    /// `system.rs` drains this and schedules the channel's activation.
    pub pending_dma_activation: Option<(usize, crate::devices::dma::Activation)>,
}

impl MemoryBus {
    pub fn new(gamepak: GamePak, bios: Vec<u8>) -> Self {
        let mut bios_buf = vec![0u8; BIOS_SIZE];
        let len = bios.len().min(BIOS_SIZE);
        bios_buf[..len].copy_from_slice(&bios[..len]);

        MemoryBus {
            bios: bios_buf,
            ewram: vec![0; EWRAM_SIZE],
            iwram: vec![0; IWRAM_SIZE],
            gamepak,
            palette: PaletteRam::new(),
            vram: VideoRam::new(),
            oam: Oam::new(),
            irq: InterruptController::new(),
            dma: DmaController::new(),
            keypad: Keypad::new(),
            ppu: Ppu::new(),
            waitcnt: WaitstateControl::default(),
            soundbias: 0x0200,
            cpu_pc: 0,
            bios_last_opcode: 0,
            cpu_pipeline: [0, 0],
            cpu_thumb: false,
            pending_cycles: 0,
            irq_commit_needed: false,
            pending_dma_activation: None,
        }
    }

    pub fn take_cycles(&mut self) -> u64 {
        std::mem::take(&mut self.pending_cycles)
    }

    pub fn take_irq_commit_needed(&mut self) -> bool {
        std::mem::take(&mut self.irq_commit_needed)
    }

    pub fn take_pending_dma_activation(&mut self) -> Option<(usize, crate::devices::dma::Activation)> {
        self.pending_dma_activation.take()
    }

    fn charge(&mut self, n: u32) {
        self.pending_cycles += n as u64;
    }

    fn obj_vram_boundary(&self) -> usize {
        if self.ppu.bitmap_mode() {
            0x1_4000
        } else {
            0x1_0000
        }
    }

    /// Reconstructs an open-bus read for a genuinely unmapped address. In
    /// ARM state this is always the prefetched instruction in pipeline slot
    /// 1. In THUMB state it depends on which region the executing PC is
    /// currently in: BIOS and OAM duplicate pipeline[1] into both halfwords,
    /// IWRAM picks pipeline[0] or pipeline[1] by PC alignment, and every
    /// other region duplicates pipeline[1] regardless of alignment.
    fn open_bus_32(&self) -> u32 {
        if !self.cpu_thumb {
            return self.cpu_pipeline[1];
        }
        let half = match self.cpu_pc >> 24 {
            0x00 | 0x07 => self.cpu_pipeline[1] as u16,
            0x03 => {
                if self.cpu_pc & 2 == 0 {
                    self.cpu_pipeline[0] as u16
                } else {
                    self.cpu_pipeline[1] as u16
                }
            }
            _ => self.cpu_pipeline[1] as u16,
        };
        u32::from(half) | (u32::from(half) << 16)
    }

    /// LDR with a non-word-aligned address rotates the misaligned-fetched
    /// word right by the byte offset instead of faulting.
    pub fn read_32_ror(&mut self, addr: u32, access: AccessKind) -> u32 {
        let rotation = (addr & 3) * 8;
        let value = self.read_32(addr, access);
        crate::bits::ror32(value, rotation)
    }

    /// LDRH with an odd address rotates the misaligned-fetched halfword
    /// right by 8 instead of faulting.
    pub fn read_16_ror(&mut self, addr: u32, access: AccessKind) -> u32 {
        let value = u32::from(self.read_16(addr, access));
        if addr & 1 != 0 {
            crate::bits::ror32(value, 8)
        } else {
            value
        }
    }

    /// LDRSH: on an odd address the ARM7TDMI reads a single signed byte
    /// instead of a misaligned halfword.
    pub fn read_16_signed(&mut self, addr: u32, access: AccessKind) -> u32 {
        if addr & 1 != 0 {
            self.read_8_signed(addr, access)
        } else {
            crate::bits::sign_extend(u32::from(self.read_16(addr, access)), 16) as u32
        }
    }

    /// LDRSB: sign-extends a single byte load.
    pub fn read_8_signed(&mut self, addr: u32, access: AccessKind) -> u32 {
        crate::bits::sign_extend(u32::from(self.read_8(addr, access)), 8) as u32
    }

    /// Cycle cost of a GamePak ROM access of `width` bits: the sequential
    /// rate applies only on a burst continuation, otherwise non-sequential
    /// (a 32-bit non-sequential access additionally splits into two 16-bit
    /// bus cycles, so it charges N+S rather than N alone).
    fn gamepak_rom_wait(&self, access: AccessKind, width: u32) -> u32 {
        match (access, width) {
            (AccessKind::NonSequential, 32) => self.waitcnt.ws0_nonseq() + self.waitcnt.ws0_seq(),
            (AccessKind::Sequential, 32) => 2 * self.waitcnt.ws0_seq(),
            (AccessKind::NonSequential, _) => self.waitcnt.ws0_nonseq(),
            (AccessKind::Sequential, _) => self.waitcnt.ws0_seq(),
        }
    }

    fn read_region_32(&mut self, addr: u32, access: AccessKind) -> u32 {
        match addr >> 24 {
            0x00 => {
                self.charge(1);
                if addr <= BIOS_END {
                    if self.cpu_pc <= BIOS_END {
                        self.bios_last_opcode = crate::bits::read_le32(&self.bios, (addr & BIOS_MASK) as usize & !3);
                    }
                    self.bios_last_opcode
                } else {
                    self.bios_last_opcode
                }
            }
            0x02 => {
                self.charge(6);
                crate::bits::read_le32(&self.ewram, (addr & EWRAM_MASK) as usize & !3)
            }
            0x03 => {
                self.charge(1);
                crate::bits::read_le32(&self.iwram, (addr & IWRAM_MASK) as usize & !3)
            }
            0x04 => {
                self.charge(1);
                io::read_io_32(self, addr)
            }
            0x05 => {
                self.charge(2);
                self.palette.read_32(addr)
            }
            0x06 => {
                self.charge(2);
                self.vram.read_32(addr)
            }
            0x07 => {
                self.charge(1);
                self.oam.read_32(addr)
            }
            0x08..=0x0D => {
                let n = self.gamepak_rom_wait(access, 32);
                self.charge(n);
                self.gamepak.read_rom_32(addr)
            }
            0x0E | 0x0F => {
                self.charge(self.waitcnt.sram_wait());
                u32::from(self.gamepak.read_sram(addr)) * 0x0101_0101
            }
            _ => {
                self.charge(1);
                self.open_bus_32()
            }
        }
    }

    fn read_region_16(&mut self, addr: u32, access: AccessKind) -> u16 {
        match addr >> 24 {
            0x00 => {
                self.charge(1);
                if addr <= BIOS_END {
                    if self.cpu_pc <= BIOS_END {
                        return crate::bits::read_le16(&self.bios, (addr & BIOS_MASK) as usize & !1);
                    }
                    ((self.bios_last_opcode >> ((addr & 2) * 8)) & 0xFFFF) as u16
                } else {
                    ((self.bios_last_opcode >> ((addr & 2) * 8)) & 0xFFFF) as u16
                }
            }
            0x02 => {
                self.charge(3);
                crate::bits::read_le16(&self.ewram, (addr & EWRAM_MASK) as usize & !1)
            }
            0x03 => {
                self.charge(1);
                crate::bits::read_le16(&self.iwram, (addr & IWRAM_MASK) as usize & !1)
            }
            0x04 => {
                self.charge(1);
                io::read_io_16(self, addr)
            }
            0x05 => {
                self.charge(1);
                self.palette.read_16(addr)
            }
            0x06 => {
                self.charge(1);
                self.vram.read_16(addr)
            }
            0x07 => {
                self.charge(1);
                self.oam.read_16(addr)
            }
            0x08..=0x0D => {
                let n = self.gamepak_rom_wait(access, 16);
                self.charge(n);
                self.gamepak.read_rom_16(addr)
            }
            0x0E | 0x0F => {
                self.charge(self.waitcnt.sram_wait());
                u16::from(self.gamepak.read_sram(addr)) * 0x0101
            }
            _ => {
                self.charge(1);
                ((self.open_bus_32() >> ((addr & 2) * 8)) & 0xFFFF) as u16
            }
        }
    }

    fn read_region_8(&mut self, addr: u32, access: AccessKind) -> u8 {
        match addr >> 24 {
            0x00 => {
                self.charge(1);
                if addr <= BIOS_END {
                    if self.cpu_pc <= BIOS_END {
                        return self.bios[(addr & BIOS_MASK) as usize];
                    }
                    ((self.bios_last_opcode >> ((addr & 3) * 8)) & 0xFF) as u8
                } else {
                    ((self.bios_last_opcode >> ((addr & 3) * 8)) & 0xFF) as u8
                }
            }
            0x02 => {
                self.charge(3);
                self.ewram[(addr & EWRAM_MASK) as usize]
            }
            0x03 => {
                self.charge(1);
                self.iwram[(addr & IWRAM_MASK) as usize]
            }
            0x04 => {
                self.charge(1);
                io::read_io_8(self, addr)
            }
            0x05 => {
                self.charge(1);
                self.palette.read_8(addr)
            }
            0x06 => {
                self.charge(1);
                self.vram.read_8(addr)
            }
            0x07 => {
                self.charge(1);
                self.oam.read_8(addr)
            }
            0x08..=0x0D => {
                let n = self.gamepak_rom_wait(access, 8);
                self.charge(n);
                self.gamepak.read_rom_8(addr)
            }
            0x0E | 0x0F => {
                self.charge(self.waitcnt.sram_wait());
                self.gamepak.read_sram(addr)
            }
            _ => {
                self.charge(1);
                ((self.open_bus_32() >> ((addr & 3) * 8)) & 0xFF) as u8
            }
        }
    }

    fn write_region_32(&mut self, addr: u32, value: u32, access: AccessKind) {
        match addr >> 24 {
            0x00 => self.charge(1), // BIOS is read-only; writes vanish
            0x02 => {
                self.charge(6);
                crate::bits::write_le32(&mut self.ewram, (addr & EWRAM_MASK) as usize & !3, value);
            }
            0x03 => {
                self.charge(1);
                crate::bits::write_le32(&mut self.iwram, (addr & IWRAM_MASK) as usize & !3, value);
            }
            0x04 => {
                self.charge(1);
                io::write_io_32(self, addr, value);
            }
            0x05 => {
                self.charge(2);
                self.palette.write_32(addr, value);
            }
            0x06 => {
                self.charge(2);
                self.vram.write_32(addr, value);
            }
            0x07 => {
                self.charge(1);
                self.oam.write_32(addr, value);
            }
            0x08..=0x0D => self.charge(self.gamepak_rom_wait(access, 32)), // ROM is read-only
            0x0E | 0x0F => {
                self.charge(self.waitcnt.sram_wait());
                self.gamepak.write_sram(addr, value as u8);
            }
            _ => {}
        }
    }

    fn write_region_16(&mut self, addr: u32, value: u16, access: AccessKind) {
        match addr >> 24 {
            0x00 => self.charge(1),
            0x02 => {
                self.charge(3);
                crate::bits::write_le16(&mut self.ewram, (addr & EWRAM_MASK) as usize & !1, value);
            }
            0x03 => {
                self.charge(1);
                crate::bits::write_le16(&mut self.iwram, (addr & IWRAM_MASK) as usize & !1, value);
            }
            0x04 => {
                self.charge(1);
                io::write_io_16(self, addr, value);
            }
            0x05 => {
                self.charge(1);
                self.palette.write_16(addr, value);
            }
            0x06 => {
                self.charge(1);
                self.vram.write_16(addr, value);
            }
            0x07 => {
                self.charge(1);
                self.oam.write_16(addr, value);
            }
            0x08..=0x0D => self.charge(self.gamepak_rom_wait(access, 16)),
            0x0E | 0x0F => {
                self.charge(self.waitcnt.sram_wait());
                self.gamepak.write_sram(addr, value as u8);
            }
            _ => {}
        }
    }

    fn write_region_8(&mut self, addr: u32, value: u8, access: AccessKind) {
        match addr >> 24 {
            0x00 => self.charge(1),
            0x02 => {
                self.charge(3);
                self.ewram[(addr & EWRAM_MASK) as usize] = value;
            }
            0x03 => {
                self.charge(1);
                self.iwram[(addr & IWRAM_MASK) as usize] = value;
            }
            0x04 => {
                self.charge(1);
                io::write_io_8(self, addr, value);
            }
            0x05 => {
                self.charge(1);
                self.palette.write_8(addr, value);
            }
            0x06 => {
                self.charge(1);
                let boundary = self.obj_vram_boundary();
                self.vram.write_8(addr, value, boundary);
            }
            0x07 => self.charge(1), // OAM byte writes are dropped
            0x08..=0x0D => self.charge(self.gamepak_rom_wait(access, 8)),
            0x0E | 0x0F => {
                self.charge(self.waitcnt.sram_wait());
                self.gamepak.write_sram(addr, value);
            }
            _ => {}
        }
    }
}

impl Bus for MemoryBus {
    fn read_8(&mut self, addr: u32, access: AccessKind) -> u8 {
        self.read_region_8(addr, access)
    }
    fn read_16(&mut self, addr: u32, access: AccessKind) -> u16 {
        self.read_region_16(addr & !1, access)
    }
    fn read_32(&mut self, addr: u32, access: AccessKind) -> u32 {
        self.read_region_32(addr & !3, access)
    }
    fn write_8(&mut self, addr: u32, value: u8, access: AccessKind) {
        self.write_region_8(addr, value, access);
    }
    fn write_16(&mut self, addr: u32, value: u16, access: AccessKind) {
        self.write_region_16(addr & !1, value, access);
    }
    fn write_32(&mut self, addr: u32, value: u32, access: AccessKind) {
        self.write_region_32(addr & !3, value, access);
    }
}

#[cfg(test)]
pub mod tests {
    use super::{AccessKind, Bus};
    use std::collections::HashMap;

    /// A sparse, zero-waitstate bus used by component unit tests (DMA, CPU)
    /// that need a `Bus` impl but shouldn't have to spin up a full
    /// `MemoryBus`. Access kind is accepted but never charged.
    pub struct FlatTestBus {
        data: HashMap<u32, u8>,
    }

    impl FlatTestBus {
        pub fn new() -> Self {
            FlatTestBus { data: HashMap::new() }
        }
    }

    impl Bus for FlatTestBus {
        fn read_8(&mut self, addr: u32, _access: AccessKind) -> u8 {
            *self.data.get(&addr).unwrap_or(&0)
        }
        fn read_16(&mut self, addr: u32, access: AccessKind) -> u16 {
            u16::from(self.read_8(addr, access)) | (u16::from(self.read_8(addr + 1, access)) << 8)
        }
        fn read_32(&mut self, addr: u32, access: AccessKind) -> u32 {
            u32::from(self.read_16(addr, access)) | (u32::from(self.read_16(addr + 2, access)) << 16)
        }
        fn write_8(&mut self, addr: u32, value: u8, _access: AccessKind) {
            self.data.insert(addr, value);
        }
        fn write_16(&mut self, addr: u32, value: u16, access: AccessKind) {
            self.write_8(addr, (value & 0xFF) as u8, access);
            self.write_8(addr + 1, (value >> 8) as u8, access);
        }
        fn write_32(&mut self, addr: u32, value: u32, access: AccessKind) {
            self.write_16(addr, (value & 0xFFFF) as u16, access);
            self.write_16(addr + 2, (value >> 16) as u16, access);
        }
    }

    #[test]
    fn flat_test_bus_round_trips() {
        let mut bus = FlatTestBus::new();
        bus.write_32(0x1000, 0xDEAD_BEEF, AccessKind::NonSequential);
        assert_eq!(bus.read_32(0x1000, AccessKind::NonSequential), 0xDEAD_BEEF);
    }
}
