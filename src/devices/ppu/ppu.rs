//! Scanline PPU: register file, per-scanline rendering and compositing.
//!
//! Rendering happens once per scanline rather than per dot: `begin_hblank`
//! draws the whole visible line into the framebuffer at the moment HBLANK
//! starts.

use crate::devices::ppu::objects::{render_obj_line, ObjPixel};
use crate::devices::ppu::structs::{
    BgControl, DisplayControl, DisplayStatus, CYCLES_PER_LINE, SCREEN_HEIGHT, SCREEN_WIDTH,
    TOTAL_LINES, VISIBLE_LINES,
};
use crate::devices::ppu::text::render_text_line;
use crate::devices::video_mem::{Oam, PaletteRam, VideoRam};

/// What happened at the end of a scanline or HBLANK transition; the caller
/// (`system.rs`) turns these into interrupt signals and DMA trigger pulses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanlineEvent {
    pub hblank_irq: bool,
    pub vblank_irq: bool,
    pub vcount_irq: bool,
    pub entered_vblank: bool,
    pub left_vblank: bool,
}

pub struct Ppu {
    pub dispcnt: DisplayControl,
    pub dispstat: DisplayStatus,
    pub vcount: u16,
    pub bg_cnt: [BgControl; 4],
    pub bg_hofs: [u16; 4],
    pub bg_vofs: [u16; 4],

    // BG2/BG3 affine parameters: stored so reads/writes round-trip even
    // though affine rendering itself is a transparent stub.
    pub bg_affine: [[u16; 4]; 2],
    pub bg_affine_ref: [[u32; 2]; 2],

    pub win0h: u16,
    pub win1h: u16,
    pub win0v: u16,
    pub win1v: u16,
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,

    framebuffer: Vec<u16>,
    frame_ready: bool,
}

fn in_window(h: u16, v: u16, x: u16, y: u16) -> bool {
    let x1 = (h >> 8) & 0xFF;
    let x2 = h & 0xFF;
    let y1 = (v >> 8) & 0xFF;
    let y2 = v & 0xFF;
    let x2 = if x2 as usize > SCREEN_WIDTH || x2 < x1 {
        SCREEN_WIDTH as u16
    } else {
        x2
    };
    let y2 = if y2 as usize > SCREEN_HEIGHT || y2 < y1 {
        SCREEN_HEIGHT as u16
    } else {
        y2
    };
    x >= x1 && x < x2 && y >= y1 && y < y2
}

struct WindowVisibility {
    bg: [bool; 4],
    obj: bool,
}

impl Ppu {
    pub fn new() -> Self {
        Ppu {
            dispcnt: DisplayControl::default(),
            dispstat: DisplayStatus::default(),
            vcount: 0,
            bg_cnt: [BgControl::default(); 4],
            bg_hofs: [0; 4],
            bg_vofs: [0; 4],
            bg_affine: [[0; 4]; 2],
            bg_affine_ref: [[0; 2]; 2],
            win0h: 0,
            win1h: 0,
            win0v: 0,
            win1v: 0,
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
            framebuffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            frame_ready: false,
        }
    }

    pub fn bitmap_mode(&self) -> bool {
        self.dispcnt.mode() >= 3
    }

    pub fn is_vblank(&self) -> bool {
        (self.dispstat.reg & 1) != 0
    }

    pub fn take_frame(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    pub fn buffer(&self) -> &[u16] {
        &self.framebuffer
    }

    fn windows_active(&self) -> bool {
        self.dispcnt.window_enabled(0) || self.dispcnt.window_enabled(1) || self.dispcnt.obj_window_enabled()
    }

    fn visibility_for(&self, x: u16, y: u16, win_obj_mask: &[bool; 240]) -> WindowVisibility {
        if !self.windows_active() {
            return WindowVisibility { bg: [true; 4], obj: true };
        }
        // Priority order is WIN0 > WIN1 > WIN_OBJ > WINOUT. WININ packs the
        // WIN0 mask in its low byte and WIN1 in its high byte; WINOUT packs
        // the "outside all windows" mask low and the OBJ-window mask high.
        let mask = if self.dispcnt.window_enabled(0) && in_window(self.win0h, self.win0v, x, y) {
            self.winin & 0xFF
        } else if self.dispcnt.window_enabled(1) && in_window(self.win1h, self.win1v, x, y) {
            (self.winin >> 8) & 0xFF
        } else if self.dispcnt.obj_window_enabled() && win_obj_mask[x as usize] {
            (self.winout >> 8) & 0xFF
        } else {
            self.winout & 0xFF
        };
        WindowVisibility {
            bg: [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0, mask & 8 != 0],
            obj: mask & 0x10 != 0,
        }
    }

    /// Renders the current scanline (if it's in the visible range) into the
    /// framebuffer and flags HBLANK in DISPSTAT. Returns whether the HBLANK
    /// interrupt should be signalled.
    pub fn begin_hblank(&mut self, vram: &VideoRam, palette: &PaletteRam, oam: &Oam) -> bool {
        self.dispstat.set_hblank(true);
        if self.vcount < VISIBLE_LINES && !self.dispcnt.forced_blank() {
            self.render_scanline(vram, palette, oam);
        } else if self.vcount < VISIBLE_LINES {
            let row_start = self.vcount as usize * SCREEN_WIDTH;
            for px in &mut self.framebuffer[row_start..row_start + SCREEN_WIDTH] {
                *px = 0;
            }
        }
        self.dispstat.hblank_irq_enable()
    }

    fn render_scanline(&mut self, vram: &VideoRam, palette: &PaletteRam, oam: &Oam) {
        let line = self.vcount;
        let mode = self.dispcnt.mode();
        let row_start = line as usize * SCREEN_WIDTH;
        let backdrop = palette.read_16(0);

        let mut bg_rows: [Option<[Option<u16>; 240]>; 4] = [None, None, None, None];
        match mode {
            0 => {
                for bg in 0..4 {
                    if self.dispcnt.bg_enabled(bg) {
                        bg_rows[bg] = Some(self.render_text_bg(bg, line, vram, palette));
                    }
                }
            }
            1 => {
                for bg in 0..2 {
                    if self.dispcnt.bg_enabled(bg) {
                        bg_rows[bg] = Some(self.render_text_bg(bg, line, vram, palette));
                    }
                }
                // BG2 would be affine here; stubbed transparent.
            }
            2 => {
                // Both BG2 and BG3 are affine in mode 2; stubbed transparent.
            }
            _ => {}
        }

        let obj_enabled = self.dispcnt.obj_enabled();
        let mut obj_row: [Option<ObjPixel>; 240] = [None; 240];
        let mut win_obj_mask = [false; 240];
        if obj_enabled {
            render_obj_line(
                oam,
                vram,
                palette,
                line,
                self.dispcnt.obj_1d_mapping(),
                mode >= 3,
                &mut obj_row,
                &mut win_obj_mask,
            );
        }

        for x in 0..SCREEN_WIDTH {
            let vis = self.visibility_for(x as u16, line, &win_obj_mask);
            let mut best: Option<(u16, i8)> = None; // (color, priority) lower priority number wins, OBJ ties beat BG

            if vis.obj {
                if let Some(pixel) = obj_row[x] {
                    best = Some((pixel.color, pixel.priority as i8 * 2));
                }
            }
            for bg in 0..4 {
                if !vis.bg[bg] {
                    continue;
                }
                if let Some(row) = &bg_rows[bg] {
                    if let Some(color) = row[x] {
                        let prio = self.bg_cnt[bg].priority() as i8 * 2 + 1;
                        if best.map_or(true, |(_, p)| prio < p) {
                            best = Some((color, prio));
                        }
                    }
                }
            }

            let color = match mode {
                3 => self.sample_bitmap16(vram, x, line as usize, 0).unwrap_or(backdrop),
                4 => self
                    .sample_bitmap8(vram, palette, x, line as usize, self.dispcnt.frame_select())
                    .unwrap_or(backdrop),
                5 => self
                    .sample_bitmap16(vram, x, line as usize, self.dispcnt.frame_select())
                    .unwrap_or(backdrop),
                _ => best.map(|(c, _)| c).unwrap_or(backdrop),
            };

            let color = if mode >= 3 {
                // In bitmap modes, OBJ still composites on top of the bitmap.
                if vis.obj {
                    obj_row[x].map(|p| p.color).unwrap_or(color)
                } else {
                    color
                }
            } else {
                color
            };

            self.framebuffer[row_start + x] = color;
        }
    }

    fn render_text_bg(&self, bg: usize, line: u16, vram: &VideoRam, palette: &PaletteRam) -> [Option<u16>; 240] {
        let mut out = [None; 240];
        render_text_line(self.bg_cnt[bg], self.bg_hofs[bg], self.bg_vofs[bg], line, vram, palette, &mut out);
        out
    }

    fn sample_bitmap16(&self, vram: &VideoRam, x: usize, y: usize, frame: u8) -> Option<u16> {
        let base = if frame != 0 { 0xA000 } else { 0 };
        let addr = base + (y * SCREEN_WIDTH + x) * 2;
        Some(vram.read_16(0x0600_0000 + addr as u32) & 0x7FFF)
    }

    fn sample_bitmap8(&self, vram: &VideoRam, palette: &PaletteRam, x: usize, y: usize, frame: u8) -> Option<u16> {
        let base = if frame != 0 { 0xA000 } else { 0 };
        let addr = base + y * SCREEN_WIDTH + x;
        let index = vram.read_8(0x0600_0000 + addr as u32);
        if index == 0 {
            None
        } else {
            Some(palette.read_16(u32::from(index) * 2))
        }
    }

    /// Clears HBLANK, advances VCOUNT, and handles VBLANK/frame-wrap edges.
    pub fn end_scanline(&mut self) -> ScanlineEvent {
        self.dispstat.set_hblank(false);
        let mut event = ScanlineEvent::default();

        self.vcount = (self.vcount + 1) % TOTAL_LINES;

        if self.vcount == VISIBLE_LINES {
            self.dispstat.set_vblank(true);
            self.frame_ready = true;
            event.entered_vblank = true;
            event.vblank_irq = self.dispstat.vblank_irq_enable();
        } else if self.vcount == 0 {
            self.dispstat.set_vblank(false);
            event.left_vblank = true;
        }

        let matched = self.vcount == self.dispstat.vcount_target();
        self.dispstat.set_vcount_match(matched);
        if matched {
            event.vcount_irq = self.dispstat.vcount_irq_enable();
        }

        event
    }

    pub fn cycles_per_line(&self) -> u64 {
        CYCLES_PER_LINE
    }

    /// Reads a 16-bit PPU register at `offset` from the IO base
    /// (`0x04000000`). Unmapped offsets (timers/sound territory that spills
    /// past BLDY) read back as 0.
    pub fn read_io_16(&self, offset: u32) -> u16 {
        match offset {
            0x00 => self.dispcnt.reg,
            0x04 => self.dispstat.reg,
            0x06 => self.vcount,
            0x08 | 0x0A | 0x0C | 0x0E => self.bg_cnt[(offset as usize - 0x08) / 2].reg,
            0x40 => self.win0h,
            0x42 => self.win1h,
            0x44 => self.win0v,
            0x46 => self.win1v,
            0x48 => self.winin,
            0x4A => self.winout,
            0x4C => self.mosaic,
            0x50 => self.bldcnt,
            0x52 => self.bldalpha,
            0x54 => self.bldy,
            _ => 0,
        }
    }

    pub fn write_io_16(&mut self, offset: u32, value: u16) {
        match offset {
            0x00 => {
                if value & 0b111 != self.dispcnt.reg & 0b111 {
                    log::debug!("DISPCNT mode switch: {} -> {}", self.dispcnt.reg & 0b111, value & 0b111);
                }
                self.dispcnt.reg = value;
            }
            0x04 => self.dispstat.reg = (self.dispstat.reg & 0b111) | (value & !0b111),
            0x08 | 0x0A | 0x0C | 0x0E => self.bg_cnt[(offset as usize - 0x08) / 2].reg = value,
            0x10 | 0x14 | 0x18 | 0x1C => self.bg_hofs[(offset as usize - 0x10) / 4] = value,
            0x12 | 0x16 | 0x1A | 0x1E => self.bg_vofs[(offset as usize - 0x12) / 4] = value,
            0x20..=0x2F => self.bg_affine[0][(offset as usize - 0x20) / 2 % 4] = value,
            0x30..=0x3F => self.bg_affine[1][(offset as usize - 0x30) / 2 % 4] = value,
            0x40 => self.win0h = value,
            0x42 => self.win1h = value,
            0x44 => self.win0v = value,
            0x46 => self.win1v = value,
            0x48 => self.winin = value,
            0x4A => self.winout = value,
            0x4C => self.mosaic = value,
            0x50 => self.bldcnt = value,
            0x52 => self.bldalpha = value,
            0x54 => self.bldy = value,
            _ => {}
        }
    }

    pub fn read_io_8(&self, offset: u32) -> u8 {
        let word = self.read_io_16(offset & !1);
        if offset & 1 == 0 {
            (word & 0xFF) as u8
        } else {
            (word >> 8) as u8
        }
    }

    pub fn write_io_8(&mut self, offset: u32, value: u8) {
        let aligned = offset & !1;
        let mut word = self.read_io_16(aligned);
        if offset & 1 == 0 {
            word = (word & 0xFF00) | u16::from(value);
        } else {
            word = (word & 0x00FF) | (u16::from(value) << 8);
        }
        self.write_io_16(aligned, word);
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vblank_flag_rises_at_line_160() {
        let mut ppu = Ppu::new();
        ppu.vcount = 159;
        let event = ppu.end_scanline();
        assert!(event.entered_vblank);
        assert!(ppu.is_vblank());
    }

    #[test]
    fn vblank_flag_falls_at_frame_wrap() {
        let mut ppu = Ppu::new();
        ppu.vcount = TOTAL_LINES - 1;
        ppu.dispstat.set_vblank(true);
        let event = ppu.end_scanline();
        assert!(event.left_vblank);
        assert!(!ppu.is_vblank());
        assert_eq!(ppu.vcount, 0);
    }

    #[test]
    fn mode3_bitmap_round_trips_a_pixel() {
        let mut ppu = Ppu::new();
        ppu.dispcnt.reg = 3; // mode 3
        let mut vram = VideoRam::new();
        let palette = PaletteRam::new();
        let oam = Oam::new();
        vram.write_16(0x0600_0000, 0x7C1F);
        ppu.begin_hblank(&vram, &palette, &oam);
        assert_eq!(ppu.buffer()[0], 0x7C1F);
    }
}
