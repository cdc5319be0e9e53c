//! Sprite (OBJ) rendering for a single scanline.
//!
//! Only regular (non-affine) sprites are rendered; affine OBJs are skipped
//! entirely (treated as fully transparent), matching the same choice made
//! for affine backgrounds in `text.rs`.

use crate::devices::ppu::structs::ObjAttrs;
use crate::devices::video_mem::{Oam, PaletteRam, VideoRam};

#[derive(Debug, Clone, Copy)]
pub struct ObjPixel {
    pub color: u16,
    pub priority: u8,
    pub semi_transparent: bool,
    pub mode: u8,
}

/// Renders every enabled, non-affine sprite that intersects `line` into
/// `out` (240-wide, highest-priority opaque pixel per column wins — lower
/// OAM index takes precedence on a priority tie, matching hardware OBJ
/// ordering). OBJ mode 2 (WINDOW) sprites don't draw a colour at all; they
/// set a bit in `win_obj` instead, for the OBJ window layer.
pub fn render_obj_line(
    oam: &Oam,
    vram: &VideoRam,
    palette: &PaletteRam,
    line: u16,
    obj_1d_mapping: bool,
    bitmap_mode: bool,
    out: &mut [Option<ObjPixel>; 240],
    win_obj: &mut [bool; 240],
) {
    for index in 0..128usize {
        let base = index as u32 * 8;
        let attr0 = oam.read_16(base);
        let attr1 = oam.read_16(base + 2);
        let attr2 = oam.read_16(base + 4);
        let obj = ObjAttrs::decode(attr0, attr1, attr2);

        if obj.is_disabled() || obj.affine {
            continue;
        }
        if bitmap_mode && obj.tile < 512 {
            continue;
        }

        let (w, h) = obj.dimensions();
        let y0 = obj.y as u16;
        let row_in_sprite = line.wrapping_sub(y0) % 256;
        if row_in_sprite >= h as u16 {
            continue;
        }

        let py = if obj.v_flip {
            h - 1 - row_in_sprite as u32
        } else {
            row_in_sprite as u32
        };

        let tiles_wide = w / 8;
        let bytes_per_tile = if obj.palette_256 { 64 } else { 32 };
        let tile_row = py / 8;
        let pixel_row = py % 8;

        for col in 0..w {
            let screen_x = (obj.x as u32 + col) % 512;
            if screen_x >= 240 {
                continue;
            }

            let px = if obj.h_flip { w - 1 - col } else { col };
            let tile_col = px / 8;
            let pixel_col = px % 8;

            let tile_index = if obj_1d_mapping {
                obj.tile as u32 + tile_row * tiles_wide + tile_col
            } else {
                obj.tile as u32 + tile_row * 32 + tile_col
            };

            let tile_base = 0x1_0000 + tile_index * bytes_per_tile;
            let color_index = if obj.palette_256 {
                let addr = tile_base + pixel_row * 8 + pixel_col;
                vram.read_8(0x0600_0000 + addr)
            } else {
                let addr = tile_base + pixel_row * 4 + pixel_col / 2;
                let byte = vram.read_8(0x0600_0000 + addr);
                if pixel_col % 2 == 0 {
                    byte & 0xF
                } else {
                    byte >> 4
                }
            };

            if color_index == 0 {
                continue;
            }

            if obj.mode == 2 {
                win_obj[screen_x as usize] = true;
                continue;
            }

            let out_slot = &mut out[screen_x as usize];
            if out_slot.is_some() {
                continue; // earlier (lower-index) sprite already claimed this column
            }

            let color = if obj.palette_256 {
                palette.read_16(0x200 + u32::from(color_index) * 2)
            } else {
                palette.read_16(0x200 + (u32::from(obj.palette) * 16 + u32::from(color_index)) * 2)
            };

            *out_slot = Some(ObjPixel {
                color,
                priority: obj.priority,
                semi_transparent: obj.mode == 1,
                mode: obj.mode,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sprite_is_skipped() {
        let mut oam = Oam::new();
        // attr0 bit9 set with affine(bit8) clear => disabled.
        oam.write_16(0, 0b10_0000_0000);
        oam.write_16(2, 0);
        oam.write_16(4, 0);
        let vram = VideoRam::new();
        let palette = PaletteRam::new();
        let mut out = [None; 240];
        let mut win_obj = [false; 240];
        render_obj_line(&oam, &vram, &palette, 0, true, false, &mut out, &mut win_obj);
        assert!(out.iter().all(|p| p.is_none()));
    }

    #[test]
    fn opaque_sprite_pixel_is_drawn() {
        let mut oam = Oam::new();
        oam.write_16(0, 0); // y=0, shape 8x8
        oam.write_16(2, 0); // x=0
        oam.write_16(4, 1); // tile 1
        let mut vram = VideoRam::new();
        let mut palette = PaletteRam::new();
        vram.write_8(0x0601_0000 + 32, 0x03); // tile 1, first pixel = color 3
        palette.write_16(0x200 + 3 * 2, 0x1F);

        let mut out = [None; 240];
        let mut win_obj = [false; 240];
        render_obj_line(&oam, &vram, &palette, 0, true, false, &mut out, &mut win_obj);
        assert_eq!(out[0].unwrap().color, 0x1F);
    }

    #[test]
    fn window_mode_sprite_sets_mask_instead_of_colour() {
        let mut oam = Oam::new();
        oam.write_16(0, 0x0800); // y=0, mode=2 (WINDOW): bits 10-11 = 0b10
        oam.write_16(2, 0);
        oam.write_16(4, 1);
        let mut vram = VideoRam::new();
        let mut palette = PaletteRam::new();
        vram.write_8(0x0601_0000 + 32, 0x03);
        palette.write_16(0x200 + 3 * 2, 0x1F);

        let mut out = [None; 240];
        let mut win_obj = [false; 240];
        render_obj_line(&oam, &vram, &palette, 0, true, false, &mut out, &mut win_obj);
        assert!(out[0].is_none());
        assert!(win_obj[0]);
    }
}
