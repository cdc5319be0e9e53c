//! Text (non-affine) background rendering for video modes 0-1.
//!
//! Affine backgrounds (mode 1's BG2, mode 2's BG2/BG3) are rendered as fully
//! transparent here, the same stub-don't-fake choice made for affine OBJs.

use crate::devices::ppu::structs::BgControl;
use crate::devices::video_mem::{PaletteRam, VideoRam};

/// Renders one scanline of a text background into `out`, a 240-wide row of
/// palette indices (0 = transparent) paired with the resolved BGR555 color.
/// `hofs`/`vofs` are the background's raw scroll registers.
pub fn render_text_line(
    cnt: BgControl,
    hofs: u16,
    vofs: u16,
    line: u16,
    vram: &VideoRam,
    palette: &PaletteRam,
    out: &mut [Option<u16>; 240],
) {
    let (map_w_tiles, map_h_tiles) = match cnt.screen_size() {
        0 => (32, 32),
        1 => (64, 32),
        2 => (32, 64),
        _ => (64, 64),
    };
    let char_base = cnt.char_base_block() as usize * 0x4000;
    let screen_base = cnt.screen_base_block() as usize * 0x800;
    let palette_256 = cnt.palette_256();

    let y = (line + vofs) % (map_h_tiles * 8);
    let tile_row = (y / 8) as usize;
    let pixel_row = (y % 8) as usize;

    for screen_x in 0..240u16 {
        let x = (screen_x + hofs) % (map_w_tiles * 8);
        let tile_col = (x / 8) as usize;
        let pixel_col = (x % 8) as usize;

        let (block_x, local_col) = (tile_col / 32, tile_col % 32);
        let (block_y, local_row) = (tile_row / 32, tile_row % 32);
        let block = block_x + block_y * (map_w_tiles as usize / 32);
        let entry_addr = screen_base + block * 0x800 + (local_row * 32 + local_col) * 2;
        let entry = vram.read_16(0x0600_0000 + entry_addr as u32);

        let tile_id = (entry & 0x3FF) as usize;
        let h_flip = (entry >> 10) & 1 != 0;
        let v_flip = (entry >> 11) & 1 != 0;
        let tile_palette = ((entry >> 12) & 0xF) as u8;

        let px = if h_flip { 7 - pixel_col } else { pixel_col };
        let py = if v_flip { 7 - pixel_row } else { pixel_row };

        let color_index = if palette_256 {
            let tile_addr = char_base + tile_id * 64 + py * 8 + px;
            vram.read_8(0x0600_0000 + tile_addr as u32)
        } else {
            let tile_addr = char_base + tile_id * 32 + py * 4 + px / 2;
            let byte = vram.read_8(0x0600_0000 + tile_addr as u32);
            if px % 2 == 0 {
                byte & 0xF
            } else {
                byte >> 4
            }
        };

        out[screen_x as usize] = if color_index == 0 {
            None
        } else if palette_256 {
            Some(palette.read_16(u32::from(color_index) * 2))
        } else {
            let pal_addr = (u32::from(tile_palette) * 16 + u32::from(color_index)) * 2;
            Some(palette.read_16(pal_addr))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transparent_tile_is_none() {
        let vram = VideoRam::new();
        let palette = PaletteRam::new();
        let mut out = [None; 240];
        render_text_line(BgControl::default(), 0, 0, 0, &vram, &palette, &mut out);
        assert!(out.iter().all(|p| p.is_none()));
    }

    #[test]
    fn opaque_4bpp_pixel_resolves_palette_color() {
        let mut vram = VideoRam::new();
        let mut palette = PaletteRam::new();
        // Screen entry at (0,0): tile 1, palette bank 2.
        vram.write_16(0x0600_0000, 0x2001);
        // Tile 1's first byte: low nibble=5 (pixel 0), high nibble=0.
        vram.write_8(0x0600_0000 + 32, 0x05);
        // Palette bank 2, color 5.
        palette.write_16((2 * 16 + 5) * 2, 0x7C1F);

        let cnt = BgControl::default();
        let mut out = [None; 240];
        render_text_line(cnt, 0, 0, 0, &vram, &palette, &mut out);
        assert_eq!(out[0], Some(0x7C1F));
    }
}
