mod objects;
mod ppu;
mod structs;
mod text;

pub use ppu::{Ppu, ScanlineEvent};
pub use structs::{
    CYCLES_PER_FRAME, CYCLES_PER_HBLANK, CYCLES_PER_HDRAW, SCREEN_HEIGHT, SCREEN_WIDTH,
    VISIBLE_LINES,
};
