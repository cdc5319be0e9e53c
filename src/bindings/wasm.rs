//! WASM front-end for the GBA emulator.

use crate::devices::keypad::Key;
use crate::system::Gba;
use js_sys::Uint16Array;
use std::panic;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct GbaEmulator {
    gba: Gba,
}

#[wasm_bindgen]
impl GbaEmulator {
    #[wasm_bindgen(constructor)]
    pub fn new(rom: &[u8], bios: Option<Box<[u8]>>, skip_bios: bool) -> GbaEmulator {
        let bios = bios.map(|buf| buf.into_vec());
        GbaEmulator {
            gba: Gba::new(rom.to_vec(), bios, skip_bios),
        }
    }

    /// Runs the emulator forward to the next completed frame and hands back
    /// the BGR555 framebuffer, or an error string if the core hit a fatal
    /// decode condition.
    #[wasm_bindgen]
    pub fn step_frame(&mut self) -> Result<Uint16Array, JsValue> {
        self.gba
            .frame()
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        Ok(Uint16Array::from(self.gba.framebuffer()))
    }

    #[wasm_bindgen]
    pub fn press_key(&mut self, key: u16) {
        if let Some(key) = Key::from_bits(key) {
            self.gba.press_key(key);
        }
    }

    #[wasm_bindgen]
    pub fn release_key(&mut self, key: u16) {
        if let Some(key) = Key::from_bits(key) {
            self.gba.release_key(key);
        }
    }
}

/// Installs a global panic handler to make debugging easier.
#[wasm_bindgen]
pub fn init_debug_hooks() {
    panic::set_hook(Box::new(console_error_panic_hook::hook));
}
