//! Keypad input: active-low KEYINPUT plus KEYCNT's AND/OR interrupt condition.

use crate::bits::{get_bit, get_bits};
use crate::devices::irq::{Interrupt, InterruptController};

bitflags! {
    pub struct Key: u16 {
        const BUTTON_A       = 1 << 0;
        const BUTTON_B       = 1 << 1;
        const BUTTON_SELECT  = 1 << 2;
        const BUTTON_START   = 1 << 3;
        const DPAD_RIGHT     = 1 << 4;
        const DPAD_LEFT      = 1 << 5;
        const DPAD_UP        = 1 << 6;
        const DPAD_DOWN      = 1 << 7;
        const SHOULDER_RIGHT = 1 << 8;
        const SHOULDER_LEFT  = 1 << 9;
        const ALL            = 0x3FF;
    }
}

/// KEYCNT: selects which keys participate in the interrupt condition and
/// whether that condition is logical AND or logical OR.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeypadControl {
    reg: u16,
}

impl KeypadControl {
    pub fn key_select(&self) -> u16 {
        get_bits(self.reg as u32, 0, 9) as u16
    }

    pub fn irq_enable(&self) -> bool {
        get_bit(self.reg as u32, 14)
    }

    pub fn irq_if_all(&self) -> bool {
        get_bit(self.reg as u32, 15)
    }

    pub fn read(&self) -> u16 {
        self.reg
    }

    pub fn write(&mut self, value: u16) {
        self.reg = value;
    }
}

pub struct Keypad {
    /// Active-low: a set bit means the corresponding key is *released*.
    key_input: u16,
    pub control: KeypadControl,
}

impl Keypad {
    pub fn new() -> Self {
        Keypad {
            key_input: Key::ALL.bits(),
            control: KeypadControl::default(),
        }
    }

    pub fn read_key_input(&self) -> u16 {
        self.key_input
    }

    /// Marks `key` as pressed, signalling KEYPAD through `irq` if the
    /// interrupt condition newly holds. Returns true if the caller should
    /// schedule an interrupt-register commit.
    pub fn press_key(&mut self, key: Key, irq: &mut InterruptController) -> bool {
        self.key_input &= !key.bits();
        self.maybe_signal(irq)
    }

    /// Marks `key` as released, signalling KEYPAD through `irq` if the
    /// interrupt condition newly holds. Returns true if the caller should
    /// schedule an interrupt-register commit.
    pub fn release_key(&mut self, key: Key, irq: &mut InterruptController) -> bool {
        self.key_input |= key.bits();
        self.maybe_signal(irq)
    }

    fn maybe_signal(&mut self, irq: &mut InterruptController) -> bool {
        if self.control.irq_enable() && self.evaluate_irq_condition() {
            irq.signal(Interrupt::KEYPAD);
            true
        } else {
            false
        }
    }

    fn evaluate_irq_condition(&self) -> bool {
        let pressed = !self.key_input & self.control.key_select();
        if self.control.irq_if_all() {
            pressed == self.control.key_select()
        } else {
            pressed != 0
        }
    }
}

impl Default for Keypad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_keys_start_released() {
        let pad = Keypad::new();
        assert_eq!(pad.read_key_input(), Key::ALL.bits());
    }

    #[test]
    fn press_clears_the_bit() {
        let mut pad = Keypad::new();
        let mut irq = InterruptController::new();
        pad.press_key(Key::BUTTON_A, &mut irq);
        assert_eq!(pad.read_key_input() & Key::BUTTON_A.bits(), 0);
    }

    #[test]
    fn or_condition_fires_on_any_selected_key() {
        let mut pad = Keypad::new();
        let mut irq = InterruptController::new();
        pad.control.write(0b0100_0000_0000_0011); // select A|B, OR mode, irq enabled
        let scheduled = pad.press_key(Key::BUTTON_A, &mut irq);
        assert!(scheduled);
    }

    #[test]
    fn and_condition_requires_all_selected_keys() {
        let mut pad = Keypad::new();
        let mut irq = InterruptController::new();
        pad.control.write(0b1100_0000_0000_0011); // select A|B, AND mode, irq enabled
        assert!(!pad.press_key(Key::BUTTON_A, &mut irq));
        assert!(pad.press_key(Key::BUTTON_B, &mut irq));
    }
}
