//! Cycle-accurate Game Boy Advance system core.
//!
//! `system::Gba` is the crate's entry point: construct one from a ROM image,
//! call `frame()` in a loop, and read `framebuffer()`/feed `press_key`/
//! `release_key` back in. Everything else here is the component it wires
//! together.

#[macro_use]
extern crate bitflags;

pub mod bits;
#[cfg(feature = "wasm")]
pub mod bindings;
pub mod devices;
pub mod error;
pub mod scheduler;
pub mod system;

pub use error::CoreError;
pub use system::Gba;
