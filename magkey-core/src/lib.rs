// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![no_std]

//! Analog keyboard state machine.
//!
//! Everything downstream of the per-key analog pipeline lives here: debounce,
//! the layer resolver with its keycode cache, the dynamic-key machines, the
//! single-threaded event bus, HID report composition and the cooperative tick
//! loop, plus the config store and 64-byte control plane that mutate it all.
//!
//! The process-wide state of a running keyboard is concentrated in one
//! [`Keyboard`] aggregate; hardware is reached exclusively through the
//! [`HidDriver`] and [`FlashDriver`] traits.

#[macro_use]
extern crate static_assertions;

// ----- Modules -----

pub mod command;
pub mod driver;
pub mod dynamic_key;
pub mod event;
pub mod event_list;
pub mod extra_key;
pub mod joystick;
pub mod keyboard;
pub mod lamp_array;
pub mod layer;
pub mod mouse;
pub mod report;
pub mod rgb;
pub mod storage;

mod key;

// ----- Re-exports -----

pub use crate::driver::{FlashDriver, HidDriver, SendBusy, StorageError};
pub use crate::dynamic_key::DynamicKey;
pub use crate::event::{EventKind, KeyboardEvent};
pub use crate::key::Key;
pub use crate::keyboard::{Keyboard, KeyboardConfig};

// ----- Constants -----

/// Keyboard report rate, Hz. Also the tick rate of the core loop.
pub const REPORT_RATE: u32 = 1000;

/// Analog sampling rate, Hz. Integrations configuring the Kalman filter use
/// `1.0 / POLLING_RATE` as its time step.
pub const POLLING_RATE: u32 = 1000;

/// Ticks a dynamic-key tap stays asserted.
pub const DK_TAP_DURATION: u32 = 5;

/// `end_time` sentinel for "held until further notice".
pub const HOLD_FOREVER: u32 = u32::MAX;

/// NKRO bitmap size in bytes.
pub const NKRO_REPORT_BYTES: usize = 30;
