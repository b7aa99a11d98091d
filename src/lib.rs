// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Meta crate tying the magkey workspace together.
//!
//! Firmware projects normally depend on the member crates directly; this
//! crate re-exports them behind default features so a flat `magkey`
//! dependency also works.

#![no_std]

// ----- Crates -----

#[cfg(feature = "magkey-analog")]
pub use magkey_analog as analog;

#[cfg(feature = "magkey-core")]
pub use magkey_core as keyboard;

#[cfg(feature = "magkey-hid")]
pub use magkey_hid as hid;
