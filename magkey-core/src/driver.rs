// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Hardware seams. The core never blocks: every send hook is a non-blocking
//! try, and a busy return leaves the sink's dirty flag set so the next tick
//! retries.

// ----- Crates -----

use crate::event::KeyboardEvent;

// ----- Errors -----

/// The transport could not accept the report this tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub struct SendBusy;

#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub enum StorageError {
    Read,
    Write,
    Erase,
    OutOfRange,
}

// ----- Traits -----

/// Transport and platform hooks consumed by the core.
///
/// The `on_*` hooks are the glue points for peripherals the core does not
/// model (scripting, macro recording, MIDI, user keycodes); defaults no-op.
pub trait HidDriver {
    fn send_keyboard(&mut self, report: &[u8]) -> Result<(), SendBusy>;
    fn send_nkro(&mut self, report: &[u8]) -> Result<(), SendBusy>;
    fn send_mouse(&mut self, report: &[u8]) -> Result<(), SendBusy>;
    /// Consumer and system usages share one endpoint; `system` selects.
    fn send_extra_key(&mut self, report: &[u8], system: bool) -> Result<(), SendBusy>;
    fn send_joystick(&mut self, report: &[u8]) -> Result<(), SendBusy>;
    /// 64-byte control-plane replies.
    fn send_raw(&mut self, report: &[u8]) -> Result<(), SendBusy>;

    fn send_remote_wakeup(&mut self) {}

    fn led_set(&mut self, index: u16, r: u8, g: u8, b: u8) {
        let _ = (index, r, g, b);
    }

    /// Every dispatched event, before domain routing (script / macro-record
    /// boundary).
    fn on_event(&mut self, event: &KeyboardEvent) {
        let _ = event;
    }

    fn on_midi(&mut self, event: &KeyboardEvent) {
        let _ = event;
    }

    fn on_user(&mut self, event: &KeyboardEvent) {
        let _ = event;
    }

    fn reboot(&mut self) {}

    fn jump_to_bootloader(&mut self) {}
}

/// Raw flash access for the config store. Power-loss atomicity is this
/// layer's responsibility.
pub trait FlashDriver {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, addr: u32, buf: &[u8]) -> Result<(), StorageError>;
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), StorageError>;
}
