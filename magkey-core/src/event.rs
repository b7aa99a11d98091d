// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Key events routed through the dispatcher.

// ----- Crates -----

use magkey_hid::Keycode;

// ----- Enumerations -----

/// What happened to the key this tick. `KeyDown`/`KeyUp` are edges;
/// `KeyTrue`/`KeyFalse` are sustaining and fire every tick while the key is
/// held (or not), for axis-emitting and hold-to-repeat usages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum EventKind {
    NoEvent = 0,
    KeyDown = 1,
    KeyUp = 2,
    KeyTrue = 3,
    KeyFalse = 4,
}

impl EventKind {
    /// Derive the event kind from a report-state transition.
    pub const fn from_transition(last: bool, next: bool) -> Self {
        match (last, next) {
            (false, true) => EventKind::KeyDown,
            (true, false) => EventKind::KeyUp,
            (true, true) => EventKind::KeyTrue,
            (false, false) => EventKind::KeyFalse,
        }
    }
}

// ----- Structs -----

/// One dispatched event. `source` is the underlying key id when the event
/// originates from (or on behalf of) a physical key, so downstream sinks can
/// read its analog value; events injected by macros or scripts are virtual
/// and carry no source.
#[derive(Copy, Clone, Debug, PartialEq, defmt::Format)]
pub struct KeyboardEvent {
    pub keycode: Keycode,
    pub kind: EventKind,
    pub source: Option<u16>,
    pub is_virtual: bool,
}

impl KeyboardEvent {
    pub const fn new(keycode: Keycode, kind: EventKind, source: u16) -> Self {
        Self {
            keycode,
            kind,
            source: Some(source),
            is_virtual: false,
        }
    }

    /// Event injected by a macro or script rather than a key transition.
    pub const fn virtual_event(keycode: Keycode, kind: EventKind) -> Self {
        Self {
            keycode,
            kind,
            source: None,
            is_virtual: true,
        }
    }

    pub const fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }
}
