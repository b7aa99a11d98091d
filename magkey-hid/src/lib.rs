// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![no_std]

//! Keycode encoding for the magkey firmware core.
//!
//! A [`Keycode`] is a 16-bit word. The low byte selects what the code means:
//! plain HID keyboard usages live below [`code::EXSEL`], everything above is
//! a collection selector (mouse, consumer, joystick, layer control, dynamic
//! key, ...). The high byte carries the per-collection payload: modifier
//! bitmask for keyboard usages, layer op + index for layer control, table
//! index for dynamic keys, and so on.
//!
//! The numeric layout is private to this crate; use the constructors and
//! accessors below.

// ----- Modules -----

/// Low-byte code space. Values up to `EXSEL` are plain USB HID keyboard
/// usages (HID 1.12v2 pg 53); the remainder selects a collection.
pub mod code {
    pub const NO_EVENT: u8 = 0x00;
    pub const TRANSPARENT: u8 = 0x01;

    /// Last keyboard usage reportable through the keyboard buffers.
    pub const EXSEL: u8 = 0xA4;

    pub const MOUSE_COLLECTION: u8 = 0xA5;
    pub const CONSUMER_COLLECTION: u8 = 0xA6;
    pub const SYSTEM_COLLECTION: u8 = 0xA7;
    pub const JOYSTICK_COLLECTION: u8 = 0xA8;
    pub const MIDI_COLLECTION: u8 = 0xA9;
    pub const MIDI_NOTE: u8 = 0xAA;
    pub const LAYER_CONTROL: u8 = 0xAB;
    pub const DYNAMIC_KEY: u8 = 0xAC;
    pub const MACRO_COLLECTION: u8 = 0xAD;
    pub const SCRIPT_COLLECTION: u8 = 0xAE;
    pub const KEYBOARD_OPERATION: u8 = 0xAF;
    pub const USER: u8 = 0xB0;
}

/// Keyboard modifier bitmasks (HID boot report byte 0).
pub mod modifier {
    pub const LEFT_CTRL: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const LEFT_ALT: u8 = 1 << 2;
    pub const LEFT_GUI: u8 = 1 << 3;
    pub const RIGHT_CTRL: u8 = 1 << 4;
    pub const RIGHT_SHIFT: u8 = 1 << 5;
    pub const RIGHT_ALT: u8 = 1 << 6;
    pub const RIGHT_GUI: u8 = 1 << 7;
}

/// Mouse sub-codes (high byte of a mouse-collection keycode).
/// Codes at `MOVE_UP` and above are axis usages; see
/// [`Keycode::is_mouse_move`].
pub mod mouse {
    pub const LEFT_BUTTON: u8 = 0x00;
    pub const RIGHT_BUTTON: u8 = 0x01;
    pub const MIDDLE_BUTTON: u8 = 0x02;
    pub const FORWARD_BUTTON: u8 = 0x03;
    pub const BACK_BUTTON: u8 = 0x04;
    pub const WHEEL_UP: u8 = 0x05;
    pub const WHEEL_DOWN: u8 = 0x06;
    pub const WHEEL_LEFT: u8 = 0x07;
    pub const WHEEL_RIGHT: u8 = 0x08;

    pub const MOVE_UP: u8 = 0x10;
    pub const MOVE_DOWN: u8 = 0x11;
    pub const MOVE_LEFT: u8 = 0x12;
    pub const MOVE_RIGHT: u8 = 0x13;
}

/// System control usages (HID Generic Desktop page), carried verbatim in the
/// sub byte of a system-collection keycode.
pub mod system {
    pub const POWER_DOWN: u8 = 0x81;
    pub const SLEEP: u8 = 0x82;
    pub const WAKE_UP: u8 = 0x83;
}

// ----- Enumerations -----

/// HID Keyboard usages
/// List of Keycodes - USB HID 1.12v2 pg 53
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, defmt::Format)]
#[repr(u8)]
pub enum Keyboard {
    NoEvent = 0x00,
    ErrorRollOver = 0x01,
    PostFail = 0x02,
    ErrorUndefined = 0x03,
    A = 0x04,
    B = 0x05,
    C = 0x06,
    D = 0x07,
    E = 0x08,
    F = 0x09,
    G = 0x0A,
    H = 0x0B,
    I = 0x0C,
    J = 0x0D,
    K = 0x0E,
    L = 0x0F,
    M = 0x10,
    N = 0x11,
    O = 0x12,
    P = 0x13,
    Q = 0x14,
    R = 0x15,
    S = 0x16,
    T = 0x17,
    U = 0x18,
    V = 0x19,
    W = 0x1A,
    X = 0x1B,
    Y = 0x1C,
    Z = 0x1D,
    Num1 = 0x1E,
    Num2 = 0x1F,
    Num3 = 0x20,
    Num4 = 0x21,
    Num5 = 0x22,
    Num6 = 0x23,
    Num7 = 0x24,
    Num8 = 0x25,
    Num9 = 0x26,
    Num0 = 0x27,
    Enter = 0x28,
    Esc = 0x29,
    Backspace = 0x2A,
    Tab = 0x2B,
    Space = 0x2C,
    Minus = 0x2D,
    Equal = 0x2E,
    LeftBracket = 0x2F,
    RightBracket = 0x30,
    Backslash = 0x31,
    NonUsHash = 0x32,
    Semicolon = 0x33,
    Quote = 0x34,
    Backtick = 0x35,
    Comma = 0x36,
    Period = 0x37,
    Slash = 0x38,
    CapsLock = 0x39,
    F1 = 0x3A,
    F2 = 0x3B,
    F3 = 0x3C,
    F4 = 0x3D,
    F5 = 0x3E,
    F6 = 0x3F,
    F7 = 0x40,
    F8 = 0x41,
    F9 = 0x42,
    F10 = 0x43,
    F11 = 0x44,
    F12 = 0x45,
    PrintScreen = 0x46,
    ScrollLock = 0x47,
    Pause = 0x48,
    Insert = 0x49,
    Home = 0x4A,
    PageUp = 0x4B,
    Delete = 0x4C,
    End = 0x4D,
    PageDown = 0x4E,
    Right = 0x4F,
    Left = 0x50,
    Down = 0x51,
    Up = 0x52,
    NumLock = 0x53,
    KeypadSlash = 0x54,
    KeypadAsterisk = 0x55,
    KeypadMinus = 0x56,
    KeypadPlus = 0x57,
    KeypadEnter = 0x58,
    Keypad1 = 0x59,
    Keypad2 = 0x5A,
    Keypad3 = 0x5B,
    Keypad4 = 0x5C,
    Keypad5 = 0x5D,
    Keypad6 = 0x5E,
    Keypad7 = 0x5F,
    Keypad8 = 0x60,
    Keypad9 = 0x61,
    Keypad0 = 0x62,
    KeypadPeriod = 0x63,
    NonUsBackslash = 0x64,
    App = 0x65,
    KeyboardStatus = 0x66,
    KeypadEqual = 0x67,
    F13 = 0x68,
    F14 = 0x69,
    F15 = 0x6A,
    F16 = 0x6B,
    F17 = 0x6C,
    F18 = 0x6D,
    F19 = 0x6E,
    F20 = 0x6F,
    F21 = 0x70,
    F22 = 0x71,
    F23 = 0x72,
    F24 = 0x73,
    Exec = 0x74,
    Help = 0x75,
    Menu = 0x76,
    Select = 0x77,
    Stop = 0x78,
    Again = 0x79,
    Undo = 0x7A,
    Cut = 0x7B,
    Copy = 0x7C,
    Paste = 0x7D,
    Find = 0x7E,
    Mute = 0x7F,
    VolumeUp = 0x80,
    VolumeDown = 0x81,
    LockingCapsLock = 0x82,
    LockingNumLock = 0x83,
    LockingScrollLock = 0x84,
    KeypadComma = 0x85,
    KeypadEqualAs400 = 0x86,
    International1 = 0x87,
    International2 = 0x88,
    International3 = 0x89,
    International4 = 0x8A,
    International5 = 0x8B,
    International6 = 0x8C,
    International7 = 0x8D,
    International8 = 0x8E,
    International9 = 0x8F,
    Lang1 = 0x90,
    Lang2 = 0x91,
    Lang3 = 0x92,
    Lang4 = 0x93,
    Lang5 = 0x94,
    Lang6 = 0x95,
    Lang7 = 0x96,
    Lang8 = 0x97,
    Lang9 = 0x98,
    AlternateErase = 0x99,
    SysReqAttention = 0x9A,
    Cancel = 0x9B,
    Clear = 0x9C,
    Prior = 0x9D,
    Return = 0x9E,
    Separator = 0x9F,
    Out = 0xA0,
    Oper = 0xA1,
    ClearAgain = 0xA2,
    CrSelProps = 0xA3,
    ExSel = 0xA4,
}

/// Layer operations, packed into the high nibble of a layer-control
/// keycode's sub byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum LayerOp {
    /// Active while the key is held
    Momentary = 0x0,
    /// Turn the layer on
    TurnOn = 0x1,
    /// Turn the layer off
    TurnOff = 0x2,
    /// Invert the layer
    Toggle = 0x3,
}

impl LayerOp {
    pub const fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x03 {
            0x1 => LayerOp::TurnOn,
            0x2 => LayerOp::TurnOff,
            0x3 => LayerOp::Toggle,
            _ => LayerOp::Momentary,
        }
    }
}

/// Keyboard operations, packed into bits 5:0 of an operation keycode's sub
/// byte. Values at `CONFIG_BASE` and above address config bits instead; bits
/// 7:6 then select the [`ConfigAction`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum Operation {
    Reboot = 0,
    FactoryReset = 1,
    Save = 2,
    Bootloader = 3,
    ResetToDefault = 4,
    RgbBrightnessUp = 5,
    RgbBrightnessDown = 6,
    ConfigSlot0 = 7,
    ConfigSlot1 = 8,
    ConfigSlot2 = 9,
    ConfigSlot3 = 10,
}

impl Operation {
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Operation::Reboot),
            1 => Some(Operation::FactoryReset),
            2 => Some(Operation::Save),
            3 => Some(Operation::Bootloader),
            4 => Some(Operation::ResetToDefault),
            5 => Some(Operation::RgbBrightnessUp),
            6 => Some(Operation::RgbBrightnessDown),
            7 => Some(Operation::ConfigSlot0),
            8 => Some(Operation::ConfigSlot1),
            9 => Some(Operation::ConfigSlot2),
            10 => Some(Operation::ConfigSlot3),
            _ => None,
        }
    }
}

/// First operation index addressing a config bit rather than an action.
pub const CONFIG_BASE: u8 = 16;

/// Action applied to a config bit by an operation keycode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum ConfigAction {
    Reset = 0,
    Set = 1,
    Toggle = 2,
}

/// Joystick axis mapping mode, bits 6:5 of a joystick keycode's sub byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum JoystickAxisMode {
    /// Positive half range
    Positive = 0x1,
    /// Negative half range
    Negative = 0x2,
    /// Full bipolar range (bit 7 inverts)
    Bipolar = 0x3,
}

// ----- Consumer usage table -----

/// Consumer-page usages addressable from a consumer-collection keycode.
/// The sub byte indexes this table; the full 16-bit usage goes on the wire.
pub const CONSUMER_USAGES: [u16; 24] = [
    0x0000, // (unassigned)
    0x00B0, // Play
    0x00B1, // Pause
    0x00B2, // Record
    0x00B3, // Fast Forward
    0x00B4, // Rewind
    0x00B5, // Scan Next Track
    0x00B6, // Scan Previous Track
    0x00B7, // Stop
    0x00B8, // Eject
    0x00CD, // Play/Pause
    0x00CF, // Voice Command
    0x00E2, // Mute
    0x00E9, // Volume Up
    0x00EA, // Volume Down
    0x006F, // Brightness Up
    0x0070, // Brightness Down
    0x0192, // AL Calculator
    0x0194, // AL Local Browser
    0x01A7, // AL Documents
    0x0221, // AC Search
    0x0223, // AC Home
    0x0224, // AC Back
    0x0225, // AC Forward
];

/// Resolve a consumer keycode sub byte to its 16-bit usage (0 if out of
/// table).
pub const fn consumer_usage(index: u8) -> u16 {
    if (index as usize) < CONSUMER_USAGES.len() {
        CONSUMER_USAGES[index as usize]
    } else {
        0
    }
}

// ----- Keycode -----

/// Opaque tagged 16-bit keycode. See the crate docs for the layout contract.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, defmt::Format)]
pub struct Keycode(u16);

impl Keycode {
    pub const NO_EVENT: Keycode = Keycode(code::NO_EVENT as u16);
    pub const TRANSPARENT: Keycode = Keycode(code::TRANSPARENT as u16);

    /// Raw constructor for wire/flash round-trips.
    pub const fn from_raw(raw: u16) -> Self {
        Keycode(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    pub const fn new(code: u8, sub: u8) -> Self {
        Keycode(((sub as u16) << 8) | code as u16)
    }

    /// Low byte: HID usage or collection selector.
    pub const fn code(&self) -> u8 {
        self.0 as u8
    }

    /// High byte: collection-specific payload.
    pub const fn sub(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    // - Constructors per collection -

    /// Keyboard usage plus a modifier bitmask. A bare modifier key passes
    /// `Keyboard::NoEvent` as the usage.
    pub const fn keyboard(usage: Keyboard, modifiers: u8) -> Self {
        Keycode::new(usage as u8, modifiers)
    }

    pub const fn mouse(usage: u8) -> Self {
        Keycode::new(code::MOUSE_COLLECTION, usage)
    }

    pub const fn consumer(index: u8) -> Self {
        Keycode::new(code::CONSUMER_COLLECTION, index)
    }

    pub const fn system(usage: u8) -> Self {
        Keycode::new(code::SYSTEM_COLLECTION, usage)
    }

    pub const fn joystick_button(button: u8) -> Self {
        Keycode::new(code::JOYSTICK_COLLECTION, button & 0x1F)
    }

    pub const fn joystick_axis(axis: u8, mode: JoystickAxisMode, invert: bool) -> Self {
        let invert = if invert { 0x80 } else { 0x00 };
        Keycode::new(
            code::JOYSTICK_COLLECTION,
            (axis & 0x1F) | ((mode as u8) << 5) | invert,
        )
    }

    pub const fn layer(op: LayerOp, layer: u8) -> Self {
        Keycode::new(code::LAYER_CONTROL, (layer & 0x0F) | ((op as u8) << 4))
    }

    pub const fn dynamic_key(index: u8) -> Self {
        Keycode::new(code::DYNAMIC_KEY, index)
    }

    pub const fn operation(op: Operation) -> Self {
        Keycode::new(code::KEYBOARD_OPERATION, op as u8)
    }

    pub const fn config_bit(bit: u8, action: ConfigAction) -> Self {
        Keycode::new(
            code::KEYBOARD_OPERATION,
            ((CONFIG_BASE + (bit & 0x0F)) & 0x3F) | ((action as u8) << 6),
        )
    }

    pub const fn user(index: u8) -> Self {
        Keycode::new(code::USER, index)
    }

    // - Predicates -

    pub const fn is_no_event(&self) -> bool {
        self.code() == code::NO_EVENT
    }

    pub const fn is_transparent(&self) -> bool {
        self.code() == code::TRANSPARENT
    }

    /// Reportable through the 6KRO/NKRO keyboard buffers.
    pub const fn is_keyboard(&self) -> bool {
        self.code() <= code::EXSEL
    }

    pub const fn is_mouse_move(&self) -> bool {
        self.code() == code::MOUSE_COLLECTION && (self.sub() & 0xF0) != 0
    }

    pub const fn is_joystick_axis(&self) -> bool {
        self.code() == code::JOYSTICK_COLLECTION && (self.sub() & 0xE0) != 0
    }

    // - Accessors per collection -

    /// Modifier bitmask of a keyboard usage keycode.
    pub const fn modifiers(&self) -> u8 {
        self.sub()
    }

    pub const fn layer_index(&self) -> u8 {
        self.sub() & 0x0F
    }

    pub const fn layer_op(&self) -> LayerOp {
        LayerOp::from_nibble(self.sub() >> 4)
    }

    pub const fn dynamic_key_index(&self) -> u8 {
        self.sub()
    }

    pub const fn joystick_axis_index(&self) -> u8 {
        self.sub() & 0x1F
    }

    pub const fn joystick_axis_mode(&self) -> u8 {
        (self.sub() >> 5) & 0x03
    }

    pub const fn joystick_axis_invert(&self) -> bool {
        (self.sub() & 0x80) != 0
    }

    /// Operation index (bits 5:0 of the sub byte).
    pub const fn operation_index(&self) -> u8 {
        self.sub() & 0x3F
    }

    pub const fn config_action(&self) -> ConfigAction {
        match (self.sub() >> 6) & 0x03 {
            1 => ConfigAction::Set,
            2 => ConfigAction::Toggle,
            _ => ConfigAction::Reset,
        }
    }
}

impl From<Keyboard> for Keycode {
    fn from(usage: Keyboard) -> Self {
        Keycode::keyboard(usage, 0)
    }
}

// ----- Tests -----

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keyboard_round_trip() {
        let kc = Keycode::keyboard(Keyboard::A, modifier::LEFT_CTRL);
        assert_eq!(kc.code(), Keyboard::A as u8);
        assert_eq!(kc.modifiers(), modifier::LEFT_CTRL);
        assert!(kc.is_keyboard());
        assert_eq!(Keycode::from_raw(kc.raw()), kc);
    }

    #[test]
    fn layer_fields() {
        let kc = Keycode::layer(LayerOp::Momentary, 1);
        assert_eq!(kc.code(), code::LAYER_CONTROL);
        assert_eq!(kc.layer_index(), 1);
        assert_eq!(kc.layer_op(), LayerOp::Momentary);

        let kc = Keycode::layer(LayerOp::Toggle, 15);
        assert_eq!(kc.layer_index(), 15);
        assert_eq!(kc.layer_op(), LayerOp::Toggle);
    }

    #[test]
    fn joystick_fields() {
        let kc = Keycode::joystick_axis(3, JoystickAxisMode::Bipolar, true);
        assert!(kc.is_joystick_axis());
        assert_eq!(kc.joystick_axis_index(), 3);
        assert_eq!(kc.joystick_axis_mode(), JoystickAxisMode::Bipolar as u8);
        assert!(kc.joystick_axis_invert());

        let kc = Keycode::joystick_button(5);
        assert!(!kc.is_joystick_axis());
        assert_eq!(kc.sub(), 5);
    }

    #[test]
    fn config_bit_fields() {
        let kc = Keycode::config_bit(1, ConfigAction::Toggle);
        assert_eq!(kc.operation_index(), CONFIG_BASE + 1);
        assert_eq!(kc.config_action(), ConfigAction::Toggle);
    }

    #[test]
    fn collections_are_not_keyboard() {
        assert!(!Keycode::mouse(mouse::LEFT_BUTTON).is_keyboard());
        assert!(!Keycode::layer(LayerOp::Momentary, 0).is_keyboard());
        assert!(Keycode::keyboard(Keyboard::ExSel, 0).is_keyboard());
    }
}
