// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Dynamic keys: small state machines indexed by a keycode sub-field that
//! synthesize virtual events from one or two underlying keys.
//!
//! Every machine first checks that the keycode currently resolved for its
//! owning key still points at this table slot; a layer change that resolves
//! elsewhere freezes the machine, which is what keeps virtual presses from
//! dangling. Machines are `Copy` and processed on a local copy, written back
//! after the pass.

// ----- Crates -----

use magkey_analog::{AnalogValue, ANALOG_MAX, ANALOG_MIN};
use magkey_hid::{code, Keycode};

use crate::driver::HidDriver;
use crate::event::{EventKind, KeyboardEvent};
use crate::keyboard::Keyboard;
use crate::{DK_TAP_DURATION, HOLD_FOREVER};

// ----- Enumerations -----

/// Reaction of one stroke binding at one trigger point (two-bit control).
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum StrokeAction {
    Release = 0,
    Tap = 1,
    NoChange = 2,
    Hold = 3,
}

impl StrokeAction {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => StrokeAction::Tap,
            2 => StrokeAction::NoChange,
            3 => StrokeAction::Hold,
            _ => StrokeAction::Release,
        }
    }
}

/// The four stroke trigger points, as shift offsets into the control byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum StrokePoint {
    PressBegin = 0,
    PressFully = 2,
    ReleaseBegin = 4,
    ReleaseFully = 6,
}

/// Latched tap-or-hold decision of a mod-tap key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum TapHold {
    Tap = 0,
    Hold = 1,
}

/// Arbitration policy of a mutex pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum MutexMode {
    /// Higher analog value wins
    DistancePriority = 0,
    /// Most recent press holds exclusive ownership
    LastPriority = 1,
    Key1Priority = 2,
    Key2Priority = 3,
    /// Both pressed reports neither
    Neutral = 4,
}

impl MutexMode {
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x0F {
            1 => MutexMode::LastPriority,
            2 => MutexMode::Key1Priority,
            3 => MutexMode::Key2Priority,
            4 => MutexMode::Neutral,
            _ => MutexMode::DistancePriority,
        }
    }
}

// ----- Structs -----

/// Four bindings fired at four travel thresholds, each with a two-bit
/// control per trigger point.
#[derive(Copy, Clone, Debug, PartialEq, defmt::Format)]
pub struct DynamicKeyStroke {
    pub key_id: u16,
    pub bindings: [Keycode; 4],
    pub control: [u8; 4],
    pub press_begin: AnalogValue,
    pub press_fully: AnalogValue,
    pub release_begin: AnalogValue,
    pub release_fully: AnalogValue,

    pub(crate) value: AnalogValue,
    pub(crate) end_time: [u32; 4],
    pub(crate) active: u8,
}

impl DynamicKeyStroke {
    pub fn new(
        key_id: u16,
        bindings: [Keycode; 4],
        control: [u8; 4],
        thresholds: [AnalogValue; 4],
    ) -> Self {
        Self {
            key_id,
            bindings,
            control,
            press_begin: thresholds[0],
            press_fully: thresholds[1],
            release_begin: thresholds[2],
            release_fully: thresholds[3],
            value: ANALOG_MIN,
            end_time: [0; 4],
            active: 0,
        }
    }

    fn action(&self, binding: usize, point: StrokePoint) -> StrokeAction {
        StrokeAction::from_bits(self.control[binding] >> point as u8)
    }

    /// Pack four per-point actions into one control byte.
    pub const fn control_byte(
        press_begin: StrokeAction,
        press_fully: StrokeAction,
        release_begin: StrokeAction,
        release_fully: StrokeAction,
    ) -> u8 {
        (press_begin as u8)
            | ((press_fully as u8) << 2)
            | ((release_begin as u8) << 4)
            | ((release_fully as u8) << 6)
    }
}

/// Tap binding on a short press, hold binding once `duration` elapses.
#[derive(Copy, Clone, Debug, PartialEq, defmt::Format)]
pub struct DynamicKeyModTap {
    pub key_id: u16,
    /// `[tap, hold]`
    pub bindings: [Keycode; 2],
    pub duration: u32,

    pub(crate) begin_time: u32,
    pub(crate) end_time: u32,
    pub(crate) action: TapHold,
    pub(crate) key_state: bool,
    pub(crate) report_state: bool,
}

impl DynamicKeyModTap {
    pub fn new(key_id: u16, tap: Keycode, hold: Keycode, duration: u32) -> Self {
        Self {
            key_id,
            bindings: [tap, hold],
            duration,
            begin_time: 0,
            end_time: 0,
            action: TapHold::Tap,
            key_state: false,
            report_state: false,
        }
    }
}

/// Each rising edge of the underlying key inverts the reported state.
#[derive(Copy, Clone, Debug, PartialEq, defmt::Format)]
pub struct DynamicKeyToggle {
    pub key_id: u16,
    pub binding: Keycode,

    pub(crate) state: bool,
    pub(crate) key_state: bool,
}

impl DynamicKeyToggle {
    pub fn new(key_id: u16, binding: Keycode) -> Self {
        Self {
            key_id,
            binding,
            state: false,
            key_state: false,
        }
    }
}

/// Two underlying keys arbitrated by a [`MutexMode`] policy.
#[derive(Copy, Clone, Debug, PartialEq, defmt::Format)]
pub struct DynamicKeyMutex {
    pub key_ids: [u16; 2],
    pub bindings: [Keycode; 2],
    pub mode: MutexMode,
    /// Re-enable simultaneous output when both sides are at full travel.
    pub both_fully: bool,

    pub(crate) key_state: [bool; 2],
    pub(crate) report_state: [bool; 2],
}

impl DynamicKeyMutex {
    pub fn new(key_ids: [u16; 2], bindings: [Keycode; 2], mode: MutexMode) -> Self {
        Self {
            key_ids,
            bindings,
            mode,
            both_fully: false,
            key_state: [false; 2],
            report_state: [false; 2],
        }
    }

    /// Wire form of the mode byte: policy in the low nibble, both-fully
    /// override in the high nibble.
    pub fn mode_byte(&self) -> u8 {
        (self.mode as u8) | if self.both_fully { 0x10 } else { 0 }
    }

    pub fn from_mode_byte(key_ids: [u16; 2], bindings: [Keycode; 2], mode: u8) -> Self {
        let mut mutex = Self::new(key_ids, bindings, MutexMode::from_u8(mode));
        mutex.both_fully = mode & 0xF0 != 0;
        mutex
    }
}

/// One dynamic-key table slot. The enum is the tagged union; all variants
/// share the slot's fixed size.
#[derive(Copy, Clone, Debug, PartialEq, defmt::Format)]
pub enum DynamicKey {
    None,
    Stroke(DynamicKeyStroke),
    ModTap(DynamicKeyModTap),
    Toggle(DynamicKeyToggle),
    Mutex(DynamicKeyMutex),
}

// Table slots stay small enough to copy per pass
const_assert!(core::mem::size_of::<DynamicKey>() <= 64);

// ----- Processing -----

impl<
        const ADV: usize,
        const PLAIN: usize,
        const TOTAL: usize,
        const LAYER_NUM: usize,
        const DK_NUM: usize,
        const BITMAP_WORDS: usize,
        const HOLD: usize,
    > Keyboard<ADV, PLAIN, TOTAL, LAYER_NUM, DK_NUM, BITMAP_WORDS, HOLD>
{
    /// Whether the keycode currently resolved for `key_id` still references
    /// dynamic key `index`.
    fn dk_owns(&self, index: usize, key_id: u16) -> bool {
        if key_id as usize >= TOTAL {
            return false;
        }
        let keycode = self.layers.cached(key_id);
        keycode.code() == code::DYNAMIC_KEY && keycode.dynamic_key_index() as usize == index
    }

    /// Run every configured machine. Runs after all physical updates so the
    /// machines observe a consistent snapshot of underlying values.
    pub fn dynamic_key_process(&mut self, drv: &mut impl HidDriver) {
        for index in 0..DK_NUM {
            let mut dk = self.dynamic_keys[index];
            match &mut dk {
                DynamicKey::None => break,
                DynamicKey::Stroke(stroke) => self.process_stroke(index, stroke, drv),
                DynamicKey::ModTap(mod_tap) => self.process_mod_tap(index, mod_tap, drv),
                DynamicKey::Toggle(toggle) => self.process_toggle(index, toggle, drv),
                DynamicKey::Mutex(mutex) => self.process_mutex(index, mutex, drv),
            }
            self.dynamic_keys[index] = dk;
        }
    }

    fn apply_stroke_point(&self, stroke: &mut DynamicKeyStroke, point: StrokePoint) {
        for binding in 0..4 {
            match stroke.action(binding, point) {
                StrokeAction::Release => stroke.active &= !(1 << binding),
                StrokeAction::Tap => {
                    stroke.end_time[binding] = self.tick.wrapping_add(DK_TAP_DURATION);
                    stroke.active |= 1 << binding;
                }
                StrokeAction::Hold => {
                    stroke.end_time[binding] = HOLD_FOREVER;
                    stroke.active |= 1 << binding;
                }
                StrokeAction::NoChange => {}
            }
        }
    }

    fn process_stroke(
        &mut self,
        index: usize,
        stroke: &mut DynamicKeyStroke,
        drv: &mut impl HidDriver,
    ) {
        let key_id = stroke.key_id;
        if !self.dk_owns(index, key_id) {
            return;
        }

        let last_value = stroke.value;
        let value = self.key_value(key_id);
        let last_active = stroke.active;

        if value > last_value {
            if value - ANALOG_MIN >= stroke.press_begin && last_value - ANALOG_MIN < stroke.press_begin
            {
                self.apply_stroke_point(stroke, StrokePoint::PressBegin);
            }
            if value - ANALOG_MIN >= stroke.press_fully && last_value - ANALOG_MIN < stroke.press_fully
            {
                self.apply_stroke_point(stroke, StrokePoint::PressFully);
            }
        }
        if value < last_value {
            if value - ANALOG_MIN <= stroke.release_begin
                && last_value - ANALOG_MIN > stroke.release_begin
            {
                self.apply_stroke_point(stroke, StrokePoint::ReleaseBegin);
            }
            if value - ANALOG_MIN <= stroke.release_fully
                && last_value - ANALOG_MIN > stroke.release_fully
            {
                self.apply_stroke_point(stroke, StrokePoint::ReleaseFully);
            }
        }

        for binding in 0..4 {
            if self.tick > stroke.end_time[binding] {
                stroke.active &= !(1 << binding);
            }
            let last = last_active & 1 << binding != 0;
            let next = stroke.active & 1 << binding != 0;
            self.handle_event(
                KeyboardEvent::new(
                    stroke.bindings[binding],
                    EventKind::from_transition(last, next),
                    key_id,
                ),
                drv,
            );
        }

        self.set_report_state(key_id, stroke.active != 0);
        stroke.value = value;
    }

    fn process_mod_tap(
        &mut self,
        index: usize,
        mod_tap: &mut DynamicKeyModTap,
        drv: &mut impl HidDriver,
    ) {
        let key_id = mod_tap.key_id;
        if !self.dk_owns(index, key_id) {
            return;
        }

        let key_state = self.keys[key_id as usize].state;
        let last_report = mod_tap.report_state;
        let mut next_report = mod_tap.report_state;

        if !mod_tap.key_state && key_state {
            mod_tap.begin_time = self.tick;
        }
        if mod_tap.key_state && !key_state {
            if self.tick.wrapping_sub(mod_tap.begin_time) < mod_tap.duration {
                // Short press: schedule the tap pulse
                mod_tap.end_time = self.tick.wrapping_add(DK_TAP_DURATION);
                mod_tap.action = TapHold::Tap;
                next_report = true;
            } else {
                next_report = false;
            }
            mod_tap.begin_time = self.tick;
        }
        if key_state
            && !last_report
            && self.tick.wrapping_sub(mod_tap.begin_time) > mod_tap.duration
        {
            mod_tap.end_time = HOLD_FOREVER;
            mod_tap.action = TapHold::Hold;
            next_report = true;
        }
        if self.tick > mod_tap.end_time && last_report {
            next_report = false;
        }

        let tap = mod_tap.action == TapHold::Tap;
        self.handle_event(
            KeyboardEvent::new(
                mod_tap.bindings[TapHold::Tap as usize],
                EventKind::from_transition(tap && last_report, tap && next_report),
                key_id,
            ),
            drv,
        );
        self.handle_event(
            KeyboardEvent::new(
                mod_tap.bindings[TapHold::Hold as usize],
                EventKind::from_transition(!tap && last_report, !tap && next_report),
                key_id,
            ),
            drv,
        );

        mod_tap.key_state = key_state;
        mod_tap.report_state = next_report;
        self.set_report_state(key_id, next_report);
    }

    fn process_toggle(
        &mut self,
        index: usize,
        toggle: &mut DynamicKeyToggle,
        drv: &mut impl HidDriver,
    ) {
        let key_id = toggle.key_id;
        if !self.dk_owns(index, key_id) {
            return;
        }

        let key_state = self.keys[key_id as usize].state;
        let mut next = toggle.state;
        if !toggle.key_state && key_state {
            next = !toggle.state;
        }
        self.handle_event(
            KeyboardEvent::new(
                toggle.binding,
                EventKind::from_transition(toggle.state, next),
                key_id,
            ),
            drv,
        );
        toggle.key_state = key_state;
        toggle.state = next;
    }

    fn process_mutex(
        &mut self,
        index: usize,
        mutex: &mut DynamicKeyMutex,
        drv: &mut impl HidDriver,
    ) {
        let [id0, id1] = mutex.key_ids;
        if !self.dk_owns(index, id0) || !self.dk_owns(index, id1) {
            return;
        }

        let state0 = self.keys[id0 as usize].state;
        let state1 = self.keys[id1 as usize].state;
        let both_analog = (id0 as usize) < ADV && (id1 as usize) < ADV;
        let mut next0 = mutex.report_state[0];
        let mut next1 = mutex.report_state[1];

        match mutex.mode {
            MutexMode::DistancePriority => {
                if both_analog {
                    let key0 = &self.analog[id0 as usize];
                    let key1 = &self.analog[id1 as usize];
                    if key0.value > key1.value {
                        next0 = true;
                        next1 = false;
                    }
                    if key0.value < key1.value {
                        next0 = false;
                        next1 = true;
                    }
                    if key0.value < key0.config.upper_deadzone {
                        next0 = false;
                    }
                    if key1.value < key1.config.upper_deadzone {
                        next1 = false;
                    }
                }
            }
            MutexMode::LastPriority => {
                if !mutex.key_state[0] && state0 {
                    next0 = true;
                    next1 = false;
                }
                if mutex.key_state[0] && !state0 {
                    next0 = false;
                    next1 = state1;
                }
                if !mutex.key_state[1] && state1 {
                    next0 = false;
                    next1 = true;
                }
                if mutex.key_state[1] && !state1 {
                    next0 = state0;
                    next1 = false;
                }
            }
            MutexMode::Key1Priority => {
                next0 = state0;
                next1 = if state0 { false } else { state1 };
            }
            MutexMode::Key2Priority => {
                next0 = if state1 { false } else { state0 };
                next1 = state1;
            }
            MutexMode::Neutral => {
                next0 = state0;
                next1 = state1;
                if state0 && state1 {
                    next0 = false;
                    next1 = false;
                }
            }
        }

        if mutex.both_fully && both_analog {
            let key0 = &self.analog[id0 as usize];
            let key1 = &self.analog[id1 as usize];
            if key0.value >= ANALOG_MAX - key0.config.lower_deadzone
                && key1.value >= ANALOG_MAX - key1.config.lower_deadzone
            {
                next0 = true;
                next1 = true;
            }
        }

        self.handle_event(
            KeyboardEvent::new(
                mutex.bindings[0],
                EventKind::from_transition(mutex.report_state[0], next0),
                id0,
            ),
            drv,
        );
        self.handle_event(
            KeyboardEvent::new(
                mutex.bindings[1],
                EventKind::from_transition(mutex.report_state[1], next1),
                id1,
            ),
            drv,
        );

        mutex.key_state = [state0, state1];
        mutex.report_state = [next0, next1];
    }

    /// Fill pass contribution: every active binding reports through the
    /// normal buffer dispatch, sourced at the underlying key.
    pub(crate) fn dynamic_key_fill(&mut self) {
        for index in 0..DK_NUM {
            let dk = self.dynamic_keys[index];
            match dk {
                DynamicKey::None => break,
                DynamicKey::Stroke(stroke) => {
                    for binding in 0..4 {
                        if stroke.active & 1 << binding != 0 {
                            self.add_buffer(KeyboardEvent::new(
                                stroke.bindings[binding],
                                EventKind::NoEvent,
                                stroke.key_id,
                            ));
                        }
                    }
                }
                DynamicKey::ModTap(mod_tap) => {
                    if mod_tap.report_state {
                        self.add_buffer(KeyboardEvent::new(
                            mod_tap.bindings[mod_tap.action as usize],
                            EventKind::NoEvent,
                            mod_tap.key_id,
                        ));
                    }
                }
                DynamicKey::Toggle(toggle) => {
                    if toggle.state {
                        self.add_buffer(KeyboardEvent::new(
                            toggle.binding,
                            EventKind::NoEvent,
                            toggle.key_id,
                        ));
                    }
                }
                DynamicKey::Mutex(mutex) => {
                    for side in 0..2 {
                        if mutex.report_state[side] {
                            self.add_buffer(KeyboardEvent::new(
                                mutex.bindings[side],
                                EventKind::NoEvent,
                                mutex.key_ids[side],
                            ));
                        }
                    }
                }
            }
        }
    }
}
