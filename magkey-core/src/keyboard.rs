// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The keyboard aggregate and its cooperative tick loop.
//!
//! All process-wide state lives here; everything runs on the foreground
//! context. Const parameters follow the same convention as matrix scanners
//! built on const generics: values the type system cannot derive
//! (`TOTAL = ADV + PLAIN`, `BITMAP_WORDS = (TOTAL + 31) / 32`) are passed
//! explicitly.
//!
//! ```rust,ignore
//! const ADV: usize = 64;           // analog keys
//! const PLAIN: usize = 4;          // GPIO keys
//! const TOTAL: usize = ADV + PLAIN;
//! const LAYER_NUM: usize = 5;
//! const DK_NUM: usize = 32;
//! const BITMAP_WORDS: usize = (TOTAL + 31) / 32;
//! const HOLD: usize = 16;          // outstanding virtual presses
//!
//! let mut keyboard =
//!     Keyboard::<ADV, PLAIN, TOTAL, LAYER_NUM, DK_NUM, BITMAP_WORDS, HOLD>::new(keymap);
//! loop {
//!     keyboard.tick_advance();
//!     keyboard.task(&mut driver, &mut flash, |i| adc_rings[i].avg());
//! }
//! ```

// ----- Crates -----

use log::warn;
use magkey_analog::{AnalogKey, AnalogValue, RawValue, TriggerConfig, ANALOG_MAX};
use magkey_hid::{code, consumer_usage, modifier, ConfigAction, Keycode, Operation, CONFIG_BASE};

use crate::driver::{FlashDriver, HidDriver};
use crate::dynamic_key::DynamicKey;
use crate::event::{EventKind, KeyboardEvent};
use crate::event_list::{EventList, HeldEvent, OwnerId};
use crate::extra_key::ExtraKeyBuffer;
use crate::joystick::JoystickBuffer;
use crate::key::Key;
use crate::lamp_array::LampArray;
use crate::layer::Layers;
use crate::mouse::MouseBuffer;
use crate::report::{NkroBuffer, SixKroBuffer};
use crate::rgb::RgbState;

// ----- Report flags -----

/// Per-sink dirty bits, cleared by a successful send.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, defmt::Format)]
pub struct ReportFlags(u8);

impl ReportFlags {
    pub const KEYBOARD: u8 = 1 << 0;
    pub const MOUSE: u8 = 1 << 1;
    pub const CONSUMER: u8 = 1 << 2;
    pub const SYSTEM: u8 = 1 << 3;
    pub const JOYSTICK: u8 = 1 << 4;

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn get(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }
}

// ----- Configuration -----

/// Host-visible configuration bits plus the debounce intervals.
#[derive(Copy, Clone, Debug, defmt::Format)]
pub struct KeyboardConfig {
    pub debug: bool,
    pub nkro: bool,
    pub winlock: bool,
    pub continuous_poll: bool,

    pub enable_report: bool,
    pub debounce_press: u8,
    pub debounce_release: u8,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            debug: false,
            nkro: false,
            winlock: false,
            continuous_poll: false,
            enable_report: true,
            debounce_press: 0,
            debounce_release: 0,
        }
    }
}

impl KeyboardConfig {
    /// Addressable bit order used by config keycodes and packets.
    pub fn bit(&self, index: u8) -> bool {
        match index {
            0 => self.debug,
            1 => self.nkro,
            2 => self.winlock,
            3 => self.continuous_poll,
            _ => false,
        }
    }

    pub fn set_bit(&mut self, index: u8, value: bool) {
        match index {
            0 => self.debug = value,
            1 => self.nkro = value,
            2 => self.winlock = value,
            3 => self.continuous_poll = value,
            _ => {}
        }
    }

    pub fn toggle_bit(&mut self, index: u8) {
        let value = self.bit(index);
        self.set_bit(index, !value);
    }
}

/// Host LED state from the keyboard output report.
#[derive(Copy, Clone, Debug, Default, defmt::Format)]
pub struct KeyboardLed {
    pub num_lock: bool,
    pub caps_lock: bool,
    pub scroll_lock: bool,
    pub compose: bool,
    pub kana: bool,
}

impl KeyboardLed {
    pub fn from_raw(raw: u8) -> Self {
        Self {
            num_lock: raw & 1 << 0 != 0,
            caps_lock: raw & 1 << 1 != 0,
            scroll_lock: raw & 1 << 2 != 0,
            compose: raw & 1 << 3 != 0,
            kana: raw & 1 << 4 != 0,
        }
    }
}

/// Side effects requested by keycodes/packets that need the flash driver;
/// drained once per tick.
#[derive(Copy, Clone, Debug, Default, defmt::Format)]
pub(crate) struct PendingOps {
    pub save: bool,
    pub factory_reset: bool,
    pub recalibrate: bool,
    pub recover: Option<u8>,
}

// ----- Keyboard -----

/// Process-wide keyboard state. See the module docs for the const parameter
/// contract. Key ids: analog keys occupy `0..ADV`, plain keys
/// `ADV..ADV + PLAIN`.
pub struct Keyboard<
    const ADV: usize,
    const PLAIN: usize,
    const TOTAL: usize,
    const LAYER_NUM: usize,
    const DK_NUM: usize,
    const BITMAP_WORDS: usize,
    const HOLD: usize,
> {
    pub analog: [AnalogKey; ADV],
    pub(crate) keys: [Key; TOTAL],
    pub layers: Layers<LAYER_NUM, TOTAL>,
    pub(crate) dynamic_keys: [DynamicKey; DK_NUM],
    pub config: KeyboardConfig,
    pub rgb: RgbState<ADV>,
    pub lamp_array: LampArray,
    pub led_state: KeyboardLed,

    pub(crate) held: EventList<HOLD>,
    pub(crate) bitmap: [u32; BITMAP_WORDS],
    pub(crate) six_kro: SixKroBuffer,
    pub(crate) nkro: NkroBuffer,
    pub(crate) mouse: MouseBuffer,
    pub(crate) consumer: ExtraKeyBuffer,
    pub(crate) system: ExtraKeyBuffer,
    pub(crate) joystick: JoystickBuffer,
    pub(crate) flags: ReportFlags,
    pub(crate) pending: PendingOps,
    pub(crate) reply_cursor: Option<u16>,
    pub(crate) config_index: u8,

    pub tick: u32,
    pub is_suspend: bool,

    default_keymap: [[Keycode; TOTAL]; LAYER_NUM],
}

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
    pub fn new(default_keymap: [[Keycode; TOTAL]; LAYER_NUM]) -> Self {
        let mut keys = [Key::new(0); TOTAL];
        for (i, key) in keys.iter_mut().enumerate() {
            key.id = i as u16;
        }
        Self {
            analog: [AnalogKey::default(); ADV],
            keys,
            layers: Layers::new(default_keymap),
            dynamic_keys: [DynamicKey::None; DK_NUM],
            config: KeyboardConfig::default(),
            rgb: RgbState::new(),
            lamp_array: LampArray::new(),
            led_state: KeyboardLed::default(),
            held: EventList::new(),
            bitmap: [0; BITMAP_WORDS],
            six_kro: SixKroBuffer::new(),
            nkro: NkroBuffer::new(),
            mouse: MouseBuffer::new(),
            consumer: ExtraKeyBuffer::new(),
            system: ExtraKeyBuffer::new(),
            joystick: JoystickBuffer::new(),
            flags: ReportFlags::default(),
            pending: PendingOps::default(),
            reply_cursor: None,
            config_index: 0,
            tick: 0,
            is_suspend: false,
            default_keymap,
        }
    }

    // - Tick counter (written by the producer context) -

    pub fn tick_advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }

    // - Key value access -

    /// Normalized travel of any key; plain keys read as fully pressed or
    /// fully released.
    pub fn key_value(&self, id: u16) -> AnalogValue {
        let id = id as usize;
        if id < ADV {
            self.analog[id].value
        } else if id < TOTAL && self.keys[id].state {
            ANALOG_MAX
        } else {
            0.0
        }
    }

    /// Deadzone-compressed travel, for axis usages.
    pub fn key_effective_value(&self, id: u16) -> AnalogValue {
        let id = id as usize;
        if id < ADV {
            self.analog[id].effective_value()
        } else if id < TOTAL && self.keys[id].state {
            ANALOG_MAX
        } else {
            0.0
        }
    }

    pub fn key(&self, id: u16) -> Option<&Key> {
        self.keys.get(id as usize)
    }

    pub fn config_index(&self) -> u8 {
        self.config_index
    }

    /// Host LED output report (num/caps/scroll lock).
    pub fn set_led_state(&mut self, raw: u8) {
        self.led_state = KeyboardLed::from_raw(raw);
    }

    pub fn report_flags(&self) -> ReportFlags {
        self.flags
    }

    pub fn six_kro(&self) -> &SixKroBuffer {
        &self.six_kro
    }

    pub fn nkro(&self) -> &NkroBuffer {
        &self.nkro
    }

    pub fn mouse(&self) -> &MouseBuffer {
        &self.mouse
    }

    pub fn joystick(&self) -> &JoystickBuffer {
        &self.joystick
    }

    pub fn consumer(&self) -> &ExtraKeyBuffer {
        &self.consumer
    }

    pub fn system(&self) -> &ExtraKeyBuffer {
        &self.system
    }

    pub fn dynamic_key(&self, index: usize) -> Option<&DynamicKey> {
        self.dynamic_keys.get(index)
    }

    pub fn set_dynamic_key(&mut self, index: usize, dk: DynamicKey) {
        if index < DK_NUM {
            self.dynamic_keys[index] = dk;
        }
    }

    // - Per-key pipeline -

    /// Feed one smoothed raw sample through the full pipeline:
    /// trigger decision, debounce, report state, event dispatch.
    pub fn update_key_raw(&mut self, index: usize, raw: RawValue, drv: &mut impl HidDriver) {
        if index >= ADV {
            return;
        }
        let state = self.analog[index].update_raw(raw, self.keys[index].state);
        self.key_pipeline(index as u16, state, drv);
    }

    /// Feed one already-normalized value (nexus passthrough, tests).
    pub fn update_key_value(&mut self, index: usize, value: AnalogValue, drv: &mut impl HidDriver) {
        if index >= ADV {
            return;
        }
        let state = self.analog[index].update(value, self.keys[index].state);
        self.key_pipeline(index as u16, state, drv);
    }

    /// Force a physical state (digital paths, tests).
    pub fn update_key_state(&mut self, id: u16, state: bool, drv: &mut impl HidDriver) {
        if (id as usize) < TOTAL {
            self.key_pipeline(id, state, drv);
        }
    }

    fn key_pipeline(&mut self, id: u16, state: bool, drv: &mut impl HidDriver) {
        self.keys[id as usize].update(state);
        let (press, release) = (self.config.debounce_press, self.config.debounce_release);
        let debounced = self.keys[id as usize].debounce(press, release);
        let last_report = self.keys[id as usize].report_state;
        self.set_report_state(id, debounced);
        let kind = EventKind::from_transition(last_report, debounced);
        let keycode = self.layers.cached(id);
        self.handle_event(KeyboardEvent::new(keycode, kind, id), drv);
    }

    /// Update the debounced report state and the key bitmap. No events.
    pub(crate) fn set_report_state(&mut self, id: u16, state: bool) -> bool {
        let key = &mut self.keys[id as usize];
        let changed = key.report_state != state;
        key.report_state = state;
        let (word, bit) = (id as usize / 32, id % 32);
        if state {
            self.bitmap[word] |= 1 << bit;
        } else {
            self.bitmap[word] &= !(1 << bit);
        }
        changed
    }

    // - Event bus -

    /// Dispatch one event to its domain sink. Synchronous; everything a key
    /// transition generates lands before the next key is processed.
    pub fn handle_event(&mut self, event: KeyboardEvent, drv: &mut impl HidDriver) {
        drv.on_event(&event);

        if !event.is_virtual {
            if let Some(id) = event.source {
                match event.kind {
                    EventKind::KeyDown => {
                        self.layers.lock(id);
                        if (id as usize) < ADV {
                            self.rgb.activate(id, self.tick);
                        }
                    }
                    EventKind::KeyUp => self.layers.unlock(id),
                    _ => {}
                }
            }
        }

        match event.keycode.code() {
            code::MOUSE_COLLECTION => self.mouse_event(&event),
            code::CONSUMER_COLLECTION | code::SYSTEM_COLLECTION => self.extra_key_event(&event),
            code::JOYSTICK_COLLECTION => self.joystick_event(&event),
            code::MIDI_COLLECTION | code::MIDI_NOTE => drv.on_midi(&event),
            code::LAYER_CONTROL => self.layers.handle_event(&event),
            code::KEYBOARD_OPERATION => self.operation_event(&event, drv),
            code::MACRO_COLLECTION | code::SCRIPT_COLLECTION => {}
            code::USER => drv.on_user(&event),
            _ => self.keycode_event(&event),
        }
    }

    fn keycode_event(&mut self, event: &KeyboardEvent) {
        match event.kind {
            EventKind::KeyDown | EventKind::KeyUp => self.flags.set(ReportFlags::KEYBOARD),
            _ => {}
        }
    }

    fn mouse_event(&mut self, event: &KeyboardEvent) {
        match event.kind {
            EventKind::KeyDown | EventKind::KeyUp => self.flags.set(ReportFlags::MOUSE),
            EventKind::KeyTrue => {
                if event.keycode.is_mouse_move() {
                    self.flags.set(ReportFlags::MOUSE);
                    let value = event
                        .source
                        .map(|id| self.key_value(id))
                        .unwrap_or(ANALOG_MAX);
                    self.mouse.set_axis(event.keycode.sub(), value, self.tick);
                } else {
                    self.mouse.add(event.keycode.sub());
                }
            }
            _ => {}
        }
    }

    fn extra_key_event(&mut self, event: &KeyboardEvent) {
        let system = event.keycode.code() == code::SYSTEM_COLLECTION;
        let usage = if system {
            event.keycode.sub() as u16
        } else {
            consumer_usage(event.keycode.sub())
        };
        let (buffer, flag) = if system {
            (&mut self.system, ReportFlags::SYSTEM)
        } else {
            (&mut self.consumer, ReportFlags::CONSUMER)
        };
        match event.kind {
            EventKind::KeyDown => {
                buffer.press(usage);
                self.flags.set(flag);
            }
            EventKind::KeyUp => {
                buffer.release();
                self.flags.set(flag);
            }
            EventKind::KeyTrue => buffer.sustain(usage),
            _ => {}
        }
    }

    fn joystick_event(&mut self, event: &KeyboardEvent) {
        match event.kind {
            EventKind::KeyDown | EventKind::KeyUp => self.flags.set(ReportFlags::JOYSTICK),
            EventKind::KeyTrue => {
                if event.keycode.is_joystick_axis() {
                    let value = event
                        .source
                        .map(|id| self.key_effective_value(id))
                        .unwrap_or(ANALOG_MAX);
                    self.joystick.set_axis(event.keycode, value);
                    self.flags.set(ReportFlags::JOYSTICK);
                } else {
                    self.joystick.add_button(event.keycode.sub());
                }
            }
            _ => {}
        }
    }

    fn operation_event(&mut self, event: &KeyboardEvent, drv: &mut impl HidDriver) {
        if event.kind != EventKind::KeyDown {
            return;
        }
        let index = event.keycode.operation_index();
        if index < CONFIG_BASE {
            match Operation::from_index(index) {
                Some(Operation::Reboot) => drv.reboot(),
                Some(Operation::FactoryReset) => self.pending.factory_reset = true,
                Some(Operation::Save) => self.pending.save = true,
                Some(Operation::Bootloader) => drv.jump_to_bootloader(),
                Some(Operation::ResetToDefault) => self.reset_to_default(),
                Some(Operation::RgbBrightnessUp) => self.rgb.brightness_up(),
                Some(Operation::RgbBrightnessDown) => self.rgb.brightness_down(),
                Some(Operation::ConfigSlot0) => self.pending.recover = Some(0),
                Some(Operation::ConfigSlot1) => self.pending.recover = Some(1),
                Some(Operation::ConfigSlot2) => self.pending.recover = Some(2),
                Some(Operation::ConfigSlot3) => self.pending.recover = Some(3),
                None => {}
            }
        } else {
            let bit = index - CONFIG_BASE;
            match event.keycode.config_action() {
                ConfigAction::Reset => self.config.set_bit(bit, false),
                ConfigAction::Set => self.config.set_bit(bit, true),
                ConfigAction::Toggle => self.config.toggle_bit(bit),
            }
        }
    }

    // - Holding list (macro / script boundary) -

    /// Park a virtual key-down for `owner` and dispatch it.
    pub fn hold_key(
        &mut self,
        owner: OwnerId,
        keycode: Keycode,
        drv: &mut impl HidDriver,
    ) {
        let event = KeyboardEvent::virtual_event(keycode, EventKind::KeyDown);
        self.held.push_front(HeldEvent { event, owner });
        self.handle_event(event, drv);
    }

    /// Release one held keycode for `owner` and dispatch the key-up.
    pub fn release_key(
        &mut self,
        owner: OwnerId,
        keycode: Keycode,
        drv: &mut impl HidDriver,
    ) {
        self.held
            .remove_first(|item| item.owner == owner && item.event.keycode == keycode);
        self.handle_event(
            KeyboardEvent::virtual_event(keycode, EventKind::KeyUp),
            drv,
        );
    }

    /// Owner teardown: synthesize a key-up for every outstanding press the
    /// owner still holds.
    pub fn release_owner(&mut self, owner: OwnerId, drv: &mut impl HidDriver) {
        let mut staged = heapless::Vec::<KeyboardEvent, HOLD>::new();
        self.held.remove_owner(owner, |item| {
            // Pool capacity bounds the list, so staging cannot overflow
            staged.push(item.event.with_kind(EventKind::KeyUp)).ok();
        });
        for event in staged {
            self.handle_event(event, drv);
        }
    }

    pub fn holds_keycode(&self, owner: OwnerId, keycode: Keycode) -> bool {
        self.held.exists_keycode(owner, keycode)
    }

    // - Reset paths -

    /// Restore the compiled-in defaults (keymap, per-key trigger config,
    /// lamps, dynamic keys). Does not touch persistent storage.
    pub fn reset_to_default(&mut self) {
        let keymap = self.default_keymap;
        self.layers.load_keymap(&keymap);
        for key in self.analog.iter_mut() {
            let bounds = (key.config.upper_bound, key.config.lower_bound);
            key.config = TriggerConfig::default();
            key.set_range(bounds.0, bounds.1);
        }
        self.rgb.factory_reset();
        self.dynamic_keys = [DynamicKey::None; DK_NUM];
    }

    // - Report composition -

    pub(crate) fn clear_report_buffers(&mut self) {
        if self.config.nkro {
            self.nkro.clear();
        }
        self.six_kro.clear();
        self.mouse.clear();
        self.joystick.clear();
    }

    /// Route one `(keycode, source)` pair into the matching report buffer.
    pub(crate) fn add_buffer(&mut self, event: KeyboardEvent) {
        match event.keycode.code() {
            code::MOUSE_COLLECTION => self.mouse.add(event.keycode.sub()),
            code::CONSUMER_COLLECTION => {
                self.consumer.sustain(consumer_usage(event.keycode.sub()))
            }
            code::SYSTEM_COLLECTION => self.system.sustain(event.keycode.sub() as u16),
            code::JOYSTICK_COLLECTION => {
                if event.keycode.is_joystick_axis() {
                    let value = event
                        .source
                        .map(|id| self.key_effective_value(id))
                        .unwrap_or(ANALOG_MAX);
                    self.joystick.set_axis(event.keycode, value);
                } else {
                    self.joystick.add_button(event.keycode.sub());
                }
            }
            _ => {
                if event.keycode.is_keyboard() {
                    if self.config.nkro {
                        self.nkro.add(event.keycode);
                    } else {
                        self.six_kro.add(event.keycode);
                    }
                }
            }
        }
    }

    /// Walk the key bitmap, the dynamic-key active set and the holding list.
    pub(crate) fn fill_report_buffers(&mut self) {
        for word_index in 0..BITMAP_WORDS {
            let mut block = self.bitmap[word_index];
            while block != 0 {
                let bit = block.trailing_zeros();
                block &= !(1 << bit);
                let id = (word_index * 32) as u16 + bit as u16;
                if (id as usize) >= TOTAL {
                    break;
                }
                let keycode = self.layers.cached(id);
                self.add_buffer(KeyboardEvent::new(keycode, EventKind::NoEvent, id));
            }
        }
        self.dynamic_key_fill();
        let mut staged = heapless::Vec::<KeyboardEvent, HOLD>::new();
        for item in self.held.iter() {
            staged.push(item.event).ok();
        }
        for event in staged {
            self.add_buffer(event);
        }
    }

    /// Try every dirty sink; busy sends keep their flag for the next tick.
    pub(crate) fn send_reports(&mut self, drv: &mut impl HidDriver) {
        if self.flags.get(ReportFlags::MOUSE) {
            let bytes = self.mouse.to_bytes();
            if drv.send_mouse(&bytes).is_ok() {
                self.mouse.sent();
                self.flags.clear(ReportFlags::MOUSE);
            }
        }
        if self.flags.get(ReportFlags::CONSUMER) {
            let bytes = self.consumer.as_bytes();
            if drv.send_extra_key(&bytes, false).is_ok() {
                self.flags.clear(ReportFlags::CONSUMER);
            }
        }
        if self.flags.get(ReportFlags::SYSTEM) {
            let bytes = self.system.as_bytes();
            if drv.send_extra_key(&bytes, true).is_ok() {
                self.flags.clear(ReportFlags::SYSTEM);
            }
        }
        if self.flags.get(ReportFlags::KEYBOARD) {
            let sent = if self.config.nkro {
                let mut bytes = self.nkro.as_bytes();
                if self.config.winlock {
                    bytes[0] &= !(modifier::LEFT_GUI | modifier::RIGHT_GUI);
                }
                drv.send_nkro(&bytes).is_ok()
            } else {
                let mut bytes = self.six_kro.as_bytes();
                if self.config.winlock {
                    bytes[0] &= !(modifier::LEFT_GUI | modifier::RIGHT_GUI);
                }
                drv.send_keyboard(&bytes).is_ok()
            };
            if sent {
                self.flags.clear(ReportFlags::KEYBOARD);
            }
        }
        if self.flags.get(ReportFlags::JOYSTICK) {
            let bytes = self.joystick.as_bytes();
            if drv.send_joystick(&bytes).is_ok() {
                self.flags.clear(ReportFlags::JOYSTICK);
            }
        }
    }

    // - Pending side effects -

    fn process_pending(&mut self, flash: &mut impl FlashDriver) {
        let pending = self.pending;
        self.pending = PendingOps::default();
        if pending.factory_reset {
            if let Err(e) = self.factory_reset(flash) {
                warn!("Factory reset failed: {:?}", e);
            }
        }
        if pending.save {
            if let Err(e) = self.save_config(flash) {
                warn!("Config save failed: {:?}", e);
            }
        }
        if let Some(index) = pending.recover {
            self.set_config_index(index, flash);
        }
        if pending.recalibrate {
            for key in self.analog.iter_mut() {
                let raw = key.raw;
                key.reset_range(raw);
            }
        }
    }

    // - Tick loop -

    /// One cooperative tick: sample every analog key through `read_raw`, run
    /// the dynamic-key pass, drain pending storage ops and control-plane
    /// replies, then compose and send reports. Never blocks.
    pub fn task(
        &mut self,
        drv: &mut impl HidDriver,
        flash: &mut impl FlashDriver,
        mut read_raw: impl FnMut(usize) -> RawValue,
    ) {
        for index in 0..ADV {
            let raw = read_raw(index);
            self.update_key_raw(index, raw, drv);
        }

        self.dynamic_key_process(drv);
        self.process_pending(flash);
        self.pump_replies(drv);

        if self.is_suspend {
            if self.flags.any() {
                self.is_suspend = false;
                drv.send_remote_wakeup();
            } else {
                return;
            }
        }

        if self.config.continuous_poll {
            self.flags.set(ReportFlags::KEYBOARD);
        }
        if self.config.enable_report && self.flags.any() {
            self.clear_report_buffers();
            self.fill_report_buffers();
            self.send_reports(drv);
        }
    }

    /// Re-seed calibration from the current resting samples.
    pub fn reset_ranges(&mut self, mut read_raw: impl FnMut(usize) -> RawValue) {
        for index in 0..ADV {
            let raw = read_raw(index);
            self.analog[index].reset_range(raw);
        }
    }
}
