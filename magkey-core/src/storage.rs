// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Persistent configuration slots on the raw flash hooks.
//!
//! Flat layout: a small header at the base of the region holds the image
//! version and the selected slot index; the slots follow, each one holding
//! `[trigger configs | keymap | rgb base | rgb lamps | dynamic keys]`.
//! Thresholds rest in normalized `[0, 1]` floats for portability; stroke
//! dynamic keys are stored normalized too. A version mismatch on mount
//! factory-resets every slot before the first read; any read error leaves
//! the in-RAM state untouched.

// ----- Crates -----

use byteorder::{ByteOrder, LittleEndian};
use log::warn;
use magkey_analog::{
    AnalogValue, CalibrationMode, TriggerConfig, TriggerMode, ANALOG_RANGE,
};
use magkey_hid::Keycode;

use crate::driver::{FlashDriver, StorageError};
use crate::dynamic_key::{
    DynamicKey, DynamicKeyModTap, DynamicKeyMutex, DynamicKeyStroke, DynamicKeyToggle,
};
use crate::keyboard::Keyboard;
use crate::rgb::RgbColor;

// ----- Constants -----

/// Number of selectable configuration slots.
pub const CONFIG_SLOTS: u8 = 4;

/// Image magic plus layout version; bump on any layout change.
pub const STORAGE_MAGIC: u32 = 0x4D4B_0002;

/// Header region reserved at the base of the flash window.
pub const STORAGE_RESERVED: u32 = 0x0400;

/// Serialized size of one trigger config.
pub const TRIGGER_CONFIG_BYTES: usize = 42;

/// Serialized size of one dynamic-key slot.
pub const DYNAMIC_KEY_BYTES: usize = 32;

const RGB_BASE_BYTES: usize = 15;
const RGB_LAMP_BYTES: usize = 8;
const HEADER_BYTES: usize = 5;

const DK_TYPE_NONE: u8 = 0;
const DK_TYPE_STROKE: u8 = 1;
const DK_TYPE_MOD_TAP: u8 = 2;
const DK_TYPE_TOGGLE: u8 = 3;
const DK_TYPE_MUTEX: u8 = 4;

// ----- Normalized trigger config -----

fn norm(value: AnalogValue) -> f32 {
    value / ANALOG_RANGE
}

fn denorm(value: f32) -> AnalogValue {
    value * ANALOG_RANGE
}

/// On-wire/on-flash form of a [`TriggerConfig`]: thresholds in `[0, 1]`
/// floats, calibration bounds passed through raw.
#[derive(Copy, Clone, Debug, Default, PartialEq, defmt::Format)]
pub struct NormalizedTriggerConfig {
    pub mode: u8,
    pub calibration: u8,
    pub activation_value: f32,
    pub deactivation_value: f32,
    pub trigger_distance: f32,
    pub release_distance: f32,
    pub trigger_speed: f32,
    pub release_speed: f32,
    pub upper_deadzone: f32,
    pub lower_deadzone: f32,
    pub upper_bound: f32,
    pub lower_bound: f32,
}

impl NormalizedTriggerConfig {
    pub fn normalize(config: &TriggerConfig) -> Self {
        Self {
            mode: config.mode as u8,
            calibration: config.calibration as u8,
            activation_value: norm(config.activation_value),
            deactivation_value: norm(config.deactivation_value),
            trigger_distance: norm(config.trigger_distance),
            release_distance: norm(config.release_distance),
            trigger_speed: norm(config.trigger_speed),
            release_speed: norm(config.release_speed),
            upper_deadzone: norm(config.upper_deadzone),
            lower_deadzone: norm(config.lower_deadzone),
            upper_bound: config.upper_bound,
            lower_bound: config.lower_bound,
        }
    }

    pub fn denormalize(&self) -> TriggerConfig {
        let mut config = TriggerConfig {
            mode: TriggerMode::from_u8(self.mode),
            calibration: CalibrationMode::from_u8(self.calibration),
            activation_value: denorm(self.activation_value),
            deactivation_value: denorm(self.deactivation_value),
            trigger_distance: denorm(self.trigger_distance),
            release_distance: denorm(self.release_distance),
            trigger_speed: denorm(self.trigger_speed),
            release_speed: denorm(self.release_speed),
            upper_deadzone: denorm(self.upper_deadzone),
            lower_deadzone: denorm(self.lower_deadzone),
            upper_bound: self.upper_bound,
            lower_bound: self.lower_bound,
        };
        config.clamp_thresholds();
        config
    }

    pub fn to_bytes(&self) -> [u8; TRIGGER_CONFIG_BYTES] {
        let mut buf = [0; TRIGGER_CONFIG_BYTES];
        buf[0] = self.mode;
        buf[1] = self.calibration;
        let fields = [
            self.activation_value,
            self.deactivation_value,
            self.trigger_distance,
            self.release_distance,
            self.trigger_speed,
            self.release_speed,
            self.upper_deadzone,
            self.lower_deadzone,
            self.upper_bound,
            self.lower_bound,
        ];
        for (i, field) in fields.iter().enumerate() {
            LittleEndian::write_f32(&mut buf[2 + i * 4..6 + i * 4], *field);
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; TRIGGER_CONFIG_BYTES]) -> Self {
        let field = |i: usize| LittleEndian::read_f32(&buf[2 + i * 4..6 + i * 4]);
        Self {
            mode: buf[0],
            calibration: buf[1],
            activation_value: field(0),
            deactivation_value: field(1),
            trigger_distance: field(2),
            release_distance: field(3),
            trigger_speed: field(4),
            release_speed: field(5),
            upper_deadzone: field(6),
            lower_deadzone: field(7),
            upper_bound: field(8),
            lower_bound: field(9),
        }
    }
}

// ----- Dynamic-key records -----

/// Serialize one table slot. Stroke thresholds are stored normalized;
/// runtime state is not persisted.
pub fn dynamic_key_to_bytes(dk: &DynamicKey) -> [u8; DYNAMIC_KEY_BYTES] {
    let mut buf = [0; DYNAMIC_KEY_BYTES];
    match dk {
        DynamicKey::None => buf[0] = DK_TYPE_NONE,
        DynamicKey::Stroke(stroke) => {
            buf[0] = DK_TYPE_STROKE;
            LittleEndian::write_u16(&mut buf[1..3], stroke.key_id);
            for (i, binding) in stroke.bindings.iter().enumerate() {
                LittleEndian::write_u16(&mut buf[3 + i * 2..5 + i * 2], binding.raw());
            }
            buf[11..15].copy_from_slice(&stroke.control);
            let thresholds = [
                stroke.press_begin,
                stroke.press_fully,
                stroke.release_begin,
                stroke.release_fully,
            ];
            for (i, threshold) in thresholds.iter().enumerate() {
                LittleEndian::write_f32(&mut buf[15 + i * 4..19 + i * 4], norm(*threshold));
            }
        }
        DynamicKey::ModTap(mod_tap) => {
            buf[0] = DK_TYPE_MOD_TAP;
            LittleEndian::write_u16(&mut buf[1..3], mod_tap.key_id);
            LittleEndian::write_u16(&mut buf[3..5], mod_tap.bindings[0].raw());
            LittleEndian::write_u16(&mut buf[5..7], mod_tap.bindings[1].raw());
            LittleEndian::write_u32(&mut buf[7..11], mod_tap.duration);
        }
        DynamicKey::Toggle(toggle) => {
            buf[0] = DK_TYPE_TOGGLE;
            LittleEndian::write_u16(&mut buf[1..3], toggle.key_id);
            LittleEndian::write_u16(&mut buf[3..5], toggle.binding.raw());
        }
        DynamicKey::Mutex(mutex) => {
            buf[0] = DK_TYPE_MUTEX;
            LittleEndian::write_u16(&mut buf[1..3], mutex.key_ids[0]);
            LittleEndian::write_u16(&mut buf[3..5], mutex.key_ids[1]);
            LittleEndian::write_u16(&mut buf[5..7], mutex.bindings[0].raw());
            LittleEndian::write_u16(&mut buf[7..9], mutex.bindings[1].raw());
            buf[9] = mutex.mode_byte();
        }
    }
    buf
}

/// Parse one table slot; unknown types come back as `None`.
pub fn dynamic_key_from_bytes(buf: &[u8; DYNAMIC_KEY_BYTES]) -> DynamicKey {
    match buf[0] {
        DK_TYPE_STROKE => {
            let key_id = LittleEndian::read_u16(&buf[1..3]);
            let mut bindings = [Keycode::NO_EVENT; 4];
            for (i, binding) in bindings.iter_mut().enumerate() {
                *binding = Keycode::from_raw(LittleEndian::read_u16(&buf[3 + i * 2..5 + i * 2]));
            }
            let mut control = [0; 4];
            control.copy_from_slice(&buf[11..15]);
            let mut thresholds = [0.0; 4];
            for (i, threshold) in thresholds.iter_mut().enumerate() {
                *threshold = denorm(LittleEndian::read_f32(&buf[15 + i * 4..19 + i * 4]));
            }
            DynamicKey::Stroke(DynamicKeyStroke::new(key_id, bindings, control, thresholds))
        }
        DK_TYPE_MOD_TAP => DynamicKey::ModTap(DynamicKeyModTap::new(
            LittleEndian::read_u16(&buf[1..3]),
            Keycode::from_raw(LittleEndian::read_u16(&buf[3..5])),
            Keycode::from_raw(LittleEndian::read_u16(&buf[5..7])),
            LittleEndian::read_u32(&buf[7..11]),
        )),
        DK_TYPE_TOGGLE => DynamicKey::Toggle(DynamicKeyToggle::new(
            LittleEndian::read_u16(&buf[1..3]),
            Keycode::from_raw(LittleEndian::read_u16(&buf[3..5])),
        )),
        DK_TYPE_MUTEX => DynamicKey::Mutex(DynamicKeyMutex::from_mode_byte(
            [
                LittleEndian::read_u16(&buf[1..3]),
                LittleEndian::read_u16(&buf[3..5]),
            ],
            [
                Keycode::from_raw(LittleEndian::read_u16(&buf[5..7])),
                Keycode::from_raw(LittleEndian::read_u16(&buf[7..9])),
            ],
            buf[9],
        )),
        _ => DynamicKey::None,
    }
}

// ----- Store operations -----

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
    const fn slot_bytes() -> u32 {
        (ADV * TRIGGER_CONFIG_BYTES
            + LAYER_NUM * TOTAL * 2
            + RGB_BASE_BYTES
            + ADV * RGB_LAMP_BYTES
            + DK_NUM * DYNAMIC_KEY_BYTES) as u32
    }

    const fn slot_address(slot: u8) -> u32 {
        STORAGE_RESERVED + slot as u32 * Self::slot_bytes()
    }

    /// Mount the store: version-check the header, factory-reset on mismatch,
    /// then load the selected slot. Returns whether a reset happened.
    pub fn mount(&mut self, flash: &mut impl FlashDriver) -> Result<bool, StorageError> {
        let mut header = [0; HEADER_BYTES];
        flash.read(0, &mut header)?;
        if LittleEndian::read_u32(&header[0..4]) != STORAGE_MAGIC {
            self.factory_reset(flash)?;
            return Ok(true);
        }
        let index = header[4];
        self.config_index = if index < CONFIG_SLOTS { index } else { 0 };
        self.load_config(flash)?;
        Ok(false)
    }

    fn write_header(&self, flash: &mut impl FlashDriver) -> Result<(), StorageError> {
        let mut header = [0; HEADER_BYTES];
        LittleEndian::write_u32(&mut header[0..4], STORAGE_MAGIC);
        header[4] = self.config_index;
        flash.erase(0, HEADER_BYTES as u32)?;
        flash.write(0, &header)
    }

    /// Persist the current state into the selected slot.
    pub fn save_config(&self, flash: &mut impl FlashDriver) -> Result<(), StorageError> {
        self.save_slot(self.config_index, flash)
    }

    fn save_slot(&self, slot: u8, flash: &mut impl FlashDriver) -> Result<(), StorageError> {
        if slot >= CONFIG_SLOTS {
            return Err(StorageError::OutOfRange);
        }
        let mut addr = Self::slot_address(slot);
        flash.erase(addr, Self::slot_bytes())?;

        for key in self.analog.iter() {
            let record = NormalizedTriggerConfig::normalize(&key.config).to_bytes();
            flash.write(addr, &record)?;
            addr += record.len() as u32;
        }
        for layer in 0..LAYER_NUM {
            for id in 0..TOTAL {
                let record = self.layers.keycode(layer, id as u16).raw().to_le_bytes();
                flash.write(addr, &record)?;
                addr += 2;
            }
        }
        let record = rgb_base_to_bytes(&self.rgb.base);
        flash.write(addr, &record)?;
        addr += record.len() as u32;
        for lamp in self.rgb.configs.iter() {
            let mut record = [0; RGB_LAMP_BYTES];
            record[0] = lamp.mode;
            record[1] = lamp.color.r;
            record[2] = lamp.color.g;
            record[3] = lamp.color.b;
            LittleEndian::write_f32(&mut record[4..8], lamp.speed);
            flash.write(addr, &record)?;
            addr += record.len() as u32;
        }
        for dk in self.dynamic_keys.iter() {
            let record = dynamic_key_to_bytes(dk);
            flash.write(addr, &record)?;
            addr += record.len() as u32;
        }
        Ok(())
    }

    /// Load the selected slot. The image is fully read once before anything
    /// is applied, so an I/O error leaves the previous in-RAM values intact.
    pub fn load_config(&mut self, flash: &mut impl FlashDriver) -> Result<(), StorageError> {
        self.read_slot(flash, false)?;
        self.read_slot(flash, true)
    }

    fn read_slot(&mut self, flash: &mut impl FlashDriver, apply: bool) -> Result<(), StorageError> {
        let mut addr = Self::slot_address(self.config_index);

        for index in 0..ADV {
            let mut record = [0; TRIGGER_CONFIG_BYTES];
            flash.read(addr, &mut record)?;
            addr += record.len() as u32;
            if apply {
                let config = NormalizedTriggerConfig::from_bytes(&record).denormalize();
                self.analog[index].config = config;
                self.analog[index].set_range(config.upper_bound, config.lower_bound);
            }
        }

        let mut keymap = [[Keycode::NO_EVENT; TOTAL]; LAYER_NUM];
        for layer in keymap.iter_mut() {
            for cell in layer.iter_mut() {
                let mut record = [0; 2];
                flash.read(addr, &mut record)?;
                addr += 2;
                *cell = Keycode::from_raw(u16::from_le_bytes(record));
            }
        }
        if apply {
            self.layers.load_keymap(&keymap);
        }

        let mut record = [0; RGB_BASE_BYTES];
        flash.read(addr, &mut record)?;
        addr += record.len() as u32;
        if apply {
            self.rgb.base = rgb_base_from_bytes(&record);
        }
        for index in 0..ADV {
            let mut record = [0; RGB_LAMP_BYTES];
            flash.read(addr, &mut record)?;
            addr += record.len() as u32;
            if apply {
                self.rgb.configs[index].mode = record[0];
                self.rgb.configs[index].color = RgbColor {
                    r: record[1],
                    g: record[2],
                    b: record[3],
                };
                self.rgb.configs[index].speed = LittleEndian::read_f32(&record[4..8]);
            }
        }

        for index in 0..DK_NUM {
            let mut record = [0; DYNAMIC_KEY_BYTES];
            flash.read(addr, &mut record)?;
            addr += record.len() as u32;
            if apply {
                self.dynamic_keys[index] = dynamic_key_from_bytes(&record);
            }
        }
        Ok(())
    }

    /// Reset to compiled-in defaults and rewrite every slot plus the header.
    pub fn factory_reset(&mut self, flash: &mut impl FlashDriver) -> Result<(), StorageError> {
        self.reset_to_default();
        for slot in 0..CONFIG_SLOTS {
            self.save_slot(slot, flash)?;
        }
        self.config_index = 0;
        self.write_header(flash)
    }

    /// Switch slots: persist the index, then recover state from the new
    /// slot. Out-of-range indices are ignored.
    pub fn set_config_index(&mut self, index: u8, flash: &mut impl FlashDriver) {
        if index >= CONFIG_SLOTS {
            return;
        }
        self.config_index = index;
        if let Err(e) = self.write_header(flash) {
            warn!("Config index write failed: {:?}", e);
        }
        if let Err(e) = self.load_config(flash) {
            warn!("Config recovery failed: {:?}", e);
        }
    }
}

// ----- RGB record helpers -----

fn rgb_base_to_bytes(base: &crate::rgb::RgbBaseConfig) -> [u8; RGB_BASE_BYTES] {
    let mut buf = [0; RGB_BASE_BYTES];
    buf[0] = base.mode;
    buf[1] = base.color.r;
    buf[2] = base.color.g;
    buf[3] = base.color.b;
    buf[4] = base.secondary.r;
    buf[5] = base.secondary.g;
    buf[6] = base.secondary.b;
    LittleEndian::write_f32(&mut buf[7..11], base.speed);
    LittleEndian::write_u16(&mut buf[11..13], base.direction);
    buf[13] = base.density;
    buf[14] = base.brightness;
    buf
}

fn rgb_base_from_bytes(buf: &[u8; RGB_BASE_BYTES]) -> crate::rgb::RgbBaseConfig {
    crate::rgb::RgbBaseConfig {
        mode: buf[0],
        color: RgbColor {
            r: buf[1],
            g: buf[2],
            b: buf[3],
        },
        secondary: RgbColor {
            r: buf[4],
            g: buf[5],
            b: buf[6],
        },
        speed: LittleEndian::read_f32(&buf[7..11]),
        direction: LittleEndian::read_u16(&buf[11..13]),
        density: buf[13],
        brightness: buf[14],
    }
}
