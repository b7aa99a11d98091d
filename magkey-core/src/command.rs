// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! 64-byte control plane: the transport-agnostic packets that mutate in-RAM
//! state and stream it back out.
//!
//! Byte 0 is the opcode, byte 1 the data type, the remainder type-specific
//! payload. Get requests arm a page cursor; replies stream one packet per
//! tick through `send_raw` (a busy send retries the same page). Out-of-range
//! indices are silently ignored and existing state is left unchanged.

// ----- Crates -----

use byteorder::{ByteOrder, LittleEndian};
use enum_primitive_derive::Primitive;
use log::warn;
use num_traits::FromPrimitive;

use crate::driver::HidDriver;
use crate::keyboard::Keyboard;
use crate::rgb::RgbColor;
use crate::storage::{
    dynamic_key_from_bytes, dynamic_key_to_bytes, NormalizedTriggerConfig, DYNAMIC_KEY_BYTES,
    TRIGGER_CONFIG_BYTES,
};
use magkey_hid::Keycode;

// ----- Constants -----

pub const PACKET_BYTES: usize = 64;

/// Reply marker written into byte 0 of outbound packets.
pub const PACKET_REPLY: u8 = 0xFF;

pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Keymap cells per reply packet.
const KEYMAP_CHUNK: usize = 16;

/// Debug snapshot entries per reply packet.
const DEBUG_CHUNK: usize = 4;

// ----- Enumerations -----

#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive)]
pub enum PacketCode {
    Action = 0x00,
    Set = 0x01,
    Get = 0x02,
    Log = 0x03,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive)]
pub enum PacketData {
    AdvancedKey = 0x00,
    Keymap = 0x01,
    RgbBase = 0x02,
    RgbLamp = 0x03,
    DynamicKey = 0x04,
    ConfigIndex = 0x05,
    Config = 0x06,
    Debug = 0x07,
    Report = 0x08,
    Version = 0x09,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive)]
pub enum PacketAction {
    Save = 0x00,
    FactoryReset = 0x01,
    Reboot = 0x02,
    Bootloader = 0x03,
    ResetToDefault = 0x04,
    Recalibrate = 0x05,
}

// ----- Packet handling -----

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
    /// Parse one received 64-byte packet and apply it.
    pub fn consume_packet(&mut self, buf: &[u8; PACKET_BYTES], drv: &mut impl HidDriver) {
        match PacketCode::from_u8(buf[0]) {
            Some(PacketCode::Action) => match PacketAction::from_u8(buf[1]) {
                Some(PacketAction::Save) => self.pending.save = true,
                Some(PacketAction::FactoryReset) => self.pending.factory_reset = true,
                Some(PacketAction::Reboot) => drv.reboot(),
                Some(PacketAction::Bootloader) => drv.jump_to_bootloader(),
                Some(PacketAction::ResetToDefault) => self.reset_to_default(),
                Some(PacketAction::Recalibrate) => self.pending.recalibrate = true,
                None => warn!("Unknown action: {}", buf[1]),
            },
            Some(PacketCode::Set) => self.packet_set(buf),
            Some(PacketCode::Get) => {
                let page = PacketData::from_u8(buf[1]).unwrap_or(PacketData::AdvancedKey);
                self.reply_cursor = Some((page as u16) << 8);
            }
            Some(PacketCode::Log) => {}
            None => warn!("Unknown packet code: {}", buf[0]),
        }
    }

    fn packet_set(&mut self, buf: &[u8; PACKET_BYTES]) {
        match PacketData::from_u8(buf[1]) {
            Some(PacketData::AdvancedKey) => {
                let index = LittleEndian::read_u16(&buf[2..4]) as usize;
                if index >= ADV {
                    return;
                }
                let mut record = [0; TRIGGER_CONFIG_BYTES];
                record.copy_from_slice(&buf[4..4 + TRIGGER_CONFIG_BYTES]);
                let mut config = NormalizedTriggerConfig::from_bytes(&record).denormalize();
                // Calibration direction and bounds are owned by the device
                let current = self.analog[index].config;
                config.calibration = current.calibration;
                config.upper_bound = current.upper_bound;
                config.lower_bound = current.lower_bound;
                self.analog[index].config = config;
            }
            Some(PacketData::Keymap) => {
                let layer = buf[2] as usize;
                let start = LittleEndian::read_u16(&buf[3..5]) as usize;
                let length = buf[5] as usize;
                if layer >= LAYER_NUM
                    || start + length > TOTAL
                    || 6 + length * 2 > PACKET_BYTES
                {
                    return;
                }
                for i in 0..length {
                    let keycode = Keycode::from_raw(LittleEndian::read_u16(&buf[6 + i * 2..8 + i * 2]));
                    self.layers.set_keycode(layer, (start + i) as u16, keycode);
                }
            }
            Some(PacketData::RgbBase) => {
                self.rgb.base.mode = buf[2];
                self.rgb.base.color = RgbColor {
                    r: buf[3],
                    g: buf[4],
                    b: buf[5],
                };
                self.rgb.base.secondary = RgbColor {
                    r: buf[6],
                    g: buf[7],
                    b: buf[8],
                };
                self.rgb.base.speed = LittleEndian::read_f32(&buf[9..13]);
                self.rgb.base.direction = LittleEndian::read_u16(&buf[13..15]);
                self.rgb.base.density = buf[15];
                self.rgb.base.brightness = buf[16];
            }
            Some(PacketData::RgbLamp) => {
                let length = buf[2] as usize;
                for i in 0..length {
                    let offset = 3 + i * 9;
                    if offset + 9 > PACKET_BYTES {
                        break;
                    }
                    let lamp = LittleEndian::read_u16(&buf[offset..offset + 2]) as usize;
                    if lamp >= ADV {
                        continue;
                    }
                    self.rgb.configs[lamp].mode = buf[offset + 2];
                    self.rgb.configs[lamp].color = RgbColor {
                        r: buf[offset + 3],
                        g: buf[offset + 4],
                        b: buf[offset + 5],
                    };
                    self.rgb.configs[lamp].speed =
                        LittleEndian::read_f32(&buf[offset + 6..offset + 10]);
                }
            }
            Some(PacketData::DynamicKey) => {
                let index = buf[2] as usize;
                if index >= DK_NUM {
                    return;
                }
                let mut record = [0; DYNAMIC_KEY_BYTES];
                record.copy_from_slice(&buf[4..4 + DYNAMIC_KEY_BYTES]);
                self.dynamic_keys[index] = dynamic_key_from_bytes(&record);
            }
            Some(PacketData::ConfigIndex) => {
                self.pending.recover = Some(buf[2]);
            }
            Some(PacketData::Config) => {
                let length = buf[2] as usize;
                for i in 0..length {
                    let offset = 4 + i * 2;
                    if offset + 2 > PACKET_BYTES {
                        break;
                    }
                    self.config.set_bit(buf[offset], buf[offset + 1] != 0);
                }
            }
            Some(PacketData::Debug)
            | Some(PacketData::Report)
            | Some(PacketData::Version)
            | None => {}
        }
    }

    /// Stream at most one pending reply page per tick.
    pub(crate) fn pump_replies(&mut self, drv: &mut impl HidDriver) {
        let cursor = match self.reply_cursor {
            Some(cursor) => cursor,
            None => return,
        };
        let page = (cursor >> 8) as u8;
        let index = (cursor & 0xFF) as usize;
        let mut buf = [0u8; PACKET_BYTES];
        buf[0] = PACKET_REPLY;
        buf[1] = page;

        let next = match PacketData::from_u8(page) {
            Some(PacketData::AdvancedKey) => {
                LittleEndian::write_u16(&mut buf[2..4], index as u16);
                let record = NormalizedTriggerConfig::normalize(&self.analog[index].config);
                buf[4..4 + TRIGGER_CONFIG_BYTES].copy_from_slice(&record.to_bytes());
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                if index + 1 < ADV {
                    Some(cursor + 1)
                } else {
                    Some((PacketData::Keymap as u16) << 8)
                }
            }
            Some(PacketData::Keymap) => {
                let chunks_per_layer = (TOTAL + KEYMAP_CHUNK - 1) / KEYMAP_CHUNK;
                let layer = index / chunks_per_layer;
                let start = (index % chunks_per_layer) * KEYMAP_CHUNK;
                let length = KEYMAP_CHUNK.min(TOTAL - start);
                buf[2] = layer as u8;
                LittleEndian::write_u16(&mut buf[3..5], start as u16);
                buf[5] = length as u8;
                for i in 0..length {
                    LittleEndian::write_u16(
                        &mut buf[6 + i * 2..8 + i * 2],
                        self.layers.keycode(layer, (start + i) as u16).raw(),
                    );
                }
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                if index + 1 < chunks_per_layer * LAYER_NUM {
                    Some(cursor + 1)
                } else {
                    Some((PacketData::RgbBase as u16) << 8)
                }
            }
            Some(PacketData::RgbBase) => {
                buf[2] = self.rgb.base.mode;
                buf[3] = self.rgb.base.color.r;
                buf[4] = self.rgb.base.color.g;
                buf[5] = self.rgb.base.color.b;
                buf[6] = self.rgb.base.secondary.r;
                buf[7] = self.rgb.base.secondary.g;
                buf[8] = self.rgb.base.secondary.b;
                LittleEndian::write_f32(&mut buf[9..13], self.rgb.base.speed);
                LittleEndian::write_u16(&mut buf[13..15], self.rgb.base.direction);
                buf[15] = self.rgb.base.density;
                buf[16] = self.rgb.base.brightness;
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                Some((PacketData::RgbLamp as u16) << 8)
            }
            Some(PacketData::RgbLamp) => {
                // Batched like the inbound form: up to six lamps per packet
                let batch = 6.min(ADV - index);
                buf[2] = batch as u8;
                for i in 0..batch {
                    let offset = 3 + i * 9;
                    let lamp = &self.rgb.configs[index + i];
                    LittleEndian::write_u16(&mut buf[offset..offset + 2], (index + i) as u16);
                    buf[offset + 2] = lamp.mode;
                    buf[offset + 3] = lamp.color.r;
                    buf[offset + 4] = lamp.color.g;
                    buf[offset + 5] = lamp.color.b;
                    LittleEndian::write_f32(&mut buf[offset + 6..offset + 10], lamp.speed);
                }
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                if index + batch < ADV {
                    Some(cursor + batch as u16)
                } else {
                    Some((PacketData::DynamicKey as u16) << 8)
                }
            }
            Some(PacketData::DynamicKey) => {
                buf[2] = index as u8;
                let record = dynamic_key_to_bytes(&self.dynamic_keys[index]);
                buf[4..4 + DYNAMIC_KEY_BYTES].copy_from_slice(&record);
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                if index + 1 < DK_NUM {
                    Some(cursor + 1)
                } else {
                    Some((PacketData::Version as u16) << 8)
                }
            }
            Some(PacketData::ConfigIndex) => {
                buf[2] = self.config_index;
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                None
            }
            Some(PacketData::Config) => {
                buf[2] = 4;
                for bit in 0..4u8 {
                    buf[4 + bit as usize * 2] = bit;
                    buf[5 + bit as usize * 2] = self.config.bit(bit) as u8;
                }
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                None
            }
            Some(PacketData::Debug) => {
                let batch = DEBUG_CHUNK.min(ADV - index);
                buf[2] = batch as u8;
                for i in 0..batch {
                    let offset = 3 + i * 12;
                    let id = index + i;
                    LittleEndian::write_u16(&mut buf[offset..offset + 2], id as u16);
                    buf[offset + 2] = self.keys[id].state as u8;
                    buf[offset + 3] = self.keys[id].report_state as u8;
                    LittleEndian::write_f32(&mut buf[offset + 4..offset + 8], self.analog[id].raw);
                    LittleEndian::write_f32(
                        &mut buf[offset + 8..offset + 12],
                        self.analog[id].value,
                    );
                }
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                if index + batch < ADV {
                    Some(cursor + batch as u16)
                } else {
                    None
                }
            }
            Some(PacketData::Version) => {
                buf[2] = VERSION.0;
                buf[3] = VERSION.1;
                buf[4] = VERSION.2;
                if drv.send_raw(&buf).is_err() {
                    return;
                }
                None
            }
            Some(PacketData::Report) | None => None,
        };
        self.reply_cursor = next;
    }
}
