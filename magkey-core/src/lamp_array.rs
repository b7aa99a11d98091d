// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! HID Lighting & Illumination control plane.
//!
//! The core owns the lamp-id cursor walked by attribute requests and the
//! autonomous-vs-host flag; lamp colors land in [`crate::rgb::RgbState`]
//! when the host drives. Serialization is explicit little-endian, report ids
//! excluded (the transport owns them).

// ----- Crates -----

use byteorder::{ByteOrder, LittleEndian};

use crate::rgb::{RgbColor, RgbState};

// ----- Constants -----

/// LampArrayKind: keyboard
pub const LAMP_ARRAY_KIND_KEYBOARD: u32 = 1;

/// Minimum update interval, microseconds.
pub const LAMP_ARRAY_UPDATE_INTERVAL: u32 = 10_000;

/// Bounding box, micrometers.
pub const LAMP_ARRAY_WIDTH: u32 = 350_000;
pub const LAMP_ARRAY_HEIGHT: u32 = 130_000;
pub const LAMP_ARRAY_DEPTH: u32 = 40_000;

pub const LAMP_PURPOSE_ILLUMINATION: u32 = 0x10;

/// Lamps per multi-update packet.
pub const LAMP_MULTI_UPDATE_MAX: usize = 8;

const LAMP_UPDATE_COMPLETE: u8 = 0x01;

// ----- Structs -----

/// Cursor and mode state for the lamp-array interface.
#[derive(Copy, Clone, Debug, Default, defmt::Format)]
pub struct LampArray {
    cursor: u16,
    /// Device animates on its own when set; host writes are ignored.
    pub autonomous: bool,
}

impl LampArray {
    pub const fn new() -> Self {
        Self {
            cursor: 0,
            autonomous: true,
        }
    }

    /// LampArrayAttributes feature report body (22 bytes).
    pub fn attributes_report(&self, lamp_count: u16) -> [u8; 22] {
        let mut buf = [0; 22];
        LittleEndian::write_u16(&mut buf[0..2], lamp_count);
        LittleEndian::write_u32(&mut buf[2..6], LAMP_ARRAY_WIDTH);
        LittleEndian::write_u32(&mut buf[6..10], LAMP_ARRAY_HEIGHT);
        LittleEndian::write_u32(&mut buf[10..14], LAMP_ARRAY_DEPTH);
        LittleEndian::write_u32(&mut buf[14..18], LAMP_ARRAY_KIND_KEYBOARD);
        LittleEndian::write_u32(&mut buf[18..22], LAMP_ARRAY_UPDATE_INTERVAL);
        buf
    }

    /// LampAttributesRequest: position the cursor.
    pub fn attributes_request(&mut self, body: &[u8], lamp_count: u16) {
        if body.len() < 2 {
            return;
        }
        let lamp_id = LittleEndian::read_u16(&body[0..2]);
        self.cursor = if lamp_id < lamp_count { lamp_id } else { 0 };
    }

    /// LampAttributesResponse for the cursor lamp; the cursor auto-advances
    /// (wrapping) so the host can stream all lamps.
    pub fn attributes_response(&mut self, lamp_count: u16) -> [u8; 26] {
        let lamp_id = self.cursor;
        self.cursor = if self.cursor + 1 < lamp_count {
            self.cursor + 1
        } else {
            0
        };

        let mut buf = [0; 26];
        LittleEndian::write_u16(&mut buf[0..2], lamp_id);
        // Position: evenly spread lamps over the bounding box
        let step = if lamp_count > 0 {
            LAMP_ARRAY_WIDTH / lamp_count as u32
        } else {
            0
        };
        LittleEndian::write_u32(&mut buf[2..6], step * lamp_id as u32);
        LittleEndian::write_u32(&mut buf[6..10], LAMP_ARRAY_HEIGHT / 2);
        LittleEndian::write_u32(&mut buf[10..14], 0);
        LittleEndian::write_u32(&mut buf[14..18], LAMP_ARRAY_UPDATE_INTERVAL);
        LittleEndian::write_u32(&mut buf[18..22], LAMP_PURPOSE_ILLUMINATION);
        // red/green/blue/intensity level counts
        buf[22] = 255;
        buf[23] = 255;
        buf[24] = 255;
        buf[25] = 1;
        buf
    }

    /// LampMultiUpdate: up to [`LAMP_MULTI_UPDATE_MAX`] `(id, rgbi)` pairs.
    pub fn multi_update<const N: usize>(&mut self, body: &[u8], rgb: &mut RgbState<N>) {
        if self.autonomous || body.len() < 2 {
            return;
        }
        let count = (body[0] as usize).min(LAMP_MULTI_UPDATE_MAX);
        let _flags = body[1];
        // id table first, then the color quads
        let ids = &body[2..];
        if ids.len() < count * 2 + count * 4 {
            return;
        }
        let colors = &ids[count * 2..];
        for i in 0..count {
            let lamp = LittleEndian::read_u16(&ids[i * 2..i * 2 + 2]) as usize;
            rgb.set_lamp(
                lamp,
                RgbColor {
                    r: colors[i * 4],
                    g: colors[i * 4 + 1],
                    b: colors[i * 4 + 2],
                },
            );
        }
    }

    /// LampRangeUpdate: one color over an inclusive id range.
    pub fn range_update<const N: usize>(&mut self, body: &[u8], rgb: &mut RgbState<N>) {
        if self.autonomous || body.len() < 9 {
            return;
        }
        let _flags = body[0];
        let start = LittleEndian::read_u16(&body[1..3]) as usize;
        let end = LittleEndian::read_u16(&body[3..5]) as usize;
        let color = RgbColor {
            r: body[5],
            g: body[6],
            b: body[7],
        };
        for lamp in start..=end.min(N.saturating_sub(1)) {
            rgb.set_lamp(lamp, color);
        }
    }

    /// LampArrayControl: bit 0 selects autonomous mode.
    pub fn control(&mut self, body: &[u8]) {
        if let Some(flags) = body.first() {
            self.autonomous = (flags & LAMP_UPDATE_COMPLETE) != 0;
        }
    }
}
