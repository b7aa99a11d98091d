// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Layer stack and the per-key resolved keycode cache.
//!
//! A 16-bit bitmap holds the active layers; the current layer is the highest
//! set bit. Resolution walks down from the current layer through transparent
//! cells. Keys held across a layer change are locked to the keycode they
//! were pressed under until they release.

// ----- Crates -----

use magkey_hid::{Keycode, LayerOp};

use crate::event::{EventKind, KeyboardEvent};

// ----- Structs -----

/// Keymap, active-layer bitmap and the derived keycode cache.
pub struct Layers<const LAYER_NUM: usize, const TOTAL: usize> {
    keymap: [[Keycode; TOTAL]; LAYER_NUM],
    cache: [Keycode; TOTAL],
    lock: [bool; TOTAL],
    state: u16,
    current: u8,
}

impl<const LAYER_NUM: usize, const TOTAL: usize> Layers<LAYER_NUM, TOTAL> {
    pub fn new(keymap: [[Keycode; TOTAL]; LAYER_NUM]) -> Self {
        let mut layers = Self {
            keymap,
            cache: [Keycode::NO_EVENT; TOTAL],
            lock: [false; TOTAL],
            state: 0,
            current: 0,
        };
        layers.refresh();
        layers
    }

    /// Index of the highest active layer (0 if none).
    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn active(&self) -> u16 {
        self.state
    }

    pub fn set(&mut self, layer: u8) {
        self.state |= 1 << (layer & 0x0F);
        self.update_current();
    }

    pub fn reset(&mut self, layer: u8) {
        self.state &= !(1 << (layer & 0x0F));
        self.update_current();
    }

    pub fn toggle(&mut self, layer: u8) {
        self.state ^= 1 << (layer & 0x0F);
        self.update_current();
    }

    fn update_current(&mut self) {
        self.current = if self.state == 0 {
            0
        } else {
            15 - self.state.leading_zeros() as u8
        };
    }

    /// Walk from `layer` down through transparent cells; `NO_EVENT` if every
    /// layer is transparent for this key.
    pub fn lookup(&self, id: u16, layer: u8) -> Keycode {
        let mut layer = (layer as usize).min(LAYER_NUM - 1) as i16;
        while layer >= 0 {
            let keycode = self.keymap[layer as usize][id as usize];
            if keycode.is_transparent() {
                layer -= 1;
            } else {
                return keycode;
            }
        }
        Keycode::NO_EVENT
    }

    /// Resolved keycode under the current layer stack (locked cells keep the
    /// keycode they were pressed under).
    pub fn cached(&self, id: u16) -> Keycode {
        if (id as usize) < TOTAL {
            self.cache[id as usize]
        } else {
            Keycode::NO_EVENT
        }
    }

    /// Recompute every unlocked cache cell.
    pub fn refresh(&mut self) {
        for id in 0..TOTAL {
            if !self.lock[id] {
                self.cache[id] = self.lookup(id as u16, self.current);
            }
        }
    }

    fn refresh_cell(&mut self, id: u16) {
        if (id as usize) < TOTAL {
            self.cache[id as usize] = self.lookup(id, self.current);
        }
    }

    /// Pin a held key's resolved keycode across layer changes.
    pub fn lock(&mut self, id: u16) {
        if (id as usize) < TOTAL {
            self.lock[id as usize] = true;
        }
    }

    /// Release the pin and re-resolve the cell.
    pub fn unlock(&mut self, id: u16) {
        if (id as usize) < TOTAL {
            self.lock[id as usize] = false;
            self.refresh_cell(id);
        }
    }

    pub fn is_locked(&self, id: u16) -> bool {
        (id as usize) < TOTAL && self.lock[id as usize]
    }

    /// Write one keymap cell; the cache follows unless the key is locked.
    pub fn set_keycode(&mut self, layer: usize, id: u16, keycode: Keycode) {
        if layer < LAYER_NUM && (id as usize) < TOTAL {
            self.keymap[layer][id as usize] = keycode;
            if !self.lock[id as usize] {
                self.refresh_cell(id);
            }
        }
    }

    pub fn keycode(&self, layer: usize, id: u16) -> Keycode {
        if layer < LAYER_NUM && (id as usize) < TOTAL {
            self.keymap[layer][id as usize]
        } else {
            Keycode::NO_EVENT
        }
    }

    pub fn load_keymap(&mut self, keymap: &[[Keycode; TOTAL]; LAYER_NUM]) {
        self.keymap = *keymap;
        self.refresh();
    }

    /// Apply a layer-control keycode. Momentary toggles on both edges; the
    /// cache refreshes after any mutation.
    pub fn handle_event(&mut self, event: &KeyboardEvent) {
        let layer = event.keycode.layer_index();
        match event.kind {
            EventKind::KeyDown => {
                match event.keycode.layer_op() {
                    LayerOp::Momentary => self.toggle(layer),
                    LayerOp::TurnOn => self.set(layer),
                    LayerOp::TurnOff => self.reset(layer),
                    LayerOp::Toggle => self.toggle(layer),
                }
                self.refresh();
            }
            EventKind::KeyUp => {
                if let LayerOp::Momentary = event.keycode.layer_op() {
                    self.toggle(layer);
                }
                self.refresh();
            }
            _ => {}
        }
    }
}
