// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-channel smoothing filters.
//!
//! One filter type is active per build ([`ChannelFilter`], selected by cargo
//! feature); all three are always compiled so they stay testable on the
//! host. Filters hold only their own state and are stepped once per sample.

// ----- Crates -----

use crate::FilterValue;

// ----- Constants -----

/// Dead band for the hysteresis filter, normalized units.
pub const HYSTERESIS_BAND: FilterValue = 0.01;

/// IIR pole for the low-pass filter; higher means more smoothing.
pub const LOWPASS_ALPHA: FilterValue = 0.5;

/// Samples accumulated per channel before the Kalman filter is configured.
pub const KALMAN_WARMUP_SAMPLES: u32 = 128;

/// Process noise (position) for the Kalman filter.
pub const KALMAN_Q_POS: FilterValue = 0.01;

/// Process noise (velocity) for the Kalman filter.
pub const KALMAN_Q_VEL: FilterValue = 0.1;

/// Floor for the estimated observation noise.
pub const KALMAN_R_FLOOR: FilterValue = 0.5;

// ----- Traits -----

/// A smoothing filter stage. Stateless with respect to time other than its
/// own internal state.
pub trait Filter: Default {
    /// Re-seed the filter at a known value (e.g. the current resting sample).
    fn reset(&mut self, initial: FilterValue);

    /// Feed one sample, returning the smoothed output.
    fn step(&mut self, input: FilterValue) -> FilterValue;
}

// ----- Filters -----

/// Output follows the input only by the amount it leaves the +/- band, which
/// pins the state to the nearer band edge on any real motion.
#[derive(Copy, Clone, Debug, Default, defmt::Format)]
pub struct HysteresisFilter {
    state: FilterValue,
}

impl Filter for HysteresisFilter {
    fn reset(&mut self, initial: FilterValue) {
        self.state = initial;
    }

    fn step(&mut self, input: FilterValue) -> FilterValue {
        if input - HYSTERESIS_BAND > self.state {
            self.state = input - HYSTERESIS_BAND;
        }
        if input + HYSTERESIS_BAND < self.state {
            self.state = input + HYSTERESIS_BAND;
        }
        self.state
    }
}

/// Single-pole IIR: `state = alpha * state + (1 - alpha) * input`
#[derive(Copy, Clone, Debug, Default, defmt::Format)]
pub struct LowPassFilter {
    state: FilterValue,
}

impl Filter for LowPassFilter {
    fn reset(&mut self, initial: FilterValue) {
        self.state = initial;
    }

    fn step(&mut self, input: FilterValue) -> FilterValue {
        self.state = self.state * LOWPASS_ALPHA + input * (1.0 - LOWPASS_ALPHA);
        self.state
    }
}

/// Two-state (position, velocity) Kalman filter with a 2x2 covariance.
///
/// Call [`KalmanFilter::configure`] once warmup has estimated the
/// observation noise; until then the filter runs with identity-ish defaults.
#[derive(Copy, Clone, Debug, defmt::Format)]
pub struct KalmanFilter {
    pos: FilterValue,
    vel: FilterValue,

    p00: FilterValue,
    p01: FilterValue,
    p10: FilterValue,
    p11: FilterValue,

    dt: FilterValue,
    q_pos: FilterValue,
    q_vel: FilterValue,
    r: FilterValue,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self {
            pos: 0.0,
            vel: 0.0,
            p00: 1.0,
            p01: 0.0,
            p10: 0.0,
            p11: 1.0,
            dt: 0.001,
            q_pos: KALMAN_Q_POS,
            q_vel: KALMAN_Q_VEL,
            r: KALMAN_R_FLOOR,
        }
    }
}

impl KalmanFilter {
    pub fn configure(
        &mut self,
        dt: FilterValue,
        q_pos: FilterValue,
        q_vel: FilterValue,
        r: FilterValue,
    ) {
        *self = Self::default();
        self.dt = dt;
        self.q_pos = q_pos;
        self.q_vel = q_vel;
        self.r = r;
    }
}

impl Filter for KalmanFilter {
    fn reset(&mut self, initial: FilterValue) {
        self.pos = initial;
        self.vel = 0.0;
        self.p00 = 1.0;
        self.p01 = 0.0;
        self.p10 = 0.0;
        self.p11 = 1.0;
    }

    fn step(&mut self, input: FilterValue) -> FilterValue {
        // x_pred = A * x_prev
        let pos_pred = self.pos + self.vel * self.dt;
        let vel_pred = self.vel;

        // P_pred = A * P_prev * A^T + Q
        let p00_temp = self.p00 + self.p10 * self.dt;
        let p01_temp = self.p01 + self.p11 * self.dt;

        let p00_pred = p00_temp + p01_temp * self.dt + self.q_pos;
        let p01_pred = p01_temp;
        let p10_pred = self.p10 + self.p11 * self.dt;
        let p11_pred = self.p11 + self.q_vel;

        // S = H * P_pred * H^T + R
        let s = p00_pred + self.r;

        // K = P_pred * H^T * inv(S)
        let k_pos = p00_pred / s;
        let k_vel = p10_pred / s;

        // x = x_pred + K * (z - H * x_pred)
        let y = input - pos_pred;
        self.pos = pos_pred + k_pos * y;
        self.vel = vel_pred + k_vel * y;

        // P = (I - K * H) * P_pred
        self.p00 = (1.0 - k_pos) * p00_pred;
        self.p01 = (1.0 - k_pos) * p01_pred;
        self.p10 = p10_pred - k_vel * p00_pred;
        self.p11 = p11_pred - k_vel * p01_pred;

        self.pos
    }
}

/// Per-channel warmup accumulator for the Kalman filter. Feed one sample per
/// millisecond; after [`KALMAN_WARMUP_SAMPLES`] readings it yields the
/// estimated observation noise R (sample variance, floored).
#[derive(Copy, Clone, Debug, Default, defmt::Format)]
pub struct KalmanWarmup {
    sum: FilterValue,
    sum_sq: FilterValue,
    count: u32,
}

impl KalmanWarmup {
    pub fn observe(&mut self, sample: FilterValue) -> Option<FilterValue> {
        self.sum += sample;
        self.sum_sq += sample * sample;
        self.count += 1;
        if self.count < KALMAN_WARMUP_SAMPLES {
            return None;
        }

        let n = self.count as FilterValue;
        let mean = self.sum / n;
        let variance = self.sum_sq / n - mean * mean;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.count = 0;
        Some(if variance > KALMAN_R_FLOOR {
            variance
        } else {
            KALMAN_R_FLOOR
        })
    }
}

// ----- Build-time filter selection -----

#[cfg(feature = "filter-kalman")]
pub type ChannelFilter = KalmanFilter;

#[cfg(all(feature = "filter-hysteresis", not(feature = "filter-kalman")))]
pub type ChannelFilter = HysteresisFilter;

#[cfg(not(any(feature = "filter-kalman", feature = "filter-hysteresis")))]
pub type ChannelFilter = LowPassFilter;
