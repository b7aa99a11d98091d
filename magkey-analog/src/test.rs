// Copyright 2024-2025 Magkey Contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg(test)]

// ----- Crates -----

use super::*;
use crate::filter::*;
use flexi_logger::Logger;

// ----- Enumerations -----

enum LogError {
    CouldNotStartLogger,
}

// ----- Functions -----

/// Lite logging setup
fn setup_logging_lite() -> Result<(), LogError> {
    match Logger::with_env_or_str("")
        .format(flexi_logger::colored_default_format)
        .format_for_files(flexi_logger::colored_detailed_format)
        .duplicate_to_stderr(flexi_logger::Duplicate::All)
        .start()
    {
        Err(_) => Err(LogError::CouldNotStartLogger),
        Ok(_) => Ok(()),
    }
}

fn rapid_key() -> AnalogKey {
    AnalogKey::new(TriggerConfig {
        mode: TriggerMode::Rapid,
        calibration: CalibrationMode::Disabled,
        trigger_distance: 0.08,
        release_distance: 0.08,
        upper_deadzone: 0.10,
        lower_deadzone: 0.20,
        ..TriggerConfig::default()
    })
}

// ----- Tests -----

#[test]
fn ring_average() {
    let mut ring = RingBuffer::<8>::new();
    for _ in 0..8 {
        ring.push(100);
    }
    assert_eq!(ring.avg(), 100.0);

    // Half the window replaced
    for _ in 0..4 {
        ring.push(200);
    }
    assert_eq!(ring.avg(), 150.0);
}

#[test]
fn hysteresis_band_edges() {
    setup_logging_lite().ok();

    let mut filter = HysteresisFilter::default();
    filter.reset(0.5);

    // Inside the +/- band: state must not move
    assert_eq!(filter.step(0.5 + HYSTERESIS_BAND / 2.0), 0.5);
    assert_eq!(filter.step(0.5 - HYSTERESIS_BAND / 2.0), 0.5);

    // Outside the band: state pins to the nearer band edge
    let out = filter.step(0.6);
    assert!((out - (0.6 - HYSTERESIS_BAND)).abs() < 1e-6);
    let out = filter.step(0.4);
    assert!((out - (0.4 + HYSTERESIS_BAND)).abs() < 1e-6);
}

#[test]
fn lowpass_converges() {
    let mut filter = LowPassFilter::default();
    filter.reset(0.0);
    let mut out = 0.0;
    for _ in 0..64 {
        out = filter.step(1.0);
    }
    assert!(out > 0.99 && out <= 1.0);
}

#[test]
fn kalman_warmup_r_floor() {
    let mut warmup = KalmanWarmup::default();
    // Constant input has zero variance; R must floor
    for i in 0..KALMAN_WARMUP_SAMPLES {
        let r = warmup.observe(2048.0);
        if i < KALMAN_WARMUP_SAMPLES - 1 {
            assert!(r.is_none());
        } else {
            assert_eq!(r, Some(KALMAN_R_FLOOR));
        }
    }
}

#[test]
fn kalman_tracks_step() {
    let mut filter = KalmanFilter::default();
    filter.configure(0.001, KALMAN_Q_POS, KALMAN_Q_VEL, KALMAN_R_FLOOR);
    filter.reset(0.0);
    let mut out = 0.0;
    for _ in 0..256 {
        out = filter.step(1.0);
    }
    assert!((out - 1.0).abs() < 0.05);
}

#[test]
fn digital_mode() {
    let mut key = AnalogKey::new(TriggerConfig {
        mode: TriggerMode::Digital,
        ..TriggerConfig::default()
    });
    assert!(key.update(1.0, false));
    assert!(!key.update(0.0, true));
}

#[test]
fn threshold_mode_hysteresis() {
    let mut key = AnalogKey::new(TriggerConfig {
        mode: TriggerMode::Threshold,
        calibration: CalibrationMode::Disabled,
        activation_value: 0.50,
        deactivation_value: 0.49,
        ..TriggerConfig::default()
    });
    let mut state = false;
    state = key.update(0.2, state);
    assert!(!state);
    state = key.update(0.6, state);
    assert!(state);
    // Inside the window the state must hold
    state = key.update(0.495, state);
    assert!(state);
    state = key.update(0.4, state);
    assert!(!state);
    state = key.update(0.495, state);
    assert!(!state);
    state = key.update(0.8, state);
    assert!(state);
}

#[test]
fn rapid_mode_sequence() {
    setup_logging_lite().ok();

    let mut key = rapid_key();
    let mut state = false;

    state = key.update(0.09, state);
    assert!(!state);
    state = key.update(0.12, state);
    assert!(state);
    assert!((key.extremum - 0.12).abs() < 1e-6);
    state = key.update(0.60, state);
    assert!(state);
    assert!((key.extremum - 0.60).abs() < 1e-6);
    state = key.update(0.50, state);
    assert!(!state);
    assert!((key.extremum - 0.50).abs() < 1e-6);
    state = key.update(0.60, state);
    assert!(state);
    assert!((key.extremum - 0.60).abs() < 1e-6);
    state = key.update(1.00, state);
    assert!(state);
    assert!((key.extremum - 1.00).abs() < 1e-6);
    state = key.update(0.82, state);
    assert!(state);
    assert!((key.extremum - 1.00).abs() < 1e-6);
    state = key.update(0.78, state);
    assert!(!state);
    assert!((key.extremum - 0.78).abs() < 1e-6);
}

#[test]
fn rapid_mode_extremum_law() {
    let mut key = rapid_key();
    let mut state = false;
    let feed = [
        0.05, 0.3, 0.5, 0.45, 0.52, 0.9, 0.99, 0.7, 0.72, 0.3, 0.11, 0.05,
    ];
    for value in feed {
        state = key.update(value, state);
        if value <= key.config.upper_deadzone || value >= ANALOG_MAX - key.config.lower_deadzone {
            continue;
        }
        if state {
            assert!(key.extremum >= key.value - 1e-6);
        } else {
            assert!(key.extremum <= key.value + 1e-6);
        }
    }
}

#[test]
fn speed_mode() {
    let mut key = AnalogKey::new(TriggerConfig {
        mode: TriggerMode::Speed,
        calibration: CalibrationMode::Disabled,
        trigger_speed: 0.04,
        release_speed: 0.04,
        upper_deadzone: 0.10,
        lower_deadzone: 0.20,
        ..TriggerConfig::default()
    });
    let mut state = false;

    state = key.update(0.09, state);
    assert!((key.difference - 0.09).abs() < 1e-6);
    assert!(!state); // fast but still inside the upper deadzone
    state = key.update(0.12, state);
    assert!(!state);
    state = key.update(0.20, state);
    assert!(state);
    state = key.update(0.80, state);
    assert!(state); // forced by the lower deadzone
    state = key.update(0.78, state);
    assert!(state); // slow release does not trigger
    state = key.update(0.72, state);
    assert!(!state);
    state = key.update(0.74, state);
    assert!(!state);
    state = key.update(0.81, state);
    assert!(state);
}

#[test]
fn normalization_bounds() {
    let mut key = AnalogKey::default();
    key.config.mode = TriggerMode::Rapid;
    key.config.calibration = CalibrationMode::Disabled;
    key.set_range(4096.0, 2048.0);

    assert!((key.normalize(4096.0) - ANALOG_MIN).abs() < 1e-6);
    assert!((key.normalize(2048.0) - ANALOG_MAX).abs() < 1e-6);
    assert!((key.normalize(3072.0) - 0.5).abs() < 1e-6);
    // Out-of-range samples clamp
    assert_eq!(key.normalize(5000.0), ANALOG_MIN);
    assert_eq!(key.normalize(100.0), ANALOG_MAX);

    // Degenerate bounds report released
    key.set_range(2048.0, 2048.0);
    assert_eq!(key.normalize(2048.0), ANALOG_MIN);
    assert_eq!(key.normalize(0.0), ANALOG_MIN);
}

#[test]
fn calibration_latches_negative() {
    setup_logging_lite().ok();

    let mut key = AnalogKey::new(TriggerConfig {
        mode: TriggerMode::Rapid,
        calibration: CalibrationMode::Undefined,
        upper_deadzone: 0.0,
        lower_deadzone: 0.0,
        ..TriggerConfig::default()
    });
    key.reset_range(4096.0);
    assert_eq!(key.config.calibration, CalibrationMode::Undefined);

    // Resting near the factory bound: stays undefined, reports released
    let mut state = false;
    for _ in 0..32 {
        state = key.update_raw(4090.0, state);
        assert!(!state);
        assert_eq!(key.value, ANALOG_MIN);
    }
    assert_eq!(key.config.calibration, CalibrationMode::Undefined);

    // A full press drifts well past the estimated range: latch negative
    for _ in 0..256 {
        state = key.update_raw(2048.0, state);
    }
    assert_eq!(key.config.calibration, CalibrationMode::Negative);
    assert!(key.config.lower_bound < 4096.0 - DEFAULT_ESTIMATED_RANGE);
    assert!(state);
}

#[test]
fn calibration_extends_bounds() {
    let mut key = AnalogKey::new(TriggerConfig {
        mode: TriggerMode::Rapid,
        calibration: CalibrationMode::Negative,
        ..TriggerConfig::default()
    });
    key.set_range(4096.0, 3584.0);

    let mut state = false;
    for _ in 0..512 {
        state = key.update_raw(2048.0, state);
    }
    // The lower bound follows the deepest travel seen
    assert!(key.config.lower_bound < 2100.0);
}

#[test]
fn effective_value_deadzones() {
    let mut key = rapid_key();
    key.value = 0.10;
    assert_eq!(key.effective_value(), 0.0);
    key.value = 0.80;
    assert_eq!(key.effective_value(), 1.0);
    key.value = 0.45;
    assert!((key.effective_value() - 0.5).abs() < 1e-6);
}

#[test]
fn threshold_clamp() {
    let mut config = TriggerConfig {
        activation_value: 0.3,
        deactivation_value: 0.6,
        ..TriggerConfig::default()
    };
    config.clamp_thresholds();
    assert_eq!(config.deactivation_value, config.activation_value);
}
