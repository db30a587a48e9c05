//! Pure helpers shared by the motion primitives.

use std::f64::consts::PI;

/// Wheels slip a little, distance targets are stretched by this factor.
pub const SLIP_FACTOR: f64 = 1.02;
pub const DISTANCE_TOLERANCE: f64 = 0.2;
pub const TURN_TOLERANCE: f64 = 0.07;
/// Limit on the angle regulator output before ramping and correction.
pub const COMMAND_LIMIT: i32 = 75;
pub const SMOOTH_START_MS: u32 = 500;
/// Pause after a turn so the chassis stops rocking.
pub const SETTLE_MS: u32 = 500;
pub const MAX_DISTANCE_TIMEOUT_MS: u32 = 30_000;

/// Wheel angle (rad) needed to roll `distance` (same unit as `wheel_radius`).
pub fn distance_target(distance: f64, wheel_radius: f64) -> f64 {
    distance / wheel_radius * SLIP_FACTOR
}

/// Wheel angle (rad) each wheel turns, in opposite senses, to spin the robot `degrees`.
pub fn turn_target(degrees: f64, half_wheel_separation: f64, wheel_radius: f64) -> f64 {
    degrees * half_wheel_separation * PI / (wheel_radius * 180.0)
}

/// Deadline for a distance move. Zero speed or distance gives no time at all.
pub fn distance_timeout_ms(speed_percent: i32, distance: f64) -> u32 {
    let k = speed_percent.unsigned_abs() as f64 / 100.0;
    let distance = distance.abs();
    if k == 0.0 || distance == 0.0 {
        return 0;
    }
    (200.0 * distance / k + 3000.0).clamp(0.0, MAX_DISTANCE_TIMEOUT_MS as f64) as u32
}

pub fn turn_timeout_ms(degrees: f64) -> u32 {
    (80.0 * degrees.abs() + 5000.0) as u32
}

/// Ramp factor applied during the first `SMOOTH_START_MS` of a motion.
pub fn smooth_start(elapsed_ms: u32) -> f64 {
    if elapsed_ms < SMOOTH_START_MS {
        (0.5 + elapsed_ms as f64 / 1000.0).clamp(0.5, 1.0)
    } else {
        1.0
    }
}

/// Bias `(left, right)` for the lagging wheel. The wheel with the smaller remaining error is
/// ahead; the other one gets the progress difference times `k` added to its command.
pub fn straight_correction(
    errors: (f64, f64),
    progress: (f64, f64),
    k: f64,
) -> (i32, i32) {
    let (left_error, right_error) = (errors.0.abs(), errors.1.abs());
    let (left, right) = progress;
    if left_error < right_error {
        (0, ((left - right) * k) as i32)
    } else if left_error > right_error {
        (((right - left) * k) as i32, 0)
    } else {
        (0, 0)
    }
}

/// Same bias for open loop motions, decided on progress alone.
pub fn progress_correction(progress: (f64, f64), k: f64) -> (i32, i32) {
    let (left, right) = progress;
    if left > right {
        (0, ((left - right) * k) as i32)
    } else if left < right {
        (((right - left) * k) as i32, 0)
    } else {
        (0, 0)
    }
}
