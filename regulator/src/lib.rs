//! PID regulators for wheel speed and wheel angle.
//!
//! Both families share one algorithm and differ only in the anti-windup threshold and in how
//! the raw output is scaled and clamped. A regulator holds nothing but its gains: the evolving
//! state is passed in and handed back on every step, so one regulator can serve both wheels.

use log::*;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Gains { kp, ki, kd }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Speed error (rad/s) to a PWM duty in -1023..=1023.
    Speed,
    /// Angle error (rad) to a speed percentage in -100..=100.
    Angle,
}

impl Mode {
    /// The integral only accumulates while `|P|` is below this.
    pub fn windup_threshold(self) -> f64 {
        match self {
            Mode::Speed => 25.0,
            Mode::Angle => 35.0,
        }
    }

    pub fn output_scale(self) -> f64 {
        match self {
            Mode::Speed => 4.0,
            Mode::Angle => 1.0,
        }
    }

    pub fn output_limit(self) -> i32 {
        match self {
            Mode::Speed => 1023,
            Mode::Angle => 100,
        }
    }

    /// How far ahead of "now" a reset places `last_time`.
    pub fn reset_lead_ms(self) -> u32 {
        match self {
            Mode::Speed => 3,
            Mode::Angle => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorState {
    pub integral: f64,
    pub previous_error: f64,
    /// Millisecond timestamp of the previous step, wraps.
    pub last_time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regulator {
    mode: Mode,
    gains: Gains,
}

/// Signed seconds from `last` to `now` on a wrapping millisecond clock.
pub fn elapsed_secs(now: u32, last: u32) -> f64 {
    now.wrapping_sub(last) as i32 as f64 / 1000.0
}

impl Regulator {
    pub fn new(mode: Mode, gains: Gains) -> Self {
        Regulator { mode, gains }
    }

    pub fn speed(gains: Gains) -> Self {
        Self::new(Mode::Speed, gains)
    }

    pub fn angle(gains: Gains) -> Self {
        Self::new(Mode::Angle, gains)
    }

    pub fn reset(&self, now: u32) -> RegulatorState {
        RegulatorState {
            integral: 0.0,
            previous_error: 0.0,
            last_time: now.wrapping_add(self.mode.reset_lead_ms()),
        }
    }

    /// Run one iteration, returning the clamped command and the state for the next call.
    ///
    /// When `now` is not after `state.last_time`, as on the first step after `reset`, neither the
    /// integral nor the derivative term moves.
    pub fn step(&self, error: f64, state: &RegulatorState, now: u32) -> (i32, RegulatorState) {
        let Gains { kp, ki, kd } = self.gains;
        let p = kp * error;
        let dt = elapsed_secs(now, state.last_time);

        let mut integral = state.integral;
        if dt > 0.0 && p.abs() < self.mode.windup_threshold() {
            integral += error * dt;
        }
        let i = ki * integral;
        let d = if dt > 0.0 {
            kd * (error - state.previous_error) / dt
        } else {
            0.0
        };

        let output = p + i + d;
        let limit = self.mode.output_limit() as f64;
        let command = (output * self.mode.output_scale()).round();
        let command = if command.is_nan() {
            0
        } else {
            command.clamp(-limit, limit) as i32
        };
        trace!(
            "{:?}: err={error:.4} dt={dt:.3} p={p:.3} i={i:.3} d={d:.3} cmd={command}",
            self.mode
        );

        (
            command,
            RegulatorState {
                integral,
                previous_error: error,
                last_time: now,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SPEED: Gains = Gains::new(41.5, 0.0, 0.5);
    const ANGLE: Gains = Gains::new(45.0, 100.0, 2.5);

    #[test]
    fn reset_leads_now() {
        let state = Regulator::speed(SPEED).reset(1000);
        assert_eq!(state.last_time, 1003);
        assert_eq!(state.integral, 0.0);
        assert_eq!(state.previous_error, 0.0);
        assert_eq!(Regulator::angle(ANGLE).reset(1000).last_time, 1002);
    }

    #[test]
    fn first_step_before_lead_skips_time_terms() {
        let regulator = Regulator::angle(Gains::new(10.0, 1.0, 1.0));
        let state = regulator.reset(1000);
        let (command, next) = regulator.step(0.5, &state, 1000);
        // only P: no time has passed
        assert_eq!(command, 5);
        assert_eq!(next.integral, 0.0);
        assert_eq!(next.previous_error, 0.5);
        assert_eq!(next.last_time, 1000);
    }

    #[test]
    fn speed_output_is_scaled_and_clamped() {
        let regulator = Regulator::speed(Gains::new(1.0, 0.0, 0.0));
        let state = regulator.reset(0);
        let (command, _) = regulator.step(10.0, &state, 100);
        assert_eq!(command, 40);
        let (command, _) = regulator.step(-1000.0, &state, 100);
        assert_eq!(command, -1023);
    }

    #[test]
    fn angle_output_is_clamped_to_percent() {
        let regulator = Regulator::angle(ANGLE);
        let state = regulator.reset(0);
        let (command, _) = regulator.step(5.0, &state, 50);
        assert_eq!(command, 100);
        let (command, _) = regulator.step(-5.0, &state, 50);
        assert_eq!(command, -100);
    }

    #[test]
    fn integral_accumulates_for_small_errors() {
        let regulator = Regulator::angle(Gains::new(10.0, 2.0, 0.0));
        let state = RegulatorState {
            integral: 0.0,
            previous_error: 0.0,
            last_time: 0,
        };
        let (command, next) = regulator.step(1.0, &state, 500);
        assert!((next.integral - 0.5).abs() < 1e-12);
        // P = 10, I = 2 * 0.5
        assert_eq!(command, 11);
    }

    #[test]
    fn integral_frozen_on_large_error() {
        let regulator = Regulator::speed(SPEED);
        let state = RegulatorState {
            integral: 0.25,
            previous_error: 3.0,
            last_time: 0,
        };
        let (_, next) = regulator.step(3.0, &state, 50);
        assert_eq!(next.integral, 0.25);
    }

    #[test]
    fn derivative_uses_elapsed_time() {
        let regulator = Regulator::angle(Gains::new(0.0, 0.0, 1.0));
        let state = RegulatorState {
            integral: 0.0,
            previous_error: 1.0,
            last_time: 0,
        };
        let (command, _) = regulator.step(2.0, &state, 100);
        assert_eq!(command, 10);
    }

    #[test]
    fn elapsed_survives_clock_wrap() {
        assert!((elapsed_secs(40, u32::MAX - 10) - 0.051).abs() < 1e-12);
        assert!((elapsed_secs(1000, 1003) + 0.003).abs() < 1e-12);

        let regulator = Regulator::angle(Gains::new(0.0, 0.0, 1.0));
        let state = RegulatorState {
            integral: 0.0,
            previous_error: 0.0,
            last_time: u32::MAX - 49,
        };
        let (command, next) = regulator.step(1.0, &state, 50);
        assert_eq!(command, 10);
        assert_eq!(next.last_time, 50);
    }

    proptest! {
        #[test]
        fn windup_freezes_integral(
            error in prop_oneof![-1000.0f64..-1.0, 1.0f64..1000.0],
            integral in -10.0f64..10.0,
            dt in 1u32..500,
            speed in any::<bool>(),
        ) {
            let (mode, gains) = if speed {
                (Mode::Speed, Gains::new(41.5, 1.0, 0.5))
            } else {
                (Mode::Angle, Gains::new(45.0, 100.0, 2.5))
            };
            let regulator = Regulator::new(mode, gains);
            let state = RegulatorState { integral, previous_error: error, last_time: 0 };
            let (command, next) = regulator.step(error, &state, dt);
            // |kp * error| >= 41.5 or 45, both above either threshold
            prop_assert_eq!(next.integral, integral);
            prop_assert!(command.abs() <= mode.output_limit());
        }

        #[test]
        fn small_proportional_term_grows_integral(
            error in 0.01f64..0.5,
            dt in 1u32..500,
        ) {
            let regulator = Regulator::angle(Gains::new(45.0, 100.0, 2.5));
            let state = RegulatorState { integral: 0.0, previous_error: error, last_time: 0 };
            let (_, next) = regulator.step(error, &state, dt);
            prop_assert!(next.integral > 0.0);
            prop_assert!((next.integral - error * dt as f64 / 1000.0).abs() < 1e-9);
        }
    }
}
