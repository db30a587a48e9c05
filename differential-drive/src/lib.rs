use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::*;

use motor::PwmChannel;
use regulator::Gains;
use regulator::Regulator;
use speed_control::Clock;
use speed_control::SpeedControl;
use speed_control::SpeedControlError;

pub mod profile;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
#[cfg(test)]
mod tests;

use profile::*;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Wheel radius, distances passed to the primitives use the same unit.
    pub wheel_radius: f64,
    /// Half the distance between the two wheel contact points.
    pub half_wheel_separation: f64,
    pub angle: Gains,
    /// Gain of the left/right synchronization correction.
    pub k_straight: f64,
    /// Speed (percent) of the distance and turn convenience primitives.
    pub standard_speed: i32,
    /// Speed (percent) of the timed primitives.
    pub slow_speed: i32,
}

pub const DEFAULT_CONFIG: Config = Config {
    wheel_radius: 3.05,
    half_wheel_separation: 9.2,
    angle: Gains::new(45.0, 100.0, 2.5),
    k_straight: 80.0,
    standard_speed: 65,
    slow_speed: 50,
};

impl Default for Config {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

/// How a primitive ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Both wheels reached their target within tolerance.
    Converged,
    /// The deadline passed before both wheels converged.
    TimedOut,
    /// A timed primitive ran for its full duration.
    Completed,
    /// The robot was blocked on entry, nothing moved.
    Blocked,
}

/// Hard inhibit shared with a supervisor. Checked once when a primitive starts.
#[derive(Debug, Clone, Default)]
pub struct Blocker(Arc<AtomicBool>);

impl Blocker {
    pub fn block(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn unblock(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_blocked(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Direction of travel of each wheel, +1 forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sense(i32, i32);

const FORWARD: Sense = Sense(1, 1);
const BACKWARD: Sense = Sense(-1, -1);
const LEFT: Sense = Sense(-1, 1);
const RIGHT: Sense = Sense(1, -1);

#[derive(Debug, Clone, Copy)]
struct Motion {
    sense: Sense,
    target: f64,
    tolerance: f64,
    timeout_ms: u32,
    speed: i32,
}

/// Motion primitives for a two wheeled robot.
///
/// Every primitive blocks until the motion is done. Distance and turn moves run an angle-mode
/// regulator per wheel whose output, after ramping and synchronization correction, becomes the
/// speed request for `SpeedControl`. Timed moves skip the angle regulator.
pub struct Drive<P: PwmChannel, C: Clock> {
    speed: SpeedControl<P, C>,
    config: Config,
    angle: Regulator,
    blocker: Blocker,
    target_angle: f64,
}

impl<P: PwmChannel, C: Clock> Drive<P, C> {
    pub fn new(speed: SpeedControl<P, C>, config: Config) -> Self {
        info!("drive: {config:?}");
        Drive {
            speed,
            angle: Regulator::angle(config.angle),
            config,
            blocker: Blocker::default(),
            target_angle: 0.0,
        }
    }

    pub fn blocker(&self) -> Blocker {
        self.blocker.clone()
    }

    pub fn block(&self) {
        self.blocker.block();
    }

    pub fn unblock(&self) {
        self.blocker.unblock();
    }

    pub fn is_blocked(&self) -> bool {
        self.blocker.is_blocked()
    }

    /// Wheel angle (rad) the current or last motion converges on.
    pub fn get_target_angle(&self) -> f64 {
        self.target_angle
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_speed_control(&self) -> &SpeedControl<P, C> {
        &self.speed
    }

    pub fn stop(&mut self) -> Result<(), DriveError> {
        Ok(self.speed.stop()?)
    }

    pub fn move_forward_speed_distance(
        &mut self,
        speed: i32,
        distance: f64,
    ) -> Result<Outcome, DriveError> {
        let sense = if distance < 0.0 { BACKWARD } else { FORWARD };
        self.move_distance(sense, speed, distance.abs())
    }

    pub fn move_backward_speed_distance(
        &mut self,
        speed: i32,
        distance: f64,
    ) -> Result<Outcome, DriveError> {
        let sense = if distance < 0.0 { FORWARD } else { BACKWARD };
        self.move_distance(sense, speed, distance.abs())
    }

    pub fn move_forward_distance(&mut self, distance: f64) -> Result<Outcome, DriveError> {
        self.move_forward_speed_distance(self.config.standard_speed, distance)
    }

    pub fn move_backward_distance(&mut self, distance: f64) -> Result<Outcome, DriveError> {
        self.move_backward_speed_distance(self.config.standard_speed, distance)
    }

    pub fn move_forward_seconds(&mut self, seconds: f64) -> Result<Outcome, DriveError> {
        self.move_timed(FORWARD, seconds)
    }

    pub fn move_backward_seconds(&mut self, seconds: f64) -> Result<Outcome, DriveError> {
        self.move_timed(BACKWARD, seconds)
    }

    /// Spin in place counter-clockwise by `degrees`.
    pub fn turn_left_angle(&mut self, degrees: f64) -> Result<Outcome, DriveError> {
        let sense = if degrees < 0.0 { RIGHT } else { LEFT };
        self.turn(sense, degrees.abs())
    }

    /// Spin in place clockwise by `degrees`.
    pub fn turn_right_angle(&mut self, degrees: f64) -> Result<Outcome, DriveError> {
        let sense = if degrees < 0.0 { LEFT } else { RIGHT };
        self.turn(sense, degrees.abs())
    }

    pub fn turn_left(&mut self) -> Result<Outcome, DriveError> {
        self.turn_left_angle(90.0)
    }

    pub fn turn_right(&mut self) -> Result<Outcome, DriveError> {
        self.turn_right_angle(90.0)
    }

    pub fn rotate(&mut self) -> Result<Outcome, DriveError> {
        self.turn_right_angle(180.0)
    }

    fn move_distance(
        &mut self,
        sense: Sense,
        speed: i32,
        distance: f64,
    ) -> Result<Outcome, DriveError> {
        if self.is_blocked() {
            warn!("move {distance} at {speed}%: blocked");
            return Ok(Outcome::Blocked);
        }
        let motion = Motion {
            sense,
            target: distance_target(distance, self.config.wheel_radius),
            tolerance: DISTANCE_TOLERANCE,
            timeout_ms: distance_timeout_ms(speed, distance),
            speed: speed.abs(),
        };
        info!("move {sense:?} {distance} at {speed}%: {motion:?}");
        let result = self.converge(motion);
        self.finish(result, 0)
    }

    fn turn(&mut self, sense: Sense, degrees: f64) -> Result<Outcome, DriveError> {
        if self.is_blocked() {
            warn!("turn {degrees}: blocked");
            return Ok(Outcome::Blocked);
        }
        let motion = Motion {
            sense,
            target: turn_target(
                degrees,
                self.config.half_wheel_separation,
                self.config.wheel_radius,
            ),
            tolerance: TURN_TOLERANCE,
            timeout_ms: turn_timeout_ms(degrees),
            speed: self.config.standard_speed,
        };
        info!("turn {sense:?} {degrees}: {motion:?}");
        let result = self.converge(motion);
        self.finish(result, SETTLE_MS)
    }

    fn move_timed(&mut self, sense: Sense, seconds: f64) -> Result<Outcome, DriveError> {
        if self.is_blocked() {
            warn!("move {sense:?} for {seconds}s: blocked");
            return Ok(Outcome::Blocked);
        }
        info!("move {sense:?} for {seconds}s");
        let result = self.run_timed(sense, seconds);
        self.finish(result, 0)
    }

    fn start(&mut self, target: f64) -> u32 {
        self.target_angle = target;
        self.speed.reset_encoders();
        self.speed.reset_regulators();
        self.speed.get_clock().now_ms()
    }

    /// Signed wheel angles with the direction of travel counted positive.
    fn progress(&self, sense: Sense) -> (f64, f64) {
        let (left, right) = self.speed.get_angles();
        (left * sense.0 as f64, right * sense.1 as f64)
    }

    fn converge(&mut self, motion: Motion) -> Result<Outcome, DriveError> {
        let start = self.start(motion.target);
        let mut left_state = self.angle.reset(start);
        let mut right_state = self.angle.reset(start);
        // no derivative kick on the first step
        left_state.previous_error = motion.target;
        right_state.previous_error = motion.target;

        loop {
            let elapsed = self.speed.get_clock().elapsed_ms(start);
            let progress = self.progress(motion.sense);
            let errors = (motion.target - progress.0, motion.target - progress.1);

            if errors.0.abs() <= motion.tolerance && errors.1.abs() <= motion.tolerance {
                debug!("converged after {elapsed}ms: errors={errors:?}");
                return Ok(Outcome::Converged);
            }
            if elapsed >= motion.timeout_ms {
                warn!(
                    "timed out after {elapsed}ms: errors={errors:?} target={}",
                    motion.target
                );
                return Ok(Outcome::TimedOut);
            }

            let now = self.speed.get_clock().now_ms();
            let (left, next) = self.angle.step(errors.0, &left_state, now);
            left_state = next;
            let (right, next) = self.angle.step(errors.1, &right_state, now);
            right_state = next;

            let power = smooth_start(elapsed);
            let left = (left.clamp(-COMMAND_LIMIT, COMMAND_LIMIT) as f64 * power) as i32;
            let right = (right.clamp(-COMMAND_LIMIT, COMMAND_LIMIT) as f64 * power) as i32;

            let (left_bias, right_bias) =
                straight_correction(errors, progress, self.config.k_straight);
            let left = scale(left.saturating_add(left_bias), motion.sense.0, motion.speed);
            let right = scale(right.saturating_add(right_bias), motion.sense.1, motion.speed);

            trace!("{elapsed}ms: progress={progress:?} errors={errors:?} run={left}/{right}");
            self.speed.run(left, right)?;
        }
    }

    fn run_timed(&mut self, sense: Sense, seconds: f64) -> Result<Outcome, DriveError> {
        let start = self.start(0.0);
        let period = (seconds.max(0.0) * 1000.0) as u32;
        loop {
            let elapsed = self.speed.get_clock().elapsed_ms(start);
            if elapsed >= period {
                debug!("ran for {elapsed}ms");
                return Ok(Outcome::Completed);
            }
            let progress = self.progress(sense);
            let power = smooth_start(elapsed);
            let base = (self.config.slow_speed as f64 * power) as i32;
            let (left_bias, right_bias) = progress_correction(progress, self.config.k_straight);
            let left = base.saturating_add(left_bias).saturating_mul(sense.0);
            let right = base.saturating_add(right_bias).saturating_mul(sense.1);

            trace!("{elapsed}ms: progress={progress:?} run={left}/{right}");
            self.speed.run(left, right)?;
        }
    }

    /// Stop both motors whatever happened, then let the chassis settle.
    fn finish(
        &mut self,
        result: Result<Outcome, DriveError>,
        settle_ms: u32,
    ) -> Result<Outcome, DriveError> {
        let stopped = self.speed.stop();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("motion aborted: {e}");
                return Err(e);
            }
        };
        stopped?;
        if settle_ms > 0 {
            self.speed.get_clock().delay_ms(settle_ms);
        }
        let (left, right) = self.speed.get_angles();
        info!("{outcome:?}: left={left:.3} right={right:.3} target={:.3}", self.target_angle);
        Ok(outcome)
    }
}

fn scale(command: i32, sense: i32, speed: i32) -> i32 {
    (command as f64 * sense as f64 * speed as f64 / 100.0) as i32
}

#[derive(Debug)]
pub enum DriveError {
    SpeedControl(SpeedControlError),
}

impl std::fmt::Display for DriveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

impl std::error::Error for DriveError {}

impl From<SpeedControlError> for DriveError {
    fn from(e: SpeedControlError) -> Self {
        DriveError::SpeedControl(e)
    }
}
