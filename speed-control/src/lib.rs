use std::sync::Arc;
use std::time::Duration;

use log::*;

use encoder::Encoder;
use motor::Motor;
use motor::PwmChannel;
use regulator::Gains;
use regulator::Regulator;
use regulator::RegulatorState;

#[cfg(target_os = "espidf")]
mod esp;
#[cfg(target_os = "espidf")]
pub use esp::EspClock;

/// Monotonic millisecond time base shared by the control loops. `now_ms` wraps, compare
/// timestamps with `wrapping_sub`.
pub trait Clock {
    fn now_ms(&self) -> u32;
    fn delay_ms(&self, ms: u32);

    fn elapsed_ms(&self, since: u32) -> u32 {
        self.now_ms().wrapping_sub(since)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Time between the two encoder samples of a speed measurement.
    pub interval: Duration,
    /// Wheel angular speed (rad/s) that 100 % maps to.
    pub max_speed: f64,
    pub left: Gains,
    pub right: Gains,
}

pub const DEFAULT_CONFIG: Config = Config {
    interval: Duration::from_millis(50),
    max_speed: 15.0,
    left: Gains::new(41.5, 0.0, 0.5),
    right: Gains::new(28.0, 0.0, 0.1),
};

impl Default for Config {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

/// Speed sampling interval used by `speed_left`/`speed_right`.
pub const SINGLE_WHEEL_INTERVAL_MS: u32 = 20;

/// Closed loop wheel speed control for both wheels of the robot.
///
/// `run` takes a speed per wheel as a percentage of `Config::max_speed`, measures the actual
/// speeds over `Config::interval` and corrects each motor with its own speed-mode regulator.
pub struct SpeedControl<P: PwmChannel, C: Clock> {
    left: Motor<P>,
    right: Motor<P>,
    left_encoder: Arc<Encoder>,
    right_encoder: Arc<Encoder>,
    clock: C,
    config: Config,
    left_regulator: Regulator,
    right_regulator: Regulator,
    left_state: RegulatorState,
    right_state: RegulatorState,
}

impl<P: PwmChannel, C: Clock> SpeedControl<P, C> {
    pub fn new(
        left: Motor<P>,
        right: Motor<P>,
        left_encoder: Arc<Encoder>,
        right_encoder: Arc<Encoder>,
        clock: C,
        config: Config,
    ) -> Self {
        let left_regulator = Regulator::speed(config.left);
        let right_regulator = Regulator::speed(config.right);
        let now = clock.now_ms();
        SpeedControl {
            left,
            right,
            left_encoder,
            right_encoder,
            left_state: left_regulator.reset(now),
            right_state: right_regulator.reset(now),
            clock,
            config,
            left_regulator,
            right_regulator,
        }
    }

    pub fn reset_regulators(&mut self) {
        let now = self.clock.now_ms();
        self.left_state = self.left_regulator.reset(now);
        self.right_state = self.right_regulator.reset(now);
    }

    pub fn reset_encoders(&self) {
        self.left_encoder.reset();
        self.right_encoder.reset();
    }

    /// Wheel angles in radians since the last encoder reset.
    pub fn get_angles(&self) -> (f64, f64) {
        (
            self.left_encoder.get_radians(),
            self.right_encoder.get_radians(),
        )
    }

    pub fn speed_left(&self, interval_ms: u32) -> f64 {
        Self::sample(&self.clock, &self.left_encoder, interval_ms)
    }

    pub fn speed_right(&self, interval_ms: u32) -> f64 {
        Self::sample(&self.clock, &self.right_encoder, interval_ms)
    }

    fn sample(clock: &C, encoder: &Encoder, interval_ms: u32) -> f64 {
        let interval_ms = interval_ms.max(1);
        let last = encoder.get_radians();
        clock.delay_ms(interval_ms);
        (encoder.get_radians() - last) / (interval_ms as f64 / 1000.0)
    }

    /// Both wheel speeds in rad/s, sampled over the same window. Blocks for `interval_ms`.
    pub fn speeds(&self, interval_ms: u32) -> (f64, f64) {
        let interval_ms = interval_ms.max(1);
        let (last_left, last_right) = self.get_angles();
        self.clock.delay_ms(interval_ms);
        let (left, right) = self.get_angles();
        let secs = interval_ms as f64 / 1000.0;
        ((left - last_left) / secs, (right - last_right) / secs)
    }

    /// Run both wheels at a percentage of the max speed (-100..=100).
    pub fn run(&mut self, left_percent: i32, right_percent: i32) -> Result<(), SpeedControlError> {
        let left_percent = left_percent.clamp(-100, 100);
        let right_percent = right_percent.clamp(-100, 100);

        let (left_speed, right_speed) = self.speeds(self.config.interval.as_millis() as u32);

        let k = self.config.max_speed / 100.0;
        let left_error = left_percent as f64 * k - left_speed;
        let right_error = right_percent as f64 * k - right_speed;

        let now = self.clock.now_ms();
        let (left_duty, left_state) = self.left_regulator.step(left_error, &self.left_state, now);
        let (right_duty, right_state) =
            self.right_regulator.step(right_error, &self.right_state, now);
        self.left_state = left_state;
        self.right_state = right_state;

        trace!(
            "run: pct={left_percent}/{right_percent} speed={left_speed:.2}/{right_speed:.2} duty={left_duty}/{right_duty}"
        );
        self.drive(left_duty, right_duty)
    }

    pub fn drive(&mut self, left_duty: i32, right_duty: i32) -> Result<(), SpeedControlError> {
        self.drive_left(left_duty)?;
        self.drive_right(right_duty)
    }

    pub fn drive_left(&mut self, duty: i32) -> Result<(), SpeedControlError> {
        self.left.drive(duty).map_err(SpeedControlError::motor)
    }

    pub fn drive_right(&mut self, duty: i32) -> Result<(), SpeedControlError> {
        self.right.drive(duty).map_err(SpeedControlError::motor)
    }

    pub fn stop_left(&mut self) -> Result<(), SpeedControlError> {
        self.left.stop().map_err(SpeedControlError::motor)
    }

    pub fn stop_right(&mut self) -> Result<(), SpeedControlError> {
        self.right.stop().map_err(SpeedControlError::motor)
    }

    /// Stop both wheels. The right wheel is still stopped when the left one fails.
    pub fn stop(&mut self) -> Result<(), SpeedControlError> {
        let left = self.stop_left();
        let right = self.stop_right();
        left.and(right)
    }

    pub fn get_duties(&self) -> (i32, i32) {
        (self.left.get_duty(), self.right.get_duty())
    }

    pub fn get_clock(&self) -> &C {
        &self.clock
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_regulator_states(&self) -> (RegulatorState, RegulatorState) {
        (self.left_state, self.right_state)
    }
}

#[derive(Debug)]
pub enum SpeedControlError {
    Motor(Box<dyn std::error::Error + Send + Sync>),
}

impl SpeedControlError {
    fn motor<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        error!("motor command failed: {e}");
        SpeedControlError::Motor(Box::new(e))
    }
}

impl std::fmt::Display for SpeedControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

impl std::error::Error for SpeedControlError {}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug)]
    struct Broken;

    impl std::fmt::Display for Broken {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("broken")
        }
    }

    impl std::error::Error for Broken {}

    #[derive(Clone, Default)]
    struct Channel {
        duty: Rc<Cell<u32>>,
        fail: bool,
    }

    impl PwmChannel for Channel {
        type Error = Broken;

        fn set_duty(&mut self, duty: u32) -> Result<(), Broken> {
            if self.fail {
                return Err(Broken);
            }
            self.duty.set(duty);
            Ok(())
        }
    }

    /// Advances time on delay and moves each encoder by a fixed number of ticks per ms.
    struct StepClock {
        now: Cell<u32>,
        ticks_per_ms: (i32, i32),
        encoders: RefCell<Option<(Arc<Encoder>, Arc<Encoder>)>>,
    }

    impl Clock for Rc<StepClock> {
        fn now_ms(&self) -> u32 {
            self.now.get()
        }

        fn delay_ms(&self, ms: u32) {
            self.now.set(self.now.get().wrapping_add(ms));
            if let Some((left, right)) = self.encoders.borrow().as_ref() {
                left.set_position(left.get_position() + self.ticks_per_ms.0 * ms as i32);
                right.set_position(right.get_position() + self.ticks_per_ms.1 * ms as i32);
            }
        }
    }

    struct Rig {
        control: SpeedControl<Channel, Rc<StepClock>>,
        channels: [Channel; 4],
    }

    fn rig(ticks_per_ms: (i32, i32), start: u32) -> Rig {
        let channels: [Channel; 4] = Default::default();
        let left_encoder = Arc::new(Encoder::new(1000, false));
        let right_encoder = Arc::new(Encoder::new(1000, true));
        let clock = Rc::new(StepClock {
            now: Cell::new(start),
            ticks_per_ms,
            encoders: RefCell::new(Some((left_encoder.clone(), right_encoder.clone()))),
        });
        let control = SpeedControl::new(
            Motor::new("left", channels[0].clone(), channels[1].clone()),
            Motor::new("right", channels[2].clone(), channels[3].clone()),
            left_encoder,
            right_encoder,
            clock,
            DEFAULT_CONFIG,
        );
        Rig { control, channels }
    }

    #[test]
    fn speeds_measure_rad_per_second() {
        let rig = rig((1, -2), 0);
        let (left, right) = rig.control.speeds(50);
        let one = 2.0 * std::f64::consts::PI / 1000.0 * 1000.0;
        assert!((left - one).abs() < 1e-9);
        assert!((right + 2.0 * one).abs() < 1e-9);
        assert_eq!(rig.control.get_clock().now_ms(), 50);
    }

    #[test]
    fn single_wheel_speed() {
        let rig = rig((3, 0), 0);
        let speed = rig.control.speed_left(SINGLE_WHEEL_INTERVAL_MS);
        assert!((speed - 3.0 * 2.0 * std::f64::consts::PI).abs() < 1e-9);
        assert_eq!(rig.control.speed_right(SINGLE_WHEEL_INTERVAL_MS), 0.0);
        assert_eq!(rig.control.get_clock().now_ms(), 40);
    }

    #[test]
    fn run_from_standstill_drives_in_commanded_direction() {
        let mut rig = rig((0, 0), 0);
        rig.control.run(50, -50).unwrap();
        let (left, right) = rig.control.get_duties();
        assert!(left > 0);
        assert!(right < 0);
        assert!(rig.channels[0].duty.get() > 0);
        assert_eq!(rig.channels[1].duty.get(), 0);
        assert_eq!(rig.channels[2].duty.get(), 0);
        assert!(rig.channels[3].duty.get() > 0);
    }

    #[test]
    fn run_clamps_percentages() {
        let mut over = rig((0, 0), 0);
        let mut full = rig((0, 0), 0);
        over.control.run(250, 250).unwrap();
        full.control.run(100, 100).unwrap();
        assert_eq!(over.control.get_duties(), full.control.get_duties());
    }

    #[test]
    fn run_brakes_when_faster_than_target() {
        // 10 ticks/ms on 1000 ppr is ~62.8 rad/s, far above 15 rad/s
        let mut rig = rig((10, 10), 0);
        rig.control.run(20, 20).unwrap();
        let (left, right) = rig.control.get_duties();
        assert!(left < 0);
        assert!(right < 0);
    }

    #[test]
    fn run_near_clock_wrap() {
        let mut rig = rig((0, 0), u32::MAX - 20);
        rig.control.run(30, 30).unwrap();
        let (left, _) = rig.control.get_regulator_states();
        assert_eq!(left.last_time, 29);
    }

    #[test]
    fn stop_tries_both_wheels() {
        let channels: [Channel; 4] = [
            Channel {
                fail: true,
                ..Default::default()
            },
            Channel::default(),
            Channel::default(),
            Channel::default(),
        ];
        channels[2].duty.set(500);
        let clock = Rc::new(StepClock {
            now: Cell::new(0),
            ticks_per_ms: (0, 0),
            encoders: RefCell::new(None),
        });
        let mut control = SpeedControl::new(
            Motor::new("left", channels[0].clone(), channels[1].clone()),
            Motor::new("right", channels[2].clone(), channels[3].clone()),
            Arc::new(Encoder::new(1000, false)),
            Arc::new(Encoder::new(1000, true)),
            clock,
            DEFAULT_CONFIG,
        );
        assert!(control.stop().is_err());
        assert_eq!(channels[2].duty.get(), 0);
    }
}
