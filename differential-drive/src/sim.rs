//! Deterministic stand-in for the robot hardware.
//!
//! Time only moves when the control loop delays. On every simulated millisecond each wheel
//! turns according to its PWM inputs, and every tick is fed to the wheel's `Encoder` as a real
//! quadrature phase transition, so the decoder is exercised exactly as by the pin interrupts.
//! A `Proportional` wheel has inertia: its speed follows the duty with a first order lag and it
//! keeps rolling for a while after the motor is released.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use encoder::Encoder;
use motor::Motor;
use motor::PwmChannel;
use motor::MAX_DUTY;
use speed_control::Clock;
use speed_control::SpeedControl;

use crate::Config;
use crate::Drive;

const PHASES: [(bool, bool); 4] = [(false, false), (true, false), (true, true), (false, true)];

pub const LEFT_FORWARD: usize = 0;
pub const LEFT_REVERSE: usize = 1;
pub const RIGHT_FORWARD: usize = 2;
pub const RIGHT_REVERSE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plant {
    /// Fixed rate whenever the wheel is driven, the magnitude of the duty is ignored.
    Constant { ticks_per_second: i64 },
    /// Steady rate proportional to the duty, `ticks_per_second` at full duty, reached with the
    /// time constant `lag_ms`. Zero lag follows the duty instantly.
    Proportional { ticks_per_second: i64, lag_ms: u32 },
}

impl Plant {
    /// Rate the wheel settles at for `duty`, ticks/s.
    fn steady_rate(self, duty: i64) -> f64 {
        match self {
            Plant::Constant { ticks_per_second } => (duty.signum() * ticks_per_second) as f64,
            Plant::Proportional {
                ticks_per_second, ..
            } => duty as f64 * ticks_per_second as f64 / MAX_DUTY as f64,
        }
    }

    /// Share of the gap to the steady rate closed in one millisecond.
    fn response(self) -> f64 {
        match self {
            Plant::Proportional { lag_ms, .. } if lag_ms > 0 => 1.0 - (-1.0 / lag_ms as f64).exp(),
            _ => 1.0,
        }
    }
}

#[derive(Debug)]
struct Wheel {
    encoder: Arc<Encoder>,
    mirrored: bool,
    phase: usize,
    /// Current rate, ticks/s.
    rate: f64,
    /// Travel not yet reported as a whole tick.
    fraction: f64,
    ticks: i64,
}

impl Wheel {
    fn new(encoder: Arc<Encoder>, mirrored: bool) -> Self {
        let (a, b) = PHASES[0];
        encoder.prime(a, b);
        Wheel {
            encoder,
            mirrored,
            phase: 0,
            rate: 0.0,
            fraction: 0.0,
            ticks: 0,
        }
    }

    /// One millisecond of travel.
    fn advance(&mut self, plant: Plant, duty: i64) {
        self.rate += (plant.steady_rate(duty) - self.rate) * plant.response();
        self.fraction += self.rate / 1000.0;
        let whole = self.fraction.trunc();
        self.fraction -= whole;
        let steps = whole as i64;
        let direction = steps.signum();
        for _ in 0..steps.abs() {
            self.ticks += direction;
            // the right wheel is mounted mirrored, its pins see the opposite sequence
            let pin_direction = if self.mirrored { -direction } else { direction };
            self.phase = (self.phase as i64 + pin_direction).rem_euclid(4) as usize;
            let (a, b) = PHASES[self.phase];
            self.encoder.on_edge(a, b);
        }
    }
}

#[derive(Debug)]
struct World {
    now: u32,
    plant: Plant,
    duty: [u32; 4],
    peak: [u32; 4],
    failing: [bool; 4],
    left: Wheel,
    right: Wheel,
}

impl World {
    fn tick(&mut self) {
        self.now = self.now.wrapping_add(1);
        let left = self.duty[LEFT_FORWARD] as i64 - self.duty[LEFT_REVERSE] as i64;
        let right = self.duty[RIGHT_FORWARD] as i64 - self.duty[RIGHT_REVERSE] as i64;
        self.left.advance(self.plant, left);
        self.right.advance(self.plant, right);
    }
}

/// Shared handle on the simulated robot.
#[derive(Debug, Clone)]
pub struct Simulation {
    world: Arc<Mutex<World>>,
    left_encoder: Arc<Encoder>,
    right_encoder: Arc<Encoder>,
}

impl Simulation {
    pub fn new(pulses_per_revolution: u32, plant: Plant) -> Self {
        Self::starting_at(pulses_per_revolution, plant, 0)
    }

    /// Start the clock at `now`, e.g. just before it wraps.
    pub fn starting_at(pulses_per_revolution: u32, plant: Plant, now: u32) -> Self {
        let left_encoder = Arc::new(Encoder::new(pulses_per_revolution, false));
        let right_encoder = Arc::new(Encoder::new(pulses_per_revolution, true));
        let world = World {
            now,
            plant,
            duty: [0; 4],
            peak: [0; 4],
            failing: [false; 4],
            left: Wheel::new(left_encoder.clone(), false),
            right: Wheel::new(right_encoder.clone(), true),
        };
        Simulation {
            world: Arc::new(Mutex::new(world)),
            left_encoder,
            right_encoder,
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            world: self.world.clone(),
        }
    }

    pub fn channel(&self, index: usize) -> SimPwm {
        SimPwm {
            world: self.world.clone(),
            index,
        }
    }

    pub fn speed_control(&self, config: speed_control::Config) -> SpeedControl<SimPwm, SimClock> {
        SpeedControl::new(
            Motor::new("left", self.channel(LEFT_FORWARD), self.channel(LEFT_REVERSE)),
            Motor::new(
                "right",
                self.channel(RIGHT_FORWARD),
                self.channel(RIGHT_REVERSE),
            ),
            self.left_encoder.clone(),
            self.right_encoder.clone(),
            self.clock(),
            config,
        )
    }

    pub fn drive(
        &self,
        speed_config: speed_control::Config,
        config: Config,
    ) -> Drive<SimPwm, SimClock> {
        Drive::new(self.speed_control(speed_config), config)
    }

    pub fn left_encoder(&self) -> &Arc<Encoder> {
        &self.left_encoder
    }

    pub fn right_encoder(&self) -> &Arc<Encoder> {
        &self.right_encoder
    }

    pub fn now(&self) -> u32 {
        self.world().now
    }

    /// Logical wheel travel in ticks since the start, forward positive, never reset.
    pub fn wheel_ticks(&self) -> (i64, i64) {
        let world = self.world();
        (world.left.ticks, world.right.ticks)
    }

    pub fn duties(&self) -> [u32; 4] {
        self.world().duty
    }

    /// Largest duty each channel has seen.
    pub fn peak_duties(&self) -> [u32; 4] {
        self.world().peak
    }

    /// Make writes to channel `index` fail from now on.
    pub fn fail_channel(&self, index: usize) {
        self.world().failing[index] = true;
    }
}

#[derive(Debug, Clone)]
pub struct SimClock {
    world: Arc<Mutex<World>>,
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.world.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn delay_ms(&self, ms: u32) {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..ms {
            world.tick();
        }
    }
}

#[derive(Debug)]
pub struct SimFault(usize);

impl std::fmt::Display for SimFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "simulated fault on pwm channel {}", self.0)
    }
}

impl std::error::Error for SimFault {}

#[derive(Debug, Clone)]
pub struct SimPwm {
    world: Arc<Mutex<World>>,
    index: usize,
}

impl PwmChannel for SimPwm {
    type Error = SimFault;

    fn set_duty(&mut self, duty: u32) -> Result<(), SimFault> {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        if world.failing[self.index] {
            return Err(SimFault(self.index));
        }
        world.duty[self.index] = duty;
        world.peak[self.index] = world.peak[self.index].max(duty);
        Ok(())
    }
}
