use std::f64::consts::PI;

use crate::profile::*;
use crate::sim::*;
use crate::*;

const PPR: u32 = 2376;
// ~20 rad/s at full duty, geared motor inertia
const FULL_SPEED: Plant = Plant::Proportional {
    ticks_per_second: 7563,
    lag_ms: 150,
};
/// How far a wheel may roll past its target once released.
const COAST: f64 = 0.25;

fn rig(plant: Plant) -> (Simulation, Drive<SimPwm, SimClock>) {
    let sim = Simulation::new(PPR, plant);
    let drive = sim.drive(speed_control::DEFAULT_CONFIG, DEFAULT_CONFIG);
    (sim, drive)
}

/// Both wheels with the left wheel's speed gains.
fn matched_wheels() -> speed_control::Config {
    speed_control::Config {
        right: speed_control::DEFAULT_CONFIG.left,
        ..speed_control::DEFAULT_CONFIG
    }
}

fn ticks_to_radians(ticks: i64) -> f64 {
    ticks as f64 * 2.0 * PI / PPR as f64
}

#[test]
fn forward_quarter_turn_on_constant_plant() {
    // a quarter revolution per 50 ms control step
    let sim = Simulation::new(
        PPR,
        Plant::Constant {
            ticks_per_second: PPR as i64 / 4 * 20,
        },
    );
    let mut drive = sim.drive(speed_control::DEFAULT_CONFIG, DEFAULT_CONFIG);
    let distance = DEFAULT_CONFIG.wheel_radius * PI / 2.0 * SLIP_FACTOR;
    let target = distance_target(distance, DEFAULT_CONFIG.wheel_radius);

    let outcome = drive.move_forward_distance(distance).unwrap();

    assert_eq!(outcome, Outcome::Converged);
    assert!(sim.now() <= distance_timeout_ms(DEFAULT_CONFIG.standard_speed, distance));
    assert!((target - sim.left_encoder().get_radians()).abs() <= DISTANCE_TOLERANCE);
    assert!((target - sim.right_encoder().get_radians()).abs() <= DISTANCE_TOLERANCE);
    assert_eq!(sim.duties(), [0; 4]);
    assert_eq!(drive.get_speed_control().get_duties(), (0, 0));
    assert!((drive.get_target_angle() - target).abs() < 1e-12);
}

#[test]
fn zero_distance_never_drives() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(drive.move_forward_distance(0.0).unwrap(), Outcome::Converged);
    assert_eq!(drive.move_backward_speed_distance(40, 0.0).unwrap(), Outcome::Converged);
    assert_eq!(sim.peak_duties(), [0; 4]);
    assert_eq!(sim.now(), 0);
}

#[test]
fn zero_angle_turn_only_settles() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(drive.turn_left_angle(0.0).unwrap(), Outcome::Converged);
    assert_eq!(sim.peak_duties(), [0; 4]);
    assert_eq!(sim.now(), SETTLE_MS);
}

#[test]
fn turn_left_then_right_returns_home() {
    let (sim, mut drive) = rig(FULL_SPEED);
    let target = turn_target(
        90.0,
        DEFAULT_CONFIG.half_wheel_separation,
        DEFAULT_CONFIG.wheel_radius,
    );

    assert_eq!(drive.turn_left_angle(90.0).unwrap(), Outcome::Converged);
    let (left, right) = sim.wheel_ticks();
    assert!(left < 0 && right > 0);
    // read after the settle pause, the wheels rolled on a little
    let overshoot = (
        -sim.left_encoder().get_radians() - target,
        sim.right_encoder().get_radians() - target,
    );
    assert!(overshoot.0 >= -TURN_TOLERANCE && overshoot.0 <= COAST, "{overshoot:?}");
    assert!(overshoot.1 >= -TURN_TOLERANCE && overshoot.1 <= COAST, "{overshoot:?}");
    assert_eq!(sim.duties(), [0; 4]);

    assert_eq!(drive.turn_right_angle(90.0).unwrap(), Outcome::Converged);
    let (left, right) = sim.wheel_ticks();
    assert!(ticks_to_radians(left).abs() <= 2.0 * TURN_TOLERANCE);
    assert!(ticks_to_radians(right).abs() <= 2.0 * TURN_TOLERANCE);
}

#[test]
fn rotate_half_turn() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(drive.rotate().unwrap(), Outcome::Converged);
    let (left, right) = sim.wheel_ticks();
    assert!(left > 0 && right < 0);
    let target = turn_target(
        180.0,
        DEFAULT_CONFIG.half_wheel_separation,
        DEFAULT_CONFIG.wheel_radius,
    );
    assert!((drive.get_target_angle() - target).abs() < 1e-12);
}

#[test]
fn backward_distance_converges() {
    let (sim, mut drive) = rig(FULL_SPEED);
    let target = distance_target(10.0, DEFAULT_CONFIG.wheel_radius);
    assert_eq!(drive.move_backward_distance(10.0).unwrap(), Outcome::Converged);
    assert!((target + sim.left_encoder().get_radians()).abs() <= DISTANCE_TOLERANCE);
    assert!((target + sim.right_encoder().get_radians()).abs() <= DISTANCE_TOLERANCE);
    let (left, right) = sim.wheel_ticks();
    assert!(left < 0 && right < 0);
}

#[test]
fn negative_distance_reverses() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(
        drive.move_forward_speed_distance(65, -10.0).unwrap(),
        Outcome::Converged
    );
    let (left, right) = sim.wheel_ticks();
    assert!(left < 0 && right < 0);
}

#[test]
fn blocked_primitives_do_nothing() {
    let (sim, mut drive) = rig(FULL_SPEED);
    let supervisor = drive.blocker();
    supervisor.block();
    assert!(drive.is_blocked());

    assert_eq!(drive.move_forward_distance(10.0).unwrap(), Outcome::Blocked);
    assert_eq!(drive.move_backward_distance(10.0).unwrap(), Outcome::Blocked);
    assert_eq!(drive.move_forward_seconds(1.0).unwrap(), Outcome::Blocked);
    assert_eq!(drive.move_backward_seconds(1.0).unwrap(), Outcome::Blocked);
    assert_eq!(drive.turn_left().unwrap(), Outcome::Blocked);
    assert_eq!(drive.turn_right().unwrap(), Outcome::Blocked);
    assert_eq!(drive.rotate().unwrap(), Outcome::Blocked);
    assert_eq!(sim.peak_duties(), [0; 4]);
    assert_eq!(sim.now(), 0);

    supervisor.unblock();
    assert_eq!(drive.move_forward_distance(10.0).unwrap(), Outcome::Converged);
}

#[test]
fn stalled_wheels_time_out() {
    let (sim, mut drive) = rig(Plant::Proportional {
        ticks_per_second: 0,
        lag_ms: 150,
    });
    let outcome = drive.move_forward_speed_distance(100, 10.0).unwrap();
    assert_eq!(outcome, Outcome::TimedOut);
    assert_eq!(sim.now(), 5_000);
    assert_eq!(sim.duties(), [0; 4]);
}

#[test]
fn zero_speed_times_out_immediately() {
    let (sim, mut drive) = rig(FULL_SPEED);
    let outcome = drive.move_forward_speed_distance(0, 10.0).unwrap();
    assert_eq!(outcome, Outcome::TimedOut);
    assert_eq!(sim.now(), 0);
    assert_eq!(sim.peak_duties(), [0; 4]);
}

#[test]
fn forward_seconds_runs_for_duration() {
    let sim = Simulation::new(PPR, FULL_SPEED);
    let mut drive = sim.drive(matched_wheels(), DEFAULT_CONFIG);
    assert_eq!(drive.move_forward_seconds(1.0).unwrap(), Outcome::Completed);
    assert_eq!(sim.now(), 1_000);
    let (left, right) = sim.wheel_ticks();
    assert!(left > 0);
    assert_eq!(left, right);
    assert_eq!(sim.duties(), [0; 4]);
}

#[test]
fn backward_seconds_runs_backward() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(drive.move_backward_seconds(0.5).unwrap(), Outcome::Completed);
    let (left, right) = sim.wheel_ticks();
    assert!(left < 0 && right < 0);
    assert_eq!(sim.duties(), [0; 4]);
}

#[test]
fn mismatched_wheels_stay_in_step() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(drive.move_forward_seconds(1.0).unwrap(), Outcome::Completed);
    let (left, right) = sim.wheel_ticks();
    assert!(left > 0 && right > 0);
    assert!(ticks_to_radians(left - right).abs() < 0.2, "{left}/{right}");
}

#[test]
fn default_tuning_runs_the_bench_route() {
    let (sim, mut drive) = rig(FULL_SPEED);
    assert_eq!(drive.move_forward_seconds(3.0).unwrap(), Outcome::Completed);
    assert_eq!(drive.turn_left_angle(90.0).unwrap(), Outcome::Converged);
    assert_eq!(drive.turn_right_angle(90.0).unwrap(), Outcome::Converged);
    let start = sim.now();
    assert_eq!(
        drive.move_forward_speed_distance(80, 50.0).unwrap(),
        Outcome::Converged
    );
    assert!(sim.now() - start < distance_timeout_ms(80, 50.0));
}

#[test]
fn huge_correction_gain_saturates() {
    for k_straight in [1e12, -1e12, f64::MAX] {
        let config = Config {
            k_straight,
            ..DEFAULT_CONFIG
        };
        let sim = Simulation::new(PPR, FULL_SPEED);
        let mut drive = sim.drive(speed_control::DEFAULT_CONFIG, config);

        assert_eq!(drive.move_forward_seconds(1.0).unwrap(), Outcome::Completed);
        assert_eq!(drive.move_backward_seconds(1.0).unwrap(), Outcome::Completed);
        assert!(drive.move_forward_distance(10.0).is_ok());
        assert!(drive.turn_left().is_ok());
        assert_eq!(sim.duties(), [0; 4]);
    }
}

#[test]
fn motion_across_clock_wrap() {
    let sim = Simulation::starting_at(PPR, FULL_SPEED, u32::MAX - 200);
    let mut drive = sim.drive(speed_control::DEFAULT_CONFIG, DEFAULT_CONFIG);
    assert_eq!(drive.move_forward_distance(10.0).unwrap(), Outcome::Converged);
    assert!(sim.now() < 10_000);
}

#[test]
fn motor_fault_stops_and_reports() {
    let (sim, mut drive) = rig(FULL_SPEED);
    sim.fail_channel(LEFT_FORWARD);
    let result = drive.move_forward_distance(10.0);
    assert!(matches!(result, Err(DriveError::SpeedControl(_))));
    let duties = sim.duties();
    assert_eq!(duties[RIGHT_FORWARD], 0);
    assert_eq!(duties[RIGHT_REVERSE], 0);
}
