use std::f64::consts::PI;

use anyhow::Context;
use log::*;

use differential_drive::sim::Plant;
use differential_drive::sim::Simulation;

use crate::config::Settings;
use crate::pilot::Pilot;
use crate::pilot::DEMO_ROUTE;

const SETTINGS: &str = "settings.json";
/// Wheel speed of the simulated motors at full duty, rad/s.
const FULL_DUTY_SPEED: f64 = 20.0;
/// Time constant of the simulated motors.
const MOTOR_LAG_MS: u32 = 150;

/// Drive the demo route on a simulated robot.
pub fn run() -> anyhow::Result<()> {
    let settings = Settings::load(SETTINGS);
    let ticks_per_second = (FULL_DUTY_SPEED * settings.er as f64 / (2.0 * PI)) as i64;
    let sim = Simulation::new(
        settings.er,
        Plant::Proportional {
            ticks_per_second,
            lag_ms: MOTOR_LAG_MS,
        },
    );
    let drive = sim.drive(settings.speed_config(), settings.drive_config());

    let pilot = Pilot::new(drive).context("failed to start the pilot")?;
    for cmd in DEMO_ROUTE {
        pilot.send(cmd)?;
    }
    for report in pilot.finish() {
        match report.result {
            Ok(outcome) => info!("{:?}: {outcome:?}", report.cmd),
            Err(err) => error!("{:?}: {err}", report.cmd),
        }
    }

    let (left, right) = sim.wheel_ticks();
    info!(
        "simulated {}ms, wheels moved {left}/{right} ticks",
        sim.now()
    );
    Ok(())
}
