use std::sync::mpsc::channel;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SendError;
use std::sync::mpsc::Sender;
use std::thread;
use std::thread::JoinHandle;

use log::*;

use differential_drive::Blocker;
use differential_drive::Drive;
use differential_drive::DriveError;
use differential_drive::Outcome;
use motor::PwmChannel;
use speed_control::Clock;

const STACK_SIZE: usize = 8192;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveCmd {
    /// Distance (cm) at the standard speed.
    Forward(f64),
    Backward(f64),
    /// Speed (percent) and distance (cm).
    ForwardAt(i32, f64),
    BackwardAt(i32, f64),
    /// Seconds at the slow speed.
    ForwardFor(f64),
    BackwardFor(f64),
    /// Degrees.
    TurnLeft(f64),
    TurnRight(f64),
    Rotate,
    /// Milliseconds.
    Pause(u32),
    Stop,
}

/// Bench route: straight run, quarter turn each way, then a measured run.
pub const DEMO_ROUTE: [DriveCmd; 7] = [
    DriveCmd::ForwardFor(3.0),
    DriveCmd::Pause(2000),
    DriveCmd::TurnLeft(90.0),
    DriveCmd::Pause(2000),
    DriveCmd::TurnRight(90.0),
    DriveCmd::Pause(2000),
    DriveCmd::ForwardAt(80, 50.0),
];

#[derive(Debug)]
pub struct Report {
    pub cmd: DriveCmd,
    pub result: Result<Outcome, DriveError>,
}

/// Runs drive commands one after the other on a dedicated control thread.
pub struct Pilot {
    tx: Sender<DriveCmd>,
    reports: Receiver<Report>,
    blocker: Blocker,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl Pilot {
    pub fn new<P, C>(drive: Drive<P, C>) -> Result<Self, std::io::Error>
    where
        P: PwmChannel + Send + 'static,
        C: Clock + Send + 'static,
    {
        let blocker = drive.blocker();
        let (tx, rx): (Sender<DriveCmd>, Receiver<DriveCmd>) = channel();
        let (report_tx, reports) = channel();
        let handle = thread::Builder::new()
            .name("pilot".into())
            .stack_size(STACK_SIZE)
            .spawn(move || {
                raise_priority();
                let mut drive = drive;
                for cmd in rx {
                    let result = execute(&mut drive, cmd);
                    if let Err(err) = &result {
                        error!("{cmd:?} failed: {err}");
                    }
                    // nobody listening for reports is fine
                    let _ = report_tx.send(Report { cmd, result });
                }
                info!("pilot done");
            })?;
        Ok(Pilot {
            tx,
            reports,
            blocker,
            handle,
        })
    }

    pub fn send(&self, cmd: DriveCmd) -> Result<(), SendError<DriveCmd>> {
        self.tx.send(cmd)
    }

    pub fn blocker(&self) -> Blocker {
        self.blocker.clone()
    }

    /// Wait for the next finished command.
    pub fn recv(&self) -> Option<Report> {
        self.reports.recv().ok()
    }

    /// Let the queued commands run out and collect their reports.
    pub fn finish(self) -> Vec<Report> {
        let Pilot {
            tx,
            reports,
            handle,
            ..
        } = self;
        drop(tx);
        let reports = reports.iter().collect();
        if handle.join().is_err() {
            error!("pilot thread panicked");
        }
        reports
    }
}

fn execute<P: PwmChannel, C: Clock>(
    drive: &mut Drive<P, C>,
    cmd: DriveCmd,
) -> Result<Outcome, DriveError> {
    info!("{cmd:?}");
    match cmd {
        DriveCmd::Forward(distance) => drive.move_forward_distance(distance),
        DriveCmd::Backward(distance) => drive.move_backward_distance(distance),
        DriveCmd::ForwardAt(speed, distance) => drive.move_forward_speed_distance(speed, distance),
        DriveCmd::BackwardAt(speed, distance) => {
            drive.move_backward_speed_distance(speed, distance)
        }
        DriveCmd::ForwardFor(seconds) => drive.move_forward_seconds(seconds),
        DriveCmd::BackwardFor(seconds) => drive.move_backward_seconds(seconds),
        DriveCmd::TurnLeft(degrees) => drive.turn_left_angle(degrees),
        DriveCmd::TurnRight(degrees) => drive.turn_right_angle(degrees),
        DriveCmd::Rotate => drive.rotate(),
        DriveCmd::Pause(ms) => {
            drive.get_speed_control().get_clock().delay_ms(ms);
            Ok(Outcome::Completed)
        }
        DriveCmd::Stop => drive.stop().map(|_| Outcome::Completed),
    }
}

#[cfg(target_os = "espidf")]
fn raise_priority() {
    use esp_idf_sys::{vTaskPrioritySet, TaskHandle_t, ESP_TASK_PRIO_MAX};
    unsafe { vTaskPrioritySet(std::ptr::null_mut() as TaskHandle_t, ESP_TASK_PRIO_MAX / 2) }
}

#[cfg(not(target_os = "espidf"))]
fn raise_priority() {}
