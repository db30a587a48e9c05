use std::fs::File;
use std::time::Duration;

use log::*;
use regulator::Gains;
use serde::Deserialize;

/// Persisted robot settings. Keys missing from the file keep their default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: i32,
    /// Left motor forward/reverse pins.
    pub pml1: i32,
    pub pml2: i32,
    /// Right motor forward/reverse pins.
    pub pmr1: i32,
    pub pmr2: i32,
    /// Left encoder phase pins.
    pub pel1: i32,
    pub pel2: i32,
    /// Right encoder phase pins.
    pub per1: i32,
    pub per2: i32,
    /// Wheel radius, cm.
    pub wrad: f64,
    /// Distance between the wheels, cm.
    pub wdist: f64,
    /// Encoder pulses per wheel revolution.
    pub er: u32,
    pub kpa: f64,
    pub kia: f64,
    pub kda: f64,
    pub kpsl: f64,
    pub kpsr: f64,
    pub kdsl: f64,
    pub kdsr: f64,
    pub kis: f64,
    /// Straight line correction gain.
    pub ks: f64,
    /// Wheel speed at 100 %, rad/s.
    pub maxs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            version: -1,
            pml1: 25,
            pml2: 26,
            pmr1: 33,
            pmr2: 32,
            pel1: 35,
            pel2: 34,
            per1: 14,
            per2: 27,
            wrad: 3.05,
            wdist: 18.4,
            er: 2376,
            kpa: 45.0,
            kia: 100.0,
            kda: 2.5,
            kpsl: 41.5,
            kpsr: 28.0,
            kdsl: 0.5,
            kdsr: 0.1,
            kis: 0.0,
            ks: 80.0,
            maxs: 15.0,
        }
    }
}

impl Settings {
    pub fn new(file_name: &str) -> anyhow::Result<Self> {
        info!("opening {file_name}");
        let file = File::open(file_name)?;
        let settings: Settings = serde_json::from_reader(file)?;
        Ok(settings.sanitized())
    }

    /// Like `new` but never fails: an unreadable file gives the built in defaults.
    pub fn load(file_name: &str) -> Self {
        let settings = match Self::new(file_name) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("using default settings, failed to load {file_name}: {e}");
                Self::default()
            }
        };
        info!("settings: {settings:?}");
        settings
    }

    /// Replace physical constants that would break the distance math.
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.er == 0 {
            warn!("er must be positive, using {}", defaults.er);
            self.er = defaults.er;
        }
        if self.wrad.is_nan() || self.wrad <= 0.0 {
            warn!("wrad must be positive, using {}", defaults.wrad);
            self.wrad = defaults.wrad;
        }
        if self.maxs.is_nan() || self.maxs <= 0.0 {
            warn!("maxs must be positive, using {}", defaults.maxs);
            self.maxs = defaults.maxs;
        }
        if !self.ks.is_finite() {
            warn!("ks must be finite, using {}", defaults.ks);
            self.ks = defaults.ks;
        }
        self
    }

    pub fn speed_config(&self) -> speed_control::Config {
        speed_control::Config {
            interval: Duration::from_millis(50),
            max_speed: self.maxs,
            left: Gains::new(self.kpsl, self.kis, self.kdsl),
            right: Gains::new(self.kpsr, self.kis, self.kdsr),
        }
    }

    pub fn drive_config(&self) -> differential_drive::Config {
        differential_drive::Config {
            wheel_radius: self.wrad,
            half_wheel_separation: self.wdist / 2.0,
            angle: Gains::new(self.kpa, self.kia, self.kda),
            k_straight: self.ks,
            ..differential_drive::DEFAULT_CONFIG
        }
    }
}
