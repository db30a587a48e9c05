use log::*;

mod i2c;
pub use i2c::Command;
pub use i2c::I2cBus;
pub use i2c::I2cExpander;
pub use i2c::DEFAULT_ADDRESS;

#[cfg(target_os = "espidf")]
mod esp;

/// Expander pin of each sensor channel, left to right.
pub const SENSOR_PINS: [u8; 8] = [4, 5, 6, 8, 7, 3, 2, 1];
pub const IR_LEDS_PIN: u8 = 9;
pub const SENSE_PIN: u8 = 0;

pub const DEFAULT_SENSITIVITY: u8 = 208;
/// Below this every channel reads black, even on a mirror.
pub const MIN_SENSITIVITY: u8 = 120;
/// Analog readings above this are black.
pub const BLACK_THRESHOLD: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    InputPullUp,
    InputPullDown,
}

/// Output level for `GpioExpander::write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
    /// PWM duty at 8 bit resolution.
    Pwm(u8),
}

#[derive(Debug)]
pub enum ExpanderError {
    Bus(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for ExpanderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpanderError::Bus(e) => write!(f, "expander bus error: {e}"),
        }
    }
}

impl std::error::Error for ExpanderError {}

/// Remote GPIO port with analog inputs and PWM outputs.
pub trait GpioExpander {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), ExpanderError>;
    fn write(&mut self, pin: u8, level: Level) -> Result<(), ExpanderError>;
    /// Analog reading at 10 bit resolution.
    fn read(&mut self, pin: u8) -> Result<u16, ExpanderError>;
    /// Digital state of every pin, bit `n` is pin `n`.
    fn read_port(&mut self) -> Result<u16, ExpanderError>;
}

/// Eight channel reflective line sensor sitting on a `GpioExpander`.
#[derive(Debug)]
pub struct LineSensor<E: GpioExpander> {
    expander: E,
    sensitivity: u8,
    previous: f64,
}

impl<E: GpioExpander> LineSensor<E> {
    pub fn new(expander: E) -> Self {
        LineSensor {
            expander,
            sensitivity: DEFAULT_SENSITIVITY,
            previous: 0.0,
        }
    }

    /// Switch the IR LEDs on.
    pub fn begin(&mut self) -> Result<(), ExpanderError> {
        self.expander.set_mode(IR_LEDS_PIN, PinMode::Output)?;
        self.expander.write(IR_LEDS_PIN, Level::High)?;
        info!("line sensor ready, sensitivity={}", self.sensitivity);
        Ok(())
    }

    pub fn set_sensitivity(&mut self, sensitivity: u8) -> Result<(), ExpanderError> {
        self.sensitivity = sensitivity;
        self.expander.write(SENSE_PIN, Level::Pwm(sensitivity))
    }

    pub fn sensitivity(&self) -> u8 {
        self.sensitivity
    }

    pub fn analog_read(&mut self, channel: usize) -> Result<u16, ExpanderError> {
        self.expander.read(SENSOR_PINS[channel & 0x07])
    }

    pub fn analog_read_all(&mut self) -> Result<[u16; 8], ExpanderError> {
        let mut values = [0; 8];
        for (channel, value) in values.iter_mut().enumerate() {
            *value = self.analog_read(channel)?;
        }
        Ok(values)
    }

    /// Black/white pattern of the current readings, channel 0 in the top bit.
    pub fn digital_read_all(&mut self) -> Result<u8, ExpanderError> {
        Ok(map_analog_to_pattern(&self.analog_read_all()?))
    }

    pub fn count_of_black(&mut self) -> Result<usize, ExpanderError> {
        Ok(self
            .analog_read_all()?
            .iter()
            .filter(|value| **value > BLACK_THRESHOLD)
            .count())
    }

    /// Line position from a fresh reading. A failed read keeps the last known position.
    pub fn track_line_from_sensors(&mut self) -> f64 {
        match self.analog_read_all() {
            Ok(values) => self.track_line_from_analog(&values),
            Err(e) => {
                warn!("line sensor read failed, keeping {}: {e}", self.previous);
                self.previous
            }
        }
    }

    pub fn track_line_from_analog(&mut self, values: &[u16; 8]) -> f64 {
        self.track_line_from_pattern(map_analog_to_pattern(values))
    }

    /// Line position for `pattern`, or the last known position when it shows no line.
    pub fn track_line_from_pattern(&mut self, pattern: u8) -> f64 {
        if let Some(position) = map_pattern_to_line(pattern) {
            self.previous = position;
        } else {
            trace!("no line in {pattern:08b}, keeping {}", self.previous);
        }
        self.previous
    }

    /// Calibrate on a black surface: find the lowest sensitivity where every channel still
    /// reads black, then back off a little. `delay` waits the given milliseconds for the
    /// sensitivity filter to settle.
    ///
    /// Returns `Ok(false)` and restores the previous sensitivity when no usable level exists.
    pub fn optimize_sensitivity_on_black(
        &mut self,
        mut delay: impl FnMut(u32),
    ) -> Result<bool, ExpanderError> {
        let backup = self.sensitivity;

        self.set_sensitivity(u8::MAX)?;
        delay(200);

        let mut sensitivity = u8::MAX;
        while sensitivity > MIN_SENSITIVITY {
            self.set_sensitivity(sensitivity)?;
            delay(100);
            if self.count_of_black()? == SENSOR_PINS.len() {
                break;
            }
            sensitivity -= 5;
        }
        if sensitivity <= MIN_SENSITIVITY {
            warn!("calibration failed: not all channels black above {MIN_SENSITIVITY}");
            self.set_sensitivity(backup)?;
            return Ok(false);
        }

        while sensitivity < u8::MAX {
            self.set_sensitivity(sensitivity)?;
            delay(50);
            if self.count_of_black()? != SENSOR_PINS.len() {
                break;
            }
            sensitivity += 1;
        }
        if sensitivity == u8::MAX {
            warn!("calibration failed: surface changed during the sweep");
            self.set_sensitivity(backup)?;
            return Ok(false);
        }

        self.set_sensitivity(sensitivity - 5)?;
        info!("calibrated sensitivity={}", self.sensitivity);
        Ok(true)
    }
}

/// Threshold halfway between the darkest and brightest channel; channel 0 in the top bit.
pub fn map_analog_to_pattern(values: &[u16; 8]) -> u8 {
    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    let threshold = min + (max - min) / 2;
    values
        .iter()
        .fold(0, |pattern, value| pattern << 1 | u8::from(*value >= threshold))
}

/// Position of the line under `pattern` in [-1, 1], `None` for anything that is not a line.
pub fn map_pattern_to_line(pattern: u8) -> Option<f64> {
    let position = match pattern {
        0b0001_1000 => 0.0,
        0b0001_0000 | 0b0011_1000 => 0.25,
        0b0000_1000 | 0b0001_1100 => -0.25,
        0b0011_0000 => 0.375,
        0b0000_1100 => -0.375,
        0b0010_0000 | 0b0111_0000 => 0.5,
        0b0000_0100 | 0b0000_1110 => -0.5,
        0b0110_0000 | 0b1110_0000 => 0.625,
        0b0000_0110 | 0b0000_0111 => -0.625,
        0b0100_0000 | 0b1111_0000 => 0.75,
        0b0000_0010 | 0b0000_1111 => -0.75,
        0b1100_0000 => 0.875,
        0b0000_0011 => -0.875,
        0b1000_0000 => 1.0,
        0b0000_0001 => -1.0,
        _ => return None,
    };
    Some(position)
}
