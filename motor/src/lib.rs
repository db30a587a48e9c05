use log::*;

#[cfg(target_os = "espidf")]
mod esp;

/// Largest duty accepted by `Motor::drive`, the PWM runs at 10 bit resolution.
pub const MAX_DUTY: i32 = 1023;

/// A single PWM output.
pub trait PwmChannel {
    type Error: std::error::Error + Send + Sync + 'static;

    fn set_duty(&mut self, duty: u32) -> Result<(), Self::Error>;
}

/// One wheel of an H-bridge driven by two complementary PWM inputs. The direction is chosen by
/// which of the two inputs carries the duty, the other one is always held at 0.
pub struct Motor<P: PwmChannel> {
    name: String,
    forward: P,
    reverse: P,
    duty: i32,
}

impl<P: PwmChannel> Motor<P> {
    pub fn new(name: &str, forward: P, reverse: P) -> Self {
        Motor {
            name: name.to_string(),
            forward,
            reverse,
            duty: 0,
        }
    }

    pub fn drive(&mut self, duty: i32) -> Result<(), P::Error> {
        let duty = duty.clamp(-MAX_DUTY, MAX_DUTY);
        let (forward, reverse) = split(duty);
        trace!("{}: drive duty={duty} forward={forward} reverse={reverse}", self.name);
        // release the active side first so both inputs are never driven together
        if duty < 0 {
            self.forward.set_duty(forward)?;
            self.reverse.set_duty(reverse)?;
        } else {
            self.reverse.set_duty(reverse)?;
            self.forward.set_duty(forward)?;
        }
        self.duty = duty;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), P::Error> {
        self.forward.set_duty(0)?;
        self.reverse.set_duty(0)?;
        self.duty = 0;
        Ok(())
    }

    /// Last commanded signed duty.
    pub fn get_duty(&self) -> i32 {
        self.duty
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }
}

/// Split a signed duty into `(forward, reverse)` channel values.
pub fn split(duty: i32) -> (u32, u32) {
    let duty = duty.clamp(-MAX_DUTY, MAX_DUTY);
    if duty < 0 {
        (0, duty.unsigned_abs())
    } else {
        (duty as u32, 0)
    }
}
