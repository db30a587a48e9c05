use std::f64::consts::PI;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

#[cfg(target_os = "espidf")]
mod esp;
#[cfg(target_os = "espidf")]
pub use esp::EncoderPins;

/// Quadrature decoder for a single wheel.
///
/// `on_edge` is meant to be called from the GPIO interrupt of either phase pin; it only touches
/// atomics so it never blocks and can preempt the control loop at any point. The control loop
/// reads the counter through the `get_*` accessors, each of which loads `position` exactly once.
#[derive(Debug)]
pub struct Encoder {
    position: AtomicI32,
    last_phase: AtomicU8,
    pulses_per_revolution: u32,
    invert: bool,
}

/// Decode a 4 bit transition code (`previous << 2 | current`) into a step.
pub fn transition(code: u8) -> i32 {
    match code & 0x0f {
        0b1101 | 0b0100 | 0b0010 | 0b1011 => 1,
        0b1110 | 0b0111 | 0b0001 | 0b1000 => -1,
        _ => 0,
    }
}

fn encode(a: bool, b: bool) -> u8 {
    ((a as u8) << 1) | b as u8
}

impl Encoder {
    /// `invert` flips the counting sense, the right wheel is mounted mirrored.
    pub fn new(pulses_per_revolution: u32, invert: bool) -> Self {
        Encoder {
            position: AtomicI32::new(0),
            last_phase: AtomicU8::new(0),
            pulses_per_revolution: pulses_per_revolution.max(1),
            invert,
        }
    }

    /// Record the current pin levels as the previous phase without counting.
    pub fn prime(&self, a: bool, b: bool) {
        self.last_phase.store(encode(a, b), Ordering::Relaxed);
    }

    pub fn on_edge(&self, a: bool, b: bool) {
        let encoded = encode(a, b);
        // only one handler runs per wheel so the swap cannot interleave with another edge
        let last = self.last_phase.swap(encoded, Ordering::Relaxed);
        let step = transition((last << 2) | encoded);
        if step != 0 {
            let step = if self.invert { -step } else { step };
            self.position.fetch_add(step, Ordering::Relaxed);
        }
    }

    pub fn get_position(&self) -> i32 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn get_degrees(&self) -> i64 {
        (self.get_position() as i64 * 360).div_euclid(self.pulses_per_revolution as i64)
    }

    pub fn get_radians(&self) -> f64 {
        self.get_position() as f64 * 2.0 * PI / self.pulses_per_revolution as f64
    }

    /// Zero the counter, the last sampled phase is kept so the next edge still decodes.
    pub fn reset(&self) {
        self.set_position(0);
    }

    pub fn set_position(&self, position: i32) {
        self.position.store(position, Ordering::Relaxed);
    }
}
