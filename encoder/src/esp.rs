use std::sync::Arc;

use esp_idf_hal::gpio::AnyInputPin;
use esp_idf_hal::gpio::Input;
use esp_idf_hal::gpio::InterruptType;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_sys::gpio_get_level;
use esp_idf_sys::EspError;

use crate::Encoder;

/// Keeps the phase pin drivers (and with them the edge interrupts) alive.
pub struct EncoderPins<'d> {
    _a: PinDriver<'d, AnyInputPin, Input>,
    _b: PinDriver<'d, AnyInputPin, Input>,
}

impl<'d> EncoderPins<'d> {
    pub fn attach(
        encoder: Arc<Encoder>,
        a_pin: AnyInputPin,
        b_pin: AnyInputPin,
    ) -> Result<Self, EspError> {
        let mut a = PinDriver::input(a_pin)?;
        let mut b = PinDriver::input(b_pin)?;
        let (a_num, b_num) = (a.pin(), b.pin());
        encoder.prime(a.is_high(), b.is_high());

        for pin in [&mut a, &mut b] {
            pin.set_interrupt_type(InterruptType::AnyEdge)?;
            let encoder = encoder.clone();
            // runs in interrupt context: sample both phases and update the atomics, nothing else
            unsafe {
                pin.subscribe(move || {
                    let a = gpio_get_level(a_num) != 0;
                    let b = gpio_get_level(b_num) != 0;
                    encoder.on_edge(a, b);
                })?;
            }
            pin.enable_interrupt()?;
        }

        Ok(EncoderPins { _a: a, _b: b })
    }
}
