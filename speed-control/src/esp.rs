use esp_idf_hal::delay::FreeRtos;
use esp_idf_sys::esp_timer_get_time;

use crate::Clock;

/// Clock backed by the ESP high resolution timer, delays yield to FreeRTOS.
#[derive(Debug, Clone, Copy, Default)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> u32 {
        (unsafe { esp_timer_get_time() } / 1000) as u32
    }

    fn delay_ms(&self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}
