use esp_idf_hal::ledc::LedcDriver;
use esp_idf_sys::EspError;

use crate::PwmChannel;

impl<'d> PwmChannel for LedcDriver<'d> {
    type Error = EspError;

    fn set_duty(&mut self, duty: u32) -> Result<(), EspError> {
        LedcDriver::set_duty(self, duty)
    }
}
