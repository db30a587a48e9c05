use esp_idf_hal::delay::BLOCK;
use esp_idf_hal::i2c::I2cDriver;
use esp_idf_sys::EspError;

use crate::I2cBus;

impl<'d> I2cBus for I2cDriver<'d> {
    type Error = EspError;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), EspError> {
        I2cDriver::write(self, address, bytes, BLOCK)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), EspError> {
        I2cDriver::read(self, address, buffer, BLOCK)
    }
}
