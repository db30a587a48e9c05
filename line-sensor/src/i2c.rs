use crate::ExpanderError;
use crate::GpioExpander;
use crate::Level;
use crate::PinMode;

pub const DEFAULT_ADDRESS: u8 = 42;

/// Expander command bytes. Payloads follow big endian.
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum Command {
    Uid = 0x00,
    Reset = 0x01,
    PortModeInput = 0x04,
    PortModePullUp = 0x05,
    PortModePullDown = 0x06,
    PortModeOutput = 0x07,
    DigitalRead = 0x08,
    DigitalWriteHigh = 0x09,
    DigitalWriteLow = 0x0a,
    AnalogWrite = 0x0b,
    AnalogRead = 0x0c,
    PwmFrequency = 0x0d,
}

/// Raw I2C transfers to a device at `address`.
pub trait I2cBus {
    type Error: std::error::Error + Send + Sync + 'static;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error>;
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;
}

/// GPIO expander speaking the command protocol over I2C.
///
/// The device samples at 12 bits and takes PWM duties at 16 bits; reads are scaled down to
/// 10 bits and `Level::Pwm` duties up from 8 bits.
#[derive(Debug)]
pub struct I2cExpander<B: I2cBus> {
    bus: B,
    address: u8,
}

impl<B: I2cBus> I2cExpander<B> {
    pub fn new(bus: B, address: u8) -> Self {
        I2cExpander { bus, address }
    }

    pub fn reset(&mut self) -> Result<(), ExpanderError> {
        self.send(&[Command::Reset as u8])
    }

    pub fn uid(&mut self) -> Result<u32, ExpanderError> {
        self.send(&[Command::Uid as u8])?;
        let mut buffer = [0; 4];
        self.receive(&mut buffer)?;
        Ok(u32::from_be_bytes(buffer))
    }

    pub fn set_pwm_frequency(&mut self, hz: u16) -> Result<(), ExpanderError> {
        self.send_u16(Command::PwmFrequency, hz)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ExpanderError> {
        self.bus
            .write(self.address, bytes)
            .map_err(|e| ExpanderError::Bus(Box::new(e)))
    }

    fn send_u16(&mut self, command: Command, data: u16) -> Result<(), ExpanderError> {
        let [high, low] = data.to_be_bytes();
        self.send(&[command as u8, high, low])
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), ExpanderError> {
        self.bus
            .read(self.address, buffer)
            .map_err(|e| ExpanderError::Bus(Box::new(e)))
    }

    fn receive_u16(&mut self) -> Result<u16, ExpanderError> {
        let mut buffer = [0; 2];
        self.receive(&mut buffer)?;
        Ok(u16::from_be_bytes(buffer))
    }
}

impl<B: I2cBus> GpioExpander for I2cExpander<B> {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), ExpanderError> {
        let command = match mode {
            PinMode::Input => Command::PortModeInput,
            PinMode::Output => Command::PortModeOutput,
            PinMode::InputPullUp => Command::PortModePullUp,
            PinMode::InputPullDown => Command::PortModePullDown,
        };
        self.send_u16(command, 1 << pin)
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), ExpanderError> {
        match level {
            Level::Low => self.send_u16(Command::DigitalWriteLow, 1 << pin),
            Level::High => self.send_u16(Command::DigitalWriteHigh, 1 << pin),
            Level::Pwm(duty) => {
                let [high, low] = (u16::from(duty) << 8).to_be_bytes();
                self.send(&[Command::AnalogWrite as u8, pin, high, low])
            }
        }
    }

    fn read(&mut self, pin: u8) -> Result<u16, ExpanderError> {
        self.send(&[Command::AnalogRead as u8, pin])?;
        Ok(self.receive_u16()? >> 2)
    }

    fn read_port(&mut self) -> Result<u16, ExpanderError> {
        self.send(&[Command::DigitalRead as u8])?;
        self.receive_u16()
    }
}
