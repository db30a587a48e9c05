use std::sync::Arc;

use anyhow::Context;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::gpio::AnyInputPin;
use esp_idf_hal::gpio::AnyOutputPin;
use esp_idf_hal::i2c::I2cConfig;
use esp_idf_hal::i2c::I2cDriver;
use esp_idf_hal::i2c::I2C0;
use esp_idf_hal::ledc::config::TimerConfig;
use esp_idf_hal::ledc::LedcDriver;
use esp_idf_hal::ledc::LedcTimerDriver;
use esp_idf_hal::ledc::Resolution;
use esp_idf_hal::prelude::*;
use esp_idf_sys::esp;
use esp_idf_sys::esp_vfs_spiffs_conf_t;
use esp_idf_sys::esp_vfs_spiffs_register;
use esp_idf_sys::EspError;
use log::*;

use differential_drive::Drive;
use encoder::Encoder;
use encoder::EncoderPins;
use line_sensor::I2cExpander;
use line_sensor::LineSensor;
use line_sensor::DEFAULT_ADDRESS;
use motor::Motor;
use speed_control::EspClock;
use speed_control::SpeedControl;

use crate::config::Settings;
use crate::pilot::Pilot;
use crate::pilot::DEMO_ROUTE;

const SETTINGS: &str = "/spiffs/settings.json";
/// Expander PWM frequency, gives about 250 sensitivity levels.
const LINE_SENSOR_PWM_HZ: u16 = 8000;
const LINE_SENSOR_BOOT_MS: u32 = 50;
const START_DELAY_MS: u32 = 5000;

fn log_compile_info() {
    esp_idf_sys::esp_app_desc!();

    let name = unsafe { std::ffi::CStr::from_ptr(esp_app_desc.project_name.as_ptr()) }
        .to_string_lossy();
    let version =
        unsafe { std::ffi::CStr::from_ptr(esp_app_desc.version.as_ptr()) }.to_string_lossy();
    let idf = unsafe { std::ffi::CStr::from_ptr(esp_app_desc.idf_ver.as_ptr()) }.to_string_lossy();

    info!("Running {name} v{version} @ IDF v{idf}");
}

fn init_fs() -> Result<(), EspError> {
    info!("configuring SPIFFS");
    let spiffs_config = esp_vfs_spiffs_conf_t {
        base_path: "/spiffs\0".as_ptr() as *const i8,
        partition_label: std::ptr::null(),
        max_files: 5,
        format_if_mount_failed: false,
    };
    esp!(unsafe { esp_vfs_spiffs_register(&spiffs_config) })
}

fn output_pin(pin: i32) -> AnyOutputPin {
    // pins come from the settings file, each one is used exactly once
    unsafe { AnyOutputPin::new(pin) }
}

fn input_pin(pin: i32) -> AnyInputPin {
    unsafe { AnyInputPin::new(pin) }
}

fn line_sensor(
    i2c: I2C0,
    sda: AnyIOPin,
    scl: AnyIOPin,
) -> anyhow::Result<LineSensor<I2cExpander<I2cDriver<'static>>>> {
    let config = I2cConfig::new().baudrate(100.kHz().into());
    let i2c = I2cDriver::new(i2c, sda, scl, &config)?;
    let mut expander = I2cExpander::new(i2c, DEFAULT_ADDRESS);
    expander.reset()?;
    FreeRtos::delay_ms(LINE_SENSOR_BOOT_MS);
    info!("line sensor uid={:#010x}", expander.uid()?);
    expander.set_pwm_frequency(LINE_SENSOR_PWM_HZ)?;
    let mut sensor = LineSensor::new(expander);
    sensor.begin()?;
    Ok(sensor)
}

pub fn run() -> anyhow::Result<()> {
    log_compile_info();
    if let Err(e) = init_fs() {
        warn!("SPIFFS unavailable: {e}");
    }
    let settings = Settings::load(SETTINGS);

    info!("taking system peripherals");
    let peripherals = Peripherals::take().context("failed to take Peripherals")?;

    info!("setup motors");
    let timer_config = TimerConfig::new()
        .frequency(1.kHz().into())
        .resolution(Resolution::Bits10);
    let timer = Arc::new(LedcTimerDriver::new(peripherals.ledc.timer0, &timer_config)?);
    let left_motor = Motor::new(
        "left",
        LedcDriver::new(peripherals.ledc.channel0, timer.clone(), output_pin(settings.pml1))?,
        LedcDriver::new(peripherals.ledc.channel1, timer.clone(), output_pin(settings.pml2))?,
    );
    let right_motor = Motor::new(
        "right",
        LedcDriver::new(peripherals.ledc.channel2, timer.clone(), output_pin(settings.pmr1))?,
        LedcDriver::new(peripherals.ledc.channel3, timer, output_pin(settings.pmr2))?,
    );

    info!("setup encoders");
    let left_encoder = Arc::new(Encoder::new(settings.er, false));
    let right_encoder = Arc::new(Encoder::new(settings.er, true));
    let _left_pins = EncoderPins::attach(
        left_encoder.clone(),
        input_pin(settings.pel1),
        input_pin(settings.pel2),
    )
    .context("left encoder")?;
    let _right_pins = EncoderPins::attach(
        right_encoder.clone(),
        input_pin(settings.per1),
        input_pin(settings.per2),
    )
    .context("right encoder")?;

    info!("setup line sensor");
    match line_sensor(
        peripherals.i2c0,
        peripherals.pins.gpio21.into(),
        peripherals.pins.gpio22.into(),
    ) {
        Ok(mut sensor) => info!("line at {}", sensor.track_line_from_sensors()),
        Err(e) => warn!("no line sensor: {e}"),
    }

    info!("setup drive");
    let speed = SpeedControl::new(
        left_motor,
        right_motor,
        left_encoder,
        right_encoder,
        EspClock,
        settings.speed_config(),
    );
    let drive = Drive::new(speed, settings.drive_config());
    let pilot = Pilot::new(drive).context("failed to start the pilot")?;

    info!("starting the demo route in {START_DELAY_MS}ms");
    FreeRtos::delay_ms(START_DELAY_MS);
    for cmd in DEMO_ROUTE {
        pilot.send(cmd)?;
    }
    for report in pilot.finish() {
        match report.result {
            Ok(outcome) => info!("{:?}: {outcome:?}", report.cmd),
            Err(err) => error!("{:?}: {err}", report.cmd),
        }
    }

    loop {
        FreeRtos::delay_ms(1000);
    }
}
