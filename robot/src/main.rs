use log::*;

use crate::logger::Logger;

mod config;
mod logger;
mod pilot;

#[cfg(target_os = "espidf")]
mod device;
#[cfg(target_os = "espidf")]
use device as platform;

#[cfg(not(target_os = "espidf"))]
mod host;
#[cfg(not(target_os = "espidf"))]
use host as platform;

fn main() -> anyhow::Result<()> {
    #[cfg(target_os = "espidf")]
    esp_idf_sys::link_patches();
    Logger::initialize(LevelFilter::Info)?;
    info!("starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    platform::run()
}
