use std::io::stdout;
use std::io::Write;

use log::set_logger;
use log::set_max_level;
use log::Level;
use log::LevelFilter;
use log::Log;
use log::Record;

static LOGGER: Logger = Logger;

/// Colored console logger, `LEVEL (ms since boot) target message`.
pub struct Logger;

impl Logger {
    pub fn initialize(level: LevelFilter) -> anyhow::Result<()> {
        set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("{e}"))?;
        set_max_level(level);
        Ok(())
    }

    fn get_color(level: Level) -> Option<u8> {
        match level {
            Level::Error => Some(31), // LOG_COLOR_RED
            Level::Warn => Some(33),  // LOG_COLOR_BROWN
            Level::Info => Some(32),  // LOG_COLOR_GREEN,
            _ => None,
        }
    }

    fn add_color_for_level(s: &str, level: Level) -> String {
        if let Some(color) = Self::get_color(level) {
            format!("\x1b[0;{color}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn fmt_record(record: &Record) -> String {
        format!(
            "{} ({}) {} {}",
            record.level(),
            timestamp(),
            record.metadata().target(),
            record.args()
        )
    }
}

#[cfg(target_os = "espidf")]
fn timestamp() -> u32 {
    unsafe { esp_idf_sys::esp_log_timestamp() }
}

#[cfg(not(target_os = "espidf"))]
fn timestamp() -> u32 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}

impl Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if let Some(level) = ::log::max_level().to_level() {
            metadata.level() <= level
        } else {
            false
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let msg = Self::add_color_for_level(&Self::fmt_record(record), record.level());
            let mut stdout = stdout().lock();
            // nowhere left to report a failing console
            let _ = stdout.write_all(msg.as_bytes());
            let _ = stdout.write_all(b"\n");
            let _ = stdout.flush();
        }
    }

    fn flush(&self) {
        let _ = stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_by_level() {
        assert_eq!(
            Logger::add_color_for_level("boom", Level::Error),
            "\x1b[0;31mboom\x1b[0m"
        );
        assert_eq!(Logger::add_color_for_level("steps", Level::Trace), "steps");
    }
}
