use std::fs::OpenOptions;

use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};

use crate::config::Config;

/// Installs a file logger per `config`.
///
/// Standard error belongs to the commands being run, so nothing is installed
/// unless a log file is configured. Returns whether a logger was installed;
/// a second call in the same process leaves the first logger in place.
pub fn init(config: &Config) -> std::io::Result<bool> {
    let Some(path) = &config.log_file else {
        return Ok(false);
    };
    if config.log_level == LevelFilter::Off {
        return Ok(false);
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let log_config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    Ok(WriteLogger::init(config.log_level, log_config, file).is_ok())
}
