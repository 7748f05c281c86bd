use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::LevelFilter;
use thiserror::Error;

use crate::environment::Environment;
use crate::error::ExecError;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Permission bits for files created by redirection, before the umask
    pub file_mode: u32,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
    pub env_vars: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigLoader::default_config()
    }
}

impl Config {
    /// Presets the configured `env.*` variables.
    pub fn apply_env(&self, env: &mut Environment) -> Result<(), ExecError> {
        for (name, value) in &self.env_vars {
            env.set(name, value)?;
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_config() -> Config {
        Config {
            file_mode: 0o666,
            log_level: LevelFilter::Warn,
            log_file: None,
            env_vars: BTreeMap::new(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let file = File::open(path)?;
        let mut src = String::new();
        for line in BufReader::new(file).lines() {
            src.push_str(&line?);
            src.push('\n');
        }
        Self::load_from_str(&src)
    }

    pub fn load_from_str(src: &str) -> Result<Config, ConfigError> {
        let mut config = Self::default_config();

        for (idx, line) in src.lines().enumerate() {
            let lineno = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::parse(lineno, format!("no '=' found: {}", line)));
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "file_mode" => {
                    config.file_mode = match u32::from_str_radix(value, 8) {
                        Ok(mode) if mode <= 0o7777 => mode,
                        _ => {
                            return Err(ConfigError::parse(
                                lineno,
                                format!("invalid octal mode: {}", value),
                            ));
                        }
                    };
                }
                "log_level" => {
                    config.log_level = value.parse().map_err(|_| {
                        ConfigError::parse(lineno, format!("invalid log level: {}", value))
                    })?;
                }
                "log_file" => {
                    config.log_file = if value.is_empty() {
                        None
                    } else {
                        Some(PathBuf::from(value))
                    };
                }
                k if k.starts_with("env.") => {
                    let var = k.trim_start_matches("env.");
                    if !crate::environment::is_valid_name(var) {
                        return Err(ConfigError::parse(
                            lineno,
                            format!("invalid variable name: {}", var),
                        ));
                    }
                    config.env_vars.insert(var.to_string(), value.to_string());
                }
                _ => return Err(ConfigError::parse(lineno, format!("unknown key: {}", key))),
            }
        }

        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl ConfigError {
    fn parse(line: usize, message: String) -> Self {
        ConfigError::Parse { line, message }
    }
}
