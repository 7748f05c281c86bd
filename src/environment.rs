use std::io;
use std::path::{Path, PathBuf};

use crate::error::ExecError;

/// Process-scoped shell state: the environment table and the working directory.
///
/// Both live in the operating system's per-process state so that external
/// commands inherit them. Only built-ins take `&mut Environment`; everything
/// else reads. Forked execution contexts get their own copy of the process
/// and nothing they change is visible here.
#[derive(Debug, Default)]
pub struct Environment {
    _private: (),
}

impl Environment {
    pub fn new() -> Self {
        Environment { _private: () }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if !is_valid_name(key) {
            return None;
        }
        std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ExecError> {
        if !is_valid_name(key) || value.contains('\0') {
            return Err(ExecError::Environment {
                name: key.to_string(),
            });
        }
        log::trace!("setenv {}={}", key, value);
        // SAFETY: evaluation is single-threaded; concurrent contexts are
        // separate processes with their own environment.
        unsafe { std::env::set_var(key, value) };
        Ok(())
    }

    pub fn unset(&mut self, key: &str) {
        if is_valid_name(key) {
            // SAFETY: see `set`.
            unsafe { std::env::remove_var(key) };
        }
    }

    pub fn all(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect()
    }

    pub fn current_dir(&self) -> io::Result<PathBuf> {
        nix::unistd::getcwd().map_err(io::Error::from)
    }

    pub fn set_current_dir(&mut self, path: &Path) -> io::Result<()> {
        log::debug!("chdir {}", path.display());
        nix::unistd::chdir(path).map_err(io::Error::from)
    }
}

/// A variable name must be non-empty and free of `=` and NUL.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['=', '\0'])
}
