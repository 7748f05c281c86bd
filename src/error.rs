use std::io::{self, Write};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

use crate::executor::Status;

/// Prefix of every diagnostic the engine prints
pub const DIAGNOSTIC_PREFIX: &str = "tiny-shell";

#[derive(Debug, Error)]
pub enum ExecError {
    /// A redirection target could not be opened in the required mode
    #[error("{path}: {source}")]
    FileAccess {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cd: {path}: {source}")]
    DirectoryChange {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("pwd: {0}")]
    WorkingDirectory(#[source] io::Error),

    #[error("Execution failed for '{verb}'")]
    ExecutionNotFound { verb: String, errno: Errno },

    #[error("process {pid} terminated by signal {signal}")]
    AbnormalTermination { pid: Pid, signal: Signal },

    #[error("cannot assign variable '{name}': invalid name")]
    Environment { name: String },

    #[error(transparent)]
    Os(#[from] Errno),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ExecError {
    /// The status a command that failed with this error yields.
    pub fn status(&self) -> Status {
        match self {
            ExecError::ExecutionNotFound { errno, .. } => Status::Code(*errno as i32),
            ExecError::AbnormalTermination { signal, .. } => Status::Code(128 + *signal as i32),
            _ => Status::FAILURE,
        }
    }

    /// Prints the diagnostic to standard error and returns the status.
    pub fn report(&self) -> Status {
        log::debug!("command failed: {:?}", self);
        diagnostic(format_args!("{}", self));
        self.status()
    }
}

/// Writes one diagnostic line straight to descriptor 2.
///
/// This bypasses the `eprintln!` capture hook so forked contexts and
/// redirected built-ins report on whatever descriptor 2 currently is.
pub fn diagnostic(args: std::fmt::Arguments<'_>) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{}: {}", DIAGNOSTIC_PREFIX, args);
}
