use std::ffi::CString;
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};

use super::redirect::{flush_stdout, RedirectHandler};
use crate::ast::SimpleCommand;
use crate::environment::Environment;
use crate::error::ExecError;
use crate::executor::{ExecStatus, Status};
use crate::expander::{expand, expand_all};

/// Runs external programs in a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    redirects: RedirectHandler,
}

impl ProcessLauncher {
    pub fn new(redirects: RedirectHandler) -> Self {
        ProcessLauncher { redirects }
    }

    /// Forks, redirects inside the child, execs the verb found on `PATH` and
    /// waits for it.
    pub fn launch(&self, cmd: &SimpleCommand, env: &Environment) -> ExecStatus {
        let verb = expand(&cmd.verb, env);
        let argv = build_argv(&verb, &expand_all(&cmd.params, env))?;

        let pid = spawn_context(|| {
            if let Err(e) = self.redirects.apply(cmd, env) {
                return e.report();
            }
            let Err(errno) = execvp(&argv[0], &argv);
            ExecError::ExecutionNotFound { verb, errno }.report()
        })?;
        log::debug!("launched {:?} as {}", argv[0], pid);

        wait_for(pid)
    }
}

/// The verb followed by every argument. Empty expansions stay as empty
/// arguments.
fn build_argv(verb: &str, args: &[String]) -> Result<Vec<CString>, ExecError> {
    std::iter::once(verb)
        .chain(args.iter().map(String::as_str))
        .map(CString::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ExecError::ExecutionNotFound {
            verb: verb.to_string(),
            errno: Errno::EINVAL,
        })
}

/// Starts an execution context: a forked copy of this process that runs
/// `task` and exits with its status code.
///
/// The child never returns into the caller's frames, not even on panic.
/// Every successful call must be paired with [`wait_for`].
pub fn spawn_context<F>(task: F) -> Result<Pid, ExecError>
where
    F: FnOnce() -> Status,
{
    flush_stdout();
    // SAFETY: the child only runs `task` and then exits.
    match unsafe { fork()? } {
        ForkResult::Parent { child } => {
            log::trace!("forked context {}", child);
            Ok(child)
        }
        ForkResult::Child => {
            let status = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or(Status::FAILURE);
            flush_stdout();
            std::process::exit(status.code())
        }
    }
}

/// Blocks until `pid` exits and returns its exit code as a status.
pub fn wait_for(pid: Pid) -> ExecStatus {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                log::debug!("{} exited with {}", pid, code);
                return Ok(Status::Code(code));
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                log::warn!("{} killed by {}", pid, signal);
                return Err(ExecError::AbnormalTermination { pid, signal });
            }
            Ok(other) => log::trace!("ignoring wait status {:?}", other),
            Err(Errno::EINTR) => (),
            Err(e) => return Err(e.into()),
        }
    }
}
