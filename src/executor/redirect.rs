use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};

use crate::ast::{IoMode, SimpleCommand};
use crate::environment::Environment;
use crate::error::ExecError;
use crate::expander::expand;

/// Lowest descriptor used for saved copies of the standard streams
const SAVED_FD_MIN: RawFd = 10;

/// Opens redirection targets and attaches them to the standard streams.
#[derive(Debug, Clone)]
pub struct RedirectHandler {
    file_mode: u32,
}

impl RedirectHandler {
    pub fn new(file_mode: u32) -> Self {
        RedirectHandler { file_mode }
    }

    /// Redirects the current process for good.
    ///
    /// Used inside a forked context that is about to exec or exit, so the
    /// originals are not kept.
    pub fn apply(&self, cmd: &SimpleCommand, env: &Environment) -> Result<(), ExecError> {
        let targets = self.open_targets(cmd, env)?;
        flush_stdout();
        for (fd, file) in targets {
            attach(&file, fd)?;
        }
        Ok(())
    }

    /// Redirects the current process until the returned guard is dropped.
    ///
    /// The guard restores every replaced stream on drop, whatever the
    /// built-in it wraps returned.
    pub fn scoped(&self, cmd: &SimpleCommand, env: &Environment) -> Result<SavedStdio, ExecError> {
        let targets = self.open_targets(cmd, env)?;
        flush_stdout();

        let mut saved = SavedStdio { saved: Vec::new() };
        for (fd, file) in targets {
            let copy = save(fd)?;
            saved.saved.push((fd, copy));
            // on failure `saved` drops here and puts back what was replaced
            attach(&file, fd)?;
        }
        Ok(saved)
    }

    /// Opens every target of `cmd`, each paired with the stream it replaces.
    fn open_targets(
        &self,
        cmd: &SimpleCommand,
        env: &Environment,
    ) -> Result<Vec<(RawFd, File)>, ExecError> {
        let mut targets = Vec::with_capacity(3);

        if let Some(word) = &cmd.stdin {
            let path = expand(word, env);
            log::debug!("redirect stdin < {}", path);
            let file = File::open(&path).map_err(|source| ExecError::FileAccess { path, source })?;
            targets.push((libc::STDIN_FILENO, file));
        }

        // with both streams truncating, each target is emptied once and
        // then shared in append mode so neither open clobbers the other
        let shared =
            cmd.io_mode == IoMode::Truncate && cmd.stdout.is_some() && cmd.stderr.is_some();
        for (fd, word) in [
            (libc::STDOUT_FILENO, &cmd.stdout),
            (libc::STDERR_FILENO, &cmd.stderr),
        ] {
            let Some(word) = word else { continue };
            let path = expand(word, env);
            log::debug!("redirect fd {} > {} ({:?})", fd, path, cmd.io_mode);
            let file = self
                .open_output(&path, cmd.io_mode, shared)
                .map_err(|source| ExecError::FileAccess { path, source })?;
            targets.push((fd, file));
        }

        Ok(targets)
    }

    fn open_output(&self, path: &str, mode: IoMode, shared: bool) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).mode(self.file_mode);
        match mode {
            IoMode::Truncate if shared => {
                options.clone().truncate(true).open(path)?;
                options.append(true).open(path)
            }
            IoMode::Truncate => options.truncate(true).open(path),
            IoMode::Append => options.append(true).open(path),
        }
    }
}

/// Originals of the standard streams replaced by [`RedirectHandler::scoped`].
#[derive(Debug)]
pub struct SavedStdio {
    saved: Vec<(RawFd, Option<OwnedFd>)>,
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        flush_stdout();
        for (fd, copy) in self.saved.drain(..).rev() {
            let result = match &copy {
                Some(copy) => dup2(copy.as_raw_fd(), fd).map(drop),
                // the stream was closed before, so close it again
                None => nix::unistd::close(fd),
            };
            if let Err(e) = result {
                log::warn!("failed to restore fd {}: {}", fd, e);
            }
        }
    }
}

/// Duplicates `fd` above the standard range with close-on-exec set.
///
/// `None` means `fd` was not open.
fn save(fd: RawFd) -> Result<Option<OwnedFd>, ExecError> {
    match fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(SAVED_FD_MIN)) {
        // SAFETY: fcntl returned a fresh descriptor that nothing else owns.
        Ok(raw) => Ok(Some(unsafe { OwnedFd::from_raw_fd(raw) })),
        Err(Errno::EBADF) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn attach(file: &File, fd: RawFd) -> Result<(), ExecError> {
    dup2(file.as_raw_fd(), fd)?;
    Ok(())
}

pub(crate) fn dup2(from: RawFd, to: RawFd) -> nix::Result<RawFd> {
    loop {
        match nix::unistd::dup2(from, to) {
            Err(Errno::EINTR) => (),
            result => return result,
        }
    }
}

pub(crate) fn flush_stdout() {
    let _ = io::stdout().flush();
}
