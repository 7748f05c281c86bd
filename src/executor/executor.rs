use std::fmt;

use crate::ast::CommandNode;
use crate::environment::Environment;
use crate::error::ExecError;

/// Result of evaluating a command tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Ordinary completion code; zero is success
    Code(i32),
    /// Stop the read-eval loop. Never compared against codes.
    TerminateShell,
}

impl Status {
    pub const SUCCESS: Status = Status::Code(0);
    pub const FAILURE: Status = Status::Code(1);

    pub fn from_success(ok: bool) -> Self {
        if ok { Status::SUCCESS } else { Status::FAILURE }
    }

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    /// Exit code of a context that finished with this status.
    ///
    /// A forked context cannot terminate its parent's loop, so
    /// `TerminateShell` becomes an ordinary failure there.
    pub fn code(self) -> i32 {
        match self {
            Status::Code(code) => code,
            Status::TerminateShell => 1,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Code(code) => code.fmt(f),
            Status::TerminateShell => f.write_str("terminate"),
        }
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status::Code(code)
    }
}

pub type ExecStatus = Result<Status, ExecError>;

pub trait Executor {
    fn exec(&mut self, node: &CommandNode, env: &mut Environment) -> Status;
}
