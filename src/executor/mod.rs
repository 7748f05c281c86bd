mod executor;
mod launcher;
mod recursive_executor;
pub mod builtins;
pub mod redirect;


pub use executor::{ExecStatus, Executor, Status};
pub use launcher::{spawn_context, wait_for, ProcessLauncher};
pub use recursive_executor::RecursiveExecutor;

use crate::ast::CommandNode;
use crate::environment::Environment;

/// Evaluates `tree` once with the default configuration.
///
/// Every failure is reported on standard error and folded into the returned
/// status; only [`Status::TerminateShell`] asks the caller to stop.
pub fn evaluate(tree: &CommandNode) -> Status {
    let mut env = Environment::new();
    RecursiveExecutor::new().exec(tree, &mut env)
}
