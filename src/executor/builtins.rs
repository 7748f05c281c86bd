use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;

use crate::ast::Word;
use crate::environment::Environment;
use crate::error::ExecError;
use crate::executor::{ExecStatus, Status};
use crate::expander::expand;

/// A command run inside the evaluating process itself.
pub trait BuiltinCommand {
    fn name(&self) -> &'static str;
    fn run(&self, args: &[Word], env: &mut Environment) -> ExecStatus;

    /// Whether the command's redirections are applied around `run`.
    fn redirects(&self) -> bool {
        true
    }
}

pub struct BuiltinManager {
    commands: HashMap<&'static str, Box<dyn BuiltinCommand>>,
}

impl Default for BuiltinManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinManager {
    pub fn new() -> Self {
        let mut mgr = BuiltinManager {
            commands: HashMap::new(),
        };
        mgr.register(Box::new(ExitCommand { name: "exit" }));
        mgr.register(Box::new(ExitCommand { name: "quit" }));
        mgr.register(Box::new(CdCommand));
        mgr.register(Box::new(PwdCommand));
        mgr
    }

    pub fn register(&mut self, cmd: Box<dyn BuiltinCommand>) {
        self.commands.insert(cmd.name(), cmd);
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<&dyn BuiltinCommand> {
        self.commands.get(name).map(|cmd| cmd.as_ref())
    }
}

/// `exit` and `quit`. Arguments and redirections are ignored.
pub struct ExitCommand {
    name: &'static str,
}

impl BuiltinCommand for ExitCommand {
    fn name(&self) -> &'static str {
        self.name
    }
    fn redirects(&self) -> bool {
        false
    }
    fn run(&self, _args: &[Word], _env: &mut Environment) -> ExecStatus {
        Ok(Status::TerminateShell)
    }
}

/// `cd DIR`.
///
/// With no argument, or with more than one, this does nothing and succeeds.
/// A lone variable reference names the variable holding the target.
pub struct CdCommand;

impl BuiltinCommand for CdCommand {
    fn name(&self) -> &'static str {
        "cd"
    }
    fn run(&self, args: &[Word], env: &mut Environment) -> ExecStatus {
        let [dir] = args else {
            return Ok(Status::SUCCESS);
        };

        let path = match dir.as_variable() {
            Some(name) => env.get(name).ok_or_else(|| ExecError::DirectoryChange {
                path: format!("${}", name),
                source: io::Error::new(io::ErrorKind::NotFound, "variable is not set"),
            })?,
            None => expand(dir, env),
        };

        env.set_current_dir(Path::new(&path))
            .map_err(|source| ExecError::DirectoryChange { path, source })?;
        Ok(Status::SUCCESS)
    }
}

pub struct PwdCommand;

impl BuiltinCommand for PwdCommand {
    fn name(&self) -> &'static str {
        "pwd"
    }
    fn run(&self, _args: &[Word], env: &mut Environment) -> ExecStatus {
        let cwd = env.current_dir().map_err(ExecError::WorkingDirectory)?;
        let mut out = io::stdout().lock();
        writeln!(out, "{}", cwd.display())?;
        out.flush()?;
        Ok(Status::SUCCESS)
    }
}

/// `NAME=VALUE`: sets `name` in the process environment.
pub fn assign(name: &str, value: &Word, env: &mut Environment) -> ExecStatus {
    let value = expand(value, env);
    env.set(name, &value)?;
    Ok(Status::SUCCESS)
}
