use std::os::fd::AsRawFd;

use super::builtins::{self, BuiltinCommand, BuiltinManager};
use super::launcher::{spawn_context, wait_for, ProcessLauncher};
use super::redirect::{dup2, RedirectHandler};
use crate::ast::{CommandNode, Operator, SimpleCommand};
use crate::config::Config;
use crate::environment::Environment;
use crate::error::ExecError;
use crate::executor::{Executor, Status};
use crate::expander::expand;

/// Walks a command tree, running leaves in-process or as child processes.
pub struct RecursiveExecutor {
    builtins: BuiltinManager,
    redirects: RedirectHandler,
    launcher: ProcessLauncher,
}

impl Default for RecursiveExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursiveExecutor {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        let redirects = RedirectHandler::new(config.file_mode);
        RecursiveExecutor {
            builtins: BuiltinManager::new(),
            launcher: ProcessLauncher::new(redirects.clone()),
            redirects,
        }
    }

    pub fn register_builtin(&mut self, cmd: Box<dyn BuiltinCommand>) {
        self.builtins.register(cmd);
    }

    fn exec_leaf(&mut self, cmd: &SimpleCommand, env: &mut Environment) -> Status {
        let verb = expand(&cmd.verb, env);

        if let Some(builtin) = self.builtins.find(&verb) {
            log::debug!("builtin {}", verb);
            if !builtin.redirects() {
                return builtin.run(&cmd.params, env).unwrap_or_else(|e| e.report());
            }
            let _saved = match self.redirects.scoped(cmd, env) {
                Ok(saved) => saved,
                Err(e) => return e.report(),
            };
            // report while still redirected so the message honors `2>`
            return builtin.run(&cmd.params, env).unwrap_or_else(|e| e.report());
        }

        // assignments leave the standard streams alone
        if let Some((name, value)) = cmd.verb.as_assignment() {
            log::debug!("assign {}", name);
            return builtins::assign(name, &value, env).unwrap_or_else(|e| e.report());
        }

        self.launcher.launch(cmd, env).unwrap_or_else(|e| e.report())
    }

    /// Runs both sides in their own contexts; succeeds only if both do.
    fn exec_parallel(
        &mut self,
        left: &CommandNode,
        right: &CommandNode,
        env: &mut Environment,
    ) -> Status {
        let first = spawn_context(|| self.exec(left, env));
        let second = spawn_context(|| self.exec(right, env));

        let mut ok = true;
        for pid in [first, second] {
            let status = pid.and_then(wait_for).unwrap_or_else(|e| e.report());
            ok &= status.is_success();
        }
        Status::from_success(ok)
    }

    /// Connects `left`'s standard output to `right`'s standard input. The
    /// status is the consumer's; the producer's is only logged.
    fn exec_pipe(
        &mut self,
        left: &CommandNode,
        right: &CommandNode,
        env: &mut Environment,
    ) -> Status {
        let (reader, writer) = match nix::unistd::pipe() {
            Ok(fds) => fds,
            Err(e) => return ExecError::from(e).report(),
        };
        let (read_fd, write_fd) = (reader.as_raw_fd(), writer.as_raw_fd());

        let producer = spawn_context(|| {
            if let Err(e) = dup2(write_fd, libc::STDOUT_FILENO) {
                return ExecError::from(e).report();
            }
            let _ = nix::unistd::close(read_fd);
            let _ = nix::unistd::close(write_fd);
            self.exec(left, env)
        });
        let consumer = spawn_context(|| {
            if let Err(e) = dup2(read_fd, libc::STDIN_FILENO) {
                return ExecError::from(e).report();
            }
            let _ = nix::unistd::close(read_fd);
            let _ = nix::unistd::close(write_fd);
            self.exec(right, env)
        });

        // the consumer only sees end-of-file once every write end is closed
        drop(reader);
        drop(writer);

        match producer {
            Ok(pid) => match wait_for(pid) {
                Ok(status) => log::debug!("pipe producer finished with {}", status),
                Err(e) => log::debug!("pipe producer failed: {}", e),
            },
            Err(e) => {
                e.report();
            }
        }
        consumer.and_then(wait_for).unwrap_or_else(|e| e.report())
    }
}

impl Executor for RecursiveExecutor {
    fn exec(&mut self, node: &CommandNode, env: &mut Environment) -> Status {
        let (op, left, right) = match node {
            CommandNode::Leaf(cmd) => return self.exec_leaf(cmd, env),
            CommandNode::Binary { op, left, right } => (*op, left.as_ref(), right.as_ref()),
        };
        log::trace!("evaluating {:?}", op);

        match op {
            Operator::Sequential => match self.exec(left, env) {
                Status::TerminateShell => Status::TerminateShell,
                Status::Code(_) => self.exec(right, env),
            },
            Operator::ConditionalZero => match self.exec(left, env) {
                Status::Code(0) => self.exec(right, env),
                status => status,
            },
            Operator::ConditionalNonzero => match self.exec(left, env) {
                Status::Code(0) => Status::SUCCESS,
                Status::TerminateShell => Status::TerminateShell,
                Status::Code(_) => self.exec(right, env),
            },
            Operator::Parallel => self.exec_parallel(left, right, env),
            Operator::Pipe => self.exec_pipe(left, right, env),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use std::path::Path;

    use super::*;
    use crate::ast::{Fragment, Word};
    use crate::executor::tests::{lock, CwdGuard};

    fn cmd(verb: &str, args: &[&str]) -> SimpleCommand {
        args.iter()
            .fold(SimpleCommand::new(Word::literal(verb)), |c, a| c.arg(Word::literal(a)))
    }

    fn leaf(verb: &str, args: &[&str]) -> CommandNode {
        cmd(verb, args).into()
    }

    fn sh(script: &str) -> CommandNode {
        leaf("sh", &["-c", script])
    }

    fn assignment(name: &str, value: &str) -> CommandNode {
        SimpleCommand::new(Word::new(vec![
            Fragment::Literal(name.to_string()),
            Fragment::Literal("=".to_string()),
            Fragment::Literal(value.to_string()),
        ]))
        .into()
    }

    fn seq(l: CommandNode, r: CommandNode) -> CommandNode {
        CommandNode::binary(Operator::Sequential, l, r)
    }

    fn and(l: CommandNode, r: CommandNode) -> CommandNode {
        CommandNode::binary(Operator::ConditionalZero, l, r)
    }

    fn or(l: CommandNode, r: CommandNode) -> CommandNode {
        CommandNode::binary(Operator::ConditionalNonzero, l, r)
    }

    fn par(l: CommandNode, r: CommandNode) -> CommandNode {
        CommandNode::binary(Operator::Parallel, l, r)
    }

    fn pipe(l: CommandNode, r: CommandNode) -> CommandNode {
        CommandNode::binary(Operator::Pipe, l, r)
    }

    fn run(node: &CommandNode) -> Status {
        let mut env = Environment::new();
        RecursiveExecutor::new().exec(node, &mut env)
    }

    /// Runs `f` from inside a fresh temporary directory.
    fn in_temp_dir(f: impl FnOnce(&Path)) {
        let _lock = lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().canonicalize().unwrap();
        let _cwd = CwdGuard::enter(&path);
        f(&path);
    }

    #[test]
    fn test_exit_and_quit_terminate() {
        in_temp_dir(|_| {
            assert_eq!(run(&leaf("exit", &[])), Status::TerminateShell);
            assert_eq!(run(&leaf("quit", &[])), Status::TerminateShell);
            assert_eq!(run(&leaf("exit", &["3", "4"])), Status::TerminateShell);
        });
    }

    #[test]
    fn test_exit_opens_no_redirection_targets() {
        in_temp_dir(|dir| {
            let exit = cmd("exit", &[]).stdout(Word::literal("/nonexistent/dir/out.txt"));
            assert_eq!(run(&exit.into()), Status::TerminateShell);

            std::fs::write("keep.txt", "data").unwrap();
            let quit = cmd("quit", &[])
                .stdin(Word::literal("missing.txt"))
                .stdout(Word::literal("keep.txt"))
                .stderr(Word::literal("err.txt"));
            assert_eq!(run(&quit.into()), Status::TerminateShell);
            assert_eq!(read_to_string("keep.txt").unwrap(), "data");
            assert!(!dir.join("err.txt").exists());
        });
    }

    #[test]
    fn test_assignment_ignores_redirections() {
        in_temp_dir(|dir| {
            let mut env = Environment::new();
            let assign = SimpleCommand::new(Word::new(vec![
                Fragment::Literal("TINY_SHELL_REDIR_X".to_string()),
                Fragment::Literal("=1".to_string()),
            ]))
            .stdin(Word::literal("missing.txt"))
            .stdout(Word::literal("out.txt"));
            let status = RecursiveExecutor::new().exec(&assign.into(), &mut env);
            assert_eq!(status, Status::SUCCESS);
            assert_eq!(env.get("TINY_SHELL_REDIR_X").as_deref(), Some("1"));
            assert!(!dir.join("out.txt").exists());
        });
    }

    #[test]
    fn test_external_status() {
        in_temp_dir(|_| {
            assert_eq!(run(&leaf("true", &[])), Status::SUCCESS);
            assert_eq!(run(&sh("exit 3")), Status::Code(3));
            assert_eq!(
                run(&leaf("tiny-shell-no-such-command", &[])),
                Status::Code(libc::ENOENT)
            );
        });
    }

    #[test]
    fn test_sequential_sees_environment_changes() {
        in_temp_dir(|_| {
            let tree = seq(
                assignment("TINY_SHELL_SEQ_X", "5"),
                sh("printf %s \"$TINY_SHELL_SEQ_X\" > x.txt; exit 4"),
            );
            assert_eq!(run(&tree), Status::Code(4));
            assert_eq!(read_to_string("x.txt").unwrap(), "5");
        });
    }

    #[test]
    fn test_sequential_discards_left_status() {
        in_temp_dir(|_| {
            assert_eq!(run(&seq(leaf("false", &[]), leaf("true", &[]))), Status::SUCCESS);
        });
    }

    #[test]
    fn test_assignment_visible_to_word_expansion() {
        in_temp_dir(|_| {
            let echo = SimpleCommand::new(Word::literal("printf"))
                .arg(Word::literal("%s"))
                .arg(Word::variable("TINY_SHELL_ASSIGN_X"))
                .stdout(Word::literal("out.txt"));
            let tree = seq(assignment("TINY_SHELL_ASSIGN_X", "5"), echo.into());
            assert_eq!(run(&tree), Status::SUCCESS);
            assert_eq!(read_to_string("out.txt").unwrap(), "5");
        });
    }

    #[test]
    fn test_conditional_zero() {
        in_temp_dir(|_| {
            assert_eq!(run(&and(sh("exit 2"), leaf("touch", &["ran"]))), Status::Code(2));
            assert!(!Path::new("ran").exists());

            assert_eq!(run(&and(leaf("true", &[]), sh("touch ran; exit 7"))), Status::Code(7));
            assert!(Path::new("ran").exists());
        });
    }

    #[test]
    fn test_conditional_nonzero() {
        in_temp_dir(|_| {
            assert_eq!(run(&or(leaf("true", &[]), leaf("touch", &["ran"]))), Status::SUCCESS);
            assert!(!Path::new("ran").exists());

            assert_eq!(run(&or(sh("exit 3"), sh("touch ran; exit 5"))), Status::Code(5));
            assert!(Path::new("ran").exists());
        });
    }

    #[test]
    fn test_terminate_propagates_through_sequencing() {
        in_temp_dir(|_| {
            assert_eq!(
                run(&seq(leaf("exit", &[]), leaf("touch", &["after"]))),
                Status::TerminateShell
            );
            assert!(!Path::new("after").exists());

            assert_eq!(run(&and(leaf("true", &[]), leaf("quit", &[]))), Status::TerminateShell);
            assert_eq!(run(&or(leaf("exit", &[]), leaf("true", &[]))), Status::TerminateShell);
            assert_eq!(run(&or(leaf("false", &[]), leaf("exit", &[]))), Status::TerminateShell);
        });
    }

    #[test]
    fn test_terminate_is_contained_by_contexts() {
        in_temp_dir(|_| {
            assert_eq!(run(&par(leaf("exit", &[]), leaf("true", &[]))), Status::FAILURE);
            assert_eq!(run(&pipe(leaf("true", &[]), leaf("exit", &[]))), Status::FAILURE);
            assert_eq!(run(&pipe(leaf("exit", &[]), leaf("true", &[]))), Status::SUCCESS);
        });
    }

    #[test]
    fn test_parallel() {
        in_temp_dir(|_| {
            let tree = par(sh("echo a > a.txt"), sh("echo b > b.txt"));
            assert_eq!(run(&tree), Status::SUCCESS);
            assert_eq!(read_to_string("a.txt").unwrap(), "a\n");
            assert_eq!(read_to_string("b.txt").unwrap(), "b\n");

            let tree = par(sh("echo c > c.txt"), sh("echo d > d.txt; exit 9"));
            assert_eq!(run(&tree), Status::FAILURE);
            assert!(Path::new("c.txt").exists());
            assert!(Path::new("d.txt").exists());
        });
    }

    #[test]
    fn test_parallel_isolates_environment_and_cwd() {
        in_temp_dir(|dir| {
            let mut env = Environment::new();
            env.unset("TINY_SHELL_PAR_X");
            let tree = par(assignment("TINY_SHELL_PAR_X", "1"), leaf("cd", &["/"]));
            assert_eq!(RecursiveExecutor::new().exec(&tree, &mut env), Status::SUCCESS);
            assert_eq!(env.get("TINY_SHELL_PAR_X"), None);
            assert_eq!(env.current_dir().unwrap(), dir);
        });
    }

    #[test]
    fn test_pipe_uses_consumer_status() {
        in_temp_dir(|_| {
            let consumer = cmd("cat", &[]).stdout(Word::literal("out.txt"));
            let tree = pipe(sh("printf abc; exit 3"), consumer.into());
            assert_eq!(run(&tree), Status::SUCCESS);
            assert_eq!(read_to_string("out.txt").unwrap(), "abc");

            let tree = pipe(leaf("true", &[]), sh("cat > /dev/null; exit 4"));
            assert_eq!(run(&tree), Status::Code(4));
        });
    }

    #[test]
    fn test_pipe_chain_with_builtin_producer() {
        in_temp_dir(|dir| {
            let tree = pipe(
                pipe(leaf("pwd", &[]), leaf("cat", &[])),
                cmd("cat", &[]).stdout(Word::literal("out.txt")).into(),
            );
            assert_eq!(run(&tree), Status::SUCCESS);
            assert_eq!(read_to_string("out.txt").unwrap(), format!("{}\n", dir.display()));
        });
    }

    #[test]
    fn test_pipe_isolates_cwd() {
        in_temp_dir(|dir| {
            let consumer = cmd("pwd", &[]).stdout(Word::literal("cwd.txt"));
            let tree = pipe(leaf("cd", &["/"]), consumer.into());
            assert_eq!(run(&tree), Status::SUCCESS);
            let cwd = read_to_string(dir.join("cwd.txt")).unwrap();
            assert_eq!(cwd, format!("{}\n", dir.display()));
        });
    }

    #[test]
    fn test_redirection_round_trip() {
        in_temp_dir(|_| {
            let write = cmd("printf", &["hello"]).stdout(Word::literal("f.txt"));
            let read = cmd("cat", &[])
                .stdin(Word::literal("f.txt"))
                .stdout(Word::literal("g.txt"));
            assert_eq!(run(&seq(write.into(), read.into())), Status::SUCCESS);
            assert_eq!(read_to_string("g.txt").unwrap(), "hello");
        });
    }

    #[test]
    fn test_append_redirection() {
        in_temp_dir(|_| {
            let first = cmd("echo", &["one"]).stdout(Word::literal("log.txt"));
            let second = cmd("echo", &["two"]).stdout(Word::literal("log.txt")).append();
            assert_eq!(run(&seq(first.into(), second.into())), Status::SUCCESS);
            assert_eq!(read_to_string("log.txt").unwrap(), "one\ntwo\n");
        });
    }

    #[test]
    fn test_missing_input_fails_command() {
        in_temp_dir(|_| {
            let external = cmd("cat", &[]).stdin(Word::literal("missing.txt"));
            assert_eq!(run(&external.into()), Status::FAILURE);

            let builtin = cmd("pwd", &[]).stdin(Word::literal("missing.txt"));
            assert_eq!(run(&builtin.into()), Status::FAILURE);
        });
    }

    #[test]
    fn test_cd_and_pwd() {
        in_temp_dir(|dir| {
            std::fs::create_dir("sub").unwrap();
            let out = dir.join("pwd.txt");
            let pwd = cmd("pwd", &[]).stdout(Word::literal(out.to_str().unwrap()));
            assert_eq!(run(&seq(leaf("cd", &["sub"]), pwd.into())), Status::SUCCESS);
            assert_eq!(read_to_string(&out).unwrap(), format!("{}\n", dir.join("sub").display()));
        });
    }

    #[test]
    fn test_cd_noop_and_failure() {
        in_temp_dir(|dir| {
            let mut env = Environment::new();
            let mut executor = RecursiveExecutor::new();

            assert_eq!(executor.exec(&leaf("cd", &[]), &mut env), Status::SUCCESS);
            assert_eq!(env.current_dir().unwrap(), dir);

            // more than one argument is deliberately a no-op as well
            assert_eq!(executor.exec(&leaf("cd", &["/", "/tmp"]), &mut env), Status::SUCCESS);
            assert_eq!(env.current_dir().unwrap(), dir);

            let failing = cmd("cd", &["/nonexistent"]).stderr(Word::literal("err.txt"));
            assert_eq!(executor.exec(&failing.into(), &mut env), Status::FAILURE);
            assert_eq!(env.current_dir().unwrap(), dir);
            assert!(read_to_string(dir.join("err.txt")).unwrap().contains("/nonexistent"));
        });
    }

    #[test]
    fn test_pwd_in_removed_directory_fails() {
        in_temp_dir(|dir| {
            let gone = dir.join("gone");
            std::fs::create_dir(&gone).unwrap();
            let _cwd = CwdGuard::enter(&gone);
            std::fs::remove_dir(&gone).unwrap();

            let pwd = cmd("pwd", &[])
                .stdout(Word::literal(dir.join("out.txt").to_str().unwrap()))
                .stderr(Word::literal(dir.join("err.txt").to_str().unwrap()));
            assert_eq!(run(&pwd.into()), Status::FAILURE);
            assert_eq!(read_to_string(dir.join("out.txt")).unwrap(), "");
            assert!(read_to_string(dir.join("err.txt")).unwrap().contains("pwd: "));
        });
    }

    #[test]
    fn test_builtin_redirection_is_restored() {
        in_temp_dir(|_| {
            let pwd = cmd("pwd", &[]).stdout(Word::literal("first.txt"));
            let tree = seq(pwd.into(), sh("echo sh > second.txt"));
            assert_eq!(run(&tree), Status::SUCCESS);
            assert_eq!(read_to_string("second.txt").unwrap(), "sh\n");
            // nothing from the second command leaked into the first file
            assert_eq!(read_to_string("first.txt").unwrap().lines().count(), 1);
        });
    }

    #[test]
    fn test_invalid_assignment_fails() {
        in_temp_dir(|_| {
            assert_eq!(run(&assignment("", "1")), Status::FAILURE);
        });
    }
}
