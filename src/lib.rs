//! Evaluates parsed shell command trees against Unix process primitives.

pub mod ast;
pub mod config;
pub mod environment;
pub mod error;
pub mod executor;
pub mod expander;
pub mod logging;

pub use ast::{CommandNode, Fragment, IoMode, Operator, SimpleCommand, Word};
pub use executor::{evaluate, Executor, RecursiveExecutor, Status};
