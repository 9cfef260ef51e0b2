//! # Hexabus VM Core
//!
//! Execution engine for Hexabus rule programs.
//!
//! ## Design Principles
//!
//! - **Fixed footprint**: Operand stack and register file are fixed-size arrays
//! - **Per-run scratch**: Every invocation starts from a fresh [`ExecContext`]
//! - **Fail fast**: The first violated precondition aborts the run
//! - **Host owns persistence**: Only [`MachineState`] survives between runs
//!
//! The host supplies two collaborators: a [`WriteSink`] that carries out
//! `WRITE` instructions and a [`Clock`] for wall-clock time.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub(crate) mod datetime;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod machine;
pub mod ops;
pub mod stack;

pub use config::MachineConfig;
pub use context::ExecContext;
pub use error::{ErrorKind, VmError, VmResult};
pub use host::{Clock, LoggingSink, ManualClock, SystemClock, WriteSink};
pub use interpreter::Interpreter;
pub use machine::{Machine, MachineState, Outcome, Trigger};
pub use stack::OperandStack;

pub use hxvm_bytecode as bytecode;

/// Operand stack capacity
pub const STACK_CAPACITY: usize = 32;

/// Register file size
pub const REGISTER_COUNT: usize = 16;
