//! Host-facing state machine wrapper

use std::sync::Arc;

use chrono::NaiveDateTime;
use hxvm_bytecode::{Program, Value};
use serde::{Deserialize, Serialize};

use crate::config::MachineConfig;
use crate::datetime;
use crate::error::VmResult;
use crate::host::{Clock, WriteSink};
use crate::interpreter::Interpreter;

/// Data of a received packet that starts a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Sender address
    pub source: [u8; 16],
    /// Endpoint the value was reported for
    pub eid: u32,
    /// Reported value
    pub value: Value,
}

impl Trigger {
    /// Create a trigger
    pub fn new(source: [u8; 16], eid: u32, value: Value) -> Self {
        Self { source, eid, value }
    }
}

/// State kept between runs
///
/// Times are whole seconds since `creation_time`. The host may persist this
/// value; the VM never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineState {
    /// State the program is in
    pub current_state: u32,
    /// When `current_state` was entered
    pub state_entered_at: u32,
    /// Origin of the timestamps above
    pub creation_time: NaiveDateTime,
}

impl MachineState {
    /// Fresh state entered at `creation_time`
    pub fn new(initial_state: u32, creation_time: NaiveDateTime) -> Self {
        Self {
            current_state: initial_state,
            state_entered_at: 0,
            creation_time,
        }
    }

    /// Seconds since `creation_time` at `now`
    pub fn timestamp(&self, now: NaiveDateTime) -> u32 {
        datetime::timestamp(now, self.creation_time)
    }

    /// Seconds spent in the current state at `now`
    pub fn dwell_time(&self, now: NaiveDateTime) -> u32 {
        self.timestamp(now).wrapping_sub(self.state_entered_at)
    }

    /// Move to `state`, entered at `now`
    pub fn enter(&mut self, state: u32, now: NaiveDateTime) {
        self.current_state = state;
        self.state_entered_at = self.timestamp(now);
    }
}

/// Result of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `RET_STAY`
    Stayed {
        /// Unchanged state
        state: u32,
    },
    /// `RET_CHANGE`; `from` and `to` may be equal
    Changed {
        /// State before the run
        from: u32,
        /// State after the run
        to: u32,
    },
}

impl Outcome {
    /// State after the run
    pub fn state(&self) -> u32 {
        match *self {
            Self::Stayed { state } => state,
            Self::Changed { to, .. } => to,
        }
    }
}

/// A loaded program together with its persistent state and collaborators
///
/// Runs are serialised through `&mut self`.
#[derive(Debug)]
pub struct Machine<S, C> {
    program: Arc<Program>,
    state: MachineState,
    sink: S,
    clock: C,
    config: MachineConfig,
}

impl<S: WriteSink, C: Clock> Machine<S, C> {
    /// Load `program` with the default configuration
    pub fn new(program: impl Into<Arc<Program>>, sink: S, clock: C) -> VmResult<Self> {
        Self::with_config(program, sink, clock, MachineConfig::default())
    }

    /// Load `program` with a custom configuration
    pub fn with_config(
        program: impl Into<Arc<Program>>,
        sink: S,
        clock: C,
        config: MachineConfig,
    ) -> VmResult<Self> {
        let program = program.into();
        if config.validate_on_load {
            program.validate()?;
        }
        let state = MachineState::new(config.initial_state, clock.now());
        Ok(Self {
            program,
            state,
            sink,
            clock,
            config,
        })
    }

    /// Run once; `trigger` selects the packet entry, `None` the periodic one
    pub fn run(&mut self, trigger: Option<&Trigger>) -> VmResult<Outcome> {
        Interpreter::execute(
            &self.program,
            &mut self.state,
            trigger,
            &mut self.sink,
            &self.clock,
            &self.config,
        )
    }

    /// Run for a received packet
    pub fn run_packet(&mut self, trigger: &Trigger) -> VmResult<Outcome> {
        self.run(Some(trigger))
    }

    /// Run for the periodic timer
    pub fn run_periodic(&mut self) -> VmResult<Outcome> {
        self.run(None)
    }

    /// Install a new program and restart from the initial state
    ///
    /// A program that fails validation is rejected and the old one kept.
    pub fn replace_program(&mut self, program: impl Into<Arc<Program>>) -> VmResult<()> {
        let program = program.into();
        if self.config.validate_on_load {
            program.validate()?;
        }
        self.program = program;
        self.state.enter(self.config.initial_state, self.clock.now());
        tracing::info!(
            state = self.state.current_state,
            len = self.program.len(),
            "program replaced"
        );
        Ok(())
    }

    /// Persistent state
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// Restore persisted state
    pub fn restore(&mut self, state: MachineState) {
        self.state = state;
    }

    /// Loaded program
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Active configuration
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The write sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The write sink, mutably
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The clock
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
