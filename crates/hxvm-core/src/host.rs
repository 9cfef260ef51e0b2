//! Host collaborators: the write sink and the clock

use std::cell::Cell;

use chrono::{Duration, Local, NaiveDateTime};
use hxvm_bytecode::Value;

/// Destination of `WRITE` instructions
///
/// The return code is pushed back to the program as U8 and is otherwise
/// opaque to the VM. A failed write does not abort the run.
pub trait WriteSink {
    /// Write `value` to endpoint `eid`
    fn write(&mut self, eid: u32, value: &Value) -> u8;
}

impl<F> WriteSink for F
where
    F: FnMut(u32, &Value) -> u8,
{
    fn write(&mut self, eid: u32, value: &Value) -> u8 {
        self(eid, value)
    }
}

/// Sink that logs every write and accepts only scalar values
///
/// Returns 0 for Bool, U8, U32 and Float and 1 for anything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl WriteSink for LoggingSink {
    fn write(&mut self, eid: u32, value: &Value) -> u8 {
        tracing::info!(eid, kind = %value.kind(), %value, "endpoint write");
        if value.kind().is_arithmetic() { 0 } else { 1 }
    }
}

/// Source of wall-clock time
pub trait Clock {
    /// Current local time
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<NaiveDateTime>,
}

impl ManualClock {
    /// Create a clock stopped at `start`
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move to `time`
    pub fn set(&self, time: NaiveDateTime) {
        self.now.set(time);
    }

    /// Move by `delta`; saturates at the representable range
    pub fn advance(&self, delta: Duration) {
        let now = self.now.get();
        self.now.set(now.checked_add_signed(delta).unwrap_or(now));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> NaiveDateTime {
        (**self).now()
    }
}
