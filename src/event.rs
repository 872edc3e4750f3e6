//! Core event record and identifier types shared across the runtime.
//!
//! An [`Event`] is a plain-data value: the hot path copies it into a ring
//! buffer and the flush worker serializes it without ever running user code.

/// Nanosecond timestamp. Steady-clock timestamps count from the process
/// steady epoch; system-clock timestamps count from the Unix epoch.
pub type TimestampNanos = i64;

/// Identifier assigned to an instrumented function by the compiler pass.
pub type FunctionId = u64;

/// Identifier shared by every trace file written during one runtime
/// activation.
pub type SessionId = u64;

/// Operating-system process identifier.
pub type ProcessId = i64;

/// 64-bit hash of the platform thread identifier. Embedded in trace file
/// names and headers.
pub type TraceThreadId = u64;

/// Whether an event marks entering or leaving a function.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EventKind {
    #[default]
    FunctionEntry = 0,
    FunctionExit = 1,
}

/// A single enter/exit observation.
///
/// Trivially copyable by design: ring buffers overwrite events on wrap
/// without running destructors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub function_id: FunctionId,
    pub steady_clock_timestamp: TimestampNanos,
}

impl Event {
    pub fn new(
        kind: EventKind,
        function_id: FunctionId,
        steady_clock_timestamp: TimestampNanos,
    ) -> Self {
        Self {
            kind,
            function_id,
            steady_clock_timestamp,
        }
    }
}
