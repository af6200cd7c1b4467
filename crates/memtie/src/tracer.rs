//! Call tracing for the bridge.
//!
//! Mirrors how the bridge is used from a host: every call is observed once on entry and
//! once on completion. [`Bridge`](crate::Bridge) carries the tracer as a type parameter,
//! so with [`NoopTracer`] all hooks compile away.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable call log to stderr |
//! | [`RecordingTracer`] | Keeps every [`CallEvent`] for assertions or post-mortem |

use crate::{bridge::BridgeFunction, error::BridgeError, value::HostValue};

/// A traced bridge event.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A function was entered with the given arguments.
    Call {
        function: BridgeFunction,
        args: Vec<HostValue>,
    },
    /// A function returned successfully.
    Return { function: BridgeFunction, value: HostValue },
    /// A function failed.
    Error { function: BridgeFunction, error: BridgeError },
}

/// Hooks invoked by the bridge around every call.
///
/// All methods default to no-ops; implementations override what they need.
pub trait CallTracer: std::fmt::Debug {
    /// Called before arity checking, with the raw host arguments.
    #[inline(always)]
    fn on_call(&mut self, _function: BridgeFunction, _args: &[HostValue]) {}

    /// Called after a successful call.
    #[inline(always)]
    fn on_return(&mut self, _function: BridgeFunction, _value: &HostValue) {}

    /// Called after a failed call, before the error reaches the host.
    #[inline(always)]
    fn on_error(&mut self, _function: BridgeFunction, _error: &BridgeError) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CallTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints one line per event to stderr.
///
/// ```text
///   >>> map(0, 4096, 3, 34, -1, 0)
///   <<< map = 140187732525056
///   >>> unmap(1, 4096)
///   !!! unmap: munmap: EINVAL, Invalid argument
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Number of calls traced so far.
    calls: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls seen so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl CallTracer for StderrTracer {
    fn on_call(&mut self, function: BridgeFunction, args: &[HostValue]) {
        self.calls += 1;
        let args = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        eprintln!("  >>> {function}({args})");
    }

    fn on_return(&mut self, function: BridgeFunction, value: &HostValue) {
        eprintln!("  <<< {function} = {value}");
    }

    fn on_error(&mut self, function: BridgeFunction, error: &BridgeError) {
        eprintln!("  !!! {function}: {error}");
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<CallEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[CallEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<CallEvent> {
        self.events
    }

    /// Number of calls that ended in an error.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, CallEvent::Error { .. })).count()
    }
}

impl CallTracer for RecordingTracer {
    fn on_call(&mut self, function: BridgeFunction, args: &[HostValue]) {
        self.events.push(CallEvent::Call {
            function,
            args: args.to_vec(),
        });
    }

    fn on_return(&mut self, function: BridgeFunction, value: &HostValue) {
        self.events.push(CallEvent::Return {
            function,
            value: value.clone(),
        });
    }

    fn on_error(&mut self, function: BridgeFunction, error: &BridgeError) {
        self.events.push(CallEvent::Error {
            function,
            error: error.clone(),
        });
    }
}
