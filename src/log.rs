//! `LogEvent`/`LogHandler` (§6, §9 "logging is an injected sink"). Every
//! terminating statement execution emits exactly one event; failures to
//! call the sink (slow or panicking handlers) must never block the
//! interpreter, so dispatch happens only after the terminating `Result` is
//! already decided (§8 property 14).

use std::sync::Arc;

/// One terminating outcome of a statement execution (§3 "LogEvent").
#[derive(Debug, Clone)]
pub enum LogEvent {
    Success {
        sql: String,
        params: Vec<String>,
    },
    ProcessingFailure {
        sql: String,
        params: Vec<String>,
        cause: String,
    },
    ExecFailure {
        sql: String,
        params: Vec<String>,
        cause: String,
    },
}

/// A sink for [`LogEvent`]s, injected into a `Connection` (§9). The core
/// never inspects a handler's return value nor unwinds because of one; a
/// handler that panics takes down the caller's task, not the interpreter's
/// already-decided result.
pub trait LogHandler: Send + Sync {
    fn log(&self, event: LogEvent);
}

/// The default handler: structured `tracing` spans, one line per event,
/// matching the source crate's `tracing::info!`/`tracing::warn!` idiom for
/// the ambient logging stack (§2).
#[derive(Debug, Default)]
pub struct TracingLogHandler;

impl LogHandler for TracingLogHandler {
    fn log(&self, event: LogEvent) {
        match event {
            LogEvent::Success { sql, params } => {
                tracing::debug!(sql, params = %params.join(", "), "statement succeeded");
            }
            LogEvent::ProcessingFailure { sql, params, cause } => {
                tracing::warn!(sql, params = %params.join(", "), cause, "statement failed while consuming results");
            }
            LogEvent::ExecFailure { sql, params, cause } => {
                tracing::warn!(sql, params = %params.join(", "), cause, "statement failed to execute");
            }
        }
    }
}

/// Discards every event. Used by tests that only care about the `Result`.
#[derive(Debug, Default)]
pub struct NoopLogHandler;

impl LogHandler for NoopLogHandler {
    fn log(&self, _event: LogEvent) {}
}

/// An in-memory sink that retains every event it receives, for assertions
/// in scenario tests (§8 S1-S6 call for exact log-event counts/shapes).
#[derive(Default)]
pub struct RecordingLogHandler {
    events: std::sync::Mutex<Vec<LogEvent>>,
}

impl RecordingLogHandler {
    pub fn new() -> Self {
        RecordingLogHandler::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("log mutex poisoned").clone()
    }
}

impl LogHandler for RecordingLogHandler {
    fn log(&self, event: LogEvent) {
        self.events.lock().expect("log mutex poisoned").push(event);
    }
}

pub fn arc_tracing_handler() -> Arc<dyn LogHandler> {
    Arc::new(TracingLogHandler)
}
