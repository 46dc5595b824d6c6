use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Status carried by progress events and returned as a run's terminal result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    New,
    Initializing,
    Running,
    Waiting,
    Complete,
    CompletedWithErrors,
    Failed,
    Cancelling,
    Cancelled,
}

impl Status {
    /// Terminal status of a deployment run.
    ///
    /// Manifest exceptions only matter when nothing else failed: they either
    /// downgrade the run to `CompletedWithErrors` (warnings allowed) or fail it.
    pub fn for_run(succeeded: bool, manifest_has_exceptions: bool, treat_as_warnings: bool) -> Self {
        match (succeeded, manifest_has_exceptions) {
            (false, _) => Status::Failed,
            (true, false) => Status::Complete,
            (true, true) if treat_as_warnings => Status::CompletedWithErrors,
            (true, true) => Status::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Complete | Status::CompletedWithErrors | Status::Failed | Status::Cancelled
        )
    }
}

/// Structured progress notification emitted at every step boundary and
/// every per-target operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub context: String,
    pub message: String,
    pub status: Status,
    pub instance_id: Uuid,
    pub sequence: u64,
    #[serde(default)]
    pub cancel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Fine-grained, informational notification (per-file copy activity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub context: String,
    pub message: String,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Receiver of a run's progress and log streams.
pub trait EventSink: Send + Sync {
    /// Handle a progress event. Returning `true` requests cancellation; the
    /// request is only honoured when the event announces a step start.
    fn progress(&self, event: &ProgressEvent) -> bool;

    fn log(&self, _event: &LogEvent) {}
}

/// Per-run emitter: stamps events with the correlation id and a gapless,
/// monotonically increasing sequence number.
pub struct Progress {
    sink: Arc<dyn EventSink>,
    instance_id: Uuid,
    sequence: AtomicU64,
}

impl Progress {
    pub fn new(sink: Arc<dyn EventSink>, instance_id: Uuid) -> Self {
        Self {
            sink,
            instance_id,
            sequence: AtomicU64::new(0),
        }
    }

    /// Number of progress events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn emit(
        &self,
        context: &str,
        message: &str,
        status: Status,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> bool {
        let event = ProgressEvent {
            context: context.to_string(),
            message: message.to_string(),
            status,
            instance_id: self.instance_id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            cancel: false,
            error: error.map(error_chain),
            ts: Utc::now(),
        };
        self.sink.progress(&event)
    }

    /// Announce a step. Returns `true` when the sink asks to cancel it.
    pub fn step_starting(&self, context: &str, message: &str) -> bool {
        let cancel = self.emit(context, message, Status::Running, None);
        if cancel {
            tracing::info!(context, "cancellation requested at step start");
        }
        cancel
    }

    pub fn step_progress(&self, context: &str, message: &str) {
        self.emit(context, message, Status::Running, None);
    }

    pub fn step_finished(&self, context: &str, message: &str) {
        self.emit(context, message, Status::Running, None);
    }

    pub fn step_failed(&self, context: &str, error: &(dyn std::error::Error + 'static)) {
        self.emit(context, &error.to_string(), Status::Running, Some(error));
    }

    pub fn finish(
        &self,
        context: &str,
        message: &str,
        status: Status,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) {
        self.emit(context, message, status, error);
    }

    pub fn log(&self, context: &str, message: &str, level: LogLevel) {
        self.sink.log(&LogEvent {
            context: context.to_string(),
            message: message.to_string(),
            level,
            error: None,
            ts: Utc::now(),
        });
    }
}

/// Render an error and all of its sources on one line.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

const RULE: &str = "--------------------------";

/// Phase banner, e.g. `---  Beginning content backup.  ---`.
pub fn banner(message: &str) -> String {
    format!("{RULE}  {message}  {RULE}")
}

/// `name.......: value`, padded to `width`.
pub fn padded(name: &str, value: impl std::fmt::Display, width: usize) -> String {
    format!("{name:.<width$}: {value}")
}

/// Elapsed time rounded to milliseconds, in human form.
pub fn elapsed(since: std::time::Instant) -> String {
    let millis = since.elapsed().as_millis() as u64;
    humantime::format_duration(std::time::Duration::from_millis(millis)).to_string()
}
