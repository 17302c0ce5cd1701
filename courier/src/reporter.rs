//! Per-contact outcomes, the ordered event stream, and the persistence seam
//! consumed by the excluded UI/scheduler layers.

use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Why a whole session ended before its loop completed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    #[error("target app could not be launched")]
    LaunchFailure,
    #[error("target app never reached the foreground")]
    ForegroundTimeout,
    #[error("no conversation rows found")]
    NoContactsFound,
    #[error("session state machine violated an invariant")]
    StateMachineViolation,
    #[error("session interrupted externally")]
    Interrupted,
}

/// Why one contact's send failed; recoverable at the batch level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContactFailure {
    #[error("row activation failed: {0}")]
    ClickFailed(String),
    #[error("target app left the foreground: {0}")]
    LostForeground(String),
    #[error("message input not found: {0}")]
    InputNotFound(String),
    #[error("send control not found: {0}")]
    SendControlNotFound(String),
    #[error("element bounds invalid: {0}")]
    InvalidBounds(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    Sent,
    Failed,
    Skipped,
}

/// Outcome for one processed row. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactResult {
    pub name: String,
    pub status: ContactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// 1-based position in processing order.
    pub position: usize,
}

/// Batch arithmetic: `sent + failed + skipped == processed <= total_rows`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_rows: usize,
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SessionSummary {
    fn record(&mut self, status: ContactStatus) {
        self.processed += 1;
        match status {
            ContactStatus::Sent => self.sent += 1,
            ContactStatus::Failed => self.failed += 1,
            ContactStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Events emitted in processing order; the terminal event is always either
/// `Completed` or `Aborted`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Contact(ContactResult),
    Completed {
        summary: SessionSummary,
        results: Vec<ContactResult>,
    },
    Aborted {
        reason: AbortReason,
        message: String,
        summary: SessionSummary,
        results: Vec<ContactResult>,
    },
}

/// Collects ordered per-contact outcomes and fans them out to subscribers.
pub struct Reporter {
    tx: Option<UnboundedSender<SessionEvent>>,
    results: Vec<ContactResult>,
    summary: SessionSummary,
}

impl Reporter {
    pub fn new(total_rows: usize) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx: Some(tx),
                results: Vec::new(),
                summary: SessionSummary {
                    total_rows,
                    ..Default::default()
                },
            },
            rx,
        )
    }

    /// Reporter with no subscriber; results are still accumulated.
    pub fn detached(total_rows: usize) -> Self {
        Self {
            tx: None,
            results: Vec::new(),
            summary: SessionSummary {
                total_rows,
                ..Default::default()
            },
        }
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Fix up the row total once the scan has produced it; the event channel
    /// is handed out before the scan runs.
    pub fn set_total_rows(&mut self, total_rows: usize) {
        self.summary.total_rows = total_rows;
    }

    pub fn results(&self) -> &[ContactResult] {
        &self.results
    }

    /// Next 1-based position in processing order.
    pub fn next_position(&self) -> usize {
        self.results.len() + 1
    }

    pub fn contact(&mut self, result: ContactResult) {
        debug!(
            name = %result.name,
            status = ?result.status,
            position = result.position,
            "contact processed"
        );
        self.summary.record(result.status);
        self.emit(SessionEvent::Contact(result.clone()));
        self.results.push(result);
    }

    pub fn completed(&mut self) -> (SessionSummary, Vec<ContactResult>) {
        let summary = self.summary;
        let results = self.results.clone();
        self.emit(SessionEvent::Completed {
            summary,
            results: results.clone(),
        });
        (summary, results)
    }

    /// Abort still carries whatever was accumulated before it.
    pub fn aborted(&mut self, reason: AbortReason, message: String) -> (SessionSummary, Vec<ContactResult>) {
        warn!(?reason, %message, "session aborted");
        let summary = self.summary;
        let results = self.results.clone();
        self.emit(SessionEvent::Aborted {
            reason,
            message,
            summary,
            results: results.clone(),
        });
        (summary, results)
    }

    fn emit(&mut self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                // Subscriber went away; keep accumulating silently.
                self.tx = None;
            }
        }
    }
}

/// What one finished run leaves behind for the excluded layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub session_id: String,
    pub completed_at_epoch_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub summary: SessionSummary,
    pub results: Vec<ContactResult>,
}

impl RunRecord {
    pub fn new(
        session_id: String,
        abort_reason: Option<AbortReason>,
        summary: SessionSummary,
        results: Vec<ContactResult>,
    ) -> Self {
        let completed_at_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            session_id,
            completed_at_epoch_ms,
            abort_reason,
            summary,
            results,
        }
    }
}

/// Persistence seam. The excluded preference layer owns the backing storage;
/// the engine only writes, and only from the terminal transitions.
pub trait ResultStore: Send + Sync {
    fn record_run(&self, record: &RunRecord) -> Result<(), AutomationError>;
}

/// In-memory store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<Vec<RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.runs.lock().expect("store poisoned").last().cloned()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().expect("store poisoned").len()
    }
}

impl ResultStore for MemoryStore {
    fn record_run(&self, record: &RunRecord) -> Result<(), AutomationError> {
        self.runs.lock().expect("store poisoned").push(record.clone());
        Ok(())
    }
}
