//! Chat-app broadcast automation through accessibility APIs
//!
//! This crate drives a third-party messaging application by observing and
//! manipulating its on-screen UI tree via an OS accessibility interface —
//! there is no message-send API underneath. One [`Automation`] session
//! launches the target app exactly once, waits for it to reach the
//! foreground, classifies its conversation list, and walks every row through
//! a multi-step send protocol with layered fallback strategies.

use std::sync::Arc;
use tracing::instrument;

pub mod classifier;
pub mod errors;
pub mod node;
pub mod platforms;
pub mod protocol;
pub mod reporter;
pub mod session;
pub mod strategies;
#[cfg(test)]
mod tests;

pub use classifier::{classify_rows, ClassifierConfig, ConversationRow};
pub use errors::AutomationError;
pub use node::{Bounds, NodeAttributes, UiNode, UiNodeImpl};
pub use platforms::{AccessibilityBridge, WindowChange};
pub use protocol::{RowOutcome, RowPlan};
pub use reporter::{
    AbortReason, ContactFailure, ContactResult, ContactStatus, MemoryStore, ResultStore,
    RunRecord, SessionEvent, SessionSummary,
};
pub use session::{SessionConfig, SessionHandle, SessionPhase};

/// How a click landed: which mechanism fired and where.
#[derive(Debug)]
pub struct ClickResult {
    pub method: String,
    pub coordinates: Option<(f64, f64)>,
    pub details: String,
}

/// The main entry point for broadcast automation.
///
/// Owns the platform bridge, the persistence seam, and the at-most-one
/// active session guard. Sessions run as detached tokio tasks; construct
/// this inside a runtime.
pub struct Automation {
    runner: session::SessionRunner,
}

impl Automation {
    pub fn new(
        bridge: Arc<dyn AccessibilityBridge>,
        config: SessionConfig,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            runner: session::SessionRunner::new(bridge, config, store),
        }
    }

    /// Trigger a send session with the given message body.
    ///
    /// Returns `None` — a deliberate no-op, not an error — when a session is
    /// already active; triggers are rejected, never queued.
    #[instrument(skip(self, message))]
    pub fn start_session(&self, message: impl Into<String>) -> Option<SessionHandle> {
        self.runner.trigger(message.into())
    }

    /// Whether a session currently holds the singleton guard.
    pub fn is_session_active(&self) -> bool {
        self.runner.is_active()
    }
}
