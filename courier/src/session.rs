//! The session state machine: one linear, cooperatively-suspending task that
//! owns the launch-once invariant, the foreground wait, and the per-contact
//! loop. All shared flags live behind atomics; the only writer is this task.

use crate::classifier::{classify_rows, find_list_container, ClassifierConfig};
use crate::platforms::{AccessibilityBridge, WindowChange};
use crate::protocol::{self, RowOutcome, RowPlan};
use crate::reporter::{
    AbortReason, ContactResult, ContactStatus, Reporter, ResultStore, RunRecord, SessionEvent,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tuning knobs for one send session. Defaults carry the production
/// constants; tests compress the timings under a paused clock.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Candidate package identifiers of the target app, probed in order.
    pub packages: Vec<String>,
    /// Foreground poll interval while waiting for the app to come up.
    pub foreground_poll: Duration,
    /// Bound on the foreground wait.
    pub foreground_timeout: Duration,
    /// Fixed settle delay after navigation-changing actions.
    pub settle_delay: Duration,
    /// Randomized wait after setting the message text, lower bound.
    pub send_delay_min: Duration,
    /// Randomized wait after setting the message text, upper bound.
    pub send_delay_max: Duration,
    /// Delay before each scan retry.
    pub scan_retry_delay: Duration,
    /// Safety cap on rows processed in one session.
    pub max_rows: usize,
    /// How far up the tree clickable ancestors are searched.
    pub clickable_hops: usize,
    /// Rows shorter than this are decorative separators.
    pub min_row_height: f64,
    /// Vertical band for row deduplication.
    pub dedup_band_px: f64,
    /// Duration of synthesized tap gestures.
    pub tap_duration: Duration,
    /// Resource-id fragments known to mark send controls.
    pub send_control_ids: Vec<String>,
    /// Label/id fragments marking a message-entry field.
    pub input_hints: Vec<String>,
    /// Label/id fragments marking a search field.
    pub search_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            foreground_poll: Duration::from_secs(1),
            foreground_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(1200),
            send_delay_min: Duration::from_secs(1),
            send_delay_max: Duration::from_secs(3),
            scan_retry_delay: Duration::from_millis(1500),
            max_rows: 500,
            clickable_hops: 5,
            min_row_height: 48.0,
            dedup_band_px: 100.0,
            tap_duration: Duration::from_millis(60),
            send_control_ids: vec![
                "send".to_string(),
                "btn_send".to_string(),
                "send_button".to_string(),
                "fab_send".to_string(),
            ],
            input_hints: vec![
                "message".to_string(),
                "type".to_string(),
                "write".to_string(),
                "chat".to_string(),
            ],
            search_markers: vec!["search".to_string()],
        }
    }
}

impl SessionConfig {
    pub(crate) fn classifier_config(&self, package: &str) -> ClassifierConfig {
        ClassifierConfig {
            package: package.to_string(),
            min_row_height: self.min_row_height,
            dedup_band_px: self.dedup_band_px,
            clickable_hops: self.clickable_hops,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Launching,
    WaitingForeground,
    Scanning,
    SendingLoop,
    Completing,
    Aborted,
}

/// Legal phase transitions. Anything else is a defect, not a fallback path.
fn transition_allowed(from: SessionPhase, to: SessionPhase) -> bool {
    use SessionPhase::*;
    matches!(
        (from, to),
        (Idle, Launching)
            | (Launching, WaitingForeground)
            | (WaitingForeground, Scanning)
            | (Scanning, SendingLoop)
            | (SendingLoop, Completing)
            | (Completing, Idle)
            | (Aborted, Idle)
            | (_, Aborted)
    )
}

/// Raised when a suspension point observes the external interrupt.
pub(crate) struct Interrupted;

/// Bounded suspension raced against the interrupt token. Every wait in the
/// engine goes through here so cancellation lands at the next await.
pub(crate) async fn pause(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), Interrupted> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Interrupted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Releases the process-wide single-session guard on drop, so the engine is
/// retriggerable after completion, abort, or panic alike.
struct SingletonGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A running (or finished) session. Dropping the handle does not stop the
/// session; call [`SessionHandle::interrupt`] for that.
pub struct SessionHandle {
    pub id: Uuid,
    events: Option<UnboundedReceiver<SessionEvent>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Take the ordered event stream. Yields per-contact events followed by
    /// exactly one terminal `Completed` or `Aborted` event.
    pub fn events(&mut self) -> Option<UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    /// Deliver the external interrupt: equivalent to reaching `Aborted`,
    /// effective at the session's next suspension point.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Accepts triggers and enforces the at-most-one-session invariant.
pub(crate) struct SessionRunner {
    bridge: Arc<dyn AccessibilityBridge>,
    config: Arc<SessionConfig>,
    store: Arc<dyn ResultStore>,
    active: Arc<AtomicBool>,
}

impl SessionRunner {
    pub(crate) fn new(
        bridge: Arc<dyn AccessibilityBridge>,
        config: SessionConfig,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            bridge,
            config: Arc::new(config),
            store,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a session unless one is active. Compare-and-set, not a lock:
    /// there is a single writer and triggers must never queue.
    pub(crate) fn trigger(&self, message: String) -> Option<SessionHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("session trigger ignored: a session is already active");
            return None;
        }
        let guard = SingletonGuard {
            flag: self.active.clone(),
        };
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (reporter, events) = Reporter::new(0);

        let session = Session {
            bridge: self.bridge.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            cancel: cancel.clone(),
            reporter,
            phase: SessionPhase::Idle,
            launched: false,
            id,
            message,
            _guard: guard,
        };
        info!(session = %id, "session triggered");
        let task = tokio::spawn(session.run());
        Some(SessionHandle {
            id,
            events: Some(events),
            cancel,
            task,
        })
    }
}

struct Session {
    bridge: Arc<dyn AccessibilityBridge>,
    config: Arc<SessionConfig>,
    store: Arc<dyn ResultStore>,
    cancel: CancellationToken,
    reporter: Reporter,
    phase: SessionPhase,
    launched: bool,
    id: Uuid,
    message: String,
    _guard: SingletonGuard,
}

impl Session {
    fn transition(&mut self, to: SessionPhase) -> Result<(), AbortReason> {
        if !transition_allowed(self.phase, to) {
            error!(from = ?self.phase, ?to, "illegal session transition");
            return Err(AbortReason::StateMachineViolation);
        }
        debug!(from = ?self.phase, ?to, "session transition");
        self.phase = to;
        Ok(())
    }

    async fn run(mut self) {
        let mut changes = self.bridge.window_changes();
        let outcome = self.drive(&mut changes).await;
        match outcome {
            Ok(()) => {
                // Completing: the only success-path write of persisted state.
                let (summary, results) = self.reporter.completed();
                let record =
                    RunRecord::new(self.id.to_string(), None, summary, results);
                if let Err(err) = self.store.record_run(&record) {
                    warn!(%err, "failed to persist run record");
                }
                let _ = self.transition(SessionPhase::Idle);
                info!(session = %self.id, ?summary, "session completed");
            }
            Err(reason) => {
                let _ = self.transition(SessionPhase::Aborted);
                let (summary, results) =
                    self.reporter.aborted(reason, reason.to_string());
                let record =
                    RunRecord::new(self.id.to_string(), Some(reason), summary, results);
                if let Err(err) = self.store.record_run(&record) {
                    warn!(%err, "failed to persist run record");
                }
                let _ = self.transition(SessionPhase::Idle);
            }
        }
    }

    async fn drive(
        &mut self,
        changes: &mut Option<UnboundedReceiver<WindowChange>>,
    ) -> Result<(), AbortReason> {
        // Launching
        self.transition(SessionPhase::Launching)?;
        let package = self
            .bridge
            .resolve_launchable(&self.config.packages)
            .map_err(|err| {
                warn!(%err, "no launchable target package");
                AbortReason::LaunchFailure
            })?;
        if self.launched {
            // No later state may launch again; reaching this twice is a defect.
            return Err(AbortReason::StateMachineViolation);
        }
        self.launched = true;
        self.bridge.launch_package(&package).await.map_err(|err| {
            warn!(%err, %package, "launch request failed");
            AbortReason::LaunchFailure
        })?;

        // WaitingForeground
        self.transition(SessionPhase::WaitingForeground)?;
        self.wait_for_foreground(&package).await?;

        // Scanning
        self.transition(SessionPhase::Scanning)?;
        let mut plan = self.scan_with_retries(&package).await?;
        self.reporter.set_total_rows(plan.len());
        info!(rows = plan.len(), "scan complete");
        if plan.len() > self.config.max_rows {
            info!(
                dropped = plan.len() - self.config.max_rows,
                cap = self.config.max_rows,
                "row cap reached; excess rows will not be processed"
            );
            plan.truncate(self.config.max_rows);
        }

        // SendingLoop
        self.transition(SessionPhase::SendingLoop)?;
        let mut processed_buckets: HashSet<i64> = HashSet::new();
        for entry in &plan {
            self.drain_window_changes(changes);
            if self.cancel.is_cancelled() {
                return Err(AbortReason::Interrupted);
            }
            let (outcome, bucket) = protocol::send_to_contact(
                self.bridge.as_ref(),
                &self.config,
                &package,
                entry,
                &processed_buckets,
                &self.message,
                &self.cancel,
            )
            .await
            .map_err(|_| AbortReason::Interrupted)?;
            if let Some(bucket) = bucket {
                processed_buckets.insert(bucket);
            }
            let position = self.reporter.next_position();
            let result = match outcome {
                RowOutcome::Sent { note, .. } => ContactResult {
                    name: entry.display_name.clone(),
                    status: ContactStatus::Sent,
                    error_reason: note,
                    position,
                },
                RowOutcome::Skipped { reason } => ContactResult {
                    name: entry.display_name.clone(),
                    status: ContactStatus::Skipped,
                    error_reason: Some(reason),
                    position,
                },
                RowOutcome::Failed { failure } => ContactResult {
                    name: entry.display_name.clone(),
                    status: ContactStatus::Failed,
                    error_reason: Some(failure.to_string()),
                    position,
                },
            };
            self.reporter.contact(result);
        }

        // Completing
        self.transition(SessionPhase::Completing)?;
        Ok(())
    }

    async fn wait_for_foreground(&mut self, package: &str) -> Result<(), AbortReason> {
        let deadline = tokio::time::Instant::now() + self.config.foreground_timeout;
        loop {
            match self.bridge.foreground_package() {
                Ok(Some(owner)) if owner == package => {
                    debug!(package, "target app reached the foreground");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "foreground probe failed; retrying"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AbortReason::ForegroundTimeout);
            }
            pause(&self.cancel, self.config.foreground_poll)
                .await
                .map_err(|_| AbortReason::Interrupted)?;
        }
    }

    async fn scan_with_retries(&mut self, package: &str) -> Result<Vec<RowPlan>, AbortReason> {
        let classifier = self.config.classifier_config(package);
        for attempt in 0..3 {
            if let Ok(root) = self.bridge.active_window() {
                let rows = classify_rows(&root, &classifier);
                if !rows.is_empty() {
                    return Ok(rows
                        .iter()
                        .map(|row| RowPlan {
                            display_name: row.display_name.clone(),
                            bucket: row.bucket,
                            source_index: row.source_index,
                        })
                        .collect());
                }
                // One scroll-and-rescan retry, then one plain delayed rescan.
                if attempt == 0 {
                    if let Some(container) = find_list_container(&root) {
                        if let Err(err) = container.scroll_forward() {
                            debug!(%err, "scan retry scroll failed");
                        }
                    }
                }
            }
            if attempt < 2 {
                pause(&self.cancel, self.config.scan_retry_delay)
                    .await
                    .map_err(|_| AbortReason::Interrupted)?;
            }
        }
        Err(AbortReason::NoContactsFound)
    }

    fn drain_window_changes(&self, changes: &mut Option<UnboundedReceiver<WindowChange>>) {
        // Observed for diagnostics only. Reacting to one (e.g. relaunching
        // when the target window disappears) opens a relaunch feedback loop.
        let Some(rx) = changes.as_mut() else { return };
        loop {
            match rx.try_recv() {
                Ok(change) => debug!(package = ?change.package, "window change observed"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    *changes = None;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionPhase::*;

    #[test]
    fn transition_table_accepts_the_nominal_cycle() {
        let cycle = [
            (Idle, Launching),
            (Launching, WaitingForeground),
            (WaitingForeground, Scanning),
            (Scanning, SendingLoop),
            (SendingLoop, Completing),
            (Completing, Idle),
        ];
        for (from, to) in cycle {
            assert!(transition_allowed(from, to), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn transition_table_rejects_shortcuts() {
        assert!(!transition_allowed(Idle, Scanning));
        assert!(!transition_allowed(Launching, SendingLoop));
        assert!(!transition_allowed(Completing, Launching));
        assert!(!transition_allowed(SendingLoop, Launching));
    }

    #[test]
    fn abort_is_reachable_from_every_phase() {
        for from in [
            Idle,
            Launching,
            WaitingForeground,
            Scanning,
            SendingLoop,
            Completing,
        ] {
            assert!(transition_allowed(from, Aborted), "{from:?} -> Aborted");
        }
        assert!(transition_allowed(Aborted, Idle));
    }
}
