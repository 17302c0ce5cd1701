use crate::{AutomationError, UiNode};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub mod scripted;

/// A window-change notification delivered by the platform layer.
///
/// The engine observes these for diagnostics only. Acting on them (e.g.
/// relaunching the target app because its window went away) is how relaunch
/// feedback loops start, so no code path reacts to one.
#[derive(Debug, Clone)]
pub struct WindowChange {
    pub package: Option<String>,
}

/// The common trait every accessibility backend must implement.
///
/// Read methods return snapshots of the current UI state; action methods are
/// async because gesture and navigation dispatch complete asynchronously on
/// the platform side. Node-level actions (click, set-text, focus, scroll)
/// live on [`crate::UiNodeImpl`].
#[async_trait::async_trait]
pub trait AccessibilityBridge: Send + Sync {
    /// Package identifier owning the current foreground window, if any.
    fn foreground_package(&self) -> Result<Option<String>, AutomationError>;

    /// Root node of the active window's tree.
    fn active_window(&self) -> Result<UiNode, AutomationError>;

    /// Probe an ordered list of candidate package identifiers and return the
    /// first one that resolves to a launchable entry point.
    fn resolve_launchable(&self, candidates: &[String]) -> Result<String, AutomationError>;

    /// Issue a launch request for the given package. Callers own the
    /// at-most-once discipline; the bridge performs no deduplication.
    async fn launch_package(&self, package: &str) -> Result<(), AutomationError>;

    /// Synthesize a single-point tap gesture at screen coordinates.
    async fn tap(&self, x: f64, y: f64, duration: Duration) -> Result<(), AutomationError>;

    /// Issue a global back navigation.
    async fn global_back(&self) -> Result<(), AutomationError>;

    /// Stream of window-change notifications, if the backend surfaces them.
    /// Consumers may only observe and log these.
    fn window_changes(&self) -> Option<UnboundedReceiver<WindowChange>> {
        None
    }
}
