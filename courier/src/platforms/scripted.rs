//! In-memory accessibility backend driving a programmable model tree.
//!
//! Used by the test suite and by embedders that want to dry-run a session
//! against a scripted replica of the target app. Node handles obtained from
//! this bridge observe the same staleness rules as real backends: a handle
//! whose node has left the model tree reports [`AutomationError::NodeDetached`].

use crate::errors::AutomationError;
use crate::node::{Bounds, NodeAttributes, UiNode, UiNodeImpl};
use crate::platforms::{AccessibilityBridge, WindowChange};
use crate::ClickResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

type Hook = Arc<dyn Fn(&mut TreeState) + Send + Sync>;

/// Declarative description of one node in the scripted tree.
#[derive(Debug, Clone, Default)]
pub struct ScriptedNode {
    attrs: NodeAttributes,
    tag: Option<String>,
    children: Vec<ScriptedNode>,
    id: u64,
}

impl ScriptedNode {
    pub fn new(role: &str) -> Self {
        Self {
            attrs: NodeAttributes {
                role: role.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Stable name used to address this node from hooks and journals.
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.attrs.text = Some(text.to_string());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.attrs.label = Some(label.to_string());
        self
    }

    pub fn package(mut self, package: &str) -> Self {
        self.attrs.package = Some(package.to_string());
        self
    }

    pub fn resource_id(mut self, id: &str) -> Self {
        self.attrs.resource_id = Some(id.to_string());
        self
    }

    pub fn clickable(mut self) -> Self {
        self.attrs.clickable = true;
        self
    }

    pub fn focusable(mut self) -> Self {
        self.attrs.focusable = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.attrs.editable = true;
        self
    }

    pub fn bounds(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.attrs.bounds = Some(Bounds::new(x, y, width, height));
        self
    }

    pub fn child(mut self, child: ScriptedNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: Vec<ScriptedNode>) -> Self {
        self.children.extend(children);
        self
    }

    fn assign_ids(&mut self, counter: &mut u64) {
        *counter += 1;
        self.id = *counter;
        for child in &mut self.children {
            child.assign_ids(counter);
        }
    }

    fn find(&self, id: u64) -> Option<&ScriptedNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    fn find_mut(&mut self, id: u64) -> Option<&mut ScriptedNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    fn find_by_tag(&self, tag: &str) -> Option<&ScriptedNode> {
        if self.tag.as_deref() == Some(tag) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_tag(tag))
    }

    fn find_by_tag_mut(&mut self, tag: &str) -> Option<&mut ScriptedNode> {
        if self.tag.as_deref() == Some(tag) {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_by_tag_mut(tag))
    }

    fn parent_of(&self, id: u64) -> Option<&ScriptedNode> {
        if self.children.iter().any(|c| c.id == id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.parent_of(id))
    }

    fn remove(&mut self, tag: &str) -> bool {
        if let Some(pos) = self
            .children
            .iter()
            .position(|c| c.tag.as_deref() == Some(tag))
        {
            self.children.remove(pos);
            return true;
        }
        self.children.iter_mut().any(|c| c.remove(tag))
    }

    /// Deepest node whose bounds contain the point, preferring children over
    /// their ancestors.
    fn hit_test(&self, x: f64, y: f64) -> Option<&ScriptedNode> {
        let contains = self.attrs.bounds.is_some_and(|b| {
            !b.is_empty() && x >= b.x && x < b.x + b.width && y >= b.y && y < b.y + b.height
        });
        for child in &self.children {
            if let Some(hit) = child.hit_test(x, y) {
                return Some(hit);
            }
        }
        if contains {
            Some(self)
        } else {
            None
        }
    }
}

/// Mutable UI state of the scripted device, handed to hooks.
pub struct TreeState {
    foreground: Option<String>,
    pending_foreground: Option<(String, u32)>,
    window: Option<ScriptedNode>,
    id_counter: u64,
    change_tx: Option<UnboundedSender<WindowChange>>,
}

impl TreeState {
    pub fn set_window(&mut self, mut root: ScriptedNode) {
        root.assign_ids(&mut self.id_counter);
        self.window = Some(root);
        self.notify_change();
    }

    pub fn clear_window(&mut self) {
        self.window = None;
        self.notify_change();
    }

    pub fn set_foreground(&mut self, package: Option<&str>) {
        self.foreground = package.map(str::to_string);
        self.notify_change();
    }

    /// Make `package` the foreground owner after the caller has polled the
    /// foreground `polls` more times. Models an app that takes a few poll
    /// intervals to come up.
    pub fn set_foreground_after_polls(&mut self, package: &str, polls: u32) {
        self.pending_foreground = Some((package.to_string(), polls));
    }

    pub fn set_node_text(&mut self, tag: &str, text: &str) {
        if let Some(window) = self.window.as_mut() {
            if let Some(node) = window.find_by_tag_mut(tag) {
                node.attrs.text = Some(text.to_string());
            }
        }
    }

    pub fn node_text(&self, tag: &str) -> Option<String> {
        self.window
            .as_ref()
            .and_then(|w| w.find_by_tag(tag))
            .and_then(|n| n.attrs.text.clone())
    }

    pub fn remove_node(&mut self, tag: &str) {
        if let Some(window) = self.window.as_mut() {
            window.remove(tag);
        }
    }

    fn notify_change(&mut self) {
        if let Some(tx) = &self.change_tx {
            let change = WindowChange {
                package: self.foreground.clone(),
            };
            if tx.send(change).is_err() {
                self.change_tx = None;
            }
        }
    }
}

#[derive(Default)]
struct Journal {
    launches: Vec<String>,
    taps: Vec<(f64, f64)>,
    back_presses: usize,
    clicks: Vec<String>,
    typed: Vec<(String, String)>,
}

struct Model {
    state: TreeState,
    journal: Journal,
    launchable: Vec<String>,
    launch_hook: Option<Hook>,
    click_hooks: HashMap<String, Hook>,
    back_hook: Option<Hook>,
    fail_taps: bool,
    fail_actions_on: Vec<String>,
}

/// Programmable in-memory implementation of [`AccessibilityBridge`].
#[derive(Clone)]
pub struct ScriptedBridge {
    model: Arc<Mutex<Model>>,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(Model {
                state: TreeState {
                    foreground: None,
                    pending_foreground: None,
                    window: None,
                    id_counter: 0,
                    change_tx: None,
                },
                journal: Journal::default(),
                launchable: Vec::new(),
                launch_hook: None,
                click_hooks: HashMap::new(),
                back_hook: None,
                fail_taps: false,
                fail_actions_on: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Model> {
        self.model.lock().expect("scripted model poisoned")
    }

    /// Register a package identifier that resolves to a launchable entry.
    pub fn add_launchable(&self, package: &str) -> &Self {
        self.lock().launchable.push(package.to_string());
        self
    }

    /// Run `hook` when a launch request for any registered package arrives.
    pub fn on_launch<F>(&self, hook: F) -> &Self
    where
        F: Fn(&mut TreeState) + Send + Sync + 'static,
    {
        self.lock().launch_hook = Some(Arc::new(hook));
        self
    }

    /// Run `hook` when the node tagged `tag` is clicked or tapped.
    pub fn on_click<F>(&self, tag: &str, hook: F) -> &Self
    where
        F: Fn(&mut TreeState) + Send + Sync + 'static,
    {
        self.lock().click_hooks.insert(tag.to_string(), Arc::new(hook));
        self
    }

    /// Run `hook` when a global back navigation is issued.
    pub fn on_back<F>(&self, hook: F) -> &Self
    where
        F: Fn(&mut TreeState) + Send + Sync + 'static,
    {
        self.lock().back_hook = Some(Arc::new(hook));
        self
    }

    /// Make all tap-gesture dispatches fail at the platform level.
    pub fn fail_taps(&self, fail: bool) -> &Self {
        self.lock().fail_taps = fail;
        self
    }

    /// Reject click and tap actions targeting the node tagged `tag`.
    pub fn fail_actions_on(&self, tag: &str) -> &Self {
        self.lock().fail_actions_on.push(tag.to_string());
        self
    }

    /// Mutate the scripted UI state directly.
    pub fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut TreeState) -> R,
    {
        f(&mut self.lock().state)
    }

    pub fn launches(&self) -> Vec<String> {
        self.lock().journal.launches.clone()
    }

    pub fn taps(&self) -> Vec<(f64, f64)> {
        self.lock().journal.taps.clone()
    }

    pub fn back_presses(&self) -> usize {
        self.lock().journal.back_presses
    }

    pub fn clicks(&self) -> Vec<String> {
        self.lock().journal.clicks.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.lock().journal.typed.clone()
    }

    fn node_handle(&self, id: u64) -> UiNode {
        UiNode::new(Box::new(ScriptedUiNode {
            model: self.model.clone(),
            id,
        }))
    }
}

#[async_trait::async_trait]
impl AccessibilityBridge for ScriptedBridge {
    fn foreground_package(&self) -> Result<Option<String>, AutomationError> {
        let mut model = self.lock();
        if let Some((package, polls)) = model.state.pending_foreground.take() {
            if polls <= 1 {
                model.state.foreground = Some(package);
            } else {
                model.state.pending_foreground = Some((package, polls - 1));
            }
        }
        Ok(model.state.foreground.clone())
    }

    fn active_window(&self) -> Result<UiNode, AutomationError> {
        let model = self.lock();
        let root = model
            .state
            .window
            .as_ref()
            .ok_or_else(|| AutomationError::ElementNotFound("no active window".to_string()))?;
        let id = root.id;
        drop(model);
        Ok(self.node_handle(id))
    }

    fn resolve_launchable(&self, candidates: &[String]) -> Result<String, AutomationError> {
        let model = self.lock();
        candidates
            .iter()
            .find(|c| model.launchable.contains(c))
            .cloned()
            .ok_or_else(|| {
                AutomationError::LaunchFailed(format!(
                    "no launchable entry among {candidates:?}"
                ))
            })
    }

    async fn launch_package(&self, package: &str) -> Result<(), AutomationError> {
        let mut model = self.lock();
        debug!(package, "scripted launch");
        model.journal.launches.push(package.to_string());
        if let Some(hook) = model.launch_hook.clone() {
            hook(&mut model.state);
        }
        Ok(())
    }

    async fn tap(&self, x: f64, y: f64, _duration: Duration) -> Result<(), AutomationError> {
        let mut model = self.lock();
        if model.fail_taps {
            return Err(AutomationError::PlatformError(
                "gesture dispatch rejected".to_string(),
            ));
        }
        model.journal.taps.push((x, y));
        // Walk up from the hit node to the first tagged one: sabotaged tags
        // reject the gesture, hooked tags consume it.
        let mut rejected = false;
        let hooked = model.state.window.as_ref().and_then(|w| {
            let mut hit = w.hit_test(x, y);
            while let Some(node) = hit {
                if let Some(tag) = node.tag.as_deref() {
                    if model.fail_actions_on.iter().any(|t| t == tag) {
                        rejected = true;
                        return None;
                    }
                    if model.click_hooks.contains_key(tag) {
                        return Some(tag.to_string());
                    }
                }
                hit = w.parent_of(node.id);
            }
            None
        });
        if rejected {
            return Err(AutomationError::PlatformError(
                "gesture dispatch rejected for target".to_string(),
            ));
        }
        if let Some(tag) = hooked {
            model.journal.clicks.push(tag.clone());
            if let Some(hook) = model.click_hooks.get(&tag).cloned() {
                hook(&mut model.state);
            }
        }
        Ok(())
    }

    async fn global_back(&self) -> Result<(), AutomationError> {
        let mut model = self.lock();
        model.journal.back_presses += 1;
        if let Some(hook) = model.back_hook.clone() {
            hook(&mut model.state);
        }
        Ok(())
    }

    fn window_changes(&self) -> Option<UnboundedReceiver<WindowChange>> {
        let (tx, rx) = unbounded_channel();
        self.lock().state.change_tx = Some(tx);
        Some(rx)
    }
}

/// Node handle into the scripted model. Every accessor re-resolves the node
/// by id so handles surface staleness exactly like real backends.
struct ScriptedUiNode {
    model: Arc<Mutex<Model>>,
    id: u64,
}

impl std::fmt::Debug for ScriptedUiNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedUiNode").field("id", &self.id).finish()
    }
}

impl ScriptedUiNode {
    fn lock(&self) -> std::sync::MutexGuard<'_, Model> {
        self.model.lock().expect("scripted model poisoned")
    }

    fn with_node<R>(
        &self,
        f: impl FnOnce(&ScriptedNode) -> R,
    ) -> Result<R, AutomationError> {
        let model = self.lock();
        let window = model
            .state
            .window
            .as_ref()
            .ok_or_else(|| AutomationError::NodeDetached("window closed".to_string()))?;
        let node = window
            .find(self.id)
            .ok_or_else(|| AutomationError::NodeDetached(format!("node {} gone", self.id)))?;
        Ok(f(node))
    }
}

impl UiNodeImpl for ScriptedUiNode {
    fn object_id(&self) -> usize {
        self.id as usize
    }

    fn attributes(&self) -> NodeAttributes {
        self.with_node(|n| n.attrs.clone()).unwrap_or_default()
    }

    fn children(&self) -> Result<Vec<UiNode>, AutomationError> {
        let ids = self.with_node(|n| n.children.iter().map(|c| c.id).collect::<Vec<_>>())?;
        Ok(ids
            .into_iter()
            .map(|id| {
                UiNode::new(Box::new(ScriptedUiNode {
                    model: self.model.clone(),
                    id,
                }))
            })
            .collect())
    }

    fn parent(&self) -> Result<Option<UiNode>, AutomationError> {
        let model = self.lock();
        let window = model
            .state
            .window
            .as_ref()
            .ok_or_else(|| AutomationError::NodeDetached("window closed".to_string()))?;
        if window.find(self.id).is_none() {
            return Err(AutomationError::NodeDetached(format!(
                "node {} gone",
                self.id
            )));
        }
        let parent_id = window.parent_of(self.id).map(|p| p.id);
        drop(model);
        Ok(parent_id.map(|id| {
            UiNode::new(Box::new(ScriptedUiNode {
                model: self.model.clone(),
                id,
            }))
        }))
    }

    fn bounds(&self) -> Result<Bounds, AutomationError> {
        self.with_node(|n| n.attrs.bounds)?.ok_or_else(|| {
            AutomationError::InvalidBounds(format!("node {} has no bounds", self.id))
        })
    }

    fn click(&self) -> Result<ClickResult, AutomationError> {
        let mut model = self.lock();
        let window = model
            .state
            .window
            .as_ref()
            .ok_or_else(|| AutomationError::NodeDetached("window closed".to_string()))?;
        let node = window
            .find(self.id)
            .ok_or_else(|| AutomationError::NodeDetached(format!("node {} gone", self.id)))?;
        let tag = node.tag.clone();
        let clickable = node.attrs.clickable;
        let coordinates = node.attrs.bounds.map(|b| b.center());

        if let Some(tag) = tag.as_deref() {
            if model.fail_actions_on.iter().any(|t| t == tag) {
                return Err(AutomationError::PlatformError(format!(
                    "click action rejected for '{tag}'"
                )));
            }
        }
        let hook = tag
            .as_deref()
            .and_then(|t| model.click_hooks.get(t).cloned());
        if hook.is_none() && !clickable {
            return Err(AutomationError::UnsupportedOperation(format!(
                "node {} does not accept click",
                self.id
            )));
        }
        if let Some(tag) = tag {
            model.journal.clicks.push(tag);
        } else {
            model.journal.clicks.push(format!("#{}", self.id));
        }
        if let Some(hook) = hook {
            hook(&mut model.state);
        }
        Ok(ClickResult {
            method: "accessibility-action".to_string(),
            coordinates,
            details: format!("scripted click on node {}", self.id),
        })
    }

    fn set_text(&self, text: &str) -> Result<(), AutomationError> {
        let mut model = self.lock();
        let window = model
            .state
            .window
            .as_mut()
            .ok_or_else(|| AutomationError::NodeDetached("window closed".to_string()))?;
        let node = window
            .find_mut(self.id)
            .ok_or_else(|| AutomationError::NodeDetached(format!("node {} gone", self.id)))?;
        if !node.attrs.editable {
            return Err(AutomationError::UnsupportedOperation(format!(
                "node {} is not editable",
                self.id
            )));
        }
        node.attrs.text = Some(text.to_string());
        let tag = node.tag.clone().unwrap_or_else(|| format!("#{}", self.id));
        model.journal.typed.push((tag, text.to_string()));
        Ok(())
    }

    fn focus(&self) -> Result<(), AutomationError> {
        let focusable = self.with_node(|n| n.attrs.focusable)?;
        if focusable {
            Ok(())
        } else {
            Err(AutomationError::UnsupportedOperation(format!(
                "node {} is not focusable",
                self.id
            )))
        }
    }

    fn scroll_forward(&self) -> Result<(), AutomationError> {
        let role = self.with_node(|n| n.attrs.role.clone())?;
        let lower = role.to_lowercase();
        if lower.contains("scroll") || lower.contains("list") || lower.contains("recycler") {
            Ok(())
        } else {
            Err(AutomationError::UnsupportedOperation(format!(
                "role {role} is not scrollable"
            )))
        }
    }

    fn clone_box(&self) -> Box<dyn UiNodeImpl> {
        Box::new(ScriptedUiNode {
            model: self.model.clone(),
            id: self.id,
        })
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
