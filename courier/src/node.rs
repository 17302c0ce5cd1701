use crate::errors::AutomationError;
use crate::ClickResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

/// Hard cap on recursive tree walks. Foreign trees carry no cycle guarantee.
const MAX_WALK_DEPTH: usize = 64;

/// Screen rectangle of a node, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Coarse vertical band index used to deduplicate rows that surface
    /// under more than one matched ancestor.
    pub fn vertical_bucket(&self, band_px: f64) -> i64 {
        if band_px <= 0.0 {
            return 0;
        }
        (self.y / band_px).floor() as i64
    }
}

/// Attributes associated with a UI node
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct NodeAttributes {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "is_empty_string")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clickable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub focusable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

fn is_empty_string(opt: &Option<String>) -> bool {
    match opt {
        Some(s) => s.is_empty(),
        None => true,
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl NodeAttributes {
    /// Primary visible string of the node: text first, label as fallback.
    pub fn display_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.label.as_deref().filter(|s| !s.is_empty()))
    }
}

impl fmt::Debug for NodeAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct("NodeAttributes");

        if !self.role.is_empty() {
            debug_struct.field("role", &self.role);
        }
        if let Some(ref text) = self.text {
            if !text.is_empty() {
                debug_struct.field("text", text);
            }
        }
        if let Some(ref label) = self.label {
            if !label.is_empty() {
                debug_struct.field("label", label);
            }
        }
        if let Some(ref package) = self.package {
            if !package.is_empty() {
                debug_struct.field("package", package);
            }
        }
        if let Some(ref resource_id) = self.resource_id {
            if !resource_id.is_empty() {
                debug_struct.field("resource_id", resource_id);
            }
        }
        if self.clickable {
            debug_struct.field("clickable", &true);
        }
        if self.focusable {
            debug_struct.field("focusable", &true);
        }
        if self.editable {
            debug_struct.field("editable", &true);
        }
        if let Some(ref bounds) = self.bounds {
            debug_struct.field("bounds", bounds);
        }

        debug_struct.finish()
    }
}

/// Interface for platform-specific node implementations
pub trait UiNodeImpl: Send + Sync + Debug {
    /// Identity of the underlying platform object. Two handles with the same
    /// object id refer to the same on-screen node within one snapshot.
    fn object_id(&self) -> usize;
    fn attributes(&self) -> NodeAttributes;
    fn children(&self) -> Result<Vec<UiNode>, AutomationError>;
    fn parent(&self) -> Result<Option<UiNode>, AutomationError>;
    fn bounds(&self) -> Result<Bounds, AutomationError>;
    fn click(&self) -> Result<ClickResult, AutomationError>;
    fn set_text(&self, text: &str) -> Result<(), AutomationError>;
    fn focus(&self) -> Result<(), AutomationError>;
    fn scroll_forward(&self) -> Result<(), AutomationError>;
    fn clone_box(&self) -> Box<dyn UiNodeImpl>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A handle to one node of a foreign UI tree.
///
/// Handles are only valid within the scan that produced them. Any action or
/// suspension may invalidate the underlying tree; implementations surface
/// this as [`AutomationError::NodeDetached`] rather than returning stale data.
pub struct UiNode {
    inner: Box<dyn UiNodeImpl>,
}

impl Debug for UiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiNode")
            .field("attributes", &self.inner.attributes())
            .finish()
    }
}

impl Clone for UiNode {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
        }
    }
}

impl PartialEq for UiNode {
    fn eq(&self, other: &Self) -> bool {
        self.inner.object_id() == other.inner.object_id()
    }
}

impl UiNode {
    pub fn new(inner: Box<dyn UiNodeImpl>) -> Self {
        Self { inner }
    }

    pub fn object_id(&self) -> usize {
        self.inner.object_id()
    }

    pub fn attributes(&self) -> NodeAttributes {
        self.inner.attributes()
    }

    pub fn role(&self) -> String {
        self.inner.attributes().role
    }

    pub fn text(&self) -> Option<String> {
        self.inner.attributes().text
    }

    pub fn label(&self) -> Option<String> {
        self.inner.attributes().label
    }

    pub fn package(&self) -> Option<String> {
        self.inner.attributes().package
    }

    pub fn resource_id(&self) -> Option<String> {
        self.inner.attributes().resource_id
    }

    pub fn is_clickable(&self) -> bool {
        self.inner.attributes().clickable
    }

    pub fn is_focusable(&self) -> bool {
        self.inner.attributes().focusable
    }

    pub fn is_editable(&self) -> bool {
        self.inner.attributes().editable
    }

    pub fn children(&self) -> Result<Vec<UiNode>, AutomationError> {
        self.inner.children()
    }

    pub fn parent(&self) -> Result<Option<UiNode>, AutomationError> {
        self.inner.parent()
    }

    pub fn bounds(&self) -> Result<Bounds, AutomationError> {
        self.inner.bounds()
    }

    pub fn click(&self) -> Result<ClickResult, AutomationError> {
        self.inner.click()
    }

    pub fn set_text(&self, text: &str) -> Result<(), AutomationError> {
        self.inner.set_text(text)
    }

    pub fn focus(&self) -> Result<(), AutomationError> {
        self.inner.focus()
    }

    pub fn scroll_forward(&self) -> Result<(), AutomationError> {
        self.inner.scroll_forward()
    }

    /// Walk up the parent chain looking for a clickable node, giving up
    /// after `max_hops` levels or a detached parent link.
    pub fn clickable_ancestor(&self, max_hops: usize) -> Option<UiNode> {
        let mut current = self.parent().ok().flatten();
        let mut hops = 0;
        while let Some(node) = current {
            if hops >= max_hops {
                return None;
            }
            if node.is_clickable() {
                return Some(node);
            }
            current = node.parent().ok().flatten();
            hops += 1;
        }
        None
    }

    /// Depth-first search for the first clickable node in this subtree,
    /// excluding the node itself.
    pub fn clickable_descendant(&self) -> Option<UiNode> {
        fn search(node: &UiNode, depth: usize) -> Option<UiNode> {
            if depth >= MAX_WALK_DEPTH {
                return None;
            }
            for child in node.children().ok()? {
                if child.is_clickable() {
                    return Some(child);
                }
                if let Some(found) = search(&child, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        search(self, 0)
    }

    /// Visit every node of this subtree (the node itself included) in
    /// depth-first order, with its depth relative to `self`.
    pub fn visit_subtree<F>(&self, visit: &mut F)
    where
        F: FnMut(&UiNode, usize),
    {
        fn walk<F: FnMut(&UiNode, usize)>(node: &UiNode, depth: usize, visit: &mut F) {
            if depth >= MAX_WALK_DEPTH {
                return;
            }
            visit(node, depth);
            if let Ok(children) = node.children() {
                for child in children {
                    walk(&child, depth + 1, visit);
                }
            }
        }
        walk(self, 0, visit);
    }

    /// Collect every descendant (self excluded) matching the predicate.
    pub fn descendants_where<F>(&self, mut predicate: F) -> Vec<UiNode>
    where
        F: FnMut(&UiNode) -> bool,
    {
        let mut out = Vec::new();
        self.visit_subtree(&mut |node, depth| {
            if depth > 0 && predicate(node) {
                out.push(node.clone());
            }
        });
        out
    }
}
