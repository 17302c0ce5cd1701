//! Ordered fallback chains for the two interactions the target app makes
//! hardest: activating a row and finding the send control. Every strategy
//! has the same contract — run against a context, succeed or hand over to
//! the next one — so a chain can be exercised with a context that only one
//! position satisfies.

use crate::errors::AutomationError;
use crate::node::UiNode;
use crate::platforms::AccessibilityBridge;
use crate::ClickResult;
use std::time::Duration;
use tracing::debug;

/// Context an activation strategy runs against.
pub struct ActivationCtx<'a> {
    pub bridge: &'a dyn AccessibilityBridge,
    pub node: &'a UiNode,
    pub tap_duration: Duration,
    pub ancestor_hops: usize,
}

/// What a successful activation looked like.
#[derive(Debug)]
pub struct ActivationOutcome {
    pub strategy: &'static str,
    pub click: Option<ClickResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStrategy {
    /// Synthesize a tap gesture at the node's screen center.
    TapCenter,
    /// Invoke the node's own click action if it reports clickable.
    ClickSelf,
    /// Click the first clickable descendant.
    ClickChild,
    /// Click the nearest clickable ancestor within the hop bound.
    ClickAncestor,
    /// Invoke click regardless of the clickable flag.
    ForceClick,
    /// Generic nearest-clickable search out from the node.
    NearestClickable,
}

/// Chain for opening a conversation row, in fallback order.
pub const ROW_ACTIVATION_CHAIN: &[ActivationStrategy] = &[
    ActivationStrategy::TapCenter,
    ActivationStrategy::ClickSelf,
    ActivationStrategy::ClickChild,
    ActivationStrategy::ClickAncestor,
    ActivationStrategy::ForceClick,
    ActivationStrategy::NearestClickable,
];

/// Chain for activating an already-located control (e.g. the send button):
/// direct click first, gesture and ancestor click as fallbacks.
pub const CONTROL_ACTIVATION_CHAIN: &[ActivationStrategy] = &[
    ActivationStrategy::ClickSelf,
    ActivationStrategy::TapCenter,
    ActivationStrategy::ClickAncestor,
];

impl ActivationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TapCenter => "tap-center",
            Self::ClickSelf => "click-self",
            Self::ClickChild => "click-child",
            Self::ClickAncestor => "click-ancestor",
            Self::ForceClick => "force-click",
            Self::NearestClickable => "nearest-clickable",
        }
    }

    async fn run(&self, ctx: &ActivationCtx<'_>) -> Result<ActivationOutcome, AutomationError> {
        let outcome = |click| ActivationOutcome {
            strategy: self.name(),
            click,
        };
        match self {
            Self::TapCenter => {
                let bounds = ctx.node.bounds()?;
                if bounds.is_empty() {
                    return Err(AutomationError::InvalidBounds(format!(
                        "cannot tap zero-size bounds {bounds:?}"
                    )));
                }
                let (x, y) = bounds.center();
                ctx.bridge.tap(x, y, ctx.tap_duration).await?;
                Ok(outcome(None))
            }
            Self::ClickSelf => {
                if !ctx.node.is_clickable() {
                    return Err(AutomationError::UnsupportedOperation(
                        "node does not report clickable".to_string(),
                    ));
                }
                Ok(outcome(Some(ctx.node.click()?)))
            }
            Self::ClickChild => {
                let child = ctx.node.clickable_descendant().ok_or_else(|| {
                    AutomationError::ElementNotFound("no clickable descendant".to_string())
                })?;
                Ok(outcome(Some(child.click()?)))
            }
            Self::ClickAncestor => {
                let ancestor = ctx.node.clickable_ancestor(ctx.ancestor_hops).ok_or_else(|| {
                    AutomationError::ElementNotFound(format!(
                        "no clickable ancestor within {} hops",
                        ctx.ancestor_hops
                    ))
                })?;
                Ok(outcome(Some(ancestor.click()?)))
            }
            Self::ForceClick => Ok(outcome(Some(ctx.node.click()?))),
            Self::NearestClickable => {
                let found = nearest_clickable(ctx.node, ctx.ancestor_hops).ok_or_else(|| {
                    AutomationError::ElementNotFound(
                        "no clickable node near the target".to_string(),
                    )
                })?;
                Ok(outcome(Some(found.click()?)))
            }
        }
    }
}

/// Widening search for any clickable node around `node`: its subtree first,
/// then each ancestor level's subtree, up to `hops` levels.
fn nearest_clickable(node: &UiNode, hops: usize) -> Option<UiNode> {
    if let Some(found) = node.clickable_descendant() {
        return Some(found);
    }
    let mut current = node.parent().ok().flatten();
    let mut level = 0;
    while let Some(scope) = current {
        if level >= hops {
            return None;
        }
        if scope.is_clickable() {
            return Some(scope);
        }
        if let Some(found) = scope.clickable_descendant() {
            return Some(found);
        }
        current = scope.parent().ok().flatten();
        level += 1;
    }
    None
}

/// Run an activation chain in order, first success wins.
pub async fn run_activation_chain(
    chain: &[ActivationStrategy],
    ctx: &ActivationCtx<'_>,
) -> Result<ActivationOutcome, AutomationError> {
    let mut last_err: Option<AutomationError> = None;
    for strategy in chain {
        match strategy.run(ctx).await {
            Ok(outcome) => {
                debug!(strategy = outcome.strategy, "activation succeeded");
                return Ok(outcome);
            }
            Err(err) => {
                debug!(strategy = strategy.name(), %err, "activation strategy failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        AutomationError::ElementNotFound("empty activation chain".to_string())
    }))
}

/// Context for locating the send control inside an open conversation.
pub struct SendControlCtx<'a> {
    pub window: &'a UiNode,
    pub input: &'a UiNode,
    /// Resource-id fragments known to mark send controls.
    pub known_ids: &'a [String],
    pub ancestor_hops: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendControlStrategy {
    /// Known send-control resource identifiers.
    KnownIds,
    /// Exact "send" text or label.
    ExactText,
    /// "send" substring in the accessible label.
    LabelSubstring,
    /// Any button-like node whose label or id mentions send.
    ButtonScan,
    /// Neighborhood of the message input, else the last button in the window.
    InputNeighborhood,
}

pub const SEND_CONTROL_CHAIN: &[SendControlStrategy] = &[
    SendControlStrategy::KnownIds,
    SendControlStrategy::ExactText,
    SendControlStrategy::LabelSubstring,
    SendControlStrategy::ButtonScan,
    SendControlStrategy::InputNeighborhood,
];

fn is_button_like(node: &UiNode) -> bool {
    let role = node.role().to_lowercase();
    role.contains("button") || role.contains("imageview")
}

/// A located candidate is only usable through a clickable node: itself, or
/// its nearest clickable ancestor.
fn resolve_clickable(node: UiNode, hops: usize) -> Option<UiNode> {
    if node.is_clickable() {
        return Some(node);
    }
    node.clickable_ancestor(hops)
}

impl SendControlStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::KnownIds => "known-ids",
            Self::ExactText => "exact-text",
            Self::LabelSubstring => "label-substring",
            Self::ButtonScan => "button-scan",
            Self::InputNeighborhood => "input-neighborhood",
        }
    }

    fn run(&self, ctx: &SendControlCtx<'_>) -> Option<UiNode> {
        match self {
            Self::KnownIds => ctx
                .window
                .descendants_where(|n| {
                    n.resource_id().is_some_and(|id| {
                        let id = id.to_lowercase();
                        ctx.known_ids.iter().any(|k| id.contains(&k.to_lowercase()))
                    })
                })
                .into_iter()
                .next(),
            Self::ExactText => ctx
                .window
                .descendants_where(|n| {
                    n.attributes()
                        .display_text()
                        .is_some_and(|t| t.trim().eq_ignore_ascii_case("send"))
                })
                .into_iter()
                .next(),
            Self::LabelSubstring => ctx
                .window
                .descendants_where(|n| {
                    n.label()
                        .is_some_and(|l| l.to_lowercase().contains("send"))
                })
                .into_iter()
                .next(),
            Self::ButtonScan => ctx
                .window
                .descendants_where(|n| {
                    if !is_button_like(n) {
                        return false;
                    }
                    let label = n.label().unwrap_or_default().to_lowercase();
                    let id = n.resource_id().unwrap_or_default().to_lowercase();
                    label.contains("send") || id.contains("send")
                })
                .into_iter()
                .next(),
            Self::InputNeighborhood => {
                // Siblings of the message input first; send controls sit
                // next to the composer by convention.
                if let Ok(Some(parent)) = ctx.input.parent() {
                    if let Ok(siblings) = parent.children() {
                        for sibling in siblings {
                            if sibling == *ctx.input {
                                continue;
                            }
                            if is_button_like(&sibling) && sibling.is_clickable() {
                                return Some(sibling);
                            }
                        }
                    }
                }
                // Last clickable button-like node in the window; the send
                // control is conventionally the last interactive element.
                ctx.window
                    .descendants_where(|n| is_button_like(n) && n.is_clickable())
                    .into_iter()
                    .last()
            }
        }
    }
}

/// Run the send-control chain in order; each hit is resolved to a clickable
/// node before it counts as a success.
pub fn locate_send_control(ctx: &SendControlCtx<'_>) -> Option<(UiNode, &'static str)> {
    for strategy in SEND_CONTROL_CHAIN {
        if let Some(candidate) = strategy.run(ctx) {
            if let Some(clickable) = resolve_clickable(candidate, ctx.ancestor_hops) {
                debug!(strategy = strategy.name(), "send control located");
                return Some((clickable, strategy.name()));
            }
            debug!(
                strategy = strategy.name(),
                "candidate had no clickable resolution; continuing chain"
            );
        }
    }
    None
}
