//! Turns a raw window snapshot into the ordered set of conversation rows.
//!
//! The target app's tree carries no schema, so every decision here is a
//! heuristic. Each heuristic is a small named predicate over a normalized
//! candidate record, composed through an explicit rule chain; traversal code
//! never embeds a heuristic directly.

use crate::node::{Bounds, UiNode};
use tracing::{debug, trace};

/// Tokens that mark a role/class name as a scrollable list container.
const LIST_ROLE_MARKERS: &[&str] = &["recyclerview", "listview", "scrollview", "gridview"];

/// Words in a string are treated as a message preview tail once the part
/// after the first colon grows beyond this.
const PREVIEW_TAIL_LEN: usize = 12;

/// A single unbroken token longer than this is never a contact name.
const LONG_TOKEN_LEN: usize = 24;

/// All-caps strings up to this length are treated as section headers.
const HEADER_MAX_LEN: usize = 24;

/// Tuning knobs for row classification, owned by the session config.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Package identifier rows must belong to.
    pub package: String,
    /// Rows shorter than this are decorative separators.
    pub min_row_height: f64,
    /// Vertical band used to fold duplicate matches of the same row.
    pub dedup_band_px: f64,
    /// How far up the tree a clickable ancestor may live.
    pub clickable_hops: usize,
}

/// One addressable conversation entry, valid for the scan that produced it.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub node: UiNode,
    pub display_name: String,
    /// Position in classification order, 0-based.
    pub source_index: usize,
    /// Vertical dedup bucket, `None` when the node reported no bounds.
    pub bucket: Option<i64>,
}

/// Normalized attribute record a row candidate is judged on.
#[derive(Debug, Clone)]
pub(crate) struct RowCandidate {
    pub text: Option<String>,
    pub role: String,
    pub resource_id: Option<String>,
    pub package_matches: bool,
    pub has_click_affordance: bool,
    pub height: f64,
}

pub(crate) struct RowRule {
    pub name: &'static str,
    pub rejects: fn(&RowCandidate) -> bool,
}

/// Ordered rejection chain; a candidate passing every rule is a row.
pub(crate) const ROW_RULES: &[RowRule] = &[
    RowRule {
        name: "foreign-package",
        rejects: |c| !c.package_matches,
    },
    RowRule {
        name: "no-text",
        rejects: |c| c.text.as_deref().is_none_or(str::is_empty),
    },
    RowRule {
        name: "search-field",
        rejects: is_search_field,
    },
    RowRule {
        name: "toolbar",
        rejects: is_toolbar,
    },
    RowRule {
        name: "floating-action",
        rejects: is_floating_action,
    },
    RowRule {
        name: "section-header",
        rejects: is_section_header,
    },
    RowRule {
        name: "not-clickable",
        rejects: |c| !c.has_click_affordance,
    },
    RowRule {
        name: "too-short",
        rejects: |c| c.height <= 0.0,
    },
];

pub(crate) fn is_search_field(c: &RowCandidate) -> bool {
    let role = c.role.to_lowercase();
    if role.contains("edittext") || role.contains("searchview") {
        return true;
    }
    c.resource_id
        .as_deref()
        .map(str::to_lowercase)
        .is_some_and(|id| id.contains("search"))
}

pub(crate) fn is_toolbar(c: &RowCandidate) -> bool {
    let role = c.role.to_lowercase();
    role.contains("toolbar") || role.contains("actionbar") || role.contains("appbar")
}

pub(crate) fn is_floating_action(c: &RowCandidate) -> bool {
    let role = c.role.to_lowercase();
    if role.contains("floatingactionbutton") {
        return true;
    }
    c.resource_id
        .as_deref()
        .map(str::to_lowercase)
        .is_some_and(|id| id.contains("fab"))
}

/// Short all-caps strings are section headers ("CONVERSATIONS", "ARCHIVED").
pub(crate) fn is_section_header(c: &RowCandidate) -> bool {
    let Some(text) = c.text.as_deref() else {
        return false;
    };
    let letters: Vec<char> = text.chars().filter(|ch| ch.is_alphabetic()).collect();
    !letters.is_empty()
        && text.chars().count() <= HEADER_MAX_LEN
        && letters.iter().all(|ch| ch.is_uppercase())
}

fn is_list_container(node: &UiNode) -> bool {
    let role = node.role().to_lowercase();
    LIST_ROLE_MARKERS.iter().any(|m| role.contains(m))
}

/// Locate the scrollable container hosting the conversation list: direct
/// descendants of the root first, then anywhere in the tree.
pub fn find_list_container(root: &UiNode) -> Option<UiNode> {
    if let Ok(children) = root.children() {
        if let Some(found) = children.iter().find(|c| is_list_container(c)) {
            return Some(found.clone());
        }
    }
    let mut found = None;
    root.visit_subtree(&mut |node, depth| {
        if depth > 0 && found.is_none() && is_list_container(node) {
            found = Some(node.clone());
        }
    });
    found
}

/// First non-empty text or label in the subtree, the node itself included.
/// Rows are usually bare layouts whose text lives in child views.
fn subtree_text(node: &UiNode) -> Option<String> {
    let mut found: Option<String> = None;
    node.visit_subtree(&mut |n, _| {
        if found.is_none() {
            if let Some(text) = n.attributes().display_text() {
                found = Some(text.to_string());
            }
        }
    });
    found
}

fn normalize(node: &UiNode, config: &ClassifierConfig) -> RowCandidate {
    let attrs = node.attributes();
    let has_click_affordance = attrs.clickable
        || node.clickable_ancestor(config.clickable_hops).is_some()
        || node.clickable_descendant().is_some();
    RowCandidate {
        text: attrs
            .display_text()
            .map(str::to_string)
            .or_else(|| subtree_text(node)),
        role: attrs.role.clone(),
        resource_id: attrs.resource_id.clone(),
        package_matches: attrs.package.as_deref() == Some(config.package.as_str()),
        has_click_affordance,
        // A missing height only fails the height rule, not the whole row.
        height: attrs
            .bounds
            .map(|b| b.height - config.min_row_height)
            .unwrap_or(f64::INFINITY),
    }
}

fn passes_row_predicate(node: &UiNode, config: &ClassifierConfig) -> bool {
    let candidate = normalize(node, config);
    for rule in ROW_RULES {
        if (rule.rejects)(&candidate) {
            trace!(rule = rule.name, text = ?candidate.text, "row candidate rejected");
            return false;
        }
    }
    true
}

/// A text/label leaf found inside a row subtree.
struct NameCandidate {
    value: String,
    depth: usize,
}

/// Transform one raw subtree string into a name candidate, or discard it.
///
/// "you: on my way" and single giant tokens are message previews; a string
/// with a colon and a long tail contributes only its head ("Bob: hey there"
/// yields "Bob"), unless the head is empty or numeric (timestamps).
fn name_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("you:") || lower.starts_with("you :") {
        return None;
    }
    if !trimmed.contains(char::is_whitespace) && trimmed.chars().count() > LONG_TOKEN_LEN {
        return None;
    }
    if let Some((head, tail)) = trimmed.split_once(':') {
        if tail.trim().chars().count() >= PREVIEW_TAIL_LEN {
            let head = head.trim();
            if head.is_empty() || head.chars().all(|ch| ch.is_ascii_digit()) {
                return None;
            }
            return Some(head.to_string());
        }
        // Short tails are usually timestamps ("3:45 PM"); drop those whose
        // head is numeric, keep the rest whole.
        if head.trim().chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        // Preview with a short message still hides the name in its head.
        if tail.trim().chars().count() > 0 {
            return Some(head.trim().to_string());
        }
    }
    Some(trimmed.to_string())
}

/// Extract the contact's display name from a row subtree: names are short
/// and sit high in the subtree, previews are longer and sit lower.
pub fn extract_display_name(row: &UiNode) -> Option<String> {
    let mut candidates: Vec<NameCandidate> = Vec::new();
    let mut raw_fallback: Option<String> = None;
    row.visit_subtree(&mut |node, depth| {
        let attrs = node.attributes();
        if let Some(text) = attrs.display_text() {
            if raw_fallback.is_none() {
                raw_fallback = Some(text.trim().to_string());
            }
            if let Some(value) = name_candidate(text) {
                candidates.push(NameCandidate { value, depth });
            }
        }
    });
    candidates
        .into_iter()
        .min_by_key(|c| (c.depth, c.value.chars().count()))
        .map(|c| c.value)
        .or(raw_fallback)
}

/// Classify the current snapshot into an ordered, deduplicated row list.
///
/// Classifying the same snapshot twice yields the same rows in the same
/// order; the caller owns retry policy when the result is empty.
pub fn classify_rows(root: &UiNode, config: &ClassifierConfig) -> Vec<ConversationRow> {
    let mut matched: Vec<UiNode> = Vec::new();

    match find_list_container(root) {
        Some(container) => {
            if let Ok(children) = container.children() {
                for child in children {
                    if passes_row_predicate(&child, config) {
                        matched.push(child);
                    }
                }
            }
        }
        None => {
            debug!("no scrollable list container; falling back to full-tree scan");
            root.visit_subtree(&mut |node, depth| {
                if depth > 0 && passes_row_predicate(node, config) {
                    matched.push(node.clone());
                }
            });
        }
    }

    // Top-to-bottom processing order regardless of match order.
    matched.sort_by(|a, b| {
        let ay = a.bounds().map(|bo| bo.y).unwrap_or(f64::MAX);
        let by = b.bounds().map(|bo| bo.y).unwrap_or(f64::MAX);
        ay.partial_cmp(&by).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen_buckets: Vec<i64> = Vec::new();
    let mut rows: Vec<ConversationRow> = Vec::new();
    for node in matched {
        let bucket = node
            .bounds()
            .ok()
            .filter(|b: &Bounds| !b.is_empty())
            .map(|b| b.vertical_bucket(config.dedup_band_px));
        if let Some(bucket) = bucket {
            if seen_buckets.contains(&bucket) {
                trace!(bucket, "duplicate row bucket folded");
                continue;
            }
            seen_buckets.push(bucket);
        }
        let Some(display_name) = extract_display_name(&node) else {
            continue;
        };
        let source_index = rows.len();
        rows.push(ConversationRow {
            node,
            display_name,
            source_index,
            bucket,
        });
    }

    debug!(row_count = rows.len(), "classified conversation rows");
    rows
}
