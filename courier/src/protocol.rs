//! The per-contact interaction protocol: open a conversation, type, send,
//! verify, return. Every step that follows a suspension re-resolves its
//! nodes from a fresh snapshot; nothing captured before an action survives.

use crate::classifier::{classify_rows, ConversationRow};
use crate::errors::AutomationError;
use crate::node::UiNode;
use crate::platforms::AccessibilityBridge;
use crate::reporter::ContactFailure;
use crate::session::{pause, Interrupted, SessionConfig};
use crate::strategies::{
    run_activation_chain, ActivationCtx, SendControlCtx, locate_send_control,
    CONTROL_ACTIVATION_CHAIN, ROW_ACTIVATION_CHAIN,
};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Strings whose presence in a window suggest the app surfaced a send error.
const ERROR_MARKERS: &[&str] = &["error", "failed", "not sent", "couldn't send"];

/// Stable key for one planned row, carried across scans. The node itself is
/// never carried; it is re-resolved from a fresh snapshot each time.
#[derive(Debug, Clone)]
pub struct RowPlan {
    pub display_name: String,
    pub bucket: Option<i64>,
    pub source_index: usize,
}

/// Outcome of running the protocol for one row.
#[derive(Debug)]
pub enum RowOutcome {
    Sent {
        verified: bool,
        note: Option<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        failure: ContactFailure,
    },
}

/// Run the full protocol for one planned row. Returns the outcome plus the
/// vertical bucket the row resolved to, for duplicate bookkeeping.
pub(crate) async fn send_to_contact(
    bridge: &dyn AccessibilityBridge,
    config: &SessionConfig,
    package: &str,
    plan: &RowPlan,
    processed: &HashSet<i64>,
    message: &str,
    cancel: &CancellationToken,
) -> Result<(RowOutcome, Option<i64>), Interrupted> {
    // Step 1a: fresh re-resolution by stable key.
    let row = match resolve_row(bridge, config, package, plan) {
        Ok(row) => row,
        Err(failure) => return Ok((RowOutcome::Failed { failure }, plan.bucket)),
    };
    let bucket = row.bucket.or(plan.bucket);
    if let Some(b) = row.bucket {
        if processed.contains(&b) {
            debug!(name = %plan.display_name, bucket = b, "duplicate row; skipping");
            return Ok((
                RowOutcome::Skipped {
                    reason: "duplicate row already processed this run".to_string(),
                },
                Some(b),
            ));
        }
    }

    // Step 1b: activate the row through the fallback chain.
    let activation = ActivationCtx {
        bridge,
        node: &row.node,
        tap_duration: config.tap_duration,
        ancestor_hops: config.clickable_hops,
    };
    if let Err(err) = run_activation_chain(ROW_ACTIVATION_CHAIN, &activation).await {
        let failure = match err {
            AutomationError::InvalidBounds(msg) => ContactFailure::InvalidBounds(msg),
            other => ContactFailure::ClickFailed(other.to_string()),
        };
        return Ok((RowOutcome::Failed { failure }, bucket));
    }

    // Step 2: confirm navigation stayed inside the target app. One backed-off
    // recheck; a relaunch is never an option here.
    pause(cancel, config.settle_delay).await?;
    if !foreground_is(bridge, package) {
        pause(cancel, config.settle_delay).await?;
        if !foreground_is(bridge, package) {
            return Ok((
                RowOutcome::Failed {
                    failure: ContactFailure::LostForeground(
                        "target app not in foreground after row activation".to_string(),
                    ),
                },
                bucket,
            ));
        }
    }

    // Step 3: locate the message input, one delayed retry.
    let input = match find_message_input(bridge, config) {
        Some(input) => input,
        None => {
            pause(cancel, config.settle_delay).await?;
            match find_message_input(bridge, config) {
                Some(input) => input,
                None => {
                    return Ok((
                        RowOutcome::Failed {
                            failure: ContactFailure::InputNotFound(
                                "no editable message field in the conversation view"
                                    .to_string(),
                            ),
                        },
                        bucket,
                    ));
                }
            }
        }
    };

    // Step 4: the whole body in one set-text call, then a randomized settle
    // while the app enables its send control.
    if let Err(err) = input.set_text(message) {
        return Ok((
            RowOutcome::Failed {
                failure: ContactFailure::InputNotFound(format!("set-text failed: {err}")),
            },
            bucket,
        ));
    }
    pause(cancel, send_enable_delay(config)).await?;

    // Step 5: locate the send control on a fresh snapshot.
    let located = match bridge.active_window() {
        Ok(window) => {
            let fresh_input = find_message_input(bridge, config).unwrap_or_else(|| input.clone());
            let ctx = SendControlCtx {
                window: &window,
                input: &fresh_input,
                known_ids: &config.send_control_ids,
                ancestor_hops: config.clickable_hops,
            };
            locate_send_control(&ctx)
        }
        Err(_) => None,
    };
    let Some((control, strategy)) = located else {
        let outcome = RowOutcome::Failed {
            failure: ContactFailure::SendControlNotFound(
                "send control chain exhausted".to_string(),
            ),
        };
        return_to_list(bridge, config, cancel).await?;
        return Ok((outcome, bucket));
    };
    debug!(strategy, "send control located");

    // Step 6: focus is best-effort; activation uses the control chain.
    if let Err(err) = control.focus() {
        debug!(%err, "send control focus unsupported; continuing");
    }
    let control_ctx = ActivationCtx {
        bridge,
        node: &control,
        tap_duration: config.tap_duration,
        ancestor_hops: config.clickable_hops,
    };
    if run_activation_chain(CONTROL_ACTIVATION_CHAIN, &control_ctx)
        .await
        .is_err()
    {
        let outcome = RowOutcome::Failed {
            failure: ContactFailure::SendControlNotFound(
                "send control could not be activated".to_string(),
            ),
        };
        return_to_list(bridge, config, cancel).await?;
        return Ok((outcome, bucket));
    }

    // Step 7: verify optimistically. A fired send activation is the
    // strongest signal available without a delivery receipt.
    pause(cancel, config.settle_delay).await?;
    let note = match find_message_input(bridge, config) {
        Some(fresh) => match fresh.text() {
            Some(text) if text == message => {
                Some("send activated but input text unchanged".to_string())
            }
            _ => None,
        },
        None => {
            if error_surface_present(bridge) {
                Some("input gone with a possible error surface present".to_string())
            } else {
                None
            }
        }
    };
    if let Some(ref note) = note {
        warn!(name = %plan.display_name, %note, "send unverified; counting as sent");
    }

    // Step 8: back to the conversation list.
    return_to_list(bridge, config, cancel).await?;

    Ok((
        RowOutcome::Sent {
            verified: note.is_none(),
            note,
        },
        bucket,
    ))
}

fn send_enable_delay(config: &SessionConfig) -> Duration {
    let min = config.send_delay_min.as_millis() as u64;
    let max = (config.send_delay_max.as_millis() as u64).max(min);
    let millis = rand::thread_rng().gen_range(min..=max);
    Duration::from_millis(millis)
}

/// Re-resolve a planned row against the current snapshot: position bucket
/// first, best-effort name match second.
fn resolve_row(
    bridge: &dyn AccessibilityBridge,
    config: &SessionConfig,
    package: &str,
    plan: &RowPlan,
) -> Result<ConversationRow, ContactFailure> {
    let root = bridge
        .active_window()
        .map_err(|err| ContactFailure::ClickFailed(format!("no active window: {err}")))?;
    let rows = classify_rows(&root, &config.classifier_config(package));
    if let Some(bucket) = plan.bucket {
        if let Some(row) = rows.iter().find(|r| r.bucket == Some(bucket)) {
            return Ok(row.clone());
        }
    }
    rows.into_iter()
        .find(|r| r.display_name == plan.display_name)
        .ok_or_else(|| {
            ContactFailure::ClickFailed(format!(
                "row '{}' could not be re-resolved",
                plan.display_name
            ))
        })
}

fn foreground_is(bridge: &dyn AccessibilityBridge, package: &str) -> bool {
    matches!(bridge.foreground_package(), Ok(Some(owner)) if owner == package)
}

fn marker_match(node: &UiNode, markers: &[String]) -> bool {
    let haystack = format!(
        "{} {}",
        node.label().unwrap_or_default(),
        node.resource_id().unwrap_or_default()
    )
    .to_lowercase();
    markers.iter().any(|m| haystack.contains(&m.to_lowercase()))
}

/// Editable, not a search field, preferring fields hinted as message entry.
pub(crate) fn find_message_input(
    bridge: &dyn AccessibilityBridge,
    config: &SessionConfig,
) -> Option<UiNode> {
    let root = bridge.active_window().ok()?;
    let qualifying: Vec<UiNode> = root
        .descendants_where(|n| n.is_editable())
        .into_iter()
        .filter(|n| !marker_match(n, &config.search_markers))
        .collect();
    qualifying
        .iter()
        .find(|n| marker_match(n, &config.input_hints))
        .cloned()
        .or_else(|| qualifying.into_iter().next())
}

fn error_surface_present(bridge: &dyn AccessibilityBridge) -> bool {
    let Ok(root) = bridge.active_window() else {
        return false;
    };
    let mut found = false;
    root.visit_subtree(&mut |node, _| {
        if found {
            return;
        }
        if let Some(text) = node.attributes().display_text() {
            let lower = text.to_lowercase();
            if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
                found = true;
            }
        }
    });
    found
}

/// Leave the conversation view if it is still showing; one retry, and a
/// warning (never an abort) when the view refuses to go away.
async fn return_to_list(
    bridge: &dyn AccessibilityBridge,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> Result<(), Interrupted> {
    for _ in 0..2 {
        if find_message_input(bridge, config).is_none() {
            return Ok(());
        }
        if let Err(err) = bridge.global_back().await {
            debug!(%err, "back navigation failed");
        }
        pause(cancel, config.settle_delay).await?;
    }
    if find_message_input(bridge, config).is_some() {
        warn!("conversation view still present after back navigation; continuing");
    }
    Ok(())
}
