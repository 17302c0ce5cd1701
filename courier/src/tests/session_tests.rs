//! End-to-end session tests against the scripted chat app. All timings run
//! under the paused tokio clock, so the production delays cost nothing.

use super::{conversation_window, init_tracing, list_window_rows, row_tag, test_config, wire_chat_app, PKG};
use crate::platforms::scripted::ScriptedBridge;
use crate::reporter::{AbortReason, ContactResult, ContactStatus, MemoryStore, SessionEvent};
use crate::session::SessionHandle;
use crate::Automation;
use std::sync::{Arc, Mutex};

fn automation_with(bridge: &ScriptedBridge, store: &Arc<MemoryStore>) -> Automation {
    Automation::new(
        Arc::new(bridge.clone()),
        test_config(),
        store.clone() as Arc<dyn crate::ResultStore>,
    )
}

/// Drain the event stream until the terminal event.
async fn drain(handle: &mut SessionHandle) -> (Vec<ContactResult>, SessionEvent) {
    let mut rx = handle.events().expect("event stream already taken");
    let mut contacts = Vec::new();
    loop {
        match rx.recv().await.expect("session ended without terminal event") {
            SessionEvent::Contact(result) => contacts.push(result),
            terminal => return (contacts, terminal),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn happy_path_sends_to_every_row_in_order() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice", "Bob", "Carol"]);
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").expect("trigger accepted");
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, results } = terminal else {
        panic!("expected completion, got {terminal:?}");
    };
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.sent, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(
        summary.sent + summary.failed + summary.skipped,
        summary.processed
    );

    let names: Vec<&str> = contacts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
    let positions: Vec<usize> = contacts.iter().map(|c| c.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
    assert!(contacts
        .iter()
        .all(|c| c.status == ContactStatus::Sent && c.error_reason.is_none()));
    assert_eq!(results, contacts);

    // Launch-once: exactly one launch request for the whole session.
    assert_eq!(bridge.launches(), vec![PKG.to_string()]);
    // Every conversation received the body in a single set-text call.
    let typed = bridge.typed();
    assert_eq!(typed.len(), 3);
    assert!(typed.iter().all(|(tag, text)| tag == "composer_input" && text == "Hi"));

    // Completing persisted exactly one run record.
    assert_eq!(store.run_count(), 1);
    let record = store.last_run().unwrap();
    assert_eq!(record.abort_reason, None);
    assert_eq!(record.summary.sent, 3);
    assert_eq!(record.results.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn second_trigger_is_rejected_while_active() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice"]);
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut first = automation.start_session("Hi").expect("first trigger accepted");
    assert!(automation.is_session_active());
    assert!(automation.start_session("Hi").is_none());

    let (_, terminal) = drain(&mut first).await;
    assert!(matches!(terminal, SessionEvent::Completed { .. }));
    first.join().await;
    assert!(!automation.is_session_active());

    // Retriggerable after the guard is released.
    let mut again = automation.start_session("Hi").expect("retrigger accepted");
    let (_, terminal) = drain(&mut again).await;
    assert!(matches!(terminal, SessionEvent::Completed { .. }));
    again.join().await;
    assert_eq!(store.run_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn foreground_timeout_aborts_with_zero_results() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    bridge.add_launchable(PKG);
    // The app launches but never takes the foreground.
    bridge.on_launch(|state| {
        state.set_window(super::list_window(&["Alice".to_string()]));
    });
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    assert!(contacts.is_empty());
    let SessionEvent::Aborted { reason, results, .. } = terminal else {
        panic!("expected abort");
    };
    assert_eq!(reason, AbortReason::ForegroundTimeout);
    assert!(results.is_empty());
    assert_eq!(bridge.launches().len(), 1);
    assert_eq!(
        store.last_run().unwrap().abort_reason,
        Some(AbortReason::ForegroundTimeout)
    );
    assert!(!automation.is_session_active());
}

#[tokio::test(start_paused = true)]
async fn missing_launchable_package_aborts() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (_, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Aborted { reason, .. } = terminal else {
        panic!("expected abort");
    };
    assert_eq!(reason, AbortReason::LaunchFailure);
    assert!(bridge.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_list_aborts_after_scan_retries() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    bridge.add_launchable(PKG);
    bridge.on_launch(|state| {
        state.set_foreground(Some(PKG));
        state.set_window(list_window_rows(&[]));
    });
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    assert!(contacts.is_empty());
    let SessionEvent::Aborted { reason, .. } = terminal else {
        panic!("expected abort");
    };
    assert_eq!(reason, AbortReason::NoContactsFound);
}

#[tokio::test(start_paused = true)]
async fn activation_exhaustion_fails_the_row_and_continues() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice", "Bob"]);
    // Every interaction path into both rows is rejected by the platform, so
    // both activation chains exhaust; the loop must still visit both rows.
    bridge.fail_actions_on(&row_tag("Alice"));
    bridge.fail_actions_on(&row_tag("Bob"));
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, .. } = terminal else {
        panic!("a row failure must not abort the batch");
    };
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.sent, 0);
    assert_eq!(contacts.len(), 2);
    assert!(contacts.iter().all(|c| c.status == ContactStatus::Failed));
    assert!(contacts
        .iter()
        .all(|c| c.error_reason.as_deref().unwrap_or("").contains("activation")));
}

#[tokio::test(start_paused = true)]
async fn row_resolving_to_a_processed_bucket_is_skipped() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice", "Bob"]);
    // After the first send, back lands on a shifted list where Bob occupies
    // Alice's old band; the duplicate bucket must be skipped, not re-sent.
    bridge.on_back(|state| {
        state.set_window(list_window_rows(&[("Bob".to_string(), 200.0)]));
    });
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, .. } = terminal else {
        panic!("expected completion");
    };
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(contacts[0].status, ContactStatus::Sent);
    assert_eq!(contacts[1].status, ContactStatus::Skipped);
    // Only Alice's conversation ever received text.
    assert_eq!(bridge.typed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn row_cap_bounds_the_loop_but_not_the_scan_total() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice", "Bob", "Carol"]);
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config();
    config.max_rows = 2;
    let automation = Automation::new(
        Arc::new(bridge.clone()),
        config,
        store.clone() as Arc<dyn crate::ResultStore>,
    );

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, .. } = terminal else {
        panic!("expected completion");
    };
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.processed, 2);
    assert!(summary.processed <= summary.total_rows);
    let names: Vec<&str> = contacts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[tokio::test(start_paused = true)]
async fn unverified_send_still_counts_as_sent() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice"]);
    // The send control activates but the composer never clears.
    bridge.on_click("send_button", |_| {});
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, .. } = terminal else {
        panic!("expected completion");
    };
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(contacts[0].status, ContactStatus::Sent);
    assert!(contacts[0]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("unchanged"));
}

#[tokio::test(start_paused = true)]
async fn losing_the_foreground_fails_the_row_without_relaunching() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice"]);
    // Opening the row drags another app in front of the target.
    bridge.on_click(&row_tag("Alice"), |state| {
        state.set_foreground(Some("com.other.launcher"));
        state.set_window(conversation_window("Alice"));
    });
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, .. } = terminal else {
        panic!("expected completion");
    };
    assert_eq!(summary.failed, 1);
    assert_eq!(contacts[0].status, ContactStatus::Failed);
    assert!(contacts[0]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("foreground"));
    // Losing the foreground must never trigger a second launch.
    assert_eq!(bridge.launches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_message_input_fails_the_row() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice"]);
    // The conversation view opens without any editable field.
    bridge.on_click(&row_tag("Alice"), |state| {
        state.set_window(
            conversation_window("Alice"),
        );
        state.remove_node("composer_input");
    });
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    let mut handle = automation.start_session("Hi").unwrap();
    let (contacts, terminal) = drain(&mut handle).await;
    handle.join().await;

    let SessionEvent::Completed { summary, .. } = terminal else {
        panic!("expected completion");
    };
    assert_eq!(summary.failed, 1);
    assert_eq!(contacts[0].status, ContactStatus::Failed);
    assert!(contacts[0]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("message"));
    assert_eq!(bridge.launches().len(), 1);
    assert_eq!(bridge.typed().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_run_keeps_partial_results_and_returns_to_idle() {
    init_tracing();
    let bridge = ScriptedBridge::new();
    wire_chat_app(&bridge, &["Alice", "Bob", "Carol", "Dave", "Eve"]);
    let store = Arc::new(MemoryStore::new());
    let automation = automation_with(&bridge, &store);

    // Deliver the interrupt while the third row is being activated.
    let slot: Arc<Mutex<Option<SessionHandle>>> = Arc::new(Mutex::new(None));
    {
        let slot = slot.clone();
        bridge.on_click(&row_tag("Carol"), move |state| {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.interrupt();
            }
            state.set_window(conversation_window("Carol"));
        });
    }

    let mut handle = automation.start_session("Hi").unwrap();
    let mut rx = handle.events().expect("event stream");
    *slot.lock().unwrap() = Some(handle);

    let mut contacts = Vec::new();
    let terminal = loop {
        match rx.recv().await.expect("terminal event") {
            SessionEvent::Contact(result) => contacts.push(result),
            terminal => break terminal,
        }
    };

    let SessionEvent::Aborted { reason, results, .. } = terminal else {
        panic!("expected abort");
    };
    assert_eq!(reason, AbortReason::Interrupted);
    // Exactly the outcomes produced before the interrupt survive.
    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
    assert_eq!(contacts.len(), 2);

    let handle = slot.lock().unwrap().take().expect("handle stored");
    handle.join().await;
    assert!(!automation.is_session_active());

    // A fresh trigger is accepted immediately after the interrupt.
    let mut again = automation.start_session("Hi").expect("retrigger accepted");
    again.interrupt();
    let (_, terminal) = drain(&mut again).await;
    assert!(matches!(
        terminal,
        SessionEvent::Aborted {
            reason: AbortReason::Interrupted,
            ..
        }
    ));
    again.join().await;
}
