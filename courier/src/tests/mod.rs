mod session_tests;

use crate::platforms::scripted::{ScriptedBridge, ScriptedNode};
use crate::session::SessionConfig;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

pub(crate) const PKG: &str = "org.nightjar.chat";

pub(crate) fn test_config() -> SessionConfig {
    SessionConfig {
        packages: vec!["org.nightjar.chat.beta".to_string(), PKG.to_string()],
        ..Default::default()
    }
}

pub(crate) fn row_tag(name: &str) -> String {
    format!("row_{}", name.to_lowercase())
}

/// Conversation list with one row per (name, y) pair.
pub(crate) fn list_window_rows(rows: &[(String, f64)]) -> ScriptedNode {
    let row_nodes = rows
        .iter()
        .map(|(name, y)| {
            ScriptedNode::new("android.widget.LinearLayout")
                .tag(&row_tag(name))
                .package(PKG)
                .clickable()
                .bounds(0.0, *y, 1080.0, 120.0)
                .child(
                    ScriptedNode::new("android.widget.TextView")
                        .package(PKG)
                        .text(name)
                        .bounds(24.0, y + 10.0, 600.0, 40.0),
                )
        })
        .collect();
    ScriptedNode::new("android.widget.FrameLayout")
        .package(PKG)
        .bounds(0.0, 0.0, 1080.0, 1920.0)
        .child(
            ScriptedNode::new("androidx.recyclerview.widget.RecyclerView")
                .tag("conversation_list")
                .package(PKG)
                .bounds(0.0, 100.0, 1080.0, 1700.0)
                .children(row_nodes),
        )
}

pub(crate) fn list_window(contacts: &[String]) -> ScriptedNode {
    let rows: Vec<(String, f64)> = contacts
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), 200.0 + 140.0 * i as f64))
        .collect();
    list_window_rows(&rows)
}

/// One open conversation: a title, the composer input, and a send button.
pub(crate) fn conversation_window(name: &str) -> ScriptedNode {
    ScriptedNode::new("android.widget.FrameLayout")
        .package(PKG)
        .bounds(0.0, 0.0, 1080.0, 1920.0)
        .child(
            ScriptedNode::new("android.widget.TextView")
                .package(PKG)
                .text(name)
                .bounds(0.0, 0.0, 1080.0, 100.0),
        )
        .child(
            ScriptedNode::new("android.widget.LinearLayout")
                .package(PKG)
                .bounds(0.0, 1700.0, 1080.0, 200.0)
                .child(
                    ScriptedNode::new("android.widget.EditText")
                        .tag("composer_input")
                        .package(PKG)
                        .label("Type a message")
                        .editable()
                        .focusable()
                        .bounds(0.0, 1700.0, 880.0, 200.0),
                )
                .child(
                    ScriptedNode::new("android.widget.ImageButton")
                        .tag("send_button")
                        .package(PKG)
                        .resource_id("org.nightjar.chat:id/btn_send")
                        .clickable()
                        .focusable()
                        .bounds(880.0, 1700.0, 200.0, 200.0),
                ),
        )
}

/// Wire a complete scripted replica of the chat app: launching brings up the
/// list, clicking a row opens its conversation, send clears the composer,
/// back returns to the list.
pub(crate) fn wire_chat_app(bridge: &ScriptedBridge, contacts: &[&str]) {
    let contacts: Vec<String> = contacts.iter().map(|c| c.to_string()).collect();
    bridge.add_launchable(PKG);
    {
        let contacts = contacts.clone();
        bridge.on_launch(move |state| {
            state.set_foreground(Some(PKG));
            state.set_window(list_window(&contacts));
        });
    }
    for name in &contacts {
        let name = name.clone();
        bridge.on_click(&row_tag(&name), move |state| {
            state.set_window(conversation_window(&name));
        });
    }
    bridge.on_click("send_button", |state| {
        state.set_node_text("composer_input", "");
    });
    {
        let contacts = contacts.clone();
        bridge.on_back(move |state| {
            state.set_window(list_window(&contacts));
        });
    }
}
