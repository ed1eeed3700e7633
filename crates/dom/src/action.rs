//! Default-action selection and one-shot execution.

use crate::host::{DomHost, NodeId};
use crate::ActionKind;

/// Pick the safe default action for an element.
///
/// Roles outrank tags: a `div[role="tab"]` activates, a `button[role="tab"]`
/// activates too. Unknown kinds fall back to scroll-into-view plus focus.
pub fn default_action(host: &dyn DomHost, node: NodeId) -> ActionKind {
    if let Some(role) = host.attr(node, "role") {
        match role {
            "button" | "link" => return ActionKind::Click,
            "tab" | "menuitem" | "option" => return ActionKind::Activate,
            _ => {}
        }
    }
    match host.tag(node) {
        "button" => ActionKind::Click,
        "a" if host.attr(node, "href").is_some() => ActionKind::Click,
        "summary" => ActionKind::Activate,
        "input" | "select" | "textarea" => ActionKind::Focus,
        _ => ActionKind::ScrollFocus,
    }
}

/// Perform `action` on `node`. Never retries; the outcome is final.
pub fn run_action(host: &mut dyn DomHost, node: NodeId, action: ActionKind) -> Result<(), String> {
    host.perform(node, action)
}
