//! Target index construction.
//!
//! Walks the active scope root (topmost modal if one is open, otherwise the
//! whole document), enumerates addressable elements, and derives one label
//! per element. The index is a snapshot valid for exactly one resolution
//! request; handles inside it must never be cached across requests.

use serde::Serialize;

use sayso_resolve::normalize;

use crate::host::{descendants, subtree_text, DomHost, NodeId};
use crate::selector::Selector;
use crate::{attrs, IndexScope, RiskLevel};

/// One addressable element in the current scope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Stable voice identifier (`data-voice-id` value).
    pub id: String,
    /// Element handle, valid only for this snapshot.
    #[serde(skip)]
    pub node: NodeId,
    /// Label as derived from the document, before normalization.
    pub raw_label: String,
    /// Normalized label.
    pub label: String,
    /// Normalized synonyms in declaration order.
    pub synonyms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
}

/// Snapshot of addressable elements taken at the start of a request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetIndex {
    pub targets: Vec<Target>,
    pub scope: IndexScope,
}

impl TargetIndex {
    pub fn target_by_id(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }
}

/// Compute the target index for the current document state.
///
/// `deny` is the configured global deny list; `data-voice-allow="true"`
/// overrides a deny-list match but not an explicit `data-voice-deny`.
pub fn build_index(host: &mut dyn DomHost, deny: &[Selector]) -> TargetIndex {
    let (scope_root, scope) = match modal_root(host) {
        Some(node) => (node, IndexScope::Modal),
        None => (host.root(), IndexScope::Page),
    };

    let mut seq = next_voice_seq(host);
    let mut targets = Vec::new();

    for node in descendants(host, scope_root) {
        if !is_eligible(host, node) || !host.is_visible(node) || is_denied(host, node, deny) {
            continue;
        }
        let Some(raw_label) = derive_label(host, node) else {
            continue;
        };
        let label = normalize(&raw_label);
        if label.is_empty() {
            continue;
        }

        let synonyms = host
            .attr(node, attrs::SYNONYMS)
            .map(|list| {
                list.split(',')
                    .map(normalize)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let risk = (host.attr(node, attrs::RISK) == Some("high")).then_some(RiskLevel::High);

        let id = ensure_voice_id(host, node, &mut seq);
        targets.push(Target {
            id,
            node,
            raw_label,
            label,
            synonyms,
            risk,
        });
    }

    tracing::debug!(count = targets.len(), scope = ?scope, "target index built");
    TargetIndex { targets, scope }
}

/// Selectors that declare a modal scope root.
fn is_modal_root(host: &dyn DomHost, node: NodeId) -> bool {
    let aria_modal = host.attr(node, "aria-modal") == Some("true");
    (host.tag(node) == "dialog" && host.attr(node, "open").is_some())
        || (host.attr(node, "role") == Some("dialog") && aria_modal)
        || aria_modal
        || host.attr(node, attrs::MODAL) == Some("true")
}

/// The topmost open modal, if any: highest stacking index, ties broken by
/// latest document order.
fn modal_root(host: &dyn DomHost) -> Option<NodeId> {
    let mut best: Option<NodeId> = None;
    for node in descendants(host, host.root()) {
        if !is_modal_root(host, node) || !host.is_visible(node) {
            continue;
        }
        best = match best {
            Some(current) if host.stacking_index(node) < host.stacking_index(current) => {
                Some(current)
            }
            _ => Some(node),
        };
    }
    best
}

const INTERACTIVE_ROLES: [&str; 5] = ["button", "link", "tab", "menuitem", "option"];

fn is_eligible(host: &dyn DomHost, node: NodeId) -> bool {
    if host.attr(node, attrs::LABEL).is_some() {
        return true;
    }
    match host.tag(node) {
        "button" | "select" | "textarea" | "summary" => true,
        "a" => host.attr(node, "href").is_some(),
        "input" => host.attr(node, "type") != Some("hidden"),
        _ => host
            .attr(node, "role")
            .is_some_and(|role| INTERACTIVE_ROLES.contains(&role)),
    }
}

fn is_denied(host: &dyn DomHost, node: NodeId, deny: &[Selector]) -> bool {
    if host.attr(node, attrs::DENY) == Some("true") {
        return true;
    }
    if deny.iter().any(|s| s.matches(host, node)) {
        return host.attr(node, attrs::ALLOW) != Some("true");
    }
    false
}

fn is_form_control(tag: &str) -> bool {
    matches!(tag, "input" | "select" | "textarea")
}

/// Whether placeholder text applies: textual inputs and textareas.
fn is_text_entry(host: &dyn DomHost, node: NodeId) -> bool {
    match host.tag(node) {
        "textarea" => true,
        "input" => !matches!(
            host.attr(node, "type").unwrap_or("text"),
            "button" | "submit" | "reset" | "checkbox" | "radio" | "range" | "color" | "file"
        ),
        _ => false,
    }
}

/// Derive the element's label: first non-empty source wins.
fn derive_label(host: &dyn DomHost, node: NodeId) -> Option<String> {
    if let Some(label) = non_empty(host.attr(node, attrs::LABEL)) {
        return Some(label);
    }
    if let Some(label) = non_empty(host.attr(node, "aria-label")) {
        return Some(label);
    }
    if let Some(refs) = host.attr(node, "aria-labelledby") {
        let joined = refs
            .split_whitespace()
            .filter_map(|dom_id| host.by_dom_id(dom_id))
            .map(|referenced| subtree_text(host, referenced, true))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.trim().is_empty() {
            return Some(joined);
        }
    }
    if is_form_control(host.tag(node)) {
        if let Some(label) = associated_label_text(host, node) {
            return Some(label);
        }
    }
    let rendered = subtree_text(host, node, true);
    if !rendered.trim().is_empty() {
        return Some(rendered);
    }
    let raw = subtree_text(host, node, false);
    if !raw.trim().is_empty() {
        return Some(raw);
    }
    if is_text_entry(host, node) {
        if let Some(label) = non_empty(host.attr(node, "placeholder")) {
            return Some(label);
        }
    }
    non_empty(host.attr(node, "title"))
}

fn non_empty(attr: Option<&str>) -> Option<String> {
    attr.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Text of the `<label>` associated with a form control, via `for`/id or an
/// ancestor label element.
fn associated_label_text(host: &dyn DomHost, node: NodeId) -> Option<String> {
    if let Some(own_id) = host.attr(node, "id") {
        let own_id = own_id.to_string();
        for candidate in descendants(host, host.root()) {
            if host.tag(candidate) == "label"
                && host.attr(candidate, "for") == Some(own_id.as_str())
            {
                let text = subtree_text(host, candidate, true);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }

    let mut current = host.parent(node);
    while let Some(ancestor) = current {
        if host.tag(ancestor) == "label" {
            let text = subtree_text(host, ancestor, true);
            if !text.is_empty() {
                return Some(text);
            }
        }
        current = host.parent(ancestor);
    }
    None
}

/// Next free `vt-<n>` suffix, skipping numbers already present in the page.
fn next_voice_seq(host: &dyn DomHost) -> u64 {
    descendants(host, host.root())
        .into_iter()
        .filter_map(|node| host.attr(node, attrs::VOICE_ID))
        .filter_map(|id| id.strip_prefix("vt-"))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

fn ensure_voice_id(host: &mut dyn DomHost, node: NodeId, seq: &mut u64) -> String {
    if let Some(existing) = non_empty(host.attr(node, attrs::VOICE_ID)) {
        return existing;
    }
    let id = format!("vt-{seq}");
    *seq += 1;
    host.set_attr(node, attrs::VOICE_ID, &id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageDocument;

    fn index(doc: &mut PageDocument) -> TargetIndex {
        build_index(doc, &[])
    }

    #[test]
    fn test_basic_button() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Submit").done();

        let idx = index(&mut doc);
        assert_eq!(idx.scope, IndexScope::Page);
        assert_eq!(idx.targets.len(), 1);
        assert_eq!(idx.targets[0].label, "submit");
        assert_eq!(idx.targets[0].raw_label, "Submit");
    }

    #[test]
    fn test_label_priority_order() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        // data-voice-label outranks aria-label outranks text.
        doc.element(root, "button")
            .attr(attrs::LABEL, "Override")
            .attr("aria-label", "Aria")
            .text("Text")
            .done();
        doc.element(root, "button").attr("aria-label", "Aria").text("Text").done();
        doc.element(root, "button").text("Text").done();

        let idx = index(&mut doc);
        let labels: Vec<&str> = idx.targets.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["override", "aria", "text"]);
    }

    #[test]
    fn test_aria_labelledby_joins_references() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "span").dom_id("p1").text("Save").done();
        doc.element(root, "span").dom_id("p2").text("Draft").done();
        doc.element(root, "button")
            .attr("aria-labelledby", "p1 p2")
            .done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].label, "save draft");
    }

    #[test]
    fn test_form_control_label_for() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "label").attr("for", "email").text("Email address").done();
        doc.element(root, "input").dom_id("email").attr("type", "text").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].label, "email address");
    }

    #[test]
    fn test_form_control_ancestor_label() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        let label = doc.element(root, "label").text("Subscribe").done();
        doc.element(label, "input").attr("type", "checkbox").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].label, "subscribe");
    }

    #[test]
    fn test_placeholder_and_title_fallbacks() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "input").attr("type", "search").attr("placeholder", "Search docs").done();
        doc.element(root, "button").attr("title", "Close panel").done();

        let idx = index(&mut doc);
        let labels: Vec<&str> = idx.targets.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["search docs", "close panel"]);
    }

    #[test]
    fn test_unlabelable_element_not_indexed() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").done();

        assert!(index(&mut doc).targets.is_empty());
    }

    #[test]
    fn test_hidden_input_and_plain_div_not_eligible() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "input").attr("type", "hidden").done();
        doc.element(root, "div").text("Just text").done();

        assert!(index(&mut doc).targets.is_empty());
    }

    #[test]
    fn test_role_eligibility() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "div").attr("role", "menuitem").text("Rename").done();
        doc.element(root, "div").attr("role", "presentation").text("Nope").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets.len(), 1);
        assert_eq!(idx.targets[0].label, "rename");
    }

    #[test]
    fn test_anchor_needs_href() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "a").attr("href", "/billing").text("Billing").done();
        doc.element(root, "a").text("Placeholder").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets.len(), 1);
        assert_eq!(idx.targets[0].label, "billing");
    }

    #[test]
    fn test_invisible_elements_skipped() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Ghost").hidden().done();
        doc.element(root, "button").text("Unstyled").unrendered().done();
        doc.element(root, "button").text("Flat").no_rect().done();
        doc.element(root, "button").text("Real").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets.len(), 1);
        assert_eq!(idx.targets[0].label, "real");
    }

    #[test]
    fn test_deny_and_allow() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Denied").attr(attrs::DENY, "true").done();
        doc.element(root, "button").text("Admin").attr("class", "admin").done();
        doc.element(root, "button")
            .text("Allowed admin")
            .attr("class", "admin")
            .attr(attrs::ALLOW, "true")
            .done();
        // Explicit deny wins over allow.
        doc.element(root, "button")
            .text("Still denied")
            .attr(attrs::DENY, "true")
            .attr(attrs::ALLOW, "true")
            .done();

        let deny = vec![Selector::parse(".admin").unwrap()];
        let idx = build_index(&mut doc, &deny);
        let labels: Vec<&str> = idx.targets.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["allowed admin"]);
    }

    #[test]
    fn test_synonyms_normalized() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "a")
            .attr("href", "/billing")
            .attr(attrs::LABEL, "Billing")
            .attr(attrs::SYNONYMS, " Invoices ,  PAYMENTS , ")
            .done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].synonyms, vec!["invoices", "payments"]);
    }

    #[test]
    fn test_risk_marker() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Delete account").attr(attrs::RISK, "high").done();
        doc.element(root, "button").text("Save").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].risk, Some(RiskLevel::High));
        assert_eq!(idx.targets[1].risk, None);
    }

    #[test]
    fn test_voice_ids_stable_across_rebuilds() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("One").done();
        doc.element(root, "button").text("Two").done();

        let first = index(&mut doc);
        let second = index(&mut doc);
        assert_eq!(
            first.targets.iter().map(|t| &t.id).collect::<Vec<_>>(),
            second.targets.iter().map(|t| &t.id).collect::<Vec<_>>(),
        );

        // A new element gets a fresh id, not a recycled one.
        doc.element(root, "button").text("Three").done();
        let third = index(&mut doc);
        let ids: Vec<&String> = third.targets.iter().map(|t| &t.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], &"vt-3".to_string());
    }

    #[test]
    fn test_index_rebuild_is_deterministic() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Save").attr(attrs::SYNONYMS, "store").done();
        doc.element(root, "button").text("Delete").attr(attrs::RISK, "high").done();

        let a = index(&mut doc);
        let b = index(&mut doc);
        let tuples = |idx: &TargetIndex| {
            idx.targets
                .iter()
                .map(|t| (t.label.clone(), t.synonyms.clone(), t.risk))
                .collect::<Vec<_>>()
        };
        assert_eq!(tuples(&a), tuples(&b));
    }

    #[test]
    fn test_modal_scope_wins() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Close").done();
        let dialog = doc
            .element(root, "div")
            .attr("role", "dialog")
            .attr("aria-modal", "true")
            .done();
        doc.element(dialog, "button").text("Close").done();

        let idx = index(&mut doc);
        assert_eq!(idx.scope, IndexScope::Modal);
        assert_eq!(idx.targets.len(), 1);
    }

    #[test]
    fn test_topmost_modal_by_stacking_then_order() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        let low = doc.element(root, "dialog").attr("open", "").z_index(10).done();
        doc.element(low, "button").text("Low").done();
        let high = doc.element(root, "dialog").attr("open", "").z_index(20).done();
        doc.element(high, "button").text("High").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].label, "high");

        // Tie on stacking index: latest in document order wins.
        let mut doc = PageDocument::new();
        let root = doc.root();
        let first = doc.element(root, "dialog").attr("open", "").done();
        doc.element(first, "button").text("First").done();
        let second = doc.element(root, "dialog").attr("open", "").done();
        doc.element(second, "button").text("Second").done();

        let idx = index(&mut doc);
        assert_eq!(idx.targets[0].label, "second");
    }

    #[test]
    fn test_closed_dialog_not_a_scope() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        let dialog = doc.element(root, "dialog").done();
        doc.element(dialog, "button").text("Inside").done();
        doc.element(root, "button").text("Outside").done();

        let idx = index(&mut doc);
        assert_eq!(idx.scope, IndexScope::Page);
        assert_eq!(idx.targets.len(), 2);
    }

    #[test]
    fn test_custom_modal_attribute() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        doc.element(root, "button").text("Background").done();
        let modal = doc.element(root, "section").attr(attrs::MODAL, "true").done();
        doc.element(modal, "button").text("Inside").done();

        let idx = index(&mut doc);
        assert_eq!(idx.scope, IndexScope::Modal);
        assert_eq!(idx.targets[0].label, "inside");
    }
}
