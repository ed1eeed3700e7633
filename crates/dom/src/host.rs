//! The query-and-perform surface a document host exposes to the router.

use std::any::Any;

use crate::ActionKind;

/// Opaque element handle, valid only for the document that issued it and
/// only until the next index build.
pub type NodeId = usize;

/// Read/act surface over one live document.
///
/// Browser hosts implement this over their DOM mirror; [`crate::PageDocument`]
/// implements it in memory. Handles are non-owning references: callers must
/// discard them whenever a new index is built and never persist them across
/// requests.
pub trait DomHost {
    /// The document root element.
    fn root(&self) -> NodeId;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Lower-cased tag name.
    fn tag(&self, node: NodeId) -> &str;

    fn attr(&self, node: NodeId, name: &str) -> Option<&str>;

    fn set_attr(&mut self, node: NodeId, name: &str, value: &str);

    /// Text owned directly by this element (not its subtree).
    fn own_text(&self, node: NodeId) -> &str;

    /// Computed visibility: not `hidden`, not `aria-hidden="true"`, rendered
    /// (display/visibility) along the ancestor chain, and laid out with at
    /// least one non-empty client rectangle.
    fn is_visible(&self, node: NodeId) -> bool;

    /// Numeric stacking index used to pick the topmost modal.
    fn stacking_index(&self, node: NodeId) -> i32;

    /// Look up an element by its `id` attribute.
    fn by_dom_id(&self, dom_id: &str) -> Option<NodeId>;

    /// Perform an action on an element. One shot, no retry.
    fn perform(&mut self, node: NodeId, action: ActionKind) -> Result<(), String>;

    fn as_any(&self) -> &dyn Any;
}

/// Pre-order walk of `root` and everything beneath it.
pub fn descendants(host: &dyn DomHost, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        out.push(node);
        let children = host.children(node);
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    out
}

/// Concatenated text of a subtree, single-spaced.
///
/// With `visible_only` this is the rendered text (invisible branches are
/// skipped); without it, the raw text content.
pub fn subtree_text(host: &dyn DomHost, root: NodeId, visible_only: bool) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in descendants(host, root) {
        if visible_only && !host.is_visible(node) {
            continue;
        }
        let text = host.own_text(node);
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageDocument;

    #[test]
    fn test_descendants_preorder() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        let a = doc.element(root, "div").done();
        let b = doc.element(a, "span").text("x").done();
        let c = doc.element(root, "div").done();

        assert_eq!(descendants(&doc, root), vec![root, a, b, c]);
    }

    #[test]
    fn test_subtree_text_skips_hidden() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        let wrap = doc.element(root, "div").done();
        doc.element(wrap, "span").text("Save").done();
        doc.element(wrap, "span").text("secret").hidden().done();

        assert_eq!(subtree_text(&doc, wrap, true), "Save");
        assert_eq!(subtree_text(&doc, wrap, false), "Save secret");
    }
}
