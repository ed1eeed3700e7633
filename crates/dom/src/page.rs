//! In-memory document implementing [`DomHost`].
//!
//! Used by the test suites and by headless hosts. Performed actions are
//! recorded in an inspectable log instead of hitting a real page.

use std::any::Any;
use std::collections::BTreeMap;

use crate::host::{DomHost, NodeId};
use crate::ActionKind;

#[derive(Debug)]
struct ElementData {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    /// Computed-style visibility (display/visibility) of this element alone.
    rendered: bool,
    /// Whether layout produced at least one non-empty client rect.
    has_rect: bool,
    z_index: i32,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One action performed through [`PageDocument::perform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub node: NodeId,
    pub action: ActionKind,
}

/// An element tree with enough layout state to exercise the indexer.
#[derive(Debug)]
pub struct PageDocument {
    nodes: Vec<ElementData>,
    actions: Vec<ActionRecord>,
    perform_error: Option<String>,
}

impl PageDocument {
    /// A document with a single `body` root.
    pub fn new() -> Self {
        Self {
            nodes: vec![ElementData {
                tag: "body".to_string(),
                attrs: BTreeMap::new(),
                text: String::new(),
                rendered: true,
                has_rect: true,
                z_index: 0,
                parent: None,
                children: Vec::new(),
            }],
            actions: Vec::new(),
            perform_error: None,
        }
    }

    /// Start building a child element of `parent`.
    pub fn element(&mut self, parent: NodeId, tag: &str) -> ElementBuilder<'_> {
        let node = self.nodes.len();
        self.nodes.push(ElementData {
            tag: tag.to_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            rendered: true,
            has_rect: true,
            z_index: 0,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(node);
        ElementBuilder { doc: self, node }
    }

    /// Actions performed so far, in order.
    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    /// Make every subsequent `perform` fail with `message`.
    pub fn fail_actions(&mut self, message: impl Into<String>) {
        self.perform_error = Some(message.into());
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn passes_own_visibility(&self, node: NodeId) -> bool {
        let data = &self.nodes[node];
        if data.attrs.contains_key("hidden") {
            return false;
        }
        if data.attrs.get("aria-hidden").map(String::as_str) == Some("true") {
            return false;
        }
        data.rendered
    }
}

impl Default for PageDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DomHost for PageDocument {
    fn root(&self) -> NodeId {
        0
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes[node].children.clone()
    }

    fn tag(&self, node: NodeId) -> &str {
        &self.nodes[node].tag
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes[node].attrs.get(name).map(String::as_str)
    }

    fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        self.nodes[node]
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    fn own_text(&self, node: NodeId) -> &str {
        &self.nodes[node].text
    }

    fn is_visible(&self, node: NodeId) -> bool {
        if !self.nodes[node].has_rect {
            return false;
        }
        let mut current = Some(node);
        while let Some(id) = current {
            if !self.passes_own_visibility(id) {
                return false;
            }
            current = self.nodes[id].parent;
        }
        true
    }

    fn stacking_index(&self, node: NodeId) -> i32 {
        self.nodes[node].z_index
    }

    fn by_dom_id(&self, dom_id: &str) -> Option<NodeId> {
        (0..self.nodes.len()).find(|&n| self.nodes[n].attrs.get("id").map(String::as_str) == Some(dom_id))
    }

    fn perform(&mut self, node: NodeId, action: ActionKind) -> Result<(), String> {
        if let Some(message) = &self.perform_error {
            return Err(message.clone());
        }
        if node >= self.nodes.len() {
            return Err(format!("stale element handle {node}"));
        }
        self.actions.push(ActionRecord { node, action });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Chained construction of one element.
pub struct ElementBuilder<'a> {
    doc: &'a mut PageDocument,
    node: NodeId,
}

impl ElementBuilder<'_> {
    pub fn attr(self, name: &str, value: &str) -> Self {
        self.doc.nodes[self.node]
            .attrs
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.doc.nodes[self.node].text = text.to_string();
        self
    }

    /// Set the `id` attribute.
    pub fn dom_id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    /// Mark with the `hidden` attribute.
    pub fn hidden(self) -> Self {
        self.attr("hidden", "")
    }

    /// `display: none` / `visibility: hidden` equivalent.
    pub fn unrendered(self) -> Self {
        self.doc.nodes[self.node].rendered = false;
        self
    }

    /// Layout produced no client rect.
    pub fn no_rect(self) -> Self {
        self.doc.nodes[self.node].has_rect = false;
        self
    }

    pub fn z_index(self, z: i32) -> Self {
        self.doc.nodes[self.node].z_index = z;
        self
    }

    /// Finish and return the element handle.
    pub fn done(self) -> NodeId {
        self.node
    }
}
