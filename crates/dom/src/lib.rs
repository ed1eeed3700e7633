//! Document host abstraction, target indexing, and action execution.
//!
//! The engine never touches a real browser DOM. A host implements
//! [`DomHost`] over whatever document it mirrors; the indexer walks that
//! surface to produce the target index for one request, and the action
//! executor performs the default action on a resolved element through the
//! same surface. [`PageDocument`] is the bundled in-memory implementation
//! used for tests and headless operation.

mod action;
mod host;
mod indexer;
mod page;
mod selector;

pub use action::{default_action, run_action};
pub use host::{descendants, subtree_text, DomHost, NodeId};
pub use indexer::{build_index, Target, TargetIndex};
pub use page::{ActionRecord, ElementBuilder, PageDocument};
pub use selector::{Selector, SelectorError};

use serde::Serialize;

/// Voice override attributes consumed from the document.
pub mod attrs {
    /// Override label.
    pub const LABEL: &str = "data-voice-label";
    /// Comma-separated synonyms.
    pub const SYNONYMS: &str = "data-voice-synonyms";
    /// Exclude unconditionally.
    pub const DENY: &str = "data-voice-deny";
    /// Override a global deny-selector match.
    pub const ALLOW: &str = "data-voice-allow";
    /// Risk marker; `"high"` requires confirmation before acting.
    pub const RISK: &str = "data-voice-risk";
    /// Declare a custom modal root.
    pub const MODAL: &str = "data-voice-modal";
    /// Stable identifier written by the indexer.
    pub const VOICE_ID: &str = "data-voice-id";
}

/// Scope a target index was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexScope {
    /// The entire document.
    Page,
    /// The topmost modal subtree.
    Modal,
}

/// Default action performed on a resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    /// Click, semantically an activation (tabs, menu items, options).
    Activate,
    Focus,
    /// Smooth scroll to center, then focus if possible.
    ScrollFocus,
}

/// Risk marker carried by a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
}
