//! Simple-selector parsing and matching.
//!
//! Supports the compound subset used by deny lists and modal roots:
//! `tag`, `#id`, `.class`, `[attr]`, `[attr="value"]` in any combination.
//! No combinators.

use crate::host::{DomHost, NodeId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected character '{0}' in selector")]
    UnexpectedChar(char),
    #[error("unterminated attribute selector")]
    UnterminatedAttr,
    #[error("empty {0} name in selector")]
    EmptyName(&'static str),
}

/// One parsed compound selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    dom_id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl Selector {
    /// Parse a compound selector such as `dialog[open]` or
    /// `[role="dialog"][aria-modal="true"]`.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut selector = Selector::default();
        let mut chars = input.chars().peekable();

        // Optional leading tag name.
        let mut tag = String::new();
        while let Some(&c) = chars.peek() {
            if is_ident_char(c) {
                tag.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if !tag.is_empty() {
            selector.tag = Some(tag.to_lowercase());
        }

        while let Some(c) = chars.next() {
            match c {
                '#' => {
                    let name = take_ident(&mut chars);
                    if name.is_empty() {
                        return Err(SelectorError::EmptyName("id"));
                    }
                    selector.dom_id = Some(name);
                }
                '.' => {
                    let name = take_ident(&mut chars);
                    if name.is_empty() {
                        return Err(SelectorError::EmptyName("class"));
                    }
                    selector.classes.push(name);
                }
                '[' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(SelectorError::UnterminatedAttr);
                    }
                    let (name, value) = match body.split_once('=') {
                        Some((n, v)) => {
                            let v = v.trim().trim_matches('"').trim_matches('\'');
                            (n.trim(), Some(v.to_string()))
                        }
                        None => (body.trim(), None),
                    };
                    if name.is_empty() {
                        return Err(SelectorError::EmptyName("attribute"));
                    }
                    selector.attrs.push((name.to_lowercase(), value));
                }
                other => return Err(SelectorError::UnexpectedChar(other)),
            }
        }

        Ok(selector)
    }

    /// Parse a list of selectors, rejecting the whole list on any error.
    pub fn parse_all(inputs: &[String]) -> Result<Vec<Self>, SelectorError> {
        inputs.iter().map(|s| Self::parse(s)).collect()
    }

    /// Whether `node` matches every component of this selector.
    pub fn matches(&self, host: &dyn DomHost, node: NodeId) -> bool {
        if let Some(tag) = &self.tag {
            if host.tag(node) != tag {
                return false;
            }
        }
        if let Some(dom_id) = &self.dom_id {
            if host.attr(node, "id") != Some(dom_id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = host.attr(node, "class").unwrap_or("");
            let classes: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
                return false;
            }
        }
        for (name, expected) in &self.attrs {
            match (host.attr(node, name), expected) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }
        true
    }
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if is_ident_char(c) {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageDocument;

    #[test]
    fn test_parse_tag_only() {
        let s = Selector::parse("dialog").unwrap();
        assert_eq!(s.tag.as_deref(), Some("dialog"));
    }

    #[test]
    fn test_parse_attr_forms() {
        let s = Selector::parse("dialog[open]").unwrap();
        assert_eq!(s.attrs, vec![("open".to_string(), None)]);

        let s = Selector::parse(r#"[role="dialog"][aria-modal="true"]"#).unwrap();
        assert_eq!(
            s.attrs,
            vec![
                ("role".to_string(), Some("dialog".to_string())),
                ("aria-modal".to_string(), Some("true".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_compound() {
        let s = Selector::parse("button.primary#save[disabled]").unwrap();
        assert_eq!(s.tag.as_deref(), Some("button"));
        assert_eq!(s.dom_id.as_deref(), Some("save"));
        assert_eq!(s.classes, vec!["primary".to_string()]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Selector::parse(""), Err(SelectorError::Empty));
        assert_eq!(Selector::parse("[open"), Err(SelectorError::UnterminatedAttr));
        assert_eq!(Selector::parse("a>b"), Err(SelectorError::UnexpectedChar('>')));
        assert_eq!(Selector::parse("."), Err(SelectorError::EmptyName("class")));
    }

    #[test]
    fn test_matching() {
        let mut doc = PageDocument::new();
        let root = doc.root();
        let node = doc
            .element(root, "button")
            .dom_id("save")
            .attr("class", "primary wide")
            .attr("role", "button")
            .done();

        assert!(Selector::parse("button").unwrap().matches(&doc, node));
        assert!(Selector::parse("#save").unwrap().matches(&doc, node));
        assert!(Selector::parse(".primary.wide").unwrap().matches(&doc, node));
        assert!(Selector::parse(r#"[role="button"]"#).unwrap().matches(&doc, node));
        assert!(Selector::parse("[role]").unwrap().matches(&doc, node));

        assert!(!Selector::parse("a").unwrap().matches(&doc, node));
        assert!(!Selector::parse(".missing").unwrap().matches(&doc, node));
        assert!(!Selector::parse(r#"[role="link"]"#).unwrap().matches(&doc, node));
    }
}
