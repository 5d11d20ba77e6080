//! Plan-then-apply rewriting of HTML fragments
//!
//! Callers parse a fragment, walk it read-only and record edits against element
//! ordinals (pre-order position, the fragment root being 0). Rendering reparses
//! the same source and serializes it with the edits applied. Parsing is
//! deterministic, so ordinals computed on one parse address the same elements
//! on the next.

use scraper::{ElementRef, Html, Node};
use std::collections::HashMap;

/// A single edit against one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Set (or add) an attribute
    SetAttr { name: String, value: String },
    /// Drop the element's tags, keep its children
    Unwrap,
    /// Keep the element's tags, replace everything inside with raw markup
    ReplaceInner(String),
}

/// Edits keyed by element ordinal
#[derive(Debug, Clone, Default)]
pub struct RewritePlan {
    edits: HashMap<usize, Vec<Rewrite>>,
}

impl RewritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ordinal: usize, rewrite: Rewrite) {
        self.edits.entry(ordinal).or_default().push(rewrite);
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.values().map(Vec::len).sum()
    }

    fn get(&self, ordinal: usize) -> &[Rewrite] {
        self.edits.get(&ordinal).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Parse a fragment the same way `render` will
pub fn parse(source: &str) -> Html {
    Html::parse_fragment(source)
}

/// Elements of a parsed fragment paired with their ordinals, in document order
pub fn ordered_elements(fragment: &Html) -> impl Iterator<Item = (usize, ElementRef<'_>)> {
    fragment
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .enumerate()
}

/// Serialize the fragment's inner markup with the plan applied
pub fn render(source: &str, plan: &RewritePlan) -> String {
    let fragment = parse(source);
    let root = fragment.root_element();
    let mut out = String::with_capacity(source.len());
    let mut ordinal = 1;
    write_children(root, plan, &mut ordinal, &mut out);
    out
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

fn write_children(parent: ElementRef<'_>, plan: &RewritePlan, ordinal: &mut usize, out: &mut String) {
    let raw_text = RAW_TEXT_ELEMENTS.contains(&parent.value().name());

    for child in parent.children() {
        match child.value() {
            Node::Text(text) => {
                if raw_text {
                    out.push_str(text);
                } else {
                    escape_text(text, out);
                }
            }
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    write_element(element, plan, ordinal, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, plan: &RewritePlan, ordinal: &mut usize, out: &mut String) {
    let own = *ordinal;
    *ordinal += 1;

    let edits = plan.get(own);
    let name = element.value().name();

    let mut attrs: Vec<(String, String)> = element
        .value()
        .attrs
        .iter()
        .map(|(qual, value)| {
            // Foreign attributes (xlink:href, xml:lang, xmlns:xlink) keep their prefix
            let key = match qual.prefix.as_deref().filter(|p| !p.is_empty()) {
                Some(prefix) => format!("{}:{}", prefix, qual.local),
                None => qual.local.to_string(),
            };
            (key, value.to_string())
        })
        .collect();
    let mut unwrap = false;
    let mut inner = None;

    for edit in edits {
        match edit {
            Rewrite::SetAttr { name, value } => {
                match attrs.iter_mut().find(|(k, _)| k == name) {
                    Some(slot) => slot.1 = value.clone(),
                    None => attrs.push((name.clone(), value.clone())),
                }
            }
            Rewrite::Unwrap => unwrap = true,
            Rewrite::ReplaceInner(html) => inner = Some(html.as_str()),
        }
    }

    if unwrap {
        write_children(element, plan, ordinal, out);
        return;
    }

    // Attribute storage order is not guaranteed by the parser; sort so that
    // rendering the same source twice yields identical bytes.
    attrs.sort();

    out.push('<');
    out.push_str(name);
    for (key, value) in &attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    match inner {
        Some(html) => {
            out.push_str(html);
            *ordinal += element
                .descendants()
                .skip(1)
                .filter(|node| node.value().is_element())
                .count();
        }
        None => write_children(element, plan, ordinal, out),
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
