// Trawler is an open source web crawling engine.
// Copyright (C) 2024 Trawler ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! HTML tree adapter.
//!
//! Parsing backends are polymorphic behind [`TreeAdapter`]. The backend runs
//! on the rayon pool (parsing is CPU-bound and must not block the
//! coordinator's cooperative scheduler) and produces an [`HtmlTree`]: an
//! arena snapshot of the element tree that is `Send` and queryable with a
//! small CSS-selector subset (`tag`, `#id`, `.class`, `[attr]`,
//! `[attr=value]`, descendant combinator, comma groups).

use std::sync::Arc;

use kuchiki::traits::TendrilSink;
use once_cell::sync::Lazy;

use crate::Result;

pub trait TreeAdapter: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn parse(&self, html: &str) -> Result<HtmlTree>;
}

/// Process-wide default adapter. A pure-function cache: adapters hold no
/// per-parse state, so one instance can serve every crawl in the process.
pub fn default_adapter() -> Arc<dyn TreeAdapter> {
    static DEFAULT: Lazy<Arc<KuchikiAdapter>> = Lazy::new(|| Arc::new(KuchikiAdapter));
    DEFAULT.clone()
}

/// Parse on the rayon pool and hand the snapshot back to the async caller.
/// Only the calling task suspends; the event loop keeps running.
pub async fn parse_offloaded(adapter: Arc<dyn TreeAdapter>, html: String) -> Result<HtmlTree> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    rayon::spawn(move || {
        let _ = tx.send(adapter.parse(&html));
    });

    rx.await.map_err(|_| anyhow::anyhow!("parser pool dropped the parse job"))?
}

#[derive(Debug, Clone)]
struct ElementNode {
    tag: String,
    attrs: Vec<(String, String)>,
    own_text: String,
    children: Vec<usize>,
    parent: Option<usize>,
}

/// Owned snapshot of the element tree of one page.
#[derive(Debug, Clone, Default)]
pub struct HtmlTree {
    elements: Vec<ElementNode>,
    roots: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct ElementRef<'a> {
    tree: &'a HtmlTree,
    idx: usize,
}

impl HtmlTree {
    pub fn find(&self, selector: &str) -> Option<ElementRef<'_>> {
        self.find_all(selector).into_iter().next()
    }

    pub fn find_all(&self, selector: &str) -> Vec<ElementRef<'_>> {
        let Some(groups) = SelectorGroups::parse(selector) else {
            return Vec::new();
        };

        (0..self.elements.len())
            .filter(|&idx| groups.matches(self, idx))
            .map(|idx| ElementRef { tree: self, idx })
            .collect()
    }

    /// XPath is not supported by this backend.
    pub fn xpath(&self, _query: &str) -> Vec<ElementRef<'_>> {
        Vec::new()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn descendant_text(&self, idx: usize, out: &mut String) {
        let el = &self.elements[idx];

        if !el.own_text.is_empty() {
            if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                out.push(' ');
            }
            out.push_str(el.own_text.trim());
        }

        for &child in &el.children {
            self.descendant_text(child, out);
        }
    }
}

impl<'a> ElementRef<'a> {
    pub fn tag(&self) -> &'a str {
        &self.tree.elements[self.idx].tag
    }

    /// Concatenated text of this element and all its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.tree.descendant_text(self.idx, &mut out);
        out
    }

    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.tree.elements[self.idx]
            .attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> Vec<ElementRef<'a>> {
        self.tree.elements[self.idx]
            .children
            .iter()
            .map(|&idx| ElementRef {
                tree: self.tree,
                idx,
            })
            .collect()
    }

    pub fn find(&self, selector: &str) -> Option<ElementRef<'a>> {
        self.find_all(selector).into_iter().next()
    }

    /// Like [`HtmlTree::find_all`], scoped to descendants of this element.
    pub fn find_all(&self, selector: &str) -> Vec<ElementRef<'a>> {
        let Some(groups) = SelectorGroups::parse(selector) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        self.collect_matching(&groups, self.idx, &mut out);
        out
    }

    fn collect_matching(&self, groups: &SelectorGroups, idx: usize, out: &mut Vec<ElementRef<'a>>) {
        for &child in &self.tree.elements[idx].children {
            if groups.matches(self.tree, child) {
                out.push(ElementRef {
                    tree: self.tree,
                    idx: child,
                });
            }
            self.collect_matching(groups, child, out);
        }
    }
}

#[derive(Debug, Default)]
struct SimpleSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl SimpleSelector {
    fn parse(part: &str) -> Option<Self> {
        let mut sel = SimpleSelector::default();
        let mut rest = part;

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix('#') {
                let end = tail
                    .find(['#', '.', '['])
                    .unwrap_or(tail.len());
                sel.id = Some(tail[..end].to_string());
                rest = &tail[end..];
            } else if let Some(tail) = rest.strip_prefix('.') {
                let end = tail
                    .find(['#', '.', '['])
                    .unwrap_or(tail.len());
                sel.classes.push(tail[..end].to_string());
                rest = &tail[end..];
            } else if let Some(tail) = rest.strip_prefix('[') {
                let end = tail.find(']')?;
                let inner = &tail[..end];
                match inner.split_once('=') {
                    Some((key, value)) => sel.attrs.push((
                        key.trim().to_lowercase(),
                        Some(value.trim().trim_matches(['"', '\'']).to_string()),
                    )),
                    None => sel.attrs.push((inner.trim().to_lowercase(), None)),
                }
                rest = &tail[end + 1..];
            } else {
                let end = rest
                    .find(['#', '.', '['])
                    .unwrap_or(rest.len());
                if end == 0 {
                    return None;
                }
                sel.tag = Some(rest[..end].to_lowercase());
                rest = &rest[end..];
            }
        }

        Some(sel)
    }

    fn matches(&self, el: &ElementNode) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && !el.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        if let Some(id) = &self.id {
            let found = el
                .attrs
                .iter()
                .any(|(key, value)| key == "id" && value == id);
            if !found {
                return false;
            }
        }

        for class in &self.classes {
            let found = el.attrs.iter().any(|(key, value)| {
                key == "class" && value.split_whitespace().any(|c| c == class)
            });
            if !found {
                return false;
            }
        }

        for (name, expected) in &self.attrs {
            let found = el.attrs.iter().any(|(key, value)| {
                key.eq_ignore_ascii_case(name)
                    && expected.as_ref().map_or(true, |want| value == want)
            });
            if !found {
                return false;
            }
        }

        true
    }
}

/// Comma-separated groups of whitespace-separated (descendant) sequences.
#[derive(Debug)]
struct SelectorGroups {
    groups: Vec<Vec<SimpleSelector>>,
}

impl SelectorGroups {
    fn parse(selector: &str) -> Option<Self> {
        let mut groups = Vec::new();

        for group in selector.split(',') {
            let seq: Option<Vec<_>> = group
                .split_whitespace()
                .map(SimpleSelector::parse)
                .collect();
            let seq = seq?;
            if seq.is_empty() {
                return None;
            }
            groups.push(seq);
        }

        if groups.is_empty() {
            None
        } else {
            Some(Self { groups })
        }
    }

    fn matches(&self, tree: &HtmlTree, idx: usize) -> bool {
        self.groups.iter().any(|seq| Self::matches_seq(tree, idx, seq))
    }

    fn matches_seq(tree: &HtmlTree, idx: usize, seq: &[SimpleSelector]) -> bool {
        let (last, ancestors_sel) = seq.split_last().unwrap();

        if !last.matches(&tree.elements[idx]) {
            return false;
        }

        // Walk up the ancestor chain consuming the remaining selectors
        // right-to-left, standard descendant-combinator semantics.
        let mut remaining = ancestors_sel;
        let mut cursor = tree.elements[idx].parent;

        while let Some(sel) = remaining.last() {
            let Some(parent_idx) = cursor else {
                return false;
            };

            if sel.matches(&tree.elements[parent_idx]) {
                remaining = &remaining[..remaining.len() - 1];
            }

            cursor = tree.elements[parent_idx].parent;
        }

        true
    }
}

/// Backend over the kuchiki html5ever parser.
pub struct KuchikiAdapter;

impl KuchikiAdapter {
    fn snapshot(node: &kuchiki::NodeRef, parent: Option<usize>, tree: &mut HtmlTree) {
        for child in node.children() {
            if let Some(element) = child.as_element() {
                let attrs = element
                    .attributes
                    .borrow()
                    .map
                    .iter()
                    .map(|(name, attr)| (name.local.to_string(), attr.value.clone()))
                    .collect();

                let idx = tree.elements.len();
                tree.elements.push(ElementNode {
                    tag: element.name.local.to_string(),
                    attrs,
                    own_text: String::new(),
                    children: Vec::new(),
                    parent,
                });

                match parent {
                    Some(parent_idx) => tree.elements[parent_idx].children.push(idx),
                    None => tree.roots.push(idx),
                }

                Self::snapshot(&child, Some(idx), tree);
            } else if let Some(text) = child.as_text() {
                if let Some(parent_idx) = parent {
                    let text = text.borrow();
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        let own = &mut tree.elements[parent_idx].own_text;
                        if !own.is_empty() {
                            own.push(' ');
                        }
                        own.push_str(trimmed);
                    }
                }
            }
        }
    }
}

impl TreeAdapter for KuchikiAdapter {
    fn name(&self) -> &'static str {
        "kuchiki"
    }

    fn parse(&self, html: &str) -> Result<HtmlTree> {
        let document = kuchiki::parse_html().one(html);

        let mut tree = HtmlTree::default();
        Self::snapshot(&document, None, &mut tree);

        Ok(tree)
    }
}
