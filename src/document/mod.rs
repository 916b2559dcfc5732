//! Parsed page model: structural queries, links, tables and forms.
//!
//! A [`Document`] keeps the page source and its URL and parses on demand,
//! so it can be cloned into history snapshots and moved across tasks.
//! Query results are owned [`Node`] values detached from the parse tree.

mod links;
mod tables;
mod xpath;

pub use links::{Link, Links};
pub use tables::{CellValue, Row, Table};

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::filter::{Attributes, Filter};
use crate::forms::{Form, FormFilter};
use crate::utils::{escape_attr, escape_text};

/// Attributes that carry a URL and are rewritten by
/// [`Document::make_links_absolute`].
pub const LINK_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "action",
    "formaction",
    "data",
    "cite",
    "poster",
    "background",
    "longdesc",
    "usemap",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text children the parser keeps unescaped.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "iframe", "noembed", "noframes", "xmp", "plaintext",
];

/// Errors from structural queries.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid XPath expression '{expr}': {reason}")]
    XPath { expr: String, reason: String },

    #[error("failed to parse document: {0}")]
    Parse(String),
}

/// An element detached from the parse tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementData {
    pub tag: String,
    pub attributes: Attributes,
    /// Concatenated, trimmed text content.
    pub text: String,
    /// Outer HTML.
    pub html: String,
}

impl ElementData {
    pub(crate) fn from_element(el: ElementRef<'_>) -> Self {
        Self {
            tag: el.value().name().to_string(),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: element_text(el),
            html: el.html(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// The dictionary the filter engine sees: every attribute plus `text`.
    pub fn filter_attributes(&self) -> Attributes {
        let mut attributes = self.attributes.clone();
        attributes.insert("text".to_string(), self.text.clone());
        attributes
    }
}

/// Result of a `css` or `xpath` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Element(ElementData),
    /// Text node or attribute value.
    Text(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&ElementData> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.as_element().map(|el| el.tag.as_str())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.as_element().and_then(|el| el.attr(name))
    }

    pub fn text(&self) -> &str {
        match self {
            Node::Element(el) => &el.text,
            Node::Text(text) => text,
        }
    }
}

/// Narrow query results by tag allowlist and attribute filter.
///
/// Text nodes never match. An empty `tags` slice accepts any tag.
pub fn filter_nodes(nodes: &[Node], tags: &[&str], filter: &Filter) -> Vec<Node> {
    nodes
        .iter()
        .filter(|node| match node.as_element() {
            Some(el) => {
                (tags.is_empty() || tags.contains(&el.tag.as_str()))
                    && filter.matches(&el.filter_attributes())
            }
            None => false,
        })
        .cloned()
        .collect()
}

pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// One parsed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    url: Url,
    source: String,
}

impl Document {
    pub fn new(url: Url, source: impl Into<String>) -> Self {
        Self {
            url,
            source: source.into(),
        }
    }

    /// URL the document was loaded from.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Markup as currently held (after any link rewriting).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parse the source into a fresh tree.
    pub fn parse(&self) -> Html {
        Html::parse_document(&self.source)
    }

    /// Resolve a reference against the document URL.
    pub fn join(&self, reference: &str) -> Result<Url, url::ParseError> {
        self.url.join(reference)
    }

    /// Base used for absolute-link rewriting: the `<base href>` if present,
    /// otherwise the scheme and host of the document URL.
    fn rewrite_base(&self, html: &Html) -> Url {
        let mut root = self.url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);

        let Ok(selector) = Selector::parse("base[href]") else {
            return root;
        };
        html.select(&selector)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| self.url.join(href.trim()).ok())
            .unwrap_or(root)
    }

    /// Rewrite every relative URL reference to an absolute one.
    ///
    /// References in [`LINK_ATTRIBUTES`] are resolved against the
    /// `<base href>` if the page has one, otherwise against the scheme and
    /// host of the document URL. Already absolute references, fragments
    /// and empty values are left alone, so a second call is a no-op.
    pub fn make_links_absolute(&mut self) {
        let html = self.parse();
        let base = self.rewrite_base(&html);

        let mut out = String::with_capacity(self.source.len() + 64);
        let mut rewritten = 0usize;
        for child in html.tree.root().children() {
            if let Some(el) = ElementRef::wrap(child) {
                serialize_element(el, &base, &mut out, &mut rewritten);
            } else {
                match child.value() {
                    scraper::Node::Doctype(doctype) => {
                        out.push_str("<!DOCTYPE ");
                        out.push_str(doctype.name());
                        out.push('>');
                    }
                    scraper::Node::Comment(comment) => {
                        out.push_str("<!--");
                        out.push_str(comment);
                        out.push_str("-->");
                    }
                    scraper::Node::Text(text) => out.push_str(&escape_text(text)),
                    _ => {}
                }
            }
        }

        debug!("Rewrote {} relative references in {}", rewritten, self.url);
        self.source = out;
    }

    /// Text of the `<title>` element.
    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.parse()
            .select(&selector)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    }

    /// `src` of every `<img>`, resolved against the document URL.
    pub fn images(&self) -> Vec<Url> {
        let Ok(selector) = Selector::parse("img[src]") else {
            return Vec::new();
        };
        self.parse()
            .select(&selector)
            .filter_map(|el| el.value().attr("src"))
            .filter_map(|src| self.join(src.trim()).ok())
            .collect()
    }

    /// Elements matching a CSS selector, in document order.
    pub fn css(&self, selector: &str) -> Result<Vec<Node>, DocumentError> {
        let parsed = Selector::parse(selector).map_err(|e| DocumentError::InvalidSelector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self
            .parse()
            .select(&parsed)
            .map(|el| Node::Element(ElementData::from_element(el)))
            .collect())
    }

    /// Nodes selected by an XPath expression (see [`xpath`](self::xpath)
    /// for the supported subset).
    pub fn xpath(&self, expr: &str) -> Result<Vec<Node>, DocumentError> {
        xpath::select(&self.parse(), expr)
    }

    /// Links found under `tags` (anchors when empty) that pass `filter`,
    /// keyed by resolved target URL.
    pub fn links(&self, tags: &[&str], filter: &Filter) -> Links {
        links::extract(self, tags, filter)
    }

    /// Every `<form>` on the page passing `filter`.
    pub fn forms(&self, filter: &FormFilter) -> Vec<Form> {
        Form::extract(self)
            .into_iter()
            .filter(|form| filter.matches(form))
            .collect()
    }

    /// Header-keyed rows of every table on the page.
    pub fn tables(&self) -> Vec<Table> {
        tables::extract(&self.parse())
    }
}

fn rewrite_reference(value: &str, base: &Url) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || Url::parse(trimmed).is_ok() {
        return None;
    }
    base.join(trimmed).ok().map(String::from)
}

fn serialize_element(el: ElementRef<'_>, base: &Url, out: &mut String, rewritten: &mut usize) {
    let name = el.value().name();
    out.push('<');
    out.push_str(name);

    let attrs: BTreeMap<&str, &str> = el.value().attrs().collect();
    for (key, value) in attrs {
        let value = if LINK_ATTRIBUTES.contains(&key) {
            match rewrite_reference(value, base) {
                Some(absolute) => {
                    *rewritten += 1;
                    absolute
                }
                None => value.to_string(),
            }
        } else {
            value.to_string()
        };
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(&value));
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    let raw = RAW_TEXT_ELEMENTS.contains(&name);
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            serialize_element(child_el, base, out, rewritten);
            continue;
        }
        match child.value() {
            scraper::Node::Text(text) if raw => out.push_str(text),
            scraper::Node::Text(text) => out.push_str(&escape_text(text)),
            scraper::Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}
