//! Content-type dispatch to document constructors.

use crate::document::{Document, DocumentError};
use crate::http::Response;

/// Builds a document from a response.
pub type ParserFn = fn(&Response) -> Result<Document, DocumentError>;

/// Content types handled out of the box. JSON is parsed like HTML so
/// that link and form scraping still work on it.
pub const DEFAULT_CONTENT_TYPES: &[&str] =
    &["text/html", "text/json", "application/xml", "application/json"];

/// Parse the body as HTML.
pub fn parse_html(response: &Response) -> Result<Document, DocumentError> {
    Ok(Document::new(response.url.clone(), response.text()))
}

/// Ordered content-type -> parser table.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    entries: Vec<(String, ParserFn)>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            entries: DEFAULT_CONTENT_TYPES
                .iter()
                .map(|ct| (ct.to_string(), parse_html as ParserFn))
                .collect(),
        }
    }
}

impl ParserRegistry {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register or replace the parser for `content_type`.
    pub fn register(&mut self, content_type: &str, parser: ParserFn) {
        let content_type = content_type.trim().to_ascii_lowercase();
        match self.entries.iter_mut().find(|(ct, _)| *ct == content_type) {
            Some(entry) => entry.1 = parser,
            None => self.entries.push((content_type, parser)),
        }
    }

    /// Parser for a `Content-Type` header value: an exact match on the
    /// media type first, then the first registered type it contains.
    pub fn find(&self, content_type: &str) -> Option<ParserFn> {
        let header = content_type.to_ascii_lowercase();
        let media_type = header.split(';').next().unwrap_or_default().trim();
        if media_type.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|(ct, _)| ct == media_type)
            .or_else(|| self.entries.iter().find(|(ct, _)| header.contains(ct.as_str())))
            .map(|(_, parser)| *parser)
    }

    pub fn content_types(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(ct, _)| ct.as_str())
    }
}
