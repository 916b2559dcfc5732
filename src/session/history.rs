//! Bounded page history with a movable cursor.

use std::collections::VecDeque;

use reqwest::{Method, StatusCode};
use serde::Serialize;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::http::Response;

/// One visited page.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub document: Document,
    pub response: Response,
}

/// Summary of a stored visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Visit {
    pub url: String,
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
}

fn serialize_method<S>(method: &Method, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(method.as_str())
}

fn serialize_status<S>(status: &StatusCode, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u16(status.as_u16())
}

impl From<&HistoryEntry> for Visit {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            url: entry.response.url.to_string(),
            method: entry.response.method.clone(),
            status: entry.response.status,
        }
    }
}

/// Fixed-capacity ring of visited pages.
///
/// Pushing beyond capacity drops the oldest entry. The cursor always
/// points at a stored entry when the buffer is non-empty.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    cursor: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Append an entry and point the cursor at it.
    ///
    /// Entries ahead of the cursor are kept; only capacity eviction
    /// removes anything.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.cursor = self.entries.len() - 1;
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.cursor)
    }

    fn target(&self, delta: isize) -> Result<usize> {
        let target = self.cursor as isize + delta;
        if self.entries.is_empty() || target < 0 || target >= self.entries.len() as isize {
            return Err(Error::HistoryBoundary {
                cursor: self.cursor,
                target,
                len: self.entries.len(),
            });
        }
        Ok(target as usize)
    }

    /// Move the cursor `steps` entries back, down to the oldest stored one.
    pub fn back(&mut self, steps: usize) -> Result<&HistoryEntry> {
        let target = self.target(-(steps as isize))?;
        self.cursor = target;
        Ok(&self.entries[target])
    }

    /// Move the cursor `steps` entries forward, up to the newest stored one.
    pub fn forward(&mut self, steps: usize) -> Result<&HistoryEntry> {
        let target = self.target(steps as isize)?;
        self.cursor = target;
        Ok(&self.entries[target])
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Stored entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn visits(&self) -> Vec<Visit> {
        self.entries.iter().map(Visit::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use url::Url;

    fn entry(n: usize) -> HistoryEntry {
        let url = Url::parse(&format!("https://example.com/{}", n)).unwrap();
        HistoryEntry {
            document: Document::new(url.clone(), format!("<p>{}</p>", n)),
            response: Response::new(
                Method::GET,
                url,
                StatusCode::OK,
                Vec::<(String, String)>::new(),
                Bytes::new(),
            ),
        }
    }

    fn filled(capacity: usize, pushes: usize) -> History {
        let mut history = History::new(capacity);
        for n in 0..pushes {
            history.push(entry(n));
        }
        history
    }

    fn urls(history: &History) -> Vec<String> {
        history.visits().into_iter().map(|v| v.url).collect()
    }

    #[test]
    fn test_bounded_by_capacity() {
        for pushes in 0..12 {
            let history = filled(5, pushes);
            assert!(history.len() <= 5);
            if pushes >= 5 {
                let expected: Vec<String> = (pushes - 5..pushes)
                    .map(|n| format!("https://example.com/{}", n))
                    .collect();
                assert_eq!(urls(&history), expected);
                assert_eq!(history.cursor(), 4);
            }
        }
    }

    #[test]
    fn test_back_and_forward() {
        let mut history = filled(5, 3);
        assert_eq!(history.back(1).unwrap().response.url.path(), "/1");
        assert_eq!(history.forward(1).unwrap().response.url.path(), "/2");
    }

    #[test]
    fn back_reaches_oldest_entry() {
        let mut history = filled(5, 3);
        assert_eq!(history.back(2).unwrap().response.url.path(), "/0");
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_boundary_failures_leave_cursor() {
        let mut history = filled(5, 3);
        assert!(matches!(history.forward(1), Err(Error::HistoryBoundary { .. })));
        assert_eq!(history.cursor(), 2);
        assert!(matches!(history.back(3), Err(Error::HistoryBoundary { .. })));
        assert_eq!(history.cursor(), 2);

        history.back(2).unwrap();
        assert!(history.back(1).is_err());
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_push_after_back_keeps_forward_entries() {
        let mut history = filled(5, 3);
        history.back(2).unwrap();
        history.push(entry(9));
        assert_eq!(history.len(), 4);
        assert_eq!(history.cursor(), 3);
        assert_eq!(history.current().unwrap().response.url.path(), "/9");
    }

    #[test]
    fn test_empty_history() {
        let mut history = History::new(3);
        assert!(history.current().is_none());
        assert!(history.back(1).is_err());
        assert!(history.forward(0).is_err());
    }
}
