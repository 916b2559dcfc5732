//! Link extraction.

use std::collections::HashMap;

use scraper::Selector;
use serde::Serialize;
use url::Url;

use super::{Document, ElementData};
use crate::filter::{Attributes, Filter};

/// Attributes checked, in order, for an element's link target.
const TARGET_ATTRIBUTES: &[&str] = &["href", "src", "action", "data"];

/// A hyperlink-bearing element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    /// Target resolved against the document URL.
    pub url: Url,
    pub tag: String,
    /// Every element attribute plus `text`.
    pub attributes: Attributes,
}

impl Link {
    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn text(&self) -> &str {
        self.attr("text").unwrap_or_default()
    }

    pub fn title(&self) -> Option<&str> {
        self.attr("title")
    }

    pub fn class(&self) -> Option<&str> {
        self.attr("class")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }
}

/// Links keyed by target URL, in first-seen order.
///
/// A target seen again replaces the earlier record in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    links: Vec<Link>,
    index: HashMap<Url, usize>,
}

impl Links {
    fn insert(&mut self, link: Link) {
        match self.index.get(&link.url) {
            Some(&pos) => self.links[pos] = link,
            None => {
                self.index.insert(link.url.clone(), self.links.len());
                self.links.push(link);
            }
        }
    }

    pub fn get(&self, url: &Url) -> Option<&Link> {
        self.index.get(url).map(|&pos| &self.links[pos])
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.index.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Link> {
        self.links.iter()
    }

    pub fn urls(&self) -> impl Iterator<Item = &Url> {
        self.links.iter().map(|link| &link.url)
    }

    pub fn first(&self) -> Option<&Link> {
        self.links.first()
    }
}

impl IntoIterator for Links {
    type Item = Link;
    type IntoIter = std::vec::IntoIter<Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_iter()
    }
}

impl<'a> IntoIterator for &'a Links {
    type Item = &'a Link;
    type IntoIter = std::slice::Iter<'a, Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.iter()
    }
}

pub(super) fn extract(document: &Document, tags: &[&str], filter: &Filter) -> Links {
    let tags: Vec<&str> = if tags.is_empty() { vec!["a"] } else { tags.to_vec() };
    let mut links = Links::default();

    let Ok(selector) = Selector::parse(&tags.join(", ")) else {
        return links;
    };

    let html = document.parse();
    for el in html.select(&selector) {
        let Some(target) = TARGET_ATTRIBUTES.iter().find_map(|a| el.value().attr(a)) else {
            continue;
        };
        let Ok(url) = document.join(target.trim()) else {
            continue;
        };

        let data = ElementData::from_element(el);
        let attributes = data.filter_attributes();
        if !filter.matches(&attributes) {
            continue;
        }

        links.insert(Link {
            url,
            tag: data.tag,
            attributes,
        });
    }

    links
}
