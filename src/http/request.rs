//! Outgoing request description.
//!
//! Requests are plain data so the session can merge its persistent
//! overrides into them and the transport can replay them on retry.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use url::Url;

/// A file attached to a form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content: Bytes,
    pub mime_type: Option<String>,
}

impl FileUpload {
    /// Create an upload from in-memory content.
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            mime_type: None,
        }
    }

    /// Set the MIME type sent with the file part.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read an upload from disk, naming it after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, content))
    }
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` pairs; repeated keys are kept.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` with text fields and file parts.
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<(String, FileUpload)>,
    },
    Json(serde_json::Value),
    Bytes(Bytes),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Per-call options for `open`, `follow` and friends.
///
/// Header names are stored lowercase so that merging the session's
/// persistent headers is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Body,
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Send url-encoded form pairs.
    pub fn form<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.body = Body::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Route this call through a proxy (`host:port` or a full proxy URL).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }
}

/// A fully resolved request handed to a [`Transport`](super::Transport).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub options: RequestOptions,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// URL including the query pairs from the options.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.options.query.iter());
        }
        url
    }
}

/// Normalise a proxy setting: bare `host:port` addresses become `http://host:port`.
pub fn normalize_proxy(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names_are_lowercased() {
        let options = RequestOptions::new().header("User-Agent", "Godzilla");
        assert!(options.has_header("user-agent"));
        assert!(options.has_header("USER-AGENT"));
        assert_eq!(options.headers.get("user-agent").unwrap(), "Godzilla");
    }

    #[test]
    fn test_full_url_appends_query_pairs() {
        let request = Request::new(Method::GET, Url::parse("https://example.com/s?a=1").unwrap())
            .with_options(RequestOptions::new().query("q", "cute kittens").query("q", "2"));
        assert_eq!(
            request.full_url().as_str(),
            "https://example.com/s?a=1&q=cute+kittens&q=2"
        );
    }

    #[test]
    fn test_normalize_proxy() {
        assert_eq!(normalize_proxy("10.0.0.1:8080"), "http://10.0.0.1:8080");
        assert_eq!(normalize_proxy("socks5://127.0.0.1:1080"), "socks5://127.0.0.1:1080");
    }
}
