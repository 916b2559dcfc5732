//! HTTP response snapshot.

use std::collections::HashMap;

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

fn parse_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then_some(value)
    })
}

/// One hop of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub url: Url,
    pub status: StatusCode,
}

/// A fully buffered response.
///
/// Cloning is cheap: the body is reference counted, which is what lets the
/// session keep snapshots in its history buffer.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub method: Method,
    /// Final URL after redirects.
    pub url: Url,
    /// Header map with lowercase names. Repeated headers are joined with `, `.
    pub headers: HashMap<String, String>,
    set_cookies: Vec<String>,
    body: Bytes,
    history: Vec<Redirect>,
}

impl Response {
    /// Build a response snapshot. Header names are lowercased.
    pub fn new<I, K, V>(
        method: Method,
        url: Url,
        status: StatusCode,
        headers: I,
        body: Bytes,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map: HashMap<String, String> = HashMap::new();
        let mut set_cookies = Vec::new();
        for (name, value) in headers {
            let name = name.as_ref().to_ascii_lowercase();
            let value = value.into();
            if name == "set-cookie" {
                set_cookies.push(value.clone());
            }
            map.entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        Self {
            status,
            method,
            url,
            headers: map,
            set_cookies,
            body,
            history: Vec::new(),
        }
    }

    /// Attach the redirect chain that led to this response.
    pub fn with_history(mut self, history: Vec<Redirect>) -> Self {
        self.history = history;
        self
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the Content-Length header.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|s| s.parse().ok())
    }

    /// Get the filename from Content-Disposition header.
    pub fn content_disposition_filename(&self) -> Option<String> {
        self.header("content-disposition")
            .and_then(parse_content_disposition_filename)
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Charset named in the Content-Type header.
    pub fn charset(&self) -> Option<&str> {
        self.content_type().and_then(parse_charset)
    }

    /// Body decoded with the Content-Type charset, UTF-8 when absent or
    /// unknown. A byte order mark wins over the header.
    pub fn text(&self) -> String {
        let encoding = self
            .charset()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (decoded, _, _) = encoding.decode(&self.body);
        decoded.into_owned()
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Redirects followed before reaching this response, oldest first.
    pub fn history(&self) -> &[Redirect] {
        &self.history
    }

    /// Cookies set by this response as `(name, value)` pairs.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.set_cookies
            .iter()
            .filter_map(|header| {
                let pair = header.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// Parse filename from Content-Disposition header value.
/// Parses both `filename="name.pdf"` and `filename*=UTF-8''name.pdf` formats.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    // RFC 5987 form wins when both are present
    if let Some(start) = header.find("filename*=") {
        let rest = &header[start + 10..];
        if let Some(quote_start) = rest.find("''") {
            let encoded = rest[quote_start + 2..].split([';', ' ']).next()?;
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let filename = decoded.trim().to_string();
                if !filename.is_empty() {
                    return Some(filename);
                }
            }
        }
    }

    if let Some(start) = header.find("filename=") {
        let rest = &header[start + 9..];
        let filename = if let Some(quoted) = rest.strip_prefix('"') {
            quoted.split('"').next()
        } else {
            rest.split([';', ' ']).next()
        };

        if let Some(name) = filename {
            let name = name.trim().to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: Vec<(&str, &str)>, body: &'static str) -> Response {
        Response::new(
            Method::GET,
            Url::parse("https://example.com/page").unwrap(),
            StatusCode::OK,
            headers,
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let resp = response(vec![("Content-Type", "text/html; charset=utf-8")], "");
        assert_eq!(resp.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(resp.header("CONTENT-TYPE"), resp.content_type());
    }

    #[test]
    fn test_cookies_from_set_cookie_headers() {
        let resp = response(
            vec![
                ("Set-Cookie", "session=abc123; Path=/; HttpOnly"),
                ("Set-Cookie", "theme=dark"),
            ],
            "",
        );
        assert_eq!(
            resp.cookies(),
            vec![
                ("session".to_string(), "abc123".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ]
        );
    }

    #[test]
    fn test_json_body() {
        let resp = response(vec![], r#"{"user-agent": "Godzilla"}"#);
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["user-agent"], "Godzilla");
    }

    #[test]
    fn test_parse_content_disposition_quoted() {
        let header = r#"attachment; filename="document.pdf""#;
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("document.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_rfc5987() {
        let header = "attachment; filename*=UTF-8''my%20picture.png";
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("my picture.png".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_none() {
        assert_eq!(parse_content_disposition_filename("attachment"), None);
        assert_eq!(parse_content_disposition_filename("inline"), None);
    }

    fn page(content_type: &str, body: &'static [u8]) -> Response {
        Response::new(
            Method::GET,
            Url::parse("https://example.com/").unwrap(),
            StatusCode::OK,
            vec![("Content-Type", content_type)],
            Bytes::from_static(body),
        )
    }

    #[test]
    fn test_text_uses_declared_charset() {
        let latin1 = page("text/html; charset=iso-8859-1", b"<title>caf\xe9</title>");
        assert_eq!(latin1.charset(), Some("iso-8859-1"));
        assert_eq!(latin1.text(), "<title>caf\u{e9}</title>");

        let quoted = page("text/html; Charset=\"windows-1251\"", b"\xcf\xf0\xe8");
        assert_eq!(quoted.text(), "\u{41f}\u{440}\u{438}");
    }

    #[test]
    fn test_text_falls_back_to_utf8() {
        assert_eq!(page("text/html", "caf\u{e9}".as_bytes()).text(), "caf\u{e9}");
        assert_eq!(page("text/html; charset=bogus", b"ok").text(), "ok");
        assert_eq!(page("text/html; charset=utf-8", b"a\xffb").text(), "a\u{fffd}b");
    }
}
