//! File naming helpers for downloads.

use url::Url;

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_').trim_start_matches('.');
    if trimmed.is_empty() {
        return "download".to_string();
    }

    // Cap on a char boundary
    match trimmed.char_indices().nth(150) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Last non-empty path segment of a URL, percent-decoded.
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("a/b:c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("   "), "download");
    }

    #[test]
    fn test_sanitize_filename_caps_length() {
        let long = "é".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), 150);
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://example.com/files/my%20report.pdf?x=1").unwrap();
        assert_eq!(filename_from_url(&url), Some("my report.pdf".to_string()));

        let url = Url::parse("https://example.com/files/").unwrap();
        assert_eq!(filename_from_url(&url), Some("files".to_string()));

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }
}
