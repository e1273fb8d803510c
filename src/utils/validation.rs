//! URL and input validation utilities

use anyhow::{anyhow, Result};
use url::Url;

const SHORTCUT_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

/// Validate if URL is well formed
pub fn validate_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| anyhow!("Invalid URL format: {}", e))
}

/// Check if URL is an http(s) URL
pub fn is_http_url(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        let scheme = parsed.scheme();
        scheme == "http" || scheme == "https"
    } else {
        false
    }
}

/// Video platform links are saved as shortcut files instead of being downloaded.
///
/// Only exact host matches count, so look-alike domains such as
/// `notyoutube.com` are downloaded normally.
pub fn is_shortcut_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|host| SHORTCUT_HOSTS.contains(&host.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortcut_hosts() {
        assert!(is_shortcut_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_shortcut_url("https://youtu.be/abc"));
        assert!(is_shortcut_url("https://m.youtube.com/watch?v=abc"));
        assert!(!is_shortcut_url("https://notyoutube.com/watch?v=abc"));
        assert!(!is_shortcut_url("https://cdn.example.com/youtube.com.pdf"));
        assert!(!is_shortcut_url("not a url"));
    }

    #[test]
    fn test_http_url() {
        assert!(is_http_url("https://api.example.com"));
        assert!(!is_http_url("ftp://example.com/file"));
        assert!(validate_url("::").is_err());
    }
}
