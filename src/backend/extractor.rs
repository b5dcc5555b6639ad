//! Reflected-URL payload extraction for the reference target.
//!
//! The target renders a "no results" page that echoes the request's query
//! string back into the body inside a `<code>` block. We look for that
//! echo, pull the reflected value back out, and read the payload parameter
//! out of it.

use super::PayloadExtractor;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use regex::Regex;

/// Extracts a reflected query string from a `No results for ...</code>`
/// wrapper and decodes the payload parameter as URL-safe base64.
pub struct ReflectedUrlExtractor;

impl ReflectedUrlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReflectedUrlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadExtractor for ReflectedUrlExtractor {
    fn extract(&self, body: &str, token: &str, data_param: &str) -> Option<Vec<u8>> {
        let pattern = format!(r"No results for (.*?){}(.*?)</code>", regex::escape(token));
        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(body)?;
        let prefix = caps.get(1)?.as_str();
        let suffix = caps.get(2)?.as_str();
        let reflected = format!("{prefix}{token}{suffix}");
        let unescaped = unescape_html_entities(&reflected);

        let query = match url::Url::parse(&unescaped) {
            Ok(parsed) => parsed.query().unwrap_or("").to_string(),
            Err(_) => unescaped,
        };

        let encoded_value = url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == data_param)
            .map(|(_, v)| v.into_owned())?;

        URL_SAFE.decode(encoded_value.as_bytes()).ok()
    }
}

/// Unescapes the five standard HTML entities. `&amp;` is replaced last so a
/// literal `&amp;lt;` in the source doesn't get double-unescaped into `<`.
fn unescape_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_base64_payload_from_reflected_query() {
        let value = URL_SAFE.encode(b"hello");
        let body = format!(
            "<html><body>No results for ?key=tok123&p={value}</code></body></html>"
        );
        let extractor = ReflectedUrlExtractor::new();
        let decoded = extractor.extract(&body, "tok123", "p");
        assert_eq!(decoded, Some(b"hello".to_vec()));
    }

    #[test]
    fn missing_wrapper_returns_none() {
        let extractor = ReflectedUrlExtractor::new();
        assert_eq!(extractor.extract("no match here", "tok123", "p"), None);
    }

    #[test]
    fn unescapes_ampersand_entities_in_query() {
        let value = URL_SAFE.encode(b"x");
        let body = format!("No results for ?a=1&amp;p={value}</code>");
        let extractor = ReflectedUrlExtractor::new();
        assert_eq!(extractor.extract(&body, "", "p"), Some(b"x".to_vec()));
    }
}
