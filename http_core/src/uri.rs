//! URI reference: scheme, host, port, path, query, fragment.
//!
//! Parsing and relative-reference resolution are delegated to the `url`
//! crate; this type exists to expose the plain field set the rest of the
//! crate (pool keys, `Host` header defaulting, redirect rewriting) wants,
//! rather than threading `url::Url` through every signature.

use crate::error::HttpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl Uri {
    pub fn parse(raw: &str) -> Result<Self, HttpError> {
        let url = url::Url::parse(raw).map_err(|e| HttpError::InvalidUri(e.to_string()))?;
        Self::from_url(&url)
    }

    /// Resolve `location` (absolute or relative) against `self` per RFC 3986 §5,
    /// as used for redirect handling in the client connection state machine.
    pub fn resolve(&self, location: &str) -> Result<Self, HttpError> {
        let base = self.to_url()?;
        let resolved = base
            .join(location)
            .map_err(|e| HttpError::InvalidUri(e.to_string()))?;
        Self::from_url(&resolved)
    }

    pub fn scheme_is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }

    /// Default port for the scheme when the URI did not specify one.
    pub fn default_port(scheme: &str) -> u16 {
        match scheme {
            "https" | "wss" => 443,
            _ => 80,
        }
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_url(url: &url::Url) -> Result<Self, HttpError> {
        let scheme = url.scheme().to_string();
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidUri("missing host".to_string()))?
            .to_string();
        let port = url.port().unwrap_or_else(|| Self::default_port(&scheme));
        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        Ok(Self {
            scheme,
            host,
            port,
            path,
            query: url.query().map(str::to_string),
            fragment: url.fragment().map(str::to_string),
        })
    }

    fn to_url(&self) -> Result<url::Url, HttpError> {
        let mut raw = format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path);
        if let Some(q) = &self.query {
            raw.push('?');
            raw.push_str(q);
        }
        if let Some(f) = &self.fragment {
            raw.push('#');
            raw.push_str(f);
        }
        url::Url::parse(&raw).map_err(|e| HttpError::InvalidUri(e.to_string()))
    }
}

/// Query-string scan matching `request.query_value(name)`: the value
/// following `name=` up to the next `&` or end of string.
pub fn scan_value(haystack: &str, name: &str) -> Option<String> {
    let mut start = 0;
    while let Some(idx) = haystack[start..].find(name) {
        let pos = start + idx;
        let name_end = pos + name.len();
        let preceded_ok = pos == 0 || haystack.as_bytes()[pos - 1] == b'&';
        if preceded_ok && haystack.as_bytes().get(name_end) == Some(&b'=') {
            let value_start = name_end + 1;
            let value_end = haystack[value_start..]
                .find('&')
                .map(|i| value_start + i)
                .unwrap_or(haystack.len());
            return Some(haystack[value_start..value_end].to_string());
        }
        start = pos + name.len().max(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_port_path() {
        let uri = Uri::parse("https://example.com/a/b?x=1#frag").unwrap();
        assert_eq!(uri.scheme, "https");
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, 443);
        assert_eq!(uri.path, "/a/b");
        assert_eq!(uri.query.as_deref(), Some("x=1"));
        assert!(uri.scheme_is_secure());
    }

    #[test]
    fn resolves_relative_location_against_base() {
        let base = Uri::parse("http://example.com/dir/page").unwrap();
        let resolved = base.resolve("/other").unwrap();
        assert_eq!(resolved.host, "example.com");
        assert_eq!(resolved.path, "/other");
    }

    #[test]
    fn resolves_absolute_location_to_a_new_host() {
        let base = Uri::parse("http://example.com/a").unwrap();
        let resolved = base.resolve("http://other.example/x").unwrap();
        assert_eq!(resolved.host, "other.example");
        assert_eq!(resolved.path, "/x");
    }

    #[test]
    fn query_value_scans_up_to_ampersand() {
        assert_eq!(scan_value("a=1&b=2", "b"), Some("2".to_string()));
        assert_eq!(scan_value("a=1&b=2", "c"), None);
    }
}
