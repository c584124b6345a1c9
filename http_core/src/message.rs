//! The `Message` model: header set + optional body shared by [`Request`] and
//! [`Response`]. Per the redesign in the design notes this is a plain value
//! type with free functions (see [`crate::codec`]) rather than a class
//! hierarchy — `Request` and `Response` do not inherit from a common `Message`
//! base, they simply both carry a [`HeaderSet`] and a body buffer.

use crate::header::HeaderSet;
use crate::uri::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
    Head,
    Trace,
    Connect,
    Patch,
    Invalid,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Head => "HEAD",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
            Method::Invalid => "INVALID",
        }
    }

    pub fn parse(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "HEAD" => Method::Head,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            "PATCH" => Method::Patch,
            _ => Method::Invalid,
        }
    }

    /// Whether a request with this method is expected to carry a body.
    pub fn allows_request_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    pub fn as_str(self) -> String {
        format!("HTTP/{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::HTTP_11
    }
}

/// Whether a response with this status code is expected to carry a body
/// (informational 1xx, 204 No Content, and 304 Not Modified never do).
pub fn response_allows_body(status: u16) -> bool {
    !(matches!(status, 100..=199) || status == 204 || status == 304)
}

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderSet,
    pub body: Vec<u8>,
    pub headers_complete: bool,
}

impl Default for Method {
    fn default() -> Self {
        Method::Invalid
    }
}

impl Default for Uri {
    fn default() -> Self {
        Uri {
            scheme: "http".to_string(),
            host: String::new(),
            port: 80,
            path: "/".to_string(),
            query: None,
            fragment: None,
        }
    }
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderSet::default(),
            body: Vec::new(),
            headers_complete: false,
        }
    }

    pub fn reset(&mut self) {
        self.headers = HeaderSet::default();
        self.body.clear();
        self.headers_complete = false;
    }

    pub fn query_value(&self, name: &str) -> Option<String> {
        self.uri.query.as_deref().and_then(|q| crate::uri::scan_value(q, name))
    }

    /// `request.post_value(name)` — the analogous scan over the body, valid
    /// only when the method is POST.
    pub fn post_value(&self, name: &str) -> Option<String> {
        if self.method != Method::Post {
            return None;
        }
        let body = std::str::from_utf8(&self.body).ok()?;
        crate::uri::scan_value(body, name)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderSet,
    pub body: Vec<u8>,
    pub headers_complete: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            version: Version::HTTP_11,
            status: 0,
            reason: String::new(),
            headers: HeaderSet::default(),
            body: Vec::new(),
            headers_complete: false,
        }
    }
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            version: Version::HTTP_11,
            status,
            reason: reason.into(),
            headers: HeaderSet::default(),
            body: Vec::new(),
            headers_complete: true,
        }
    }

    pub fn reset(&mut self) {
        self.status = 0;
        self.reason.clear();
        self.headers = HeaderSet::default();
        self.body.clear();
        self.headers_complete = false;
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];
