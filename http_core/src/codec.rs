//! HTTP/1.1 wire codec: incremental parsing (`httparse` tokenizes, this
//! module owns body-length bookkeeping) and serialization.

use crate::error::HttpError;
use crate::header::HeaderSet;
use crate::message::{response_allows_body, Method, Request, Response, Version};
use crate::uri::Uri;

const MAX_HEADERS: usize = 64;

/// Attempt to decode one HTTP request from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((request, consumed)))`
/// when a full request (headers + body, if any) is available, and `Err` on
/// malformed framing — per §4.1, the caller treats this as fatal and closes
/// the connection.
pub fn try_decode_request(buf: &[u8], base_uri: &Uri) -> Result<Option<(Request, usize)>, HttpError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_storage);
    let header_len = match parsed.parse(buf).map_err(|_| HttpError::Invalid)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = Method::parse(parsed.method.ok_or(HttpError::Invalid)?);
    let path = parsed.path.ok_or(HttpError::Invalid)?;
    let (path_part, query_part) = split_target(path);
    let version = if parsed.version == Some(0) {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    };

    let mut headers = HeaderSet::default();
    for h in parsed.headers.iter() {
        let value = std::str::from_utf8(h.value).map_err(|_| HttpError::Invalid)?;
        headers.add_field(h.name, value.trim());
    }

    let content_length = if method.allows_request_body() {
        headers.content_length()
    } else {
        0
    };
    if headers.get("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        return Err(HttpError::ChunkedUnsupported);
    }

    let total = header_len + content_length;
    if buf.len() < total {
        return Ok(None);
    }

    let mut uri = base_uri.clone();
    uri.path = path_part.to_string();
    uri.query = query_part.map(str::to_string);

    let request = Request {
        method,
        uri,
        version,
        headers,
        body: buf[header_len..total].to_vec(),
        headers_complete: true,
    };
    Ok(Some((request, total)))
}

/// Attempt to decode one HTTP response from the front of `buf`.
pub fn try_decode_response(buf: &[u8]) -> Result<Option<(Response, usize)>, HttpError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_storage);
    let header_len = match parsed.parse(buf).map_err(|_| HttpError::Invalid)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let status = parsed.code.ok_or(HttpError::Invalid)?;
    let version = if parsed.version == Some(0) {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    };

    let mut headers = HeaderSet::default();
    for h in parsed.headers.iter() {
        let value = std::str::from_utf8(h.value).map_err(|_| HttpError::Invalid)?;
        headers.add_field(h.name, value.trim());
    }
    if headers.get("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        return Err(HttpError::ChunkedUnsupported);
    }

    let content_length = if response_allows_body(status) {
        headers.content_length()
    } else {
        0
    };

    let total = header_len + content_length;
    if buf.len() < total {
        return Ok(None);
    }

    let response = Response {
        version,
        status,
        reason: parsed.reason.unwrap_or_default().to_string(),
        headers,
        body: buf[header_len..total].to_vec(),
        headers_complete: true,
    };
    Ok(Some((response, total)))
}

/// Serialize a request: request-line + headers + CRLF + body. Auto-fills
/// `Host` from the URI and `Content-Length` from the body when absent.
pub fn serialize_request(request: &Request, keep_alive: bool) -> Vec<u8> {
    let mut headers = request.headers.clone();
    if headers.get("host").is_none() {
        headers.set_field("Host", request.uri.authority());
    }
    if !request.body.is_empty() && headers.get("content-length").is_none() {
        headers.set_content_length(request.body.len());
    }
    if headers.get("connection").is_none() {
        headers.set_field("Connection", if keep_alive { "keep-alive" } else { "close" });
    }

    let mut out = Vec::with_capacity(64 + request.body.len());
    out.extend_from_slice(request.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.uri.path_and_query().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.version.as_str().as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&request.body);
    out
}

/// Serialize a response: status-line + headers + CRLF + body.
pub fn serialize_response(response: &Response) -> Vec<u8> {
    let mut headers = response.headers.clone();
    if !response.body.is_empty() && headers.get("content-length").is_none() {
        headers.set_content_length(response.body.len());
    }
    let mut out = serialize_response_head(response.version, response.status, &response.reason, &headers);
    out.extend_from_slice(&response.body);
    out
}

/// Serialize just the status-line + headers + terminating CRLF, with no
/// body bytes. Used by [`crate::response_writer::ResponseWriter`] so the
/// header boundary can be flushed once, independently of however many
/// `write_body` calls follow it.
pub fn serialize_response_head(version: Version, status: u16, reason: &str, headers: &HeaderSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(version.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(reason.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;

    fn base() -> Uri {
        Uri::parse("http://example.com").unwrap()
    }

    #[test]
    fn decodes_a_complete_get_request() {
        let raw = b"GET /a/b?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, consumed) = try_decode_request(raw, &base()).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.uri.path, "/a/b");
        assert_eq!(req.uri.query.as_deref(), Some("x=1"));
    }

    #[test]
    fn reports_partial_request_as_none() {
        let raw = b"GET / HTTP/1.1\r\nHost: exa";
        assert!(try_decode_request(raw, &base()).unwrap().is_none());
    }

    #[test]
    fn waits_for_full_body_per_content_length() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhel";
        assert!(try_decode_request(raw, &base()).unwrap().is_none());
        let full = b"POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello";
        let (req, consumed) = try_decode_request(full, &base()).unwrap().unwrap();
        assert_eq!(consumed, full.len());
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn decodes_a_response_with_no_body_for_204() {
        let raw = b"HTTP/1.1 204 No Content\r\n\r\n";
        let (resp, consumed) = try_decode_response(raw).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
    }

    #[test]
    fn round_trips_a_serialized_request() {
        let mut req = Request::new(Method::Get, Uri::parse("http://example.com/a").unwrap());
        req.headers.set_field("Accept", "*/*");
        let wire = serialize_request(&req, true);
        let (decoded, _) = try_decode_request(&wire, &base()).unwrap().unwrap();
        assert_eq!(decoded.method, Method::Get);
        assert_eq!(decoded.uri.path, "/a");
        assert_eq!(decoded.headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn chunked_transfer_encoding_is_an_explicit_error() {
        let raw = b"POST /x HTTP/1.1\r\nHost: example.com\r\nTransfer-Encoding: chunked\r\n\r\n";
        let err = try_decode_request(raw, &base()).unwrap_err();
        assert!(matches!(err, HttpError::ChunkedUnsupported));
    }
}
