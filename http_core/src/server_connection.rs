//! Server connection (C6): receives requests on an inbound stream and
//! delivers a [`crate::response_writer::ResponseWriter`] to the caller's
//! `on_request` handler.

use std::time::Instant;

use crate::codec::try_decode_request;
use crate::connection::Connection;
use crate::error::HttpError;
use crate::message::{Request, Response, Version};
use crate::uri::Uri;

/// One request parsed off an inbound stream, or `None` if the peer closed
/// before a full request arrived.
pub enum Incoming {
    Request(Request),
    PeerClosed,
    Invalid,
}

pub struct ServerConnection {
    pub conn: Connection,
    pub idle_since: Instant,
    /// Index into the owning [`crate::server::Server`]'s connection vector,
    /// used to return this slot to the free list on close.
    pub slot: usize,
}

impl ServerConnection {
    pub fn new(conn: Connection, slot: usize) -> Self {
        Self {
            conn,
            idle_since: Instant::now(),
            slot,
        }
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.idle_since.elapsed()
    }

    pub fn touch(&mut self) {
        self.idle_since = Instant::now();
    }

    /// Read and accumulate bytes until one full request has arrived, a
    /// malformed request is seen, or the peer closes the stream. The
    /// request's URI carries no scheme/host/port (those are not part of an
    /// origin-form request target); callers that need them should read
    /// `Host` off the parsed headers.
    pub async fn next_request(&mut self) -> Result<Incoming, HttpError> {
        let placeholder = Uri {
            scheme: "http".to_string(),
            host: String::new(),
            port: 0,
            path: "/".to_string(),
            query: None,
            fragment: None,
        };
        loop {
            match try_decode_request(&self.conn.read_buf, &placeholder) {
                Ok(Some((request, consumed))) => {
                    let _ = self.conn.read_buf.split_to(consumed);
                    self.conn
                        .update_keep_alive(request.version, request.headers.get("connection"));
                    return Ok(Incoming::Request(request));
                }
                Ok(None) => {
                    let n = self.conn.read_more().await?;
                    if n == 0 {
                        return Ok(Incoming::PeerClosed);
                    }
                }
                Err(_) => return Ok(Incoming::Invalid),
            }
        }
    }

    /// A response prefilled with `Server`, `Date`, and a 200 status, per §4.4.
    pub fn prefilled_response(&self) -> Response {
        let mut response = Response::new(200, "OK");
        response.version = Version::HTTP_11;
        response.headers.set_field("Server", "http_core");
        response.headers.set_field("Date", httpdate_now());
        response
    }
}

/// `Date` header value in RFC 7231 IMF-fixdate form.
fn httpdate_now() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn httpdate_format_is_well_formed() {
        let date = httpdate_now();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.len(), "Mon, 01 Jan 2024 00:00:00 GMT".len());
    }
}
