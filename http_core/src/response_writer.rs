//! Response writer (C6): borrows a [`Response`] and a stream, tracking
//! whether the status line and headers have been flushed so body writes can
//! follow the header boundary.

use crate::codec::serialize_response_head;
use crate::connection::Connection;
use crate::error::HttpError;
use crate::message::Response;

pub struct ResponseWriter {
    conn: Connection,
    response: Response,
    headers_flushed: bool,
}

impl ResponseWriter {
    pub fn new(conn: Connection, response: Response) -> Self {
        Self {
            conn,
            response,
            headers_flushed: false,
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Flush the status line and headers if they have not already gone out.
    /// A caller that never calls `write_body` still needs this, so `finish`
    /// calls it unconditionally.
    pub async fn flush_headers(&mut self) -> Result<(), HttpError> {
        if self.headers_flushed {
            return Ok(());
        }
        if !self.response.body.is_empty() && self.response.headers.get("content-length").is_none() {
            self.response.headers.set_content_length(self.response.body.len());
        }
        if self.response.headers.get("connection").is_none() {
            self.response
                .headers
                .set_field("Connection", if self.conn.keep_alive { "keep-alive" } else { "close" });
        }
        let head = serialize_response_head(
            self.response.version,
            self.response.status,
            &self.response.reason,
            &self.response.headers,
        );
        self.conn.write_all(&head).await?;
        self.headers_flushed = true;
        Ok(())
    }

    /// Write one body chunk, flushing headers first if this is the first call.
    ///
    /// Callers that stream a body in multiple chunks without a known total
    /// length ahead of time must clear `Content-Length` and mark the
    /// connection non-keep-alive themselves (§4.1's framing model has no
    /// chunked transfer encoding); otherwise the client will stop reading at
    /// the declared length.
    pub async fn write_body(&mut self, chunk: &[u8]) -> Result<(), HttpError> {
        self.flush_headers().await?;
        self.conn.write_all(chunk).await
    }

    /// Flush headers (and the response's own `body`, if set and not already
    /// streamed via `write_body`) and hand the connection back to the
    /// server's read loop for the next exchange on this stream.
    pub async fn finish(mut self) -> Connection {
        if !self.headers_flushed {
            if self.flush_headers().await.is_ok() && !self.response.body.is_empty() {
                let _ = self.conn.write_all(&self.response.body).await;
            }
        }
        self.conn.end().await;
        self.conn
    }
}
