//! Drives one outbound request/response exchange over a [`Connection`],
//! with an optional timeout. Redirect-following lives one level up in
//! [`crate::client::Client::send`], which owns the pool needed to
//! re-dispatch to a different host; this type only drives a single
//! exchange over the connection it owns.

use std::time::Duration;

use crate::codec::{serialize_request, try_decode_response};
use crate::connection::Connection;
use crate::error::HttpError;
use crate::message::{Request, Response};

pub struct ClientConnection {
    pub conn: Connection,
    in_use: bool,
}

impl ClientConnection {
    pub fn new(conn: Connection) -> Self {
        Self { conn, in_use: false }
    }

    /// `available ⇔ (no in-flight callback) ∧ keep_alive`.
    pub fn available(&self) -> bool {
        !self.in_use && self.conn.keep_alive && !self.conn.is_released()
    }

    /// Drive exactly one request/response exchange. On any error the
    /// connection is closed before returning — callers must not reuse it.
    pub async fn send_once(&mut self, request: &Request, timeout: Duration) -> Result<Response, HttpError> {
        self.in_use = true;
        let result = self.send_once_inner(request, timeout).await;
        self.in_use = false;
        if result.is_err() {
            self.conn.close().await;
        }
        result
    }

    async fn send_once_inner(&mut self, request: &Request, timeout: Duration) -> Result<Response, HttpError> {
        let wire = serialize_request(request, self.conn.keep_alive);
        self.conn.write_all(&wire).await?;

        let read_response = async {
            loop {
                if let Some((response, consumed)) = try_decode_response(&self.conn.read_buf)? {
                    let _ = self.conn.read_buf.split_to(consumed);
                    return Ok(response);
                }
                let n = self.conn.read_more().await?;
                if n == 0 {
                    return Err(HttpError::NoReply);
                }
            }
        };

        let response = if timeout.is_zero() {
            read_response.await?
        } else {
            match tokio::time::timeout(timeout, read_response).await {
                Ok(result) => result?,
                Err(_) => {
                    log::warn!("{}: timed out waiting for a response after {timeout:?}", self.conn.peer_addr);
                    return Err(HttpError::Timeout);
                }
            }
        };

        self.conn
            .update_keep_alive(response.version, response.headers.get("connection"));
        Ok(response)
    }
}
