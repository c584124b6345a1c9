//! A Connection owns one bidirectional byte stream (plain or TLS), a
//! keep-alive flag, and the peer's address. It is the piece both
//! [`crate::client_connection::ClientConnection`] and
//! [`crate::server_connection::ServerConnection`] compose rather than
//! inherit from.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::HttpError;
use crate::message::Version;
use crate::stream::Stream;

const READ_CHUNK: usize = 4096;

pub struct Connection {
    stream: Option<Stream>,
    pub peer_addr: SocketAddr,
    pub keep_alive: bool,
    pub read_buf: BytesMut,
}

impl Connection {
    pub fn new(stream: Stream) -> std::io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream: Some(stream),
            peer_addr,
            keep_alive: true,
            read_buf: BytesMut::new(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.stream.as_ref().is_some_and(Stream::is_secure)
    }

    /// `released ⇒ stream is nil`.
    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }

    /// Read one chunk from the stream into `read_buf`. Returns the number of
    /// bytes read; 0 means the peer closed its write half.
    pub async fn read_more(&mut self) -> Result<usize, HttpError> {
        let stream = self.stream.as_mut().ok_or(HttpError::Closing)?;
        let mut chunk = [0u8; READ_CHUNK];
        let n = stream.read(&mut chunk).await?;
        if n > 0 {
            self.read_buf.extend_from_slice(&chunk[..n]);
            log::trace!("{}: read {n} bytes", self.peer_addr);
        } else {
            log::debug!("{}: peer closed its write half", self.peer_addr);
        }
        Ok(n)
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), HttpError> {
        let stream = self.stream.as_mut().ok_or(HttpError::Closing)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        log::trace!("{}: wrote {} bytes", self.peer_addr, bytes.len());
        Ok(())
    }

    /// Apply `Connection: close` / HTTP-1.0-without-keep-alive semantics
    /// observed on an incoming response or request.
    pub fn update_keep_alive(&mut self, version: Version, connection_header: Option<&str>) {
        let closed = connection_header.is_some_and(|v| v.eq_ignore_ascii_case("close"));
        let keep_alive_requested = connection_header.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"));
        self.keep_alive = if closed {
            false
        } else if version == Version::HTTP_10 {
            keep_alive_requested
        } else {
            true
        };
    }

    /// Resets callbacks (there are none to reset in this design — the
    /// caller simply stops polling) and hands back the stream, or `None`
    /// if it was already released.
    pub fn release(&mut self) -> Option<Stream> {
        self.stream.take()
    }

    /// Close if already released (nothing to do but drop), else shutdown
    /// the stream when `!keep_alive`, matching the original's `end()`.
    pub async fn end(&mut self) {
        if !self.keep_alive {
            if let Some(stream) = self.stream.as_mut() {
                let _ = tokio::io::AsyncWriteExt::shutdown(stream).await;
            }
            self.stream = None;
        }
    }

    pub async fn close(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            let _ = tokio::io::AsyncWriteExt::shutdown(stream).await;
        }
        self.stream = None;
        log::debug!("{}: connection closed", self.peer_addr);
    }
}
