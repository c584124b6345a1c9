//! Non-blocking HTTP/1.1 client and server: request/response parsing,
//! connection pooling, timeouts, and redirect handling.
//!
//! The crate is organized around a plain [`message::Request`]/[`message::Response`]
//! value pair (§4.1) shared by both directions, a [`stream::Stream`] tagged
//! union for plain/TLS byte streams, and a [`connection::Connection`] that
//! owns one such stream. [`client_connection::ClientConnection`] and
//! [`server_connection::ServerConnection`] compose a `Connection` rather than
//! inherit from it; [`client::Client`] and [`server::Server`] own the pool and
//! the accept loop respectively.

pub mod client;
pub mod client_connection;
pub mod codec;
pub mod connection;
pub mod error;
pub mod header;
pub mod message;
pub mod response_writer;
pub mod server;
pub mod server_connection;
pub mod stream;
pub mod uri;

pub use client::{Client, SendHook, SendOptions};
pub use error::HttpError;
pub use header::HeaderSet;
pub use message::{Method, Request, Response, Version};
pub use response_writer::ResponseWriter;
pub use server::{Server, ServerCounters, ServerOptions};
pub use stream::Stream;
pub use uri::Uri;
