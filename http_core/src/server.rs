//! Server (C7): listens on a port, tracks client connections in a slot
//! vector with a free list for reuse, and runs a periodic idle-timeout
//! sweeper. Per-connection I/O is driven by one spawned task per accepted
//! socket; the sweeper nudges a connection's task closed by way of a
//! [`tokio::sync::Notify`] rather than reaching into its stream directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::time::interval;

use crate::connection::Connection;
use crate::error::HttpError;
use crate::message::Request;
use crate::response_writer::ResponseWriter;
use crate::server_connection::{Incoming, ServerConnection};
use crate::stream::Stream;

/// The user-supplied request handler. It owns the [`ResponseWriter`] (which
/// in turn owns the [`Connection`]) for the duration of one exchange and
/// must return the connection via `writer.finish().await` so the read loop
/// can reuse it for the next request on the same socket.
pub type RequestHandler =
    Arc<dyn Fn(Request, ResponseWriter) -> Pin<Box<dyn Future<Output = Connection> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Zero disables the idle sweeper.
    pub idle_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerCounters {
    pub accepts: AtomicU64,
    pub requests: AtomicU64,
    pub bad_requests: AtomicU64,
    pub timeouts: AtomicU64,
}

struct Slot {
    idle_since: Instant,
    closer: Arc<Notify>,
}

struct Slots {
    entries: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl Slots {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, closer: Arc<Notify>) -> usize {
        let slot = Slot {
            idle_since: Instant::now(),
            closer,
        };
        if let Some(idx) = self.free.pop() {
            self.entries[idx] = Some(slot);
            idx
        } else {
            self.entries.push(Some(slot));
            self.entries.len() - 1
        }
    }

    fn touch(&mut self, idx: usize) {
        if let Some(Some(slot)) = self.entries.get_mut(idx) {
            slot.idle_since = Instant::now();
        }
    }

    fn remove(&mut self, idx: usize) {
        if idx < self.entries.len() && self.entries[idx].is_some() {
            self.entries[idx] = None;
            self.free.push(idx);
        }
    }
}

pub struct Server {
    slots: Arc<Mutex<Slots>>,
    pub counters: Arc<ServerCounters>,
    options: ServerOptions,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::new())),
            counters: Arc::new(ServerCounters::default()),
            options,
        }
    }

    /// Bind `port`, install the accept loop and idle sweeper, and run until
    /// the listener errors. Each accepted socket gets its own
    /// [`ServerConnection`] and its own task; `on_request` is invoked once
    /// per complete request received on that task.
    pub async fn listen(&self, port: u16, on_request: RequestHandler) -> Result<(), HttpError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;

        if !self.options.idle_timeout.is_zero() {
            self.spawn_idle_sweeper();
        }

        loop {
            let (tcp, peer) = listener.accept().await?;
            self.counters.accepts.fetch_add(1, Ordering::Relaxed);
            let _ = tcp.set_nodelay(true);
            log::debug!("accepted connection from {peer}");

            let conn = match Connection::new(Stream::Plain(tcp)) {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("dropping accepted connection from {peer}: {e}");
                    continue;
                }
            };

            let closer = Arc::new(Notify::new());
            let slot_idx = self.slots.lock().await.insert(closer.clone());
            let server_conn = ServerConnection::new(conn, slot_idx);

            let slots = self.slots.clone();
            let counters = self.counters.clone();
            let handler = on_request.clone();
            tokio::spawn(async move {
                serve_connection(server_conn, handler, counters, slots.clone(), closer).await;
                slots.lock().await.remove(slot_idx);
            });
        }
    }

    fn spawn_idle_sweeper(&self) {
        let slots = self.slots.clone();
        let counters = self.counters.clone();
        let idle_timeout = self.options.idle_timeout;
        tokio::spawn(async move {
            let mut ticker = interval(idle_timeout);
            loop {
                ticker.tick().await;
                let guard = slots.lock().await;
                for entry in guard.entries.iter().flatten() {
                    if entry.idle_since.elapsed() >= idle_timeout {
                        log::debug!("idle sweeper closing a connection past {idle_timeout:?}");
                        counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        entry.closer.notify_one();
                    }
                }
            }
        });
    }
}

async fn serve_connection(
    mut server_conn: ServerConnection,
    on_request: RequestHandler,
    counters: Arc<ServerCounters>,
    slots: Arc<Mutex<Slots>>,
    closer: Arc<Notify>,
) {
    loop {
        let incoming = tokio::select! {
            _ = closer.notified() => {
                server_conn.conn.close().await;
                return;
            }
            incoming = server_conn.next_request() => incoming,
        };

        match incoming {
            Ok(Incoming::Request(request)) => {
                counters.requests.fetch_add(1, Ordering::Relaxed);
                let response = server_conn.prefilled_response();
                let conn = server_conn.conn;
                let writer = ResponseWriter::new(conn, response);
                let conn = on_request(request, writer).await;
                if conn.is_released() {
                    return;
                }
                server_conn.conn = conn;
                server_conn.touch();
                slots.lock().await.touch(server_conn.slot);
            }
            Ok(Incoming::PeerClosed) => {
                server_conn.conn.close().await;
                return;
            }
            Ok(Incoming::Invalid) | Err(_) => {
                counters.bad_requests.fetch_add(1, Ordering::Relaxed);
                log::warn!("{}: malformed request, closing with 400", server_conn.conn.peer_addr);
                let _ = server_conn
                    .conn
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                server_conn.conn.close().await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Method, Request};
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn echo_handler() -> RequestHandler {
        Arc::new(|request: Request, mut writer: ResponseWriter| {
            Box::pin(async move {
                if request.method == Method::Get {
                    writer.response_mut().body = b"hello".to_vec();
                }
                writer.finish().await
            })
        })
    }

    #[tokio::test]
    async fn serves_one_request_and_reports_counters() {
        let server = Server::new(ServerOptions {
            idle_timeout: Duration::ZERO,
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handler = echo_handler();
        let counters = server.counters.clone();
        tokio::spawn(async move {
            let _ = server.listen(addr.port(), handler).await;
        });

        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("hello"));
        assert_eq!(counters.requests.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_request_gets_a_400_and_closes() {
        let server = Server::new(ServerOptions {
            idle_timeout: Duration::ZERO,
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handler = echo_handler();
        let counters = server.counters.clone();
        tokio::spawn(async move {
            let _ = server.listen(addr.port(), handler).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("HTTP/1.1 400"));
        assert_eq!(counters.bad_requests.load(Ordering::Relaxed), 1);
    }
}
