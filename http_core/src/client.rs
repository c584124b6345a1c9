//! Client and connection pool (C5): per-`(scheme, host, port)` pools of
//! reusable connections, DNS resolution, and URL dispatch.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::{rustls::pki_types::ServerName, TlsConnector, TlsStream};

use crate::client_connection::ClientConnection;
use crate::connection::Connection;
use crate::error::HttpError;
use crate::message::{Method, Request, Response};
use crate::stream::Stream;
use crate::uri::Uri;

/// `(scheme, host, port)` — scheme is part of the key per the pool-key
/// redesign: an `http` and an `https` connection to the same host never
/// share a bucket.
type PoolKey = (String, String, u16);

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub timeout: Duration,
    pub follow_redirects: u32,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            follow_redirects: 0,
        }
    }
}

/// Mutates an outgoing request exactly once, after `Host`/`Connection` are
/// set but before bytes are written — e.g. to inject `Authorization`.
pub type SendHook = dyn Fn(&mut Request, &SendOptions, &Uri) + Send + Sync;

pub struct Client {
    origin_host: String,
    pools: Mutex<HashMap<PoolKey, Vec<ClientConnection>>>,
    tls_connector: Option<TlsConnector>,
    on_send: Option<Arc<SendHook>>,
}

impl Client {
    pub fn new(origin_host: impl Into<String>) -> Self {
        Self {
            origin_host: origin_host.into(),
            pools: Mutex::new(HashMap::new()),
            tls_connector: None,
            on_send: None,
        }
    }

    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls_connector = Some(connector);
        self
    }

    pub fn with_on_send(mut self, hook: Arc<SendHook>) -> Self {
        self.on_send = Some(hook);
        self
    }

    /// Returns an empty request with `method` and `Host: self_origin` preset.
    pub fn create_request(&self, method: Method) -> Request {
        let mut request = Request::new(method, Uri::default());
        request.headers.set_field("Host", self.origin_host.clone());
        request
    }

    pub async fn get(&self, uri: Uri, options: SendOptions) -> Result<Response, HttpError> {
        let mut request = Request::new(Method::Get, uri.clone());
        request.uri = uri;
        self.send(request, options).await
    }

    pub async fn post(&self, uri: Uri, body: Vec<u8>, options: SendOptions) -> Result<Response, HttpError> {
        let mut request = Request::new(Method::Post, uri);
        request.body = body;
        self.send(request, options).await
    }

    /// Resolves the host, obtains a pooled connection, runs the pre-send
    /// hook, and follows redirects up to `options.follow_redirects` times.
    pub async fn send(&self, mut request: Request, options: SendOptions) -> Result<Response, HttpError> {
        let mut redirects_remaining = options.follow_redirects;

        loop {
            let uri = request.uri.clone();
            let secure = uri.scheme_is_secure();
            let key: PoolKey = (uri.scheme.clone(), uri.host.clone(), uri.port);

            if request.headers.get("host").is_none() {
                request.headers.set_field("Host", uri.authority());
            }
            if let Some(hook) = &self.on_send {
                hook(&mut request, &options, &uri);
            }

            let mut conn = self.checkout(&key, secure).await?;
            let result = conn.send_once(&request, options.timeout).await;
            self.checkin(key, conn).await;

            let response = result?;

            if response.is_redirect() && redirects_remaining > 0 {
                let location = response.headers.get("location").ok_or(HttpError::MissingLocation)?;
                let next_uri = request.uri.resolve(location)?;
                redirects_remaining -= 1;
                log::debug!(
                    "following redirect to {}:{}{} ({redirects_remaining} left)",
                    next_uri.host,
                    next_uri.port,
                    next_uri.path
                );

                let switch_to_get = request.method == Method::Post
                    && !matches!(response.status, 307 | 308);

                let mut next_request = Request::new(request.method, next_uri);
                if switch_to_get {
                    next_request.method = Method::Get;
                } else {
                    next_request.body = request.body.clone();
                }
                request = next_request;
                continue;
            }

            return Ok(response);
        }
    }

    async fn checkout(&self, key: &PoolKey, secure: bool) -> Result<ClientConnection, HttpError> {
        {
            let mut pools = self.pools.lock().await;
            let list = pools.entry(key.clone()).or_default();
            if let Some(idx) = list.iter().position(ClientConnection::available) {
                log::debug!("{}:{}:{}: reusing pooled connection", key.0, key.1, key.2);
                return Ok(list.remove(idx));
            }
        }
        log::debug!("{}:{}:{}: pool empty, opening a new connection", key.0, key.1, key.2);
        self.connect(key, secure).await
    }

    async fn checkin(&self, key: PoolKey, conn: ClientConnection) {
        if conn.available() {
            let mut pools = self.pools.lock().await;
            pools.entry(key).or_default().push(conn);
        }
    }

    async fn connect(&self, key: &PoolKey, secure: bool) -> Result<ClientConnection, HttpError> {
        let (_, host, port) = key;
        let addr = resolve(host, *port).await?;
        log::debug!("connecting to {host}:{port} ({addr}, secure={secure})");
        let tcp = TcpStream::connect(addr).await?;
        let tcp_nodelay = tcp.set_nodelay(true);
        let _ = tcp_nodelay;

        let stream = if secure {
            let connector = self.tls_connector.as_ref().ok_or(HttpError::TlsUnsupported)?;
            let server_name = ServerName::try_from(host.clone()).map_err(|_| HttpError::InvalidUri(host.clone()))?;
            let tls = connector.connect(server_name, tcp).await?;
            Stream::Secure(Box::new(TlsStream::Client(tls)))
        } else {
            Stream::Plain(tcp)
        };

        let connection = Connection::new(stream)?;
        Ok(ClientConnection::new(connection))
    }
}

async fn resolve(host: &str, port: u16) -> Result<std::net::SocketAddr, HttpError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(std::net::SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| HttpError::ResolveHost)?;
    addrs.next().ok_or(HttpError::ResolveHost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_a_request_and_reuses_the_pooled_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0);
                socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .await
                    .unwrap();
            }
        });

        let client = Client::new(format!("{}:{}", addr.ip(), addr.port()));
        let uri = Uri::parse(&format!("http://{}:{}/a", addr.ip(), addr.port())).unwrap();

        let first = client.get(uri.clone(), SendOptions::default()).await.unwrap();
        assert_eq!(first.status, 200);

        let mut second_uri = uri;
        second_uri.path = "/b".to_string();
        let second = client.get(second_uri, SendOptions::default()).await.unwrap();
        assert_eq!(second.status, 200);

        let pools = client.pools.lock().await;
        assert_eq!(pools.len(), 1);
    }

    #[tokio::test]
    async fn secure_request_without_tls_support_fails_immediately() {
        let client = Client::new("example.com");
        let uri = Uri::parse("https://example.com/").unwrap();
        let err = client.get(uri, SendOptions::default()).await.unwrap_err();
        assert!(matches!(err, HttpError::TlsUnsupported));
    }

    #[test]
    fn create_request_presets_method_and_host() {
        let client = Client::new("example.com");
        let request = client.create_request(Method::Get);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.headers.get("host"), Some("example.com"));
    }

    #[tokio::test]
    async fn a_server_that_never_replies_times_out_and_leaves_the_pool_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Hold the connection open without ever writing a response.
            let mut buf = vec![0u8; 1024];
            let _ = socket.try_read(&mut buf);
            std::future::pending::<()>().await;
        });

        let client = Client::new(format!("{}:{}", addr.ip(), addr.port()));
        let uri = Uri::parse(&format!("http://{}:{}/", addr.ip(), addr.port())).unwrap();
        let err = client
            .get(
                uri,
                SendOptions {
                    timeout: Duration::from_millis(50),
                    follow_redirects: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Timeout));

        let pools = client.pools.lock().await;
        let key = (
            "http".to_string(),
            addr.ip().to_string(),
            addr.port(),
        );
        let available = pools.get(&key).map(|list| list.iter().filter(|c| c.available()).count()).unwrap_or(0);
        assert_eq!(available, 0);
    }

    #[tokio::test]
    async fn follows_a_redirect_to_a_different_host_and_opens_two_connections() {
        let original = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let original_addr = original.local_addr().unwrap();
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();

        let redirect_location = format!("http://{}:{}/elsewhere", target_addr.ip(), target_addr.port());
        tokio::spawn(async move {
            let (mut socket, _) = original.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = format!(
                "HTTP/1.1 302 Found\r\nLocation: {redirect_location}\r\nContent-Length: 0\r\n\r\n"
            );
            socket.write_all(body.as_bytes()).await.unwrap();
        });
        tokio::spawn(async move {
            let (mut socket, _) = target.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
        });

        let client = Client::new(format!("{}:{}", original_addr.ip(), original_addr.port()));
        let uri = Uri::parse(&format!("http://{}:{}/start", original_addr.ip(), original_addr.port())).unwrap();

        let response = client
            .get(
                uri,
                SendOptions {
                    timeout: Duration::from_secs(5),
                    follow_redirects: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let pools = client.pools.lock().await;
        assert_eq!(pools.len(), 2);
    }
}
