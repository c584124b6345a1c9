//! The uplink control-plane state machine (C9): authenticate, dock, stay
//! live, and recover. Grounded on the teacher's `upstream.rs` reconnect loop
//! (`tokio::select!` over shutdown/command/read/heartbeat, exponential
//! backoff clamped to a ceiling) generalized from a market-data WebSocket
//! feed to the uplink's auth→dock→heartbeat→update protocol.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_core::{Client, SendOptions};
use log::{debug, error, info, warn};
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant, Sleep};
use tokio_tungstenite::tungstenite::http::Request as WsRequest;
use tokio_tungstenite::tungstenite::Message;
use transport::{Frame, FrameCode, Parser as FrameParser};

use crate::config::Config;
use crate::error::UplinkError;
use crate::identity::{self, Identity};
use crate::log_ring::LogRing;

const AUTH_TIMEOUT: Duration = Duration::from_secs(15);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const PONG_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEART_RETRIES: u32 = 3;
const BACKOFF_UNIT_SECS: u64 = 5;
const BACKOFF_MAX_MULTIPLIER: u64 = 6;
const MAX_FRAME_CARGO_LEN: u32 = 64 * 1024 * 1024;

/// Invoked with the received update buffer after the socket has closed
/// cleanly; a `Err` return falls back to `Authenticating` per §4.6.
pub type UpdateApplier = dyn Fn(&[u8]) -> Result<(), String> + Send + Sync;

/// What a `Live` pass ended with, and how the outer loop should recover.
enum LiveExit {
    /// Heartbeat exhausted or the socket closed/err'd: full re-`auth()`.
    Reauth,
    /// A malformed transport frame or unsupported ws message: re-dock with
    /// the token already in hand, no new `/auth` round trip.
    Redock,
    /// A live update was applied (or attempted and failed); `bool` is
    /// whether it failed, which also collapses to `Reauth`.
    UpdateFailed,
    Shutdown,
}

pub struct Uplink {
    config: Config,
    client: Client,
    token: Arc<Mutex<String>>,
    log_ring: LogRing,
    node_uuid: uuid::Uuid,
    service_name: String,
    update_applier: Option<Arc<UpdateApplier>>,
    /// Guards the best-effort panic-hook send so it only ever fires once.
    panic_sent: AtomicBool,
}

impl Uplink {
    pub fn new(config: Config, log_ring: LogRing, service_name: impl Into<String>) -> Arc<Self> {
        let uuid_path = identity::default_uuid_path(&config.certs_path);
        let node_uuid = identity::load_or_create_uuid(&uuid_path);

        let token: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let hook_token = token.clone();
        let client = Client::new(
            config
                .url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string(),
        )
        .with_on_send(Arc::new(move |request: &mut http_core::Request, _options: &SendOptions, _uri: &http_core::Uri| {
            let token = hook_token.lock().unwrap();
            if !token.is_empty() {
                request.headers.set_field("Authorization", format!("Bearer {token}"));
            }
        }));

        Arc::new(Self {
            config,
            client,
            token,
            log_ring,
            node_uuid,
            service_name: service_name.into(),
            update_applier: None,
            panic_sent: AtomicBool::new(false),
        })
    }

    pub fn with_update_applier(mut self: Arc<Self>, applier: Arc<UpdateApplier>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_update_applier must run before the session is shared")
            .update_applier = Some(applier);
        self
    }

    /// Reads the current bearer token for the client's pre-send hook.
    /// Cheap: only the auth-response handler ever writes it, and only while
    /// transitioning into `Docking`, so a plain mutex never contends.
    pub fn current_token(&self) -> String {
        self.token.lock().unwrap().clone()
    }

    fn set_token(&self, token: String) {
        *self.token.lock().unwrap() = token;
    }

    /// Best-effort panic notification (§4.6): call from a `std::panic::set_hook`
    /// closure. There is no socket to send a PANIC frame on synchronously
    /// from a panic hook, so this logs at `error`, which the installed
    /// logging backend mirrors into the log ring the same as any other
    /// record — the ring's contents reach the controller on the next
    /// successful dock, which is the best this crate can promise before the
    /// platform's own reboot policy takes over.
    pub fn note_panic(&self, reason: &str) {
        if self.panic_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("PANIC: {reason}");
    }

    /// Runs the state machine until `shutdown` fires. Treats `Unconfigured`
    /// as already satisfied at process start (this crate has no hook into
    /// platform network-interface-ready events) and begins at
    /// `Authenticating` directly.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<(), UplinkError> {
        let mut backoff: u64 = 1;

        'outer: loop {
            let token = tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                result = self.authenticate() => result,
            };

            let token = match token {
                Ok(token) => {
                    backoff = 1;
                    token
                }
                Err(err) => {
                    warn!("uplink authentication failed: {err}");
                    let delay = Duration::from_secs(BACKOFF_UNIT_SECS * backoff.min(BACKOFF_MAX_MULTIPLIER));
                    backoff = (backoff + 1).min(BACKOFF_MAX_MULTIPLIER);
                    tokio::select! {
                        _ = shutdown.recv() => return Ok(()),
                        _ = sleep(delay) => continue 'outer,
                    }
                }
            };
            self.set_token(token.clone());

            let mut redock_without_auth = true;
            while redock_without_auth {
                let dock_result = tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    result = self.dock(&token) => result,
                };

                let mut ws = match dock_result {
                    Ok(ws) => ws,
                    Err(err) => {
                        warn!("uplink dock failed, retrying authentication: {err}");
                        continue 'outer;
                    }
                };

                match self.live(&mut ws, &mut shutdown).await {
                    LiveExit::Shutdown => {
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                    LiveExit::Redock => {
                        info!("re-docking without a fresh auth round trip");
                        redock_without_auth = true;
                    }
                    LiveExit::Reauth | LiveExit::UpdateFailed => {
                        redock_without_auth = false;
                    }
                }
            }
        }
    }

    async fn authenticate(&self) -> Result<String, UplinkError> {
        let body = serde_json::json!({
            "id": self.node_uuid.to_string(),
            "key": self.config.token,
        });
        let uri = http_core::Uri::parse(&self.config.auth_url())?;
        let mut request = http_core::Request::new(http_core::Method::Post, uri);
        request.body = serde_json::to_vec(&body).unwrap_or_default();
        request.headers.set_field("Content-Type", "application/json");

        let response = self
            .client
            .send(request, SendOptions {
                timeout: AUTH_TIMEOUT,
                follow_redirects: 0,
            })
            .await?;

        if response.status != 200 || response.body.is_empty() {
            return Err(UplinkError::AuthRejected(format!("status {}", response.status)));
        }
        let token = String::from_utf8_lossy(&response.body).trim().to_string();
        if token.is_empty() {
            return Err(UplinkError::EmptyToken);
        }
        info!("authenticated as {}", self.node_uuid);
        Ok(token)
    }

    async fn dock(&self, token: &str) -> Result<WsStream, UplinkError> {
        let ws_url = self.config.ws_url()?;
        let request = WsRequest::builder()
            .uri(&ws_url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Host", url::Url::parse(&ws_url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default())
            .body(())
            .map_err(|e| UplinkError::LiveUpdateFailed(e.to_string()))?;

        let (mut ws, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("docked at {ws_url}");

        let identity = identity::gather(self.node_uuid, self.service_name.clone(), self.config.tag.clone());
        send_ident(&mut ws, &identity).await?;
        send_uplink_config(&mut ws, &self.config).await?;
        flush_log_ring(&self.log_ring, &mut ws).await;

        Ok(ws)
    }

    async fn live(self: &Arc<Self>, ws: &mut WsStream, shutdown: &mut broadcast::Receiver<()>) -> LiveExit {
        let mut parser = FrameParser::with_max_cargo_len(MAX_FRAME_CARGO_LEN);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; consume it
        let mut heart_retries_left = MAX_HEART_RETRIES;
        let mut pong_deadline: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => return LiveExit::Shutdown,

                _ = heartbeat.tick() => {
                    if let Err(err) = ws.send(Message::Ping(Bytes::new())).await {
                        warn!("heartbeat ping failed: {err}");
                        return LiveExit::Reauth;
                    }
                    pong_deadline = Some(Box::pin(sleep(PONG_TIMEOUT)));
                }

                _ = async {
                    match pong_deadline.as_mut() {
                        Some(deadline) => deadline.await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    pong_deadline = None;
                    heart_retries_left = heart_retries_left.saturating_sub(1);
                    warn!("missed heartbeat pong, {heart_retries_left} retries left");
                    if heart_retries_left == 0 {
                        let _ = ws.close(None).await;
                        return LiveExit::Reauth;
                    }
                }

                _ = self.log_ring.wait_for_signal() => {
                    flush_log_ring(&self.log_ring, ws).await;
                }

                message = ws.next() => {
                    match message {
                        Some(Ok(Message::Pong(_))) => {
                            heart_retries_left = MAX_HEART_RETRIES;
                            pong_deadline = None;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            match parser.push(&bytes) {
                                Ok(frames) => {
                                    for frame in frames {
                                        match self.dispatch_frame(ws, frame).await {
                                            Some(exit) => return exit,
                                            None => {}
                                        }
                                    }
                                }
                                Err(err) => {
                                    warn!("malformed transport frame: {err}");
                                    let _ = send_error(ws, &err.to_string()).await;
                                    let _ = ws.close(None).await;
                                    return LiveExit::Redock;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("controller closed the dock socket");
                            return LiveExit::Reauth;
                        }
                        Some(Ok(Message::Text(_) | Message::Frame(_))) => {
                            warn!("unsupported ws message carrier on dock socket");
                            let _ = send_error(ws, "unsupported message type").await;
                            let _ = ws.close(None).await;
                            return LiveExit::Redock;
                        }
                        Some(Err(err)) => {
                            warn!("dock socket error: {err}");
                            return LiveExit::Reauth;
                        }
                        None => {
                            info!("dock socket stream ended");
                            return LiveExit::Reauth;
                        }
                    }
                }
            }
        }
    }

    /// Handles one decoded frame. Returns `Some(exit)` when the live loop
    /// must stop (an update handoff, successful or not).
    async fn dispatch_frame(self: &Arc<Self>, ws: &mut WsStream, frame: Frame) -> Option<LiveExit> {
        match frame.code {
            FrameCode::Update => {
                debug!("received UPDATE ({} bytes)", frame.cargo.len());
                let digest = Sha1::digest(&frame.cargo);
                let ack = Frame::new(FrameCode::Update, hex::encode(digest).into_bytes());
                let _ = ws.send(Message::Binary(ack.encode().into())).await;
                flush_log_ring(&self.log_ring, ws).await;
                let _ = ws.close(None).await;

                let outcome = match &self.update_applier {
                    Some(applier) => applier(&frame.cargo),
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => Some(LiveExit::UpdateFailed),
                    Err(reason) => {
                        error!("live update failed: {reason}");
                        Some(LiveExit::UpdateFailed)
                    }
                }
            }
            FrameCode::Stats => {
                debug!("received STATS request");
                let stats = serde_json::json!({ "uptime_secs": uptime_secs() });
                let reply = Frame::new(FrameCode::Stats, serde_json::to_vec(&stats).unwrap_or_default());
                let _ = ws.send(Message::Binary(reply.encode().into())).await;
                None
            }
            other => {
                debug!("received unexpected frame code {other:?} while live");
                None
            }
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_secs()
}

async fn send_ident(ws: &mut WsStream, identity: &Identity) -> Result<(), UplinkError> {
    let cargo = serde_json::to_vec(identity).unwrap_or_default();
    let frame = Frame::new(FrameCode::Ident, cargo);
    ws.send(Message::Binary(frame.encode().into())).await?;
    Ok(())
}

#[derive(Serialize)]
struct UplinkConfigPayload<'a> {
    certs_path: &'a str,
    verify_certs: bool,
    ws_logging: bool,
    serialize_ct: bool,
    reboot: bool,
}

async fn send_uplink_config(ws: &mut WsStream, config: &Config) -> Result<(), UplinkError> {
    let payload = UplinkConfigPayload {
        certs_path: &config.certs_path,
        verify_certs: config.verify_certs,
        ws_logging: config.ws_logging,
        serialize_ct: config.serialize_ct,
        reboot: config.reboot,
    };
    let frame = Frame::new(FrameCode::Uplink, serde_json::to_vec(&payload).unwrap_or_default());
    ws.send(Message::Binary(frame.encode().into())).await?;
    Ok(())
}

async fn flush_log_ring(ring: &LogRing, ws: &mut WsStream) {
    let Some(bytes) = ring.drain() else { return };
    if bytes.is_empty() {
        ring.rearm();
        return;
    }
    let frame = Frame::new(FrameCode::Log, bytes);
    let _ = ws.send(Message::Binary(frame.encode().into())).await;
    ring.rearm();
}

async fn send_error(ws: &mut WsStream, diagnostic: &str) -> Result<(), UplinkError> {
    let frame = Frame::new(FrameCode::Error, diagnostic.as_bytes().to_vec());
    ws.send(Message::Binary(frame.encode().into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_ack_hex_matches_known_vector() {
        let digest = Sha1::digest(b"hello");
        assert_eq!(hex::encode(digest), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn token_round_trips_through_current_token() {
        let config = Config {
            url: "http://controller.example".to_string(),
            token: "k".to_string(),
            index: None,
            tag: None,
            certs_path: "/certs".to_string(),
            verify_certs: true,
            reboot: true,
            ws_logging: true,
            serialize_ct: false,
            log_dir: None,
            log_level: "info".to_string(),
            listen_port: None,
        };
        let ring = LogRing::new(1024);
        let uplink = Uplink::new(config, ring, "test-service");
        assert_eq!(uplink.current_token(), "");
        uplink.set_token("abc".to_string());
        assert_eq!(uplink.current_token(), "abc");
    }
}
