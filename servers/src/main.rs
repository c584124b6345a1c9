//! Local-development double of the uplink controller (§6): a plain-HTTP
//! `/auth` endpoint and a WebSocket `/dock` endpoint that decodes the
//! Transport frames (§4.5) an uplink agent sends after a successful
//! handshake. It exists to exercise [`http_core`]'s client against a real
//! peer and to watch an uplink session progress through its state machine
//! without standing up the real fleet controller.
//!
//! Grounded on the teacher's `server_dummy.rs` demo-server pattern, reworked
//! onto `axum` (the ecosystem's WebSocket-capable framework) rather than
//! `actix-web`, since `/dock` needs a WebSocket upgrade. Logging follows
//! `server_speak.rs`'s `tracing_subscriber::registry()` + `EnvFilter` setup
//! rather than the agent binary's `fern` dispatch, per the ambient-stack
//! split between the two binaries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transport::{Frame, FrameCode, Parser as FrameParser};

#[derive(Parser, Debug, Clone)]
struct Cli {
    #[clap(long, env = "MOCK_CONTROLLER_PORT", default_value = "8080")]
    port: u16,

    /// The `key` an `/auth` request must present to receive a token.
    #[clap(long, env = "MOCK_CONTROLLER_SHARED_SECRET", default_value = "secret")]
    shared_secret: String,
}

#[derive(Clone)]
struct AppState {
    shared_secret: Arc<String>,
}

#[derive(Deserialize)]
struct AuthRequest {
    id: String,
    key: String,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let state = AppState {
        shared_secret: Arc::new(cli.shared_secret),
    };

    let app = Router::new()
        .route("/auth", post(auth))
        .route("/dock", get(dock))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!("mock controller listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind mock controller port");
    axum::serve(listener, app).await.expect("mock controller server failed");
}

/// `tracing_subscriber::registry()` with an `EnvFilter` (`RUST_LOG`,
/// defaulting to `info`) and a single stdout layer — the console half of
/// `server_speak.rs`'s console+file layer pair, without the file layer
/// since this binary has no log directory to write one into.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// `POST /auth`: `{"id", "key"}` in, a bearer token out as the response
/// body when `key` matches the configured shared secret, `401` otherwise.
async fn auth(State(state): State<AppState>, Json(request): Json<AuthRequest>) -> impl IntoResponse {
    if request.key != *state.shared_secret {
        warn!("auth rejected for node {}", request.id);
        return (axum::http::StatusCode::UNAUTHORIZED, String::new());
    }
    let token = format!("mock-token-{}", request.id);
    info!("node {} authenticated, issuing {}", request.id, token);
    (axum::http::StatusCode::OK, token)
}

/// `GET /dock`: upgrade to a WebSocket and decode Transport frames off it.
async fn dock(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_dock_socket)
}

async fn handle_dock_socket(mut socket: WebSocket) {
    let mut parser = FrameParser::with_max_cargo_len(64 * 1024 * 1024);

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!("dock socket error: {e}");
                break;
            }
        };
        match message {
            Message::Binary(bytes) => match parser.push(&bytes) {
                Ok(frames) => {
                    for frame in frames {
                        if !dispatch_frame(frame) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("malformed transport frame: {e}");
                    break;
                }
            },
            Message::Ping(data) => {
                let _ = socket.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("dock socket closed");
}

/// Handle one decoded frame; returns `false` if the socket should close.
fn dispatch_frame(frame: Frame) -> bool {
    match frame.code {
        FrameCode::Ident => {
            info!("IDENT: {}", String::from_utf8_lossy(&frame.cargo));
        }
        FrameCode::Uplink => {
            info!("UPLINK config: {}", String::from_utf8_lossy(&frame.cargo));
        }
        FrameCode::Log => {
            info!("remote log: {}", String::from_utf8_lossy(&frame.cargo));
        }
        FrameCode::Stats => {
            info!("STATS: {}", String::from_utf8_lossy(&frame.cargo));
        }
        FrameCode::Update => {
            // The agent is acknowledging an update we never sent in this
            // mock; log the checksum it reports and move on.
            info!("UPDATE ack: {}", String::from_utf8_lossy(&frame.cargo));
        }
        FrameCode::AppData => {
            debug!("APPDATA: {} bytes", frame.cargo.len());
        }
        FrameCode::Panic => {
            error!("remote PANIC: {}", String::from_utf8_lossy(&frame.cargo));
            return false;
        }
        FrameCode::Error => {
            error!("remote ERROR: {}", String::from_utf8_lossy(&frame.cargo));
            return false;
        }
    }
    true
}

