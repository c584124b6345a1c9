//! Uplink agent binary (C14): parses the CLI, loads config, wires up
//! logging (fern, chained into the log ring the same as the teacher's
//! `logger.rs` chains stdout and a log file), and runs the uplink session
//! alongside an optional demo HTTP server, both under one
//! `tokio::sync::broadcast` shutdown channel — the same shape as the
//! teacher's `upstream.rs::run(config, app_state, shutdown)`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use http_core::{Server, ServerOptions};
use log::{info, warn};
use tokio::sync::broadcast;
use uplink::{config, log_ring::LogRing, session::Uplink};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = config::Cli::parse();

    let log_ring = LogRing::new(256 * 1024);
    setup_logging(cli.log_dir.as_deref(), &cli.log_level, &log_ring).context("failed to initialize logging")?;

    let config = config::load(&cli).context("failed to load uplink config")?;
    info!("uplink agent starting, controller = {}", config.url);

    let uplink = Uplink::new(config.clone(), log_ring, "uplink-agent");

    install_panic_hook(uplink.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let uplink_task = {
        let uplink = uplink.clone();
        tokio::spawn(async move {
            if let Err(err) = uplink.run(shutdown_rx).await {
                warn!("uplink session exited with an error: {err}");
            }
        })
    };

    let server_task = if let Some(port) = config.listen_port {
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move { run_demo_server(port, shutdown_rx).await }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = uplink_task.await;
    if let Some(server_task) = server_task {
        server_task.abort();
    }

    Ok(())
}

/// A minimal HTTP server exposing the uplink's own health, for whatever
/// frontend wants to poll it without going through the controller. Built on
/// [`http_core::Server`] (C7) rather than pulling in `axum` here, since the
/// crate already carries the server it needs.
async fn run_demo_server(port: u16, mut shutdown: broadcast::Receiver<()>) {
    let server = Server::new(ServerOptions::default());
    let handler: http_core::server::RequestHandler = Arc::new(|request, mut writer| {
        Box::pin(async move {
            writer.response_mut().status = 200;
            writer.response_mut().reason = "OK".to_string();
            writer.response_mut().body = b"uplink agent is running\n".to_vec();
            let _ = request;
            writer.finish().await
        })
    });

    tokio::select! {
        result = server.listen(port, handler) => {
            if let Err(err) = result {
                warn!("demo server exited: {err}");
            }
        }
        _ = shutdown.recv() => {
            info!("demo server shutting down");
        }
    }
}

fn install_panic_hook(uplink: Arc<Uplink>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let reason = info.to_string();
        uplink.note_panic(&reason);
        default_hook(info);
    }));
}

fn setup_logging(log_dir: Option<&Path>, log_level: &str, log_ring: &LogRing) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(Box::new(log_ring.writer()) as Box<dyn std::io::Write + Send>);

    if let Some(log_dir) = log_dir {
        std::fs::create_dir_all(log_dir)?;
        let log_file_name = format!("uplink_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
        dispatch = dispatch.chain(fern::log_file(log_dir.join(log_file_name))?);
    }

    dispatch.apply().context("a logger was already installed")?;
    Ok(())
}
