//! Control-plane agent library: config loading, identity gathering, the log
//! ring buffer, and the authenticate→dock→heartbeat→update state machine.
//! The `uplink-agent` binary (see `src/main.rs`) wires these together with
//! a `clap` CLI and a shared shutdown channel; this crate is usable on its
//! own by anything that wants to embed the same session logic.

pub mod config;
pub mod error;
pub mod identity;
pub mod log_ring;
pub mod session;

pub use config::{Cli, Config};
pub use error::{ConfigError, UplinkError};
pub use identity::Identity;
pub use log_ring::LogRing;
pub use session::{UpdateApplier, Uplink};
