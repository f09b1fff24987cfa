//! # execbusd
//!
//! Puts an [`execbus::Supervisor`] behind a Unix socket. Each connection is
//! one subscriber: it can launch processes, subscribe to them, and receives
//! their events as newline-delimited JSON on the same stream.

pub mod client;
pub mod config;
pub mod daemon;
pub mod paths;
pub mod protocol;
pub mod server;

pub use client::{ClientError, DaemonClient};
pub use config::{load_global_config, GlobalConfig};
pub use daemon::Daemon;
pub use paths::DaemonPaths;
pub use protocol::{Request, Response, ServerMessage};

/// Directory name used under the XDG state and config dirs.
pub const APP_NAME: &str = "execbus";
