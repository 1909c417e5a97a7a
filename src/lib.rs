//! tubes-chat: a minimal line-based chat service
//!
//! - `server`: accepts TCP connections, one task per session
//! - `session`: registration, then timestamped echo of every line
//! - `client`: terminal client multiplexing keyboard and socket input
//! - `loadtest`: many concurrent sessions driven from one readiness loop
//!
//! Every chat line and connect/disconnect notice is appended to a flat
//! log file.

pub mod client;
pub mod config;
pub mod error;
pub mod line;
pub mod loadtest;
pub mod log_sink;
pub mod server;
pub mod session;
pub mod timestamp;

#[cfg(test)]
mod testutil;

use tracing_subscriber::EnvFilter;

/// Initialize diagnostics on stderr. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
