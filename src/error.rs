//! Error types for the chat server, client and load harness.
//!
//! Setup and connect errors end the process. Read and write errors end
//! only the session they happen on. Log errors are reported and ignored.

use std::io;
use std::path::PathBuf;

/// Errors raised by sessions, the acceptor, and the client.
#[derive(Debug)]
pub enum ChatError {
    /// Socket creation, bind or listen failed at startup.
    Setup(io::Error),
    /// The client could not reach the server.
    Connect(io::Error),
    /// A read on a live connection failed.
    Read(io::Error),
    /// A write on a live connection failed.
    Write(io::Error),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Setup(e) => write!(f, "Failed to set up: {}", e),
            ChatError::Connect(e) => write!(f, "Failed to connect to server: {}", e),
            ChatError::Read(e) => write!(f, "Failed to receive message: {}", e),
            ChatError::Write(e) => write!(f, "Failed to send message: {}", e),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatError::Setup(e)
            | ChatError::Connect(e)
            | ChatError::Read(e)
            | ChatError::Write(e) => Some(e),
        }
    }
}

/// Log sink failures. Never fatal to a session.
#[derive(Debug)]
pub enum LogError {
    Open(PathBuf, io::Error),
    Write(PathBuf, io::Error),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Open(path, e) => {
                write!(f, "Failed to open log file '{}': {}", path.display(), e)
            }
            LogError::Write(path, e) => {
                write!(f, "Failed to write log file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for LogError {}
