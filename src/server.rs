//! TCP acceptor for chat sessions.
//!
//! Binds the listening socket, then hands every accepted connection to its
//! own task running a `Session`. Accepting never waits on a session.

use crate::config::Config;
use crate::error::ChatError;
use crate::log_sink::LogSink;
use crate::session::Session;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Server instance
pub struct Server {
    listener: TcpListener,
    sink: LogSink,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal to startup.
    pub fn bind(config: &Config) -> Result<Self, ChatError> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| ChatError::Setup(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let listener = create_listener(addr, config.backlog).map_err(ChatError::Setup)?;
        let listener = TcpListener::from_std(listener).map_err(ChatError::Setup)?;

        Ok(Server {
            listener,
            sink: LogSink::new(&config.log_file),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), ChatError> {
        let addr = self.local_addr().map_err(ChatError::Setup)?;
        println!("Server listening on {addr}");
        info!(address = %addr, log_file = %self.sink.path().display(), "Server listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let sink = self.sink.clone();
                    tokio::spawn(async move {
                        match Session::new(stream, sink).run().await {
                            Ok(()) => debug!(peer = %peer, "Connection closed"),
                            Err(e) => error!(peer = %peer, error = %e, "Session ended"),
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Create a TCP listener with an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
