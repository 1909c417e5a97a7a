//! Terminal chat client.
//!
//! After registering, the client waits on terminal input and the server
//! socket at the same time. Whichever is ready first is serviced, and the
//! other stays armed, so neither side can starve the other.
//!
//! Terminal reads block and cannot be cancelled, so they run on their own
//! thread and arrive over a channel. When the server goes away the client
//! returns at once and that thread is abandoned.

use crate::config::ClientArgs;
use crate::error::ChatError;
use crate::line::{strip_newline, truncate_to_bound, Line, MESSAGE_SIZE, USERNAME_SIZE};
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::thread;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lines typed on the terminal, in order. Closed at end of input.
pub type TerminalLines = mpsc::Receiver<io::Result<Line>>;

/// Why the client loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The server closed the connection.
    ServerClosed,
    /// Terminal input reached end of file.
    InputClosed,
}

/// A registered connection to the chat server.
pub struct Client<S> {
    username: String,
    stream: S,
}

/// Open the TCP connection to the server.
pub async fn dial(addr: SocketAddr) -> Result<TcpStream, ChatError> {
    TcpStream::connect(addr).await.map_err(ChatError::Connect)
}

impl Client<TcpStream> {
    /// Connect to the server and register `username`.
    pub async fn connect(addr: SocketAddr, username: &str) -> Result<Self, ChatError> {
        let stream = dial(addr).await?;
        Self::register(stream, username).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Send the registration line on an established stream.
    ///
    /// The username loses any newline and is cut to the registration bound.
    pub async fn register(mut stream: S, username: &str) -> Result<Self, ChatError> {
        let username = sanitize(username, USERNAME_SIZE);
        send_line(&mut stream, &username).await?;
        debug!(username = %username, "Registered");

        Ok(Self { username, stream })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Relay terminal lines to the server and server bytes to the console
    /// until either side closes.
    pub async fn run<O>(
        self,
        mut input: TerminalLines,
        console: &mut O,
    ) -> Result<ClientExit, ChatError>
    where
        O: AsyncWrite + Unpin,
    {
        let (mut server_rx, mut server_tx) = tokio::io::split(self.stream);
        let mut buf = vec![0u8; MESSAGE_SIZE];

        loop {
            tokio::select! {
                line = input.recv() => {
                    let line = match line {
                        Some(Ok(line)) => line,
                        Some(Err(e)) => return Err(ChatError::Read(e)),
                        None => {
                            debug!("Terminal input closed");
                            return Ok(ClientExit::InputClosed);
                        }
                    };
                    if line.truncated {
                        warn!(bound = MESSAGE_SIZE - 1, "Input too long, truncated");
                    }
                    if line.text.is_empty() {
                        continue;
                    }
                    send_line(&mut server_tx, &line.text).await?;
                }
                received = server_rx.read(&mut buf) => {
                    match received.map_err(ChatError::Read)? {
                        0 => {
                            print_console(console, b"Server disconnected.\n").await?;
                            return Ok(ClientExit::ServerClosed);
                        }
                        n => print_console(console, &buf[..n]).await?,
                    }
                }
            }
        }
    }
}

/// Read one terminal line, cut to `bound`. `None` at end of input.
pub fn read_terminal_line<R: BufRead>(reader: &mut R, bound: usize) -> io::Result<Option<Line>> {
    let mut raw = Vec::with_capacity(bound);
    if reader.read_until(b'\n', &mut raw)? == 0 {
        return Ok(None);
    }
    if raw.last() == Some(&b'\n') {
        raw.pop();
    }
    Ok(Some(Line::from_bytes(&raw, bound)))
}

/// Start the terminal reader thread.
pub fn spawn_terminal_reader() -> Result<TerminalLines, ChatError> {
    let (tx, rx) = mpsc::channel(16);

    thread::Builder::new()
        .name("terminal-input".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            loop {
                let line = match read_terminal_line(&mut stdin, MESSAGE_SIZE) {
                    Ok(Some(line)) => Ok(line),
                    Ok(None) => break,
                    Err(e) => Err(e),
                };
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        })
        .map_err(ChatError::Setup)?;

    Ok(rx)
}

/// Strip the newline and cut to `bound`, warning if anything was cut.
fn sanitize(text: &str, bound: usize) -> String {
    let (kept, cut) = truncate_to_bound(strip_newline(text), bound);
    if cut {
        warn!(bound = bound - 1, "Input too long, truncated");
    }
    kept
}

async fn send_line<W: AsyncWrite + Unpin>(stream: &mut W, text: &str) -> Result<(), ChatError> {
    let mut framed = String::with_capacity(text.len() + 1);
    framed.push_str(text);
    framed.push('\n');
    stream
        .write_all(framed.as_bytes())
        .await
        .map_err(ChatError::Write)?;
    stream.flush().await.map_err(ChatError::Write)
}

async fn print_console<O: AsyncWrite + Unpin>(console: &mut O, bytes: &[u8]) -> Result<(), ChatError> {
    console.write_all(bytes).await.map_err(ChatError::Write)?;
    console.flush().await.map_err(ChatError::Write)
}

/// Full terminal session: connect, ask for a username, chat.
pub async fn run(args: ClientArgs) -> Result<ClientExit, ChatError> {
    let addr = SocketAddr::from((args.server, args.port));
    let stream = dial(addr).await?;

    let mut console = tokio::io::stdout();
    print_console(&mut console, format!("Connected to server {addr}\n").as_bytes()).await?;

    let mut input = spawn_terminal_reader()?;
    let username = match args.username {
        Some(username) => username,
        None => {
            print_console(&mut console, b"Enter your username: ").await?;
            match input.recv().await {
                Some(Ok(line)) => line.text,
                Some(Err(e)) => return Err(ChatError::Read(e)),
                None => return Ok(ClientExit::InputClosed),
            }
        }
    };

    let client = Client::register(stream, &username).await?;
    let welcome = format!("Welcome, {}! You can start chatting.\n", client.username());
    print_console(&mut console, welcome.as_bytes()).await?;

    client.run(input, &mut console).await
}
