//! Per-connection chat session.
//!
//! A session moves through three states:
//! - `Registering`: waiting for the first line, which becomes the username
//! - `Active`: every further line is stamped, echoed to the sender and logged
//! - `Closed`: the peer left or an I/O error ended the session
//!
//! Sessions share nothing but the log sink, so a stuck or failing peer
//! only ever affects its own session.

use crate::error::ChatError;
use crate::line::{LineReader, MESSAGE_SIZE, USERNAME_SIZE};
use crate::log_sink::LogSink;
use crate::timestamp;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{error, trace, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registering,
    Active,
    Closed,
}

/// Lifecycle line written when a user registers.
pub fn connect_record(stamp: &str, username: &str) -> String {
    format!("[{stamp}] {username} telah terhubung.\n")
}

/// Lifecycle line written when a user's peer closes the connection.
pub fn disconnect_record(stamp: &str, username: &str) -> String {
    format!("[{stamp}] {username} telah terputus.\n")
}

/// Echoed and logged form of a chat message.
pub fn message_line(stamp: &str, username: &str, message: &str) -> String {
    format!("[{stamp}] {username}: {message}\n")
}

/// One accepted connection bound to one username.
pub struct Session<S> {
    conn: LineReader<S>,
    username: String,
    state: SessionState,
    sink: LogSink,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, sink: LogSink) -> Self {
        Self {
            conn: LineReader::new(stream),
            username: String::new(),
            state: SessionState::Registering,
            sink,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Username bound at registration. Empty before then.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Run the whole lifecycle: registration, then the message loop.
    pub async fn run(mut self) -> Result<(), ChatError> {
        if self.register().await? {
            self.serve().await?;
        }
        Ok(())
    }

    /// Read the registration line.
    ///
    /// Returns `Ok(false)` if the peer left before sending anything; the
    /// session is then closed without a lifecycle record.
    pub async fn register(&mut self) -> Result<bool, ChatError> {
        debug_assert_eq!(self.state, SessionState::Registering);

        let line = match self.conn.read_line(USERNAME_SIZE).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                trace!("Peer closed before registering");
                self.state = SessionState::Closed;
                return Ok(false);
            }
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(ChatError::Read(e));
            }
        };

        if line.truncated {
            warn!(
                bound = USERNAME_SIZE - 1,
                username = %line.text,
                "Username too long, truncated"
            );
        }

        self.username = line.text;
        self.state = SessionState::Active;

        let record = connect_record(&timestamp::now(), &self.username);
        publish(&self.sink, &record).await;
        Ok(true)
    }

    /// Stamp, echo and log each message until the peer leaves.
    ///
    /// A read or write failure ends the session with an error.
    pub async fn serve(&mut self) -> Result<(), ChatError> {
        debug_assert_eq!(self.state, SessionState::Active);

        loop {
            let line = match self.conn.read_line(MESSAGE_SIZE).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.state = SessionState::Closed;
                    let record = disconnect_record(&timestamp::now(), &self.username);
                    publish(&self.sink, &record).await;
                    return Ok(());
                }
                Err(e) => {
                    self.state = SessionState::Closed;
                    return Err(ChatError::Read(e));
                }
            };

            if line.truncated {
                warn!(
                    username = %self.username,
                    bound = MESSAGE_SIZE - 1,
                    "Message too long, truncated"
                );
            }

            let formatted = message_line(&timestamp::now(), &self.username, &line.text);

            let stream = self.conn.get_mut();
            if let Err(e) = write_line(stream, &formatted).await {
                self.state = SessionState::Closed;
                return Err(ChatError::Write(e));
            }

            publish(&self.sink, &formatted).await;
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(stream: &mut W, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await
}

/// Print a record on the operator console and append it to the chat log.
async fn publish(sink: &LogSink, record: &str) {
    print!("{record}");
    if let Err(e) = sink.append(record).await {
        error!(error = %e, "Chat log append failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CapturedLogs;
    use std::io;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio_test::io::Builder;

    fn temp_sink() -> (tempfile::TempDir, LogSink) {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("chat_log.txt"));
        (dir, sink)
    }

    fn read_log(sink: &LogSink) -> Vec<String> {
        match std::fs::read_to_string(sink.path()) {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn is_stamped(line: &str) -> bool {
        let bytes = line.as_bytes();
        bytes.len() > 21
            && bytes[0] == b'['
            && bytes[20] == b']'
            && chrono::NaiveDateTime::parse_from_str(&line[1..20], timestamp::TIMESTAMP_FORMAT)
                .is_ok()
    }

    #[test]
    fn test_record_formats() {
        let stamp = "2024-01-02 03:04:05";
        assert_eq!(
            connect_record(stamp, "bob"),
            "[2024-01-02 03:04:05] bob telah terhubung.\n"
        );
        assert_eq!(
            disconnect_record(stamp, "bob"),
            "[2024-01-02 03:04:05] bob telah terputus.\n"
        );
        assert_eq!(
            message_line(stamp, "hello", "hi there"),
            "[2024-01-02 03:04:05] hello: hi there\n"
        );
    }

    #[tokio::test]
    async fn test_echo_to_sender() {
        let (_dir, sink) = temp_sink();
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(Session::new(server, sink.clone()).run());

        client.write_all(b"hello\nhi there\n").await.unwrap();
        let mut reader = BufReader::new(&mut client);
        let mut echoed = String::new();
        reader.read_line(&mut echoed).await.unwrap();

        assert!(is_stamped(&echoed), "bad stamp: {echoed:?}");
        assert!(echoed.ends_with("] hello: hi there\n"));

        drop(reader);
        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_log_has_connect_message_disconnect_in_order() {
        let (_dir, sink) = temp_sink();
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(Session::new(server, sink.clone()).run());

        client.write_all(b"bob\nhey\n").await.unwrap();
        let mut echoed = String::new();
        BufReader::new(&mut client).read_line(&mut echoed).await.unwrap();
        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let lines = read_log(&sink);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("] bob telah terhubung."));
        assert!(lines[1].ends_with("] bob: hey"));
        assert!(lines[2].ends_with("] bob telah terputus."));
        assert!(lines.iter().all(|l| is_stamped(l)));
        assert_eq!(format!("{}\n", lines[1]), echoed);
    }

    #[tokio::test]
    async fn test_timestamps_non_decreasing_within_session() {
        let (_dir, sink) = temp_sink();
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(Session::new(server, sink).run());

        client.write_all(b"carol\none\ntwo\nthree\n").await.unwrap();
        let mut reader = BufReader::new(&mut client);
        let mut stamps = Vec::new();
        for expected in ["one", "two", "three"] {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.ends_with(&format!("] carol: {expected}\n")));
            stamps.push(line[1..20].to_string());
        }
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

        drop(reader);
        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_peer_gone_before_registration() {
        let (_dir, sink) = temp_sink();
        let mut session = Session::new(Builder::new().build(), sink.clone());

        assert!(!session.register().await.unwrap());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(read_log(&sink).is_empty());
    }

    #[tokio::test]
    async fn test_read_error_during_registration() {
        let (_dir, sink) = temp_sink();
        let stream = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut session = Session::new(stream, sink.clone());

        assert!(matches!(session.register().await, Err(ChatError::Read(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(read_log(&sink).is_empty());
    }

    #[tokio::test]
    async fn test_read_error_ends_active_session_without_disconnect_record() {
        let (_dir, sink) = temp_sink();
        let stream = Builder::new()
            .read(b"dave\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut session = Session::new(stream, sink.clone());

        assert!(session.register().await.unwrap());
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.username(), "dave");
        assert!(matches!(session.serve().await, Err(ChatError::Read(_))));
        assert_eq!(session.state(), SessionState::Closed);

        let lines = read_log(&sink);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("] dave telah terhubung."));
    }

    #[tokio::test]
    async fn test_write_failure_ends_session_unlogged() {
        let (_dir, sink) = temp_sink();
        let stream = Builder::new()
            .read(b"erin\nlost message\n")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();
        let session = Session::new(stream, sink.clone());

        assert!(matches!(session.run().await, Err(ChatError::Write(_))));

        let lines = read_log(&sink);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("] erin telah terhubung."));
    }

    #[tokio::test]
    async fn test_long_username_truncated_and_fixed() {
        let (_dir, sink) = temp_sink();
        let (mut client, server) = tokio::io::duplex(8192);
        let task = tokio::spawn(Session::new(server, sink.clone()).run());

        let long = "z".repeat(80);
        client.write_all(format!("{long}\nping\n").as_bytes()).await.unwrap();
        let mut echoed = String::new();
        BufReader::new(&mut client).read_line(&mut echoed).await.unwrap();
        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let kept = "z".repeat(USERNAME_SIZE - 1);
        assert!(echoed.ends_with(&format!("] {kept}: ping\n")));
        let lines = read_log(&sink);
        assert!(lines[2].ends_with(&format!("] {kept} telah terputus.")));
    }

    #[tokio::test]
    async fn test_overlong_message_truncated_with_warning() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let (_dir, sink) = temp_sink();
        let (mut client, server) = tokio::io::duplex(8192);

        let long = "m".repeat(MESSAGE_SIZE * 2);
        let peer = async move {
            client
                .write_all(format!("tina\n{long}\nnext\n").as_bytes())
                .await
                .unwrap();
            let mut reader = BufReader::new(&mut client);
            let mut first = String::new();
            reader.read_line(&mut first).await.unwrap();
            let mut second = String::new();
            reader.read_line(&mut second).await.unwrap();
            drop(reader);
            client.shutdown().await.unwrap();
            (first, second)
        };

        // Both halves on this thread so the scoped subscriber sees the session
        let (served, (first, second)) = tokio::join!(Session::new(server, sink.clone()).run(), peer);
        served.unwrap();

        let kept = "m".repeat(MESSAGE_SIZE - 1);
        assert!(first.ends_with(&format!("] tina: {kept}\n")));
        assert!(second.ends_with("] tina: next\n"));
        assert!(logs.contents().contains("Message too long, truncated"));

        let lines = read_log(&sink);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].ends_with(&format!("] tina: {kept}")));
        assert!(lines[2].ends_with("] tina: next"));
    }

    #[tokio::test]
    async fn test_unwritable_log_does_not_stop_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("missing").join("chat_log.txt"));
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(Session::new(server, sink).run());

        client.write_all(b"frank\nstill here\n").await.unwrap();
        let mut echoed = String::new();
        BufReader::new(&mut client).read_line(&mut echoed).await.unwrap();
        assert!(echoed.ends_with("] frank: still here\n"));

        client.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
