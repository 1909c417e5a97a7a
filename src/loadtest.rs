//! Load harness for the chat server.
//!
//! Opens a fixed number of sessions and drives them all from one thread:
//! each round waits for read or write readiness across every socket, sends
//! a round-tagged message on the writable ones and drains the readable ones.
//!
//! mio readiness is edge-triggered, so every socket is re-armed at the end
//! of a round to see its current state again on the next poll.

use crate::config::LoadArgs;
use crate::error::ChatError;
use crate::line::MESSAGE_SIZE;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One harness-driven session.
struct LoadConnection {
    /// 1-based client number used in message tags.
    id: usize,
    username: String,
    stream: TcpStream,
    /// Bytes after the last complete echoed line.
    pending: Vec<u8>,
}

/// Totals gathered over a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub clients: usize,
    pub rounds: usize,
    pub sent: usize,
    pub received: usize,
    /// Echoes that carried another session's name or tag.
    pub cross_talk: usize,
    /// Sessions the server closed before the run ended.
    pub dropped: usize,
}

/// Synthetic message for a round.
pub fn round_message(round: usize, id: usize) -> String {
    format!("Message {round} from client {id}")
}

/// Whether an echoed line belongs to the session that reads it.
pub fn is_own_echo(line: &str, username: &str, id: usize) -> bool {
    line.contains(&format!("] {username}: ")) && line.ends_with(&format!(" from client {id}"))
}

/// Run the harness to completion.
///
/// Fails only if a session cannot be opened; everything after that is
/// counted in the report.
pub fn run(args: &LoadArgs) -> Result<LoadReport, ChatError> {
    let addr = SocketAddr::from((args.host, args.port));
    let mut poll = Poll::new().map_err(ChatError::Setup)?;
    let mut connections: Slab<LoadConnection> = Slab::with_capacity(args.clients);

    for n in 1..=args.clients {
        let conn = open_session(addr, n).map_err(|e| {
            warn!(client = n, error = %e, "Failed to create client socket");
            ChatError::Connect(e)
        })?;
        let key = connections.insert(conn);
        let conn = &mut connections[key];
        poll.registry()
            .register(
                &mut conn.stream,
                Token(key),
                Interest::READABLE | Interest::WRITABLE,
            )
            .map_err(ChatError::Setup)?;
        println!("Client {n} connected to the server.");
    }

    info!(clients = args.clients, rounds = args.rounds, addr = %addr, "Load test started");

    let mut report = LoadReport {
        clients: args.clients,
        rounds: args.rounds,
        ..LoadReport::default()
    };
    let mut events = Events::with_capacity(args.clients.max(1) * 2);
    let interval = Duration::from_secs(args.interval_secs);

    for round in 0..args.rounds {
        if connections.is_empty() {
            warn!(round, "No sessions left");
            break;
        }

        if let Err(e) = poll.poll(&mut events, None) {
            warn!(error = %e, "Readiness wait failed");
            break;
        }

        for event in events.iter() {
            let Token(key) = event.token();
            if !connections.contains(key) {
                continue;
            }

            if event.is_writable() {
                send_round(&mut connections[key], round, &mut report);
            }

            if event.is_readable() && !drain(&mut connections[key], &mut report) {
                close(&mut poll, &mut connections, key, &mut report);
            }
        }

        thread::sleep(interval);

        for (key, conn) in connections.iter_mut() {
            if let Err(e) = poll.registry().reregister(
                &mut conn.stream,
                Token(key),
                Interest::READABLE | Interest::WRITABLE,
            ) {
                debug!(client = conn.id, error = %e, "Re-arm failed");
            }
        }
    }

    collect_stragglers(&mut poll, &mut connections, &mut events, interval, &mut report);

    for (_, mut conn) in connections.into_iter() {
        let _ = poll.registry().deregister(&mut conn.stream);
        println!("Client {} disconnected.", conn.id);
    }

    info!(
        sent = report.sent,
        received = report.received,
        cross_talk = report.cross_talk,
        dropped = report.dropped,
        "Load test completed"
    );
    println!("Load test completed.");
    Ok(report)
}

/// Connect and register a session, then switch it to non-blocking mode.
fn open_session(addr: SocketAddr, id: usize) -> io::Result<LoadConnection> {
    let mut stream = std::net::TcpStream::connect(addr)?;
    let username = format!("loadtest-{id}");
    stream.write_all(format!("{username}\n").as_bytes())?;
    stream.set_nonblocking(true)?;

    Ok(LoadConnection {
        id,
        username,
        stream: TcpStream::from_std(stream),
        pending: Vec::with_capacity(MESSAGE_SIZE),
    })
}

fn send_round(conn: &mut LoadConnection, round: usize, report: &mut LoadReport) {
    let message = round_message(round, conn.id);
    let framed = format!("{message}\n");

    match conn.stream.write(framed.as_bytes()) {
        Ok(n) if n == framed.len() => {
            report.sent += 1;
            println!("Client {} sent: {}", conn.id, message);
        }
        Ok(n) => warn!(client = conn.id, written = n, "Partial send"),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => warn!(client = conn.id, error = %e, "Send failed"),
    }
}

/// Read everything available. Returns false once the session is gone.
fn drain(conn: &mut LoadConnection, report: &mut LoadReport) -> bool {
    let mut buf = [0u8; MESSAGE_SIZE];

    loop {
        match conn.stream.read(&mut buf) {
            Ok(0) => return false,
            Ok(n) => conn.pending.extend_from_slice(&buf[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(client = conn.id, error = %e, "Receive failed");
                return false;
            }
        }
    }

    while let Some(pos) = conn.pending.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = conn.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..pos]);

        report.received += 1;
        if !is_own_echo(&line, &conn.username, conn.id) {
            report.cross_talk += 1;
            warn!(client = conn.id, line = %line, "Echo for another session");
        }
        println!("Client {} received: {}", conn.id, line);
    }

    true
}

fn close(
    poll: &mut Poll,
    connections: &mut Slab<LoadConnection>,
    key: usize,
    report: &mut LoadReport,
) {
    if let Some(mut conn) = connections.try_remove(key) {
        let _ = poll.registry().deregister(&mut conn.stream);
        report.dropped += 1;
        warn!(client = conn.id, "Server closed session");
    }
}

/// One last bounded wait for echoes of the final round.
fn collect_stragglers(
    poll: &mut Poll,
    connections: &mut Slab<LoadConnection>,
    events: &mut Events,
    wait: Duration,
    report: &mut LoadReport,
) {
    for (key, conn) in connections.iter_mut() {
        let _ = poll
            .registry()
            .reregister(&mut conn.stream, Token(key), Interest::READABLE);
    }

    let wait = wait.max(Duration::from_millis(100));
    if poll.poll(events, Some(wait)).is_err() {
        return;
    }

    for event in events.iter() {
        let Token(key) = event.token();
        if event.is_readable()
            && connections.contains(key)
            && !drain(&mut connections[key], report)
        {
            close(poll, connections, key, report);
        }
    }
}
