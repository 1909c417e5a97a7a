//! Newline-delimited framing with fixed byte bounds.
//!
//! Usernames and messages are plain text lines. A line that does not fit
//! its bound keeps the first `bound - 1` bytes and the rest is dropped.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Registration buffer size. Usernames keep at most `USERNAME_SIZE - 1` bytes.
pub const USERNAME_SIZE: usize = 50;

/// Message buffer size. Messages keep at most `MESSAGE_SIZE - 1` bytes.
pub const MESSAGE_SIZE: usize = 1024;

/// Cut `text` to at most `bound - 1` bytes on a character boundary.
///
/// Returns the kept text and whether anything was cut.
pub fn truncate_to_bound(text: &str, bound: usize) -> (String, bool) {
    let limit = bound.saturating_sub(1);
    if text.len() <= limit {
        return (text.to_string(), false);
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

/// Drop everything from the first newline on, plus a trailing carriage return.
pub fn strip_newline(text: &str) -> &str {
    let text = match text.find('\n') {
        Some(pos) => &text[..pos],
        None => text,
    };
    text.strip_suffix('\r').unwrap_or(text)
}

/// One framed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without its newline.
    pub text: String,
    /// The peer sent more than the bound allowed.
    pub truncated: bool,
}

impl Line {
    /// Frame raw line bytes (newline already removed) under `bound`.
    pub fn from_bytes(raw: &[u8], bound: usize) -> Self {
        finish(raw, false, bound)
    }
}

/// Reads bounded lines from a byte stream.
///
/// All partial-line state lives in the reader, so `read_line` is cancel
/// safe and can sit in a `tokio::select!` branch.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    /// Kept prefix of a line that overran its bound. The rest of that
    /// line is dropped until its newline arrives.
    overrun: Option<BytesMut>,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MESSAGE_SIZE),
            overrun: None,
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read the next line, holding at most `bound - 1` bytes of it.
    ///
    /// Returns:
    /// - `Ok(Some(line))` for a line (may be empty),
    /// - `Ok(None)` on end of stream with nothing buffered.
    ///
    /// An unterminated tail at end of stream is returned as a last line.
    pub async fn read_line(&mut self, bound: usize) -> io::Result<Option<Line>> {
        let limit = bound.saturating_sub(1);

        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let chunk = self.buf.split_to(pos + 1);
                let line = match self.overrun.take() {
                    Some(kept) => finish(&kept, true, bound),
                    None => finish(&chunk[..pos], false, bound),
                };
                return Ok(Some(line));
            }

            if self.overrun.is_some() {
                self.buf.clear();
            } else if self.buf.len() > limit {
                let kept = self.buf.split_to(limit);
                self.buf.clear();
                self.overrun = Some(kept);
            }

            self.buf.reserve(bound);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if let Some(kept) = self.overrun.take() {
                    return Ok(Some(finish(&kept, true, bound)));
                }
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let tail = self.buf.split();
                return Ok(Some(finish(&tail, false, bound)));
            }
        }
    }
}

fn finish(raw: &[u8], overrun: bool, bound: usize) -> Line {
    let limit = bound.saturating_sub(1);
    let mut overflow = overrun;
    let mut raw = raw;
    if raw.len() > limit {
        raw = &raw[..limit];
        overflow = true;
    }
    raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    // A cut may land inside a multi-byte character
    if overflow {
        if let Err(e) = std::str::from_utf8(raw) {
            if e.error_len().is_none() {
                raw = &raw[..e.valid_up_to()];
            }
        }
    }

    let lossy = String::from_utf8_lossy(raw);
    let (text, cut) = truncate_to_bound(&lossy, bound);
    Line {
        text,
        truncated: overflow || cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_truncate_within_bound() {
        assert_eq!(truncate_to_bound("bob", USERNAME_SIZE), ("bob".to_string(), false));
        let exact = "a".repeat(USERNAME_SIZE - 1);
        assert_eq!(truncate_to_bound(&exact, USERNAME_SIZE), (exact.clone(), false));
    }

    #[test]
    fn test_truncate_over_bound() {
        let long = "x".repeat(USERNAME_SIZE + 10);
        let (kept, cut) = truncate_to_bound(&long, USERNAME_SIZE);
        assert!(cut);
        assert_eq!(kept.len(), USERNAME_SIZE - 1);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // "é" is two bytes; a bound of 4 leaves room for 3 bytes
        let (kept, cut) = truncate_to_bound("éé", 4);
        assert!(cut);
        assert_eq!(kept, "é");
    }

    #[test]
    fn test_strip_newline() {
        assert_eq!(strip_newline("hello\n"), "hello");
        assert_eq!(strip_newline("hello\r\n"), "hello");
        assert_eq!(strip_newline("hello"), "hello");
        assert_eq!(strip_newline("one\ntwo\n"), "one");
    }

    #[tokio::test]
    async fn test_reads_lines_across_reads() {
        let stream = Builder::new().read(b"hel").read(b"lo\nhi th").read(b"ere\n").build();
        let mut reader = LineReader::new(stream);

        let first = reader.read_line(USERNAME_SIZE).await.unwrap().unwrap();
        assert_eq!(first.text, "hello");
        assert!(!first.truncated);

        let second = reader.read_line(MESSAGE_SIZE).await.unwrap().unwrap();
        assert_eq!(second.text, "hi there");

        assert!(reader.read_line(MESSAGE_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_several_lines_in_one_read() {
        let stream = Builder::new().read(b"a\r\nb\n\nc").build();
        let mut reader = LineReader::new(stream);

        let mut texts = Vec::new();
        while let Some(line) = reader.read_line(MESSAGE_SIZE).await.unwrap() {
            texts.push(line.text);
        }
        assert_eq!(texts, vec!["a", "b", "", "c"]);
    }

    #[tokio::test]
    async fn test_overlong_line_is_truncated_and_rest_dropped() {
        let mut input = "u".repeat(USERNAME_SIZE * 2).into_bytes();
        input.extend_from_slice(b"\nnext\n");
        let stream = Builder::new().read(&input).build();
        let mut reader = LineReader::new(stream);

        let name = reader.read_line(USERNAME_SIZE).await.unwrap().unwrap();
        assert!(name.truncated);
        assert_eq!(name.text, "u".repeat(USERNAME_SIZE - 1));

        let next = reader.read_line(MESSAGE_SIZE).await.unwrap().unwrap();
        assert_eq!(next.text, "next");
        assert!(!next.truncated);
    }

    #[tokio::test]
    async fn test_overrun_spanning_several_reads() {
        let head = "h".repeat(30);
        let tail = "t".repeat(40);
        let stream = Builder::new()
            .read(head.as_bytes())
            .read(tail.as_bytes())
            .read(b"ttt\nafter\n")
            .build();
        let mut reader = LineReader::new(stream);

        let line = reader.read_line(USERNAME_SIZE).await.unwrap().unwrap();
        assert!(line.truncated);
        assert_eq!(line.text, format!("{head}{}", "t".repeat(19)));

        let after = reader.read_line(USERNAME_SIZE).await.unwrap().unwrap();
        assert_eq!(after.text, "after");
    }

    #[tokio::test]
    async fn test_truncation_never_splits_a_character() {
        let input = format!("{}\n", "é".repeat(40));
        let stream = Builder::new().read(input.as_bytes()).build();
        let mut reader = LineReader::new(stream);

        let line = reader.read_line(USERNAME_SIZE).await.unwrap().unwrap();
        assert!(line.truncated);
        assert_eq!(line.text, "é".repeat(24));
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let stream = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = LineReader::new(stream);

        let err = reader.read_line(USERNAME_SIZE).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
