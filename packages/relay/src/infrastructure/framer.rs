//! Incremental line framing over a raw byte stream.
//!
//! ## Framing rules
//!
//! - A message ends at `\n`. Every `\r` and `\n` inside it is removed and the
//!   result is trimmed.
//! - A blank line is a message with empty content.
//! - End of stream before a terminator yields [`Frame::Closed`]; the partial
//!   bytes are dropped.
//! - A line longer than the configured limit is dropped whole and reading
//!   resumes after its terminator ([`Frame::Overflow`]).
//! - Invalid UTF-8 is replaced with U+FFFD.

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 1024;

/// Result of one framing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without terminators
    Line(String),
    /// An oversized line was dropped; `discarded` bytes including its terminator
    Overflow { discarded: usize },
    /// The peer closed the stream
    Closed,
}

/// Splits an `AsyncRead` into newline-delimited text messages.
///
/// `next_frame` is cancel safe: dropping it mid-read loses no bytes, so it
/// can sit in a `tokio::select!` next to a close signal.
pub struct LineFramer<R> {
    reader: R,
    buf: Vec<u8>,
    max_line_length: usize,
    /// Bytes already thrown away from the current oversized line
    discarding: Option<usize>,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R, max_line_length: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            max_line_length,
            discarding: None,
        }
    }

    /// Wait for the next frame.
    pub async fn next_frame(&mut self) -> std::io::Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.take_buffered() {
                return Ok(frame);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.buf.clear();
                self.discarding = None;
                return Ok(Frame::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn take_buffered(&mut self) -> Option<Frame> {
        match self.buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                if let Some(already) = self.discarding.take() {
                    return Some(Frame::Overflow {
                        discarded: already + line.len(),
                    });
                }
                let content_len = match line.get(pos.wrapping_sub(1)) {
                    Some(&b'\r') => pos - 1,
                    _ => pos,
                };
                if content_len > self.max_line_length {
                    return Some(Frame::Overflow {
                        discarded: line.len(),
                    });
                }
                Some(Frame::Line(decode_line(&line)))
            }
            None => {
                // one byte of slack for a trailing `\r`
                if self.buf.len() > self.max_line_length + 1 {
                    let dropped = self.buf.len();
                    self.buf.clear();
                    *self.discarding.get_or_insert(0) += dropped;
                }
                None
            }
        }
    }
}

/// Strip every `\r`/`\n`, decode lossily and trim.
pub fn decode_line(raw: &[u8]) -> String {
    let filtered: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| *b != b'\r' && *b != b'\n')
        .collect();
    String::from_utf8_lossy(&filtered).trim().to_string()
}
