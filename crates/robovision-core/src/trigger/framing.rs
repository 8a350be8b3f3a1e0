//! Splitting socket reads into trigger messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a connection's byte stream is cut into messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Each successful read is one message. Senders that write faster than
    /// the server reads may see messages merged.
    #[default]
    Raw,
    /// Messages end with `\n`; a trailing `\r` is dropped and blank lines are skipped.
    Newline,
}

impl Framing {
    /// Suffix appended to acknowledgements so replies use the same framing.
    pub fn ack_suffix(&self) -> &'static str {
        match self {
            Framing::Raw => "",
            Framing::Newline => "\n",
        }
    }
}

/// An unterminated message grew past the pending-byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message exceeds {limit} bytes without a delimiter")]
pub struct Oversized {
    pub limit: usize,
}

/// Per-connection decoder. Invalid UTF-8 is replaced, never rejected.
#[derive(Debug)]
pub struct Deframer {
    framing: Framing,
    partial: Vec<u8>,
    max_pending: usize,
}

impl Deframer {
    /// `max_pending` bounds the bytes kept while waiting for a delimiter.
    pub fn new(framing: Framing, max_pending: usize) -> Self {
        Self {
            framing,
            partial: Vec::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Feed one read; returns the messages it completed.
    ///
    /// With newline framing, a tail longer than `max_pending` is discarded and
    /// reported as [`Oversized`]; the caller is expected to drop the client.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, Oversized> {
        match self.framing {
            Framing::Raw => {
                if chunk.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![String::from_utf8_lossy(chunk).into_owned()])
                }
            }
            Framing::Newline => {
                self.partial.extend_from_slice(chunk);
                let mut messages = Vec::new();
                while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.partial.drain(..=end).collect();
                    let mut line = &line[..line.len() - 1];
                    if let [rest @ .., b'\r'] = line {
                        line = rest;
                    }
                    if !line.is_empty() {
                        messages.push(String::from_utf8_lossy(line).into_owned());
                    }
                }
                if self.partial.len() > self.max_pending {
                    self.partial = Vec::new();
                    return Err(Oversized {
                        limit: self.max_pending,
                    });
                }
                Ok(messages)
            }
        }
    }

    /// Bytes of an unterminated message still waiting for its delimiter.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_read_is_one_message() {
        let mut deframer = Deframer::new(Framing::Raw, 1024);
        assert_eq!(deframer.push(b"finnishfinnish"), Ok(vec!["finnishfinnish".to_string()]));
        assert_eq!(deframer.push(b""), Ok(Vec::new()));
    }

    #[test]
    fn test_newline_buffers_partial_lines() {
        let mut deframer = Deframer::new(Framing::Newline, 1024);
        assert_eq!(deframer.push(b"Capture:1\r\nfin"), Ok(vec!["Capture:1".to_string()]));
        assert_eq!(deframer.pending(), 3);
        let messages = deframer.push(b"nish\n\nA\nB\n");
        assert_eq!(messages, Ok(vec!["finnish".into(), "A".into(), "B".into()]));
        assert_eq!(deframer.pending(), 0);
    }

    #[test]
    fn test_undelimited_stream_is_bounded() {
        let mut deframer = Deframer::new(Framing::Newline, 1024);
        let chunk = [b'x'; 1024];

        assert_eq!(deframer.push(&chunk), Ok(Vec::new()));
        assert_eq!(deframer.pending(), 1024);
        assert_eq!(deframer.push(&chunk), Err(Oversized { limit: 1024 }));
        assert_eq!(deframer.pending(), 0);

        for _ in 0..100 {
            let _ = deframer.push(&chunk);
            assert!(deframer.pending() <= 1024);
        }
    }

    #[test]
    fn test_long_line_split_across_reads_fits_limit() {
        let mut deframer = Deframer::new(Framing::Newline, 8);
        assert_eq!(deframer.push(b"Capt"), Ok(Vec::new()));
        assert_eq!(deframer.push(b"ure:1\nfin"), Ok(vec!["Capture:1".to_string()]));
        assert_eq!(deframer.pending(), 3);
    }

    #[test]
    fn test_invalid_utf8_is_substituted() {
        let mut deframer = Deframer::new(Framing::Raw, 1024);
        let messages = deframer.push(&[b'o', b'k', 0xff]);
        assert_eq!(messages, Ok(vec!["ok\u{fffd}".to_string()]));
    }
}
