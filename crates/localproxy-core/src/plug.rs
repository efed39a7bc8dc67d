//! The stream consumer side of a proxy socket.
//!
//! A `Plug` is whatever sits downstream of the socket (a protocol backend,
//! the CLI's stdout pump, a test recorder). Sockets keep only a `Weak`
//! reference to their plug and never call it while holding internal state
//! borrowed, so every method may call back into the socket.

use std::io;

/// Longest stderr line kept before it is logged without its newline.
pub const MAX_STDERR_LINE: usize = 4096;

/// Receiver of socket events.
pub trait Plug {
    /// One chunk of inbound data, in the order it was read.
    fn receive(&self, data: &[u8]);

    /// The read side ended: `None` for a clean end-of-file, otherwise the
    /// error that ended it. Deferred write errors are reported here too, so
    /// a failed write can be followed by a second call when the read side
    /// later ends; the first call is the one that describes the failure.
    fn closing(&self, error: Option<&io::Error>);

    /// Buffered outbound data drained to `buffered` bytes.
    fn sent(&self, buffered: usize);

    /// Informational message about the connection.
    fn log(&self, message: &str) {
        tracing::info!(target: "localproxy::plug", "{message}");
    }
}

/// Assembles a proxy command's stderr into whole lines.
///
/// Output arrives in arbitrary chunks; only complete lines are handed out,
/// with trailing CR/LF removed.
#[derive(Debug, Default)]
pub struct StderrLines {
    partial: Vec<u8>,
}

impl StderrLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return the lines it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = data;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
        while self.partial.len() >= MAX_STDERR_LINE {
            let tail = self.partial.split_off(MAX_STDERR_LINE);
            lines.push(self.take_line());
            self.partial = tail;
        }
        lines
    }

    /// The unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }

    fn take_line(&mut self) -> String {
        let mut line = std::mem::take(&mut self.partial);
        while matches!(line.last(), Some(b'\r' | b'\n')) {
            line.pop();
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut lines = StderrLines::new();
        assert_eq!(lines.push(b"one\ntwo\n"), vec!["one", "two"]);
        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn joins_lines_across_chunks() {
        let mut lines = StderrLines::new();
        assert!(lines.push(b"Connection ").is_empty());
        assert!(lines.push(b"refu").is_empty());
        assert_eq!(lines.push(b"sed\nnext"), vec!["Connection refused"]);
        assert_eq!(lines.pending(), 4);
        assert_eq!(lines.finish().as_deref(), Some("next"));
        assert!(lines.finish().is_none());
    }

    #[test]
    fn strips_carriage_returns() {
        let mut lines = StderrLines::new();
        assert_eq!(lines.push(b"dos line\r\n\r\n"), vec!["dos line", ""]);
    }

    #[test]
    fn replaces_invalid_utf8() {
        let mut lines = StderrLines::new();
        let out = lines.push(b"bad \xff byte\n");
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("bad "));
        assert!(out[0].ends_with(" byte"));
    }

    #[test]
    fn overlong_line_is_split() {
        let mut lines = StderrLines::new();
        let data = vec![b'a'; MAX_STDERR_LINE + 10];
        let out = lines.push(&data);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), MAX_STDERR_LINE);
        assert_eq!(lines.pending(), 10);
    }

    #[test]
    fn clear_discards_partial() {
        let mut lines = StderrLines::new();
        lines.push(b"half");
        lines.clear();
        assert!(lines.finish().is_none());
    }
}
