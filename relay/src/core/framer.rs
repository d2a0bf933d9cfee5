//! Newline framing for the child's stdout byte stream.
//!
//! Bytes are buffered until a `\n` is observed, so a multi-byte UTF-8
//! sequence or a JSON record split across reads is only decoded once it is
//! complete. A trailing fragment without a terminator is never emitted.

/// Splits an unbounded byte stream into complete text lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every line completed by it, in order.
    ///
    /// The terminating `\n` (and a preceding `\r`, if any) is stripped.
    /// Invalid UTF-8 is replaced rather than rejected; the decoder reports
    /// such lines as malformed JSON.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            if self.pending.last() == Some(&b'\r') {
                self.pending.pop();
            }
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consume the framer at end of stream, returning how many unterminated
    /// bytes were discarded.
    pub fn finish(self) -> usize {
        self.pending.len()
    }
}
