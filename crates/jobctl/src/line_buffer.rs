//! Line-oriented buffering for job output streams.
//!
//! Raw chunks read from a pipe or pty master arrive at arbitrary
//! boundaries. `LineBuffer` splits them into logical lines on `\n`
//! while holding back an unterminated trailing fragment until either a
//! later chunk completes it or the stream ends.
//!
//! Lines are byte sequences, not strings: embedded NUL bytes survive,
//! and carriage returns are left in place (a pty in cooked mode will
//! produce `\r\n`; stripping the `\r` is the consumer's business).
//!
//! Delivery contract: joining every delivered line with `\n`, in order,
//! reproduces the stream byte-for-byte. The end-of-stream batch always
//! carries the final fragment, which is an explicit empty line when the
//! stream ended in `\n` — so `"abc\n"` yields `["abc", ""]` overall.

/// Incremental splitter for one output stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning the batch of lines it completed.
    ///
    /// Returns `None` when the chunk terminated no line (everything was
    /// added to the pending fragment) — no delivery should happen.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<Vec<u8>>> {
        self.partial.extend_from_slice(chunk);

        let last_nl = self.partial.iter().rposition(|&b| b == b'\n')?;
        let rest = self.partial.split_off(last_nl + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        // `complete` ends in '\n'; split yields a trailing empty slice
        // which is the (empty) new fragment, not a line.
        let mut lines: Vec<Vec<u8>> = complete.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect();
        lines.pop();
        Some(lines)
    }

    /// Flush at end of stream.
    ///
    /// Always returns a one-element batch holding the remaining
    /// fragment, which is an empty line when the stream ended in `\n`.
    pub fn finish(self) -> Vec<Vec<u8>> {
        vec![self.partial]
    }

    /// Bytes currently held back waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}

/// Rejoin a host-provided line list for a stdin write.
///
/// Lines are joined with `\n`; no `\n` is appended after the final
/// element, and the bytes are otherwise untouched.
pub fn join_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum::<usize>());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        out.extend_from_slice(line);
    }
    out
}
