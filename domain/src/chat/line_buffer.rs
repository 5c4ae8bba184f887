//! Accumulates socket bytes and yields complete protocol lines.

/// Unbounded byte accumulator split on line terminators.
///
/// A line is complete once a `\n` has arrived; a preceding `\r` is
/// stripped. Bytes after the last terminator stay buffered until more data
/// arrives. Lines are decoded lossily as UTF-8.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Push a chunk and drain every complete line it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.extend(chunk);
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
