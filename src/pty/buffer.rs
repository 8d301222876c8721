//! Append-only output buffer with a forward-only consumption cursor.
//!
//! Offsets handed out by [`OutputBuffer`] are absolute positions in the
//! shell's output stream. Consumed bytes may be released to bound memory,
//! but the absolute offsets keep counting from the start of the session.

/// Consumed bytes are released once at least this many have piled up.
const COMPACT_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: Vec<u8>,
    /// Index into `data` of the first unconsumed byte
    cursor: usize,
    /// Absolute stream offset of `data[0]`
    base: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read output.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Output that no expectation has consumed yet.
    pub fn unconsumed(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    /// Lossy UTF-8 rendering of [`unconsumed`](Self::unconsumed).
    pub fn unconsumed_text(&self) -> String {
        String::from_utf8_lossy(self.unconsumed()).into_owned()
    }

    /// Absolute offset of the first unconsumed byte.
    pub fn consumed_offset(&self) -> usize {
        self.base + self.cursor
    }

    /// Absolute number of bytes received so far.
    pub fn total_len(&self) -> usize {
        self.base + self.data.len()
    }

    /// Advance the cursor by `len` bytes past its current position.
    ///
    /// Returns the absolute range that was consumed. `len` is clamped to the
    /// unconsumed length so the cursor can never overtake the data.
    pub fn consume(&mut self, len: usize) -> std::ops::Range<usize> {
        let len = len.min(self.data.len() - self.cursor);
        let start = self.consumed_offset();
        self.cursor += len;
        if self.cursor >= COMPACT_THRESHOLD {
            self.compact();
        }
        start..start + len
    }

    fn compact(&mut self) {
        self.data.drain(..self.cursor);
        self.base += self.cursor;
        self.cursor = 0;
    }
}
