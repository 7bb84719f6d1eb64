//! Newline framing for the device byte stream

pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest line (in bytes, terminator excluded) the framer will buffer.
/// Device lines are well under 64 bytes; anything past this is line noise.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Splits a byte stream into trimmed text lines, keeping the unterminated
/// tail between calls.
///
/// Lines longer than `max_line_len` are dropped whole. Once the pending tail
/// outgrows the limit the framer skips bytes up to the next terminator, so the
/// outcome depends only on the line itself and not on how reads were chunked.
#[derive(Debug)]
pub struct LineFramer {
    tail: Vec<u8>,
    max_line_len: usize,
    discarding: bool,
    oversized_dropped: u64,
    decode_errors: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            tail: Vec::new(),
            max_line_len: max_line_len.max(1),
            discarding: false,
            oversized_dropped: 0,
            decode_errors: 0,
        }
    }

    /// Append `bytes` and return every line completed by them, in order
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == LINE_TERMINATOR) {
            let segment = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                // already counted when the tail overflowed
                self.discarding = false;
                continue;
            }
            if self.tail.len() + segment.len() > self.max_line_len {
                self.tail.clear();
                self.note_oversized();
                continue;
            }

            self.tail.extend_from_slice(segment);
            let raw = std::mem::take(&mut self.tail);
            lines.push(self.decode(raw));
        }

        if !self.discarding && !rest.is_empty() {
            if self.tail.len() + rest.len() > self.max_line_len {
                self.tail.clear();
                self.discarding = true;
                self.note_oversized();
            } else {
                self.tail.extend_from_slice(rest);
            }
        }

        lines
    }

    /// Forget any partial line, e.g. after reopening the port
    pub fn reset(&mut self) {
        self.tail.clear();
        self.discarding = false;
    }

    /// Bytes received since the last terminator
    pub fn pending(&self) -> &[u8] {
        &self.tail
    }

    pub fn oversized_dropped(&self) -> u64 {
        self.oversized_dropped
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    fn decode(&mut self, raw: Vec<u8>) -> String {
        match String::from_utf8(raw) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                self.decode_errors += 1;
                String::from_utf8_lossy(e.as_bytes()).trim().to_string()
            }
        }
    }

    fn note_oversized(&mut self) {
        self.oversized_dropped += 1;
        log::warn!("Dropped line longer than {} bytes", self.max_line_len);
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
