//! UTF-8 assembly for token-by-token decoding.
//!
//! Token boundaries do not align with character boundaries: a rank's byte
//! image may end in the middle of a multi-byte code point. [`Utf8Assembler`]
//! buffers the undecoded tail and only ever releases complete, valid UTF-8,
//! which is what lets the streaming parser expose a content delta after
//! every token without ever exposing a torn character.

/// Accumulates decoded bytes and releases the longest complete UTF-8 prefix.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    buffer: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(16),
        }
    }

    /// Append bytes and return every newly completed character.
    ///
    /// The returned string is empty while the buffered bytes are still an
    /// incomplete sequence.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        self.buffer.extend_from_slice(bytes);

        let valid_len = self.valid_prefix_len();
        if valid_len == 0 {
            return String::new();
        }

        let valid: Vec<u8> = self.buffer.drain(..valid_len).collect();
        // Just validated by `valid_prefix_len`.
        unsafe { String::from_utf8_unchecked(valid) }
    }

    /// Whether bytes are still waiting for a sequence to complete.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Number of buffered bytes.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Length of the longest valid UTF-8 prefix of the buffer, allowing for
    /// an incomplete multi-byte sequence at the end.
    fn valid_prefix_len(&self) -> usize {
        let bytes = &self.buffer;
        let len = bytes.len();
        if len == 0 {
            return 0;
        }

        if std::str::from_utf8(bytes).is_ok() {
            return len;
        }

        // UTF-8 sequences are at most 4 bytes, so at most the last 3 bytes
        // can be a sequence still waiting for its continuation.
        for incomplete_len in 1..=3.min(len) {
            let check_len = len - incomplete_len;
            if check_len == 0 {
                continue;
            }
            if std::str::from_utf8(&bytes[..check_len]).is_ok()
                && could_be_incomplete_sequence(&bytes[check_len..])
            {
                return check_len;
            }
        }

        // Invalid bytes in the middle: release the longest valid prefix and
        // leave the rest pending.
        for i in (0..len).rev() {
            if std::str::from_utf8(&bytes[..=i]).is_ok() {
                return i + 1;
            }
        }

        0
    }
}

/// Whether `bytes` could be the start of a not-yet-complete UTF-8 sequence.
fn could_be_incomplete_sequence(bytes: &[u8]) -> bool {
    let Some(&first) = bytes.first() else {
        return false;
    };
    match first {
        // 2-byte sequence: 110xxxxx
        0xC0..=0xDF => bytes.len() < 2,
        // 3-byte sequence: 1110xxxx
        0xE0..=0xEF => bytes.len() < 3,
        // 4-byte sequence: 11110xxx
        0xF0..=0xF7 => bytes.len() < 4,
        // Continuation byte or invalid lead byte.
        _ => false,
    }
}
