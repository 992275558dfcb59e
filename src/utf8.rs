//! Incremental UTF-8 decoding.
//!
//! Decoding is permissive: lead bytes select the sequence length and
//! continuation bytes contribute their low six bits, with no check for
//! overlong encodings, surrogates or stray continuation bytes. Values that
//! are not Unicode scalar values are rejected one layer up, by the tokenizer.

/// Decodes scalar values out of a window of bytes that is replaced on every
/// [`feed`](Utf8Decoder::feed). A sequence cut off at the end of a window is
/// stashed and completed by the bytes of the next window.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    window: Vec<u8>,
    cursor: usize,
    partial: u32,
    remaining: u8,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current window. Unread bytes of the previous window are
    /// dropped; a partially decoded value is kept.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.window.clear();
        self.window.extend_from_slice(bytes);
        self.cursor = 0;
    }

    /// Returns the next decoded value, or `None` when the window is used up
    /// (possibly in the middle of a multi-byte sequence).
    pub fn next_scalar(&mut self) -> Option<u32> {
        let (mut scalar, mut remaining) = if self.remaining > 0 {
            (self.partial, self.remaining)
        } else {
            let lead = *self.window.get(self.cursor)?;
            self.cursor += 1;
            match lead {
                0x00..=0x7F => (u32::from(lead), 0),
                0x80..=0xDF => (u32::from(lead & 0x1F), 1),
                0xE0..=0xEF => (u32::from(lead & 0x0F), 2),
                _ => (u32::from(lead & 0x07), 3),
            }
        };
        self.remaining = 0;

        while remaining > 0 {
            let Some(&byte) = self.window.get(self.cursor) else {
                self.partial = scalar;
                self.remaining = remaining;
                return None;
            };
            self.cursor += 1;
            scalar = (scalar << 6) | u32::from(byte & 0x3F);
            remaining -= 1;
        }

        Some(scalar)
    }

    /// Whether a sequence is waiting for continuation bytes.
    pub fn has_partial(&self) -> bool {
        self.remaining > 0
    }

    /// Unread bytes left in the current window.
    pub fn pending_bytes(&self) -> usize {
        self.window.len() - self.cursor
    }

    /// Forgets any stashed partial sequence and unread bytes.
    pub fn reset(&mut self) {
        self.window.clear();
        self.cursor = 0;
        self.partial = 0;
        self.remaining = 0;
    }
}
