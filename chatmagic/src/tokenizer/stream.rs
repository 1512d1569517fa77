//! Streaming decode of byte-level tokens.

/// Turns per-token byte chunks into text fragments.
///
/// Byte-level BPE can split a multi-byte character across tokens. The
/// decoder holds back an incomplete UTF-8 tail until the bytes that finish
/// it arrive, so each emitted fragment is valid text. Invalid sequences are
/// replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct IncrementalDecoder {
    pending: Vec<u8>,
}

impl IncrementalDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the bytes of the next token and return the text that became
    /// complete (possibly empty).
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Bytes still waiting for the rest of their character.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Flush whatever is held back, replacing an unfinished character.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_straight_through() {
        let mut dec = IncrementalDecoder::new();
        assert_eq!(dec.push(b"Hello"), "Hello");
        assert_eq!(dec.push(b" world"), " world");
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn split_character_is_held_back() {
        let bytes = "é".as_bytes();
        let mut dec = IncrementalDecoder::new();
        assert_eq!(dec.push(&bytes[..1]), "");
        assert_eq!(dec.pending(), &bytes[..1]);
        assert_eq!(dec.push(&bytes[1..]), "é");
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn invalid_byte_is_replaced() {
        let mut dec = IncrementalDecoder::new();
        assert_eq!(dec.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn finish_flushes_unfinished_character() {
        let mut dec = IncrementalDecoder::new();
        assert_eq!(dec.push(&"日".as_bytes()[..2]), "");
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert!(dec.pending().is_empty());
    }
}
