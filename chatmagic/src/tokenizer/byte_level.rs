//! GPT-2 byte-to-unicode mapping
//!
//! Every byte is given a printable unicode stand-in so vocabulary entries
//! are plain strings: printable Latin-1 bytes map to themselves, the rest
//! are shifted to U+0100 and up (space becomes `Ġ`, newline `Ċ`).

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct ByteLevel {
    encoder: [char; 256],
    decoder: HashMap<char, u8>,
}

impl ByteLevel {
    pub(crate) fn new() -> Self {
        let encoder = bytes_to_unicode();
        #[allow(clippy::cast_possible_truncation)]
        let decoder = encoder
            .iter()
            .enumerate()
            .map(|(byte, &ch)| (ch, byte as u8))
            .collect();
        Self { encoder, decoder }
    }

    pub(crate) fn symbol(&self, byte: u8) -> char {
        self.encoder[usize::from(byte)]
    }

    /// Map each UTF-8 byte of `text` to its stand-in symbol.
    pub(crate) fn encode(&self, text: &str) -> String {
        text.bytes().map(|b| self.symbol(b)).collect()
    }

    /// Map stand-in symbols back to bytes.
    ///
    /// Characters outside the table (e.g. hand-added special tokens) pass
    /// through as their own UTF-8 encoding.
    pub(crate) fn decode_into(&self, symbols: &str, out: &mut Vec<u8>) {
        for ch in symbols.chars() {
            if let Some(&b) = self.decoder.get(&ch) {
                out.push(b);
            } else {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn bytes_to_unicode() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for byte in 0..=255u8 {
        let printable = matches!(byte, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        table[usize::from(byte)] = if printable {
            char::from(byte)
        } else {
            let ch = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
            shifted += 1;
            ch
        };
    }
    table
}
