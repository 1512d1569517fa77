//! Tokenizer integration
//!
//! Defines the [`Tokenizer`] trait and the byte-level BPE implementation.

mod bpe;
mod byte_level;
mod pretokenize;
mod stream;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::Result;

pub use bpe::BpeTokenizer;
pub use stream::IncrementalDecoder;

/// Trait for tokenizers that convert between text and token IDs.
///
/// Implementations are pure functions of their fixed tables: no hidden
/// state, so one instance can serve concurrent generation calls.
pub trait Tokenizer: Send + Sync {
    /// Encode text to token IDs.
    ///
    /// # Errors
    /// Returns a tokenization error if a sub-token has no vocabulary entry.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs to the raw bytes they stand for.
    ///
    /// # Errors
    /// Returns a tokenization error if an ID is outside the vocabulary.
    fn decode_bytes(&self, ids: &[u32]) -> Result<Vec<u8>>;

    /// Number of entries in the vocabulary.
    fn vocab_size(&self) -> usize;

    /// Get the end-of-sequence token ID.
    fn eos_token_id(&self) -> u32;

    /// Decode token IDs to text.
    ///
    /// # Errors
    /// Returns a tokenization error if an ID is outside the vocabulary.
    fn decode(&self, ids: &[u32]) -> Result<String> {
        let bytes = self.decode_bytes(ids)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode a single token ID to text.
    ///
    /// # Errors
    /// Returns a tokenization error if the ID is outside the vocabulary.
    fn decode_token(&self, id: u32) -> Result<String> {
        self.decode(&[id])
    }

    /// Number of tokens `text` encodes to.
    ///
    /// # Errors
    /// Returns a tokenization error if encoding fails.
    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }

    /// Every token ID used by the encodings of `words`.
    ///
    /// A banned phrase is suppressed by forbidding each of its tokens on its
    /// own, so tokens shared with harmless words are suppressed too.
    ///
    /// # Errors
    /// Returns a tokenization error if a word cannot be encoded.
    fn bad_word_tokens(&self, words: &[&str]) -> Result<BTreeSet<u32>> {
        let mut ids = BTreeSet::new();
        for word in words {
            ids.extend(self.encode(word)?);
        }
        Ok(ids)
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }

    fn decode_bytes(&self, ids: &[u32]) -> Result<Vec<u8>> {
        (**self).decode_bytes(ids)
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn eos_token_id(&self) -> u32 {
        (**self).eos_token_id()
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for Arc<T> {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }

    fn decode_bytes(&self, ids: &[u32]) -> Result<Vec<u8>> {
        (**self).decode_bytes(ids)
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn eos_token_id(&self) -> u32 {
        (**self).eos_token_id()
    }
}
