//! Byte-level BPE tokenizer built from a vocabulary and an ordered merge list

use std::collections::HashMap;
use std::path::Path;

use super::byte_level::ByteLevel;
use super::pretokenize::split_words;
use super::Tokenizer;
use crate::config::TokenizerConfig;
use crate::{Error, Result};

/// GPT-2 style byte-level BPE tokenizer.
///
/// Encoding splits text into word-like units, maps each byte to its
/// printable stand-in, then repeatedly merges the adjacent pair with the
/// lowest rank until no ranked pair is left. Vocabulary strings carry their
/// own leading-space markers (`Ġ`), so decoding is plain concatenation.
#[derive(Debug, Clone)]
pub struct BpeTokenizer {
    /// Token string → ID
    encoder: HashMap<String, u32>,
    /// ID → token string; every ID in `[0, len)` is present
    decoder: Vec<String>,
    /// left → right → rank (lower = merge earlier)
    bpe_ranks: HashMap<String, HashMap<String, u32>>,
    byte_level: ByteLevel,
    eos_token_id: u32,
}

impl BpeTokenizer {
    /// Build a tokenizer from a vocabulary and merge rules in rank order.
    ///
    /// The position of a rule in `merges` is its rank. If a pair is listed
    /// twice, the later position wins.
    ///
    /// # Errors
    /// Returns a configuration error if the vocabulary is not a bijection
    /// over `[0, vocab_size)` or `eos_token_id` is outside it.
    pub fn new<I>(vocab: HashMap<String, u32>, merges: I, eos_token_id: u32) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut decoder: Vec<Option<String>> = vec![None; vocab.len()];
        for (token, &id) in &vocab {
            let slot = decoder.get_mut(id as usize).ok_or_else(|| {
                Error::Configuration(format!(
                    "token {token:?} has id {id}, outside vocabulary of size {}",
                    vocab.len()
                ))
            })?;
            if let Some(existing) = slot {
                return Err(Error::Configuration(format!(
                    "tokens {existing:?} and {token:?} share id {id}"
                )));
            }
            *slot = Some(token.clone());
        }
        // With no duplicates and every id in range, every slot is filled.
        let decoder: Vec<String> = decoder.into_iter().flatten().collect();

        if eos_token_id as usize >= decoder.len() {
            return Err(Error::Configuration(format!(
                "eos_token_id {eos_token_id} is outside vocabulary of size {}",
                decoder.len()
            )));
        }

        let mut bpe_ranks: HashMap<String, HashMap<String, u32>> = HashMap::new();
        let mut num_merges = 0u32;
        for (rank, (left, right)) in merges.into_iter().enumerate() {
            let rank = u32::try_from(rank)
                .map_err(|_| Error::Configuration("too many merge rules".into()))?;
            bpe_ranks.entry(left).or_default().insert(right, rank);
            num_merges = rank + 1;
        }

        tracing::debug!(
            vocab_size = decoder.len(),
            num_merges,
            "Loaded BPE tokenizer"
        );

        Ok(Self {
            encoder: vocab,
            decoder,
            bpe_ranks,
            byte_level: ByteLevel::new(),
            eos_token_id,
        })
    }

    /// Build a tokenizer from the `tokenizer` block of a model bundle.
    ///
    /// # Errors
    /// Returns a configuration error if a merge rule is malformed or the
    /// vocabulary is inconsistent.
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        let merges = config
            .model
            .merges
            .iter()
            .map(|rule| rule.to_pair())
            .collect::<Result<Vec<_>>>()?;
        Self::new(config.model.vocab.clone(), merges, config.eos_token_id)
    }

    /// Load a tokenizer from a Hugging Face style `tokenizer.json` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TokenizerConfig = serde_json::from_str(&content)?;
        Self::from_config(&config)
    }

    /// Rank of the merge `left + right`, if the pair is mergeable.
    #[must_use]
    pub fn merge_rank(&self, left: &str, right: &str) -> Option<u32> {
        self.bpe_ranks.get(left)?.get(right).copied()
    }

    /// Look up the ID of a vocabulary string.
    #[must_use]
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.encoder.get(token).copied()
    }

    /// Look up the vocabulary string of an ID.
    #[must_use]
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.decoder.get(id as usize).map(String::as_str)
    }

    /// Apply the merge loop to one byte-mapped unit.
    fn bpe(&self, unit: &str) -> Vec<String> {
        let mut symbols: Vec<String> = unit.chars().map(String::from).collect();

        while symbols.len() > 1 {
            let best = symbols
                .windows(2)
                .enumerate()
                .filter_map(|(i, pair)| self.merge_rank(&pair[0], &pair[1]).map(|r| (r, i)))
                .min();
            let Some((_, idx)) = best else {
                break;
            };

            let first = symbols[idx].clone();
            let second = symbols[idx + 1].clone();
            let mut merged = Vec::with_capacity(symbols.len() - 1);
            let mut i = 0;
            while i < symbols.len() {
                if i + 1 < symbols.len() && symbols[i] == first && symbols[i + 1] == second {
                    merged.push(format!("{first}{second}"));
                    i += 2;
                } else {
                    merged.push(std::mem::take(&mut symbols[i]));
                    i += 1;
                }
            }
            symbols = merged;
        }

        symbols
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for unit in split_words(text) {
            let mapped = self.byte_level.encode(unit);
            for piece in self.bpe(&mapped) {
                let id = self.encoder.get(&piece).copied().ok_or_else(|| {
                    Error::Tokenization(format!(
                        "sub-token {piece:?} (from {unit:?}) is not in the vocabulary"
                    ))
                })?;
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn decode_bytes(&self, ids: &[u32]) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for &id in ids {
            let token = self.decoder.get(id as usize).ok_or_else(|| {
                Error::Tokenization(format!(
                    "token id {id} is outside vocabulary of size {}",
                    self.decoder.len()
                ))
            })?;
            self.byte_level.decode_into(token, &mut bytes);
        }
        Ok(bytes)
    }

    fn vocab_size(&self) -> usize {
        self.decoder.len()
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}
