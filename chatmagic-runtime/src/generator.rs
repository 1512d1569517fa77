//! Token-by-token decoding loop
//!
//! The [`Generator`] drives a [`Model`] step by step: it encodes the prompt,
//! feeds the whole prompt with an empty cache on the first step, then feeds
//! one token at a time with the cache returned by the previous step. After
//! each step the next token is chosen (greedy or sampled), decoded, and
//! handed to a [`TokenSink`].

use std::collections::BTreeSet;

use chatmagic::{
    argmax, Error, GenerationParameters, IncrementalDecoder, LogitsProcessor, Model, Result,
    Tokenizer, DEFAULT_BAD_WORDS,
};
use rand::Rng;

/// Upper bound on the number of ids fed to the network in one step.
///
/// Longer prompts keep their most recent ids.
pub const HARD_MAX_INPUT_TOKENS: usize = 2000;

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Model produced the end-of-sequence token.
    Stop,
    /// Reached the token cap.
    Length,
    /// The sink asked to stop.
    Cancelled,
}

/// Receives each generated token.
///
/// Return `false` to stop generation after the current step. Closures over
/// the text alone are sinks too.
pub trait TokenSink {
    /// Called once per generated token with its id and newly completed text
    /// (possibly empty while a multi-byte character is still incomplete).
    fn on_token(&mut self, id: u32, text: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> TokenSink for F {
    fn on_token(&mut self, _id: u32, text: &str) -> bool {
        self(text)
    }
}

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated ids (prompt excluded), including a final end-of-sequence id.
    pub token_ids: Vec<u32>,
    /// Concatenated text of every generated token.
    pub text: String,
    pub finish_reason: FinishReason,
}

/// Mutable state of one in-flight call.
///
/// Owns the model cache: dropping the session frees every entry, whichever
/// way the call ends.
struct Session<C> {
    /// Ids for the next step
    window: Vec<u32>,
    /// One entry per hidden layer
    past: Vec<C>,
}

impl<C> Session<C> {
    fn advance(&mut self, next_token: u32, past: Vec<C>) {
        self.window.clear();
        self.window.push(next_token);
        // Old entries are released here, before the next step runs.
        self.past = past;
    }
}

/// Decoding loop over one loaded model.
///
/// A generator serves one call at a time: `generate` takes `&self`, but the
/// model's cache is only valid for the call that produced it, so concurrent
/// calls on one model must be serialized by the caller (the
/// [`Engine`](crate::Engine) does this with its worker thread).
pub struct Generator<M, T> {
    model: M,
    tokenizer: T,
    bad_word_tokens: BTreeSet<u32>,
}

impl<M: Model, T: Tokenizer> Generator<M, T> {
    /// Create a generator that suppresses [`DEFAULT_BAD_WORDS`].
    ///
    /// # Errors
    /// Returns a tokenization error if a banned phrase cannot be encoded.
    pub fn new(model: M, tokenizer: T) -> Result<Self> {
        Self::with_bad_words(model, tokenizer, DEFAULT_BAD_WORDS)
    }

    /// Create a generator with a custom banned-phrase list.
    ///
    /// # Errors
    /// Returns a tokenization error if a banned phrase cannot be encoded.
    pub fn with_bad_words(model: M, tokenizer: T, bad_words: &[&str]) -> Result<Self> {
        let bad_word_tokens = tokenizer.bad_word_tokens(bad_words)?;
        tracing::debug!(
            phrases = bad_words.len(),
            banned_tokens = bad_word_tokens.len(),
            "Built bad-word filter"
        );
        Ok(Self {
            model,
            tokenizer,
            bad_word_tokens,
        })
    }

    #[must_use]
    pub fn model(&self) -> &M {
        &self.model
    }

    #[must_use]
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Ids removed from the distribution whenever sampling.
    #[must_use]
    pub fn bad_word_tokens(&self) -> &BTreeSet<u32> {
        &self.bad_word_tokens
    }

    /// Generate a continuation of `prompt`, streaming each token to `sink`.
    ///
    /// Stops after a step when, in this order: the sink returns `false`,
    /// the token is the end-of-sequence id, or `step + 2 >= max_new_tokens`.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid, the prompt cannot be
    /// encoded, or a network step fails. The cache is released either way.
    pub fn generate<R, S>(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        rng: &mut R,
        sink: &mut S,
    ) -> Result<Completion>
    where
        R: Rng + ?Sized,
        S: TokenSink + ?Sized,
    {
        let prompt_ids = self.tokenizer.encode(prompt)?;
        self.generate_from_ids(&prompt_ids, params, rng, sink)
    }

    /// Like [`generate`](Self::generate), starting from encoded prompt ids.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid, the prompt is empty,
    /// or a network step fails. The cache is released either way.
    pub fn generate_from_ids<R, S>(
        &self,
        prompt_ids: &[u32],
        params: &GenerationParameters,
        rng: &mut R,
        sink: &mut S,
    ) -> Result<Completion>
    where
        R: Rng + ?Sized,
        S: TokenSink + ?Sized,
    {
        params.validate()?;
        if prompt_ids.is_empty() {
            return Err(Error::Generation("prompt encodes to no tokens".into()));
        }

        let mut session = self.prime(prompt_ids)?;
        let processor = LogitsProcessor::new(params);
        let eos = self.tokenizer.eos_token_id();

        // Prompt plus generated ids, for the repetition penalty.
        let mut seen: Vec<u32> = prompt_ids.to_vec();
        let mut token_ids = Vec::new();
        let mut text = String::new();
        let mut decoder = IncrementalDecoder::new();

        tracing::info!(
            prompt_tokens = prompt_ids.len(),
            max_new_tokens = params.max_new_tokens,
            do_sample = params.do_sample,
            "Starting generation"
        );

        let mut finish_reason = FinishReason::Length;
        for step in 0..params.max_new_tokens {
            let output = self
                .model
                .step(&session.window, &session.past)
                .map_err(|e| match e {
                    Error::Generation(_) => e,
                    other => Error::Generation(format!("network step failed: {other}")),
                })?;
            if output.past.len() != session.past.len() {
                return Err(Error::Generation(format!(
                    "network returned {} cache entries, expected {}",
                    output.past.len(),
                    session.past.len()
                )));
            }

            let scores = output.next_token_scores()?;
            let next_token = if params.do_sample {
                let mut scores = scores.to_vec();
                processor.sample(&mut scores, &seen, &self.bad_word_tokens, rng)?
            } else {
                let index = argmax(scores)
                    .ok_or_else(|| Error::Generation("network returned no scores".into()))?;
                u32::try_from(index)
                    .map_err(|_| Error::Generation(format!("token index {index} overflows u32")))?
            };

            session.advance(next_token, output.past);

            let fragment = decoder.push(&self.tokenizer.decode_bytes(&[next_token])?);
            text.push_str(&fragment);
            seen.push(next_token);
            token_ids.push(next_token);
            tracing::trace!(step, token = next_token, "Generated token");

            if !sink.on_token(next_token, &fragment) {
                finish_reason = FinishReason::Cancelled;
                break;
            }
            if next_token == eos {
                finish_reason = FinishReason::Stop;
                break;
            }
            if step + 2 >= params.max_new_tokens {
                finish_reason = FinishReason::Length;
                break;
            }
        }
        drop(session);

        text.push_str(&decoder.finish());
        tracing::info!(
            ?finish_reason,
            generated_tokens = token_ids.len(),
            "Generation finished"
        );

        Ok(Completion {
            token_ids,
            text,
            finish_reason,
        })
    }

    /// Build the first step's input: the prompt window and an empty cache.
    fn prime(&self, prompt_ids: &[u32]) -> Result<Session<M::Cache>> {
        let start = prompt_ids.len().saturating_sub(HARD_MAX_INPUT_TOKENS);
        if start > 0 {
            tracing::warn!(
                prompt_tokens = prompt_ids.len(),
                kept = HARD_MAX_INPUT_TOKENS,
                "Prompt exceeds the input ceiling, keeping the most recent tokens"
            );
        }

        let config = self.model.config();
        let shape = config.empty_cache_shape();
        let past = (0..config.num_hidden_layers)
            .map(|_| self.model.zeroed_cache(&shape))
            .collect::<Result<Vec<_>>>()?;

        Ok(Session {
            window: prompt_ids[start..].to_vec(),
            past,
        })
    }
}
