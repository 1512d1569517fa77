//! Chat-level inference runtime
//!
//! The [`Runtime`] wraps an [`Engine`], a [`ChatFormatter`] and the shared
//! [`Tokenizer`], providing a conversation-in, reply-out interface.

use std::sync::mpsc;
use std::sync::Arc;

use chatmagic::{
    BpeTokenizer, BundleConfig, ChatFormatter, ChatMessage, GenerationParameters, Model, Result,
    Tokenizer,
};

use crate::engine::GenerationEvent;
use crate::generator::{Completion, FinishReason, Generator};
use crate::Engine;

/// Markers that end a reply even before the end-of-sequence token.
const STOP_MARKERS: [&str; 2] = ["<|", "endoftext"];

/// Tidy raw model output for display.
///
/// Cuts at the first `<|` (start of a special token), drops non-ASCII
/// characters, trims whitespace and removes one dangling `<`.
#[must_use]
pub fn clean_response(text: &str) -> String {
    let head = text.split("<|").next().unwrap_or_default();
    let ascii: String = head.chars().filter(char::is_ascii).collect();
    let trimmed = ascii.trim();
    trimmed.strip_suffix('<').unwrap_or(trimmed).to_string()
}

/// Chat-level inference runtime.
///
/// Each Runtime instance serves one model.
pub struct Runtime<T: Tokenizer> {
    engine: Engine,
    tokenizer: Arc<T>,
    formatter: ChatFormatter,
}

impl<T: Tokenizer + 'static> Runtime<T> {
    /// Create a runtime from a model, tokenizer, formatter and banned-phrase
    /// list.
    ///
    /// # Errors
    /// Returns a tokenization error if a banned phrase cannot be encoded.
    pub fn new<M: Model + Send + 'static>(
        model: M,
        tokenizer: T,
        formatter: ChatFormatter,
        bad_words: &[&str],
    ) -> Result<Self> {
        let tokenizer = Arc::new(tokenizer);
        let generator = Generator::with_bad_words(model, Arc::clone(&tokenizer), bad_words)?;
        Ok(Self {
            engine: Engine::new(generator),
            tokenizer,
            formatter,
        })
    }

    /// Get a reference to the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a reference to the tokenizer.
    #[must_use]
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    #[must_use]
    pub fn formatter(&self) -> &ChatFormatter {
        &self.formatter
    }

    /// Assemble the prompt for the next reply.
    ///
    /// # Errors
    /// Returns a tokenization error if a message cannot be encoded.
    pub fn prepare_prompt(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = self.formatter.prepare_prompt(messages, &*self.tokenizer)?;
        Ok(prompt.trim().to_string())
    }

    /// Generate the next reply, blocking until complete.
    ///
    /// # Returns
    /// The cleaned reply text (see [`clean_response`]).
    ///
    /// # Errors
    /// Returns an error if tokenization or generation fails.
    pub fn reply(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParameters,
        seed: Option<u64>,
    ) -> Result<String> {
        let completion = self.reply_stream(messages, params, seed, |_| true)?;
        Ok(clean_response(&completion.text))
    }

    /// Generate the next reply, streaming the cleaned text so far.
    ///
    /// `on_update` is called after every token with the cleaned reply
    /// accumulated so far; returning `false` stops generation. A special
    /// token marker in the output also stops it.
    ///
    /// # Returns
    /// The raw completion. A reply stopped early by the caller or by a
    /// marker reports [`FinishReason::Cancelled`].
    ///
    /// # Errors
    /// Returns an error if tokenization or generation fails.
    pub fn reply_stream<F>(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParameters,
        seed: Option<u64>,
        mut on_update: F,
    ) -> Result<Completion>
    where
        F: FnMut(&str) -> bool,
    {
        let prompt = self.prepare_prompt(messages)?;
        let eos = self.tokenizer.eos_token_id();
        tracing::debug!(prompt_chars = prompt.len(), "Prepared chat prompt");

        self.engine
            .generate_stream(&prompt, params, seed, |rx: mpsc::Receiver<GenerationEvent>| {
                let mut token_ids = Vec::new();
                let mut text = String::new();
                for event in rx {
                    match event {
                        GenerationEvent::Token { id, text: fragment } => {
                            token_ids.push(id);
                            text.push_str(&fragment);
                            let keep_going = on_update(&clean_response(&text));
                            // The end-of-sequence token is followed by `Finished`.
                            if id != eos
                                && (!keep_going || STOP_MARKERS.iter().any(|m| text.contains(m)))
                            {
                                tracing::debug!(token = id, "Reply stopped early");
                                // Dropping the receiver cancels the request.
                                return Ok(Completion {
                                    token_ids,
                                    text,
                                    finish_reason: FinishReason::Cancelled,
                                });
                            }
                        }
                        GenerationEvent::Error(e) => return Err(e),
                        GenerationEvent::Finished(completion) => return Ok(completion),
                    }
                }
                Err(chatmagic::Error::Generation(
                    "engine worker stopped before finishing".into(),
                ))
            })
    }
}

impl Runtime<BpeTokenizer> {
    /// Create a runtime from a model bundle.
    ///
    /// # Errors
    /// Returns a configuration error if the tokenizer tables are invalid or
    /// `formatter` names no formatter in the bundle.
    pub fn from_bundle<M: Model + Send + 'static>(
        model: M,
        bundle: &BundleConfig,
        formatter: &str,
    ) -> Result<Self> {
        let tokenizer = bundle.tokenizer()?;
        let formatter = bundle.formatter(formatter)?;
        Self::new(model, tokenizer, formatter, &bundle.bad_words())
    }
}
