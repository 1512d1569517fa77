//! Chatmagic: on-device chat text generation
//!
//! This crate provides the core types and algorithms: byte-level BPE
//! tokenization, logits processing, budgeted prompt assembly, and the
//! [`Model`] step trait the decoding loop drives. The decoding loop itself
//! lives in `chatmagic-runtime`.

pub mod chat_formatter;
pub mod config;
pub mod error;
pub mod logits;
pub mod model;
pub mod sampling;
pub mod tensor;
pub mod tokenizer;

pub use chat_formatter::{
    ChatFormatter, ChatMessage, ChatTemplate, ConvPairTemplate, FormatterConfig,
    FormatterTemplate, MessageBudget, TurnBasedTemplate, FALLBACK_MESSAGE,
};
pub use config::{BundleConfig, TokenizerConfig, DEFAULT_BAD_WORDS};
pub use error::{Error, Result};
pub use logits::{argmax, multinomial, softmax, LogitsProcessor};
pub use model::{Model, ModelRuntimeConfig, StepOutput, EMPTY_PAST_SEQ_LEN};
pub use sampling::GenerationParameters;
pub use tensor::{HostTensor, Tensor};
pub use tokenizer::{BpeTokenizer, IncrementalDecoder, Tokenizer};
