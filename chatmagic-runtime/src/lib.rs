//! Chatmagic Runtime: conversation in, reply out
//!
//! This crate provides the [`Generator`] (decoding loop), the [`Engine`]
//! (worker thread serializing calls against one model) and the [`Runtime`]
//! (chat-level interface).
//!
//! # Architecture
//!
//! ```text
//! Runtime<T>             ← conversation in, reply out (owns Engine + ChatFormatter)
//!   └── Engine           ← prompt in, token events out (worker thread)
//!         └── Generator<M, T>  ← decoding loop (owns Model + Tokenizer)
//!               └── M: Model   ← network step only
//! ```

mod engine;
mod generator;
mod runtime;

pub use engine::{Engine, GenerationEvent, TokenSender};
pub use generator::{Completion, FinishReason, Generator, TokenSink, HARD_MAX_INPUT_TOKENS};
pub use runtime::{clean_response, Runtime};
