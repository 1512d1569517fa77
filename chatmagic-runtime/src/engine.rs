//! Worker-thread inference engine
//!
//! The [`Engine`] owns a [`Generator`] on a long-lived worker thread.
//! Callers submit generation requests via [`Engine::submit`] and receive
//! tokens through a [`TokenSender`] implementation of their choice. The
//! worker runs requests one after another, so a loaded model never has two
//! calls in flight.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use chatmagic::{GenerationParameters, Model, Result, Tokenizer};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::generator::{Completion, Generator, TokenSink};

/// An event produced by the engine during generation.
///
/// Sent through a single channel so ordering is guaranteed:
/// zero or more `Token`s, then exactly one terminal event
/// (`Finished` or `Error`).
#[derive(Debug)]
pub enum GenerationEvent {
    /// A newly generated token and its text.
    Token { id: u32, text: String },
    /// An error occurred during generation.
    Error(chatmagic::Error),
    /// Generation completed.
    Finished(Completion),
}

/// Trait for sending generation events from the engine to the caller.
///
/// Return `false` to signal that the receiver has been dropped and
/// generation should stop.
pub trait TokenSender: Send {
    /// Send a generation event to the receiver.
    ///
    /// Returns `false` if the receiver has been dropped, signalling the
    /// engine to abort generation early.
    fn send(&self, event: GenerationEvent) -> bool;
}

impl TokenSender for mpsc::Sender<GenerationEvent> {
    fn send(&self, event: GenerationEvent) -> bool {
        mpsc::Sender::send(self, event).is_ok()
    }
}

impl TokenSender for mpsc::SyncSender<GenerationEvent> {
    fn send(&self, event: GenerationEvent) -> bool {
        mpsc::SyncSender::send(self, event).is_ok()
    }
}

/// A generation request submitted to the engine's worker thread.
struct GenerationRequest {
    prompt: String,
    params: GenerationParameters,
    /// Fixed seed for reproducible sampling; `None` seeds from the OS.
    seed: Option<u64>,
    token_tx: Box<dyn TokenSender>,
}

/// Forwards each generated token to the request's sender.
struct EventSink<'a> {
    tx: &'a dyn TokenSender,
}

impl TokenSink for EventSink<'_> {
    fn on_token(&mut self, id: u32, text: &str) -> bool {
        self.tx.send(GenerationEvent::Token {
            id,
            text: text.to_string(),
        })
    }
}

/// Handle to the engine's worker thread.
///
/// Dropping the engine closes the request channel; the worker finishes the
/// request in progress and exits.
pub struct Engine {
    request_tx: mpsc::Sender<GenerationRequest>,
    _worker: JoinHandle<()>,
}

impl Engine {
    /// Spawn the worker thread that owns `generator`.
    pub fn new<M, T>(generator: Generator<M, T>) -> Self
    where
        M: Model + Send + 'static,
        T: Tokenizer + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<GenerationRequest>();

        let worker = thread::spawn(move || {
            worker_loop(&generator, &request_rx);
        });

        Self {
            request_tx,
            _worker: worker,
        }
    }

    /// Submit a generation request with a caller-provided token sender.
    ///
    /// Tokens are sent through `token_tx` as they are generated. Generation
    /// stops at the end-of-sequence token, at the token cap, or when the
    /// sender returns `false` (receiver dropped).
    pub fn submit(
        &self,
        prompt: impl Into<String>,
        params: GenerationParameters,
        seed: Option<u64>,
        token_tx: impl TokenSender + 'static,
    ) {
        let request = GenerationRequest {
            prompt: prompt.into(),
            params,
            seed,
            token_tx: Box::new(token_tx),
        };
        // If the worker thread has panicked, the send fails and the
        // receiver sees the channel close.
        let _ = self.request_tx.send(request);
    }

    /// Generate a completion, blocking until it is done.
    ///
    /// # Errors
    /// Returns an error if generation fails or the worker has gone away.
    pub fn generate(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        seed: Option<u64>,
    ) -> Result<Completion> {
        self.generate_stream(prompt, params, seed, |rx| {
            for event in rx {
                match event {
                    GenerationEvent::Token { .. } => {}
                    GenerationEvent::Error(e) => return Err(e),
                    GenerationEvent::Finished(completion) => return Ok(completion),
                }
            }
            Err(chatmagic::Error::Generation(
                "engine worker stopped before finishing".into(),
            ))
        })
    }

    /// Generate with streaming via a channel.
    ///
    /// The provided `consumer` closure receives a [`mpsc::Receiver`] and is
    /// called on the current thread while tokens are being produced by the
    /// engine's worker thread. Dropping the receiver cancels the request at
    /// the next step.
    pub fn generate_stream<F, R>(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        seed: Option<u64>,
        consumer: F,
    ) -> R
    where
        F: FnOnce(mpsc::Receiver<GenerationEvent>) -> R,
    {
        let (tx, rx) = mpsc::channel();
        self.submit(prompt, *params, seed, tx);
        consumer(rx)
    }
}

/// The worker thread's main loop. Processes requests sequentially.
fn worker_loop<M: Model, T: Tokenizer>(
    generator: &Generator<M, T>,
    request_rx: &mpsc::Receiver<GenerationRequest>,
) {
    while let Ok(request) = request_rx.recv() {
        process(generator, &request);
    }
    tracing::debug!("Engine request channel closed, worker exiting");
}

fn process<M: Model, T: Tokenizer>(generator: &Generator<M, T>, request: &GenerationRequest) {
    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut sink = EventSink {
        tx: &*request.token_tx,
    };

    match generator.generate(&request.prompt, &request.params, &mut rng, &mut sink) {
        Ok(completion) => {
            let _ = request.token_tx.send(GenerationEvent::Finished(completion));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Generation request failed");
            let _ = request.token_tx.send(GenerationEvent::Error(e));
        }
    }
}
