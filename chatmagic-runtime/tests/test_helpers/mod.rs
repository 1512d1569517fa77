//! Shared helpers for generation tests.
//!
//! Provides a byte-per-token tokenizer and a scripted network whose cache
//! entries count themselves, so tests can check that every buffer is
//! released.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chatmagic::{
    BpeTokenizer, Error, GenerationParameters, HostTensor, Model, ModelRuntimeConfig, Result,
    StepOutput,
};

pub const EOS: u32 = 0;

/// GPT-2 stand-in symbol for a byte.
fn byte_symbol(byte: u8) -> char {
    let mut shifted = 0u32;
    for b in 0..=255u8 {
        let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        if b == byte {
            return if printable {
                char::from(b)
            } else {
                char::from_u32(256 + shifted).expect("valid stand-in")
            };
        }
        if !printable {
            shifted += 1;
        }
    }
    unreachable!()
}

/// A tokenizer with `<|endoftext|>` at id 0 and one token per byte after
/// it, with no merges: every string encodes to one id per UTF-8 byte.
pub fn byte_tokenizer() -> BpeTokenizer {
    let mut vocab = HashMap::from([("<|endoftext|>".to_string(), EOS)]);
    for byte in 0..=255u8 {
        vocab.insert(byte_symbol(byte).to_string(), token(byte));
    }
    BpeTokenizer::new(vocab, Vec::<(String, String)>::new(), EOS)
        .expect("byte tokenizer is consistent")
}

/// Id of a byte in [`byte_tokenizer`].
pub fn token(byte: u8) -> u32 {
    u32::from(byte) + 1
}

/// Ids spelling `text` in [`byte_tokenizer`].
pub fn tokens(text: &str) -> Vec<u32> {
    text.bytes().map(token).collect()
}

pub const VOCAB_SIZE: usize = 257;

pub fn small_config() -> ModelRuntimeConfig {
    ModelRuntimeConfig {
        num_attention_heads: 2,
        num_hidden_layers: 3,
        hidden_size: 8,
    }
}

pub fn greedy(max_new_tokens: usize) -> GenerationParameters {
    GenerationParameters::greedy(max_new_tokens)
}

pub fn sampled(max_new_tokens: usize) -> GenerationParameters {
    GenerationParameters {
        do_sample: true,
        temperature: 0.8,
        top_k: 8,
        top_p: 0.95,
        repetition_penalty: 1.1,
        max_new_tokens,
    }
}

/// A cache entry that tracks how many entries are alive.
#[derive(Debug)]
pub struct CountedCache {
    pub shape: Vec<usize>,
    live: Arc<AtomicUsize>,
}

impl CountedCache {
    fn new(live: &Arc<AtomicUsize>, shape: &[usize]) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            shape: shape.to_vec(),
            live: Arc::clone(live),
        }
    }
}

impl Drop for CountedCache {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What the network saw on each step.
#[derive(Debug, Default)]
pub struct Record {
    /// Input ids of every step
    pub windows: Vec<Vec<u32>>,
    /// Live cache entries when each step started
    pub live_at_step: Vec<usize>,
    /// Shape of the first past entry handed to each step
    pub past_shapes: Vec<Vec<usize>>,
}

/// Handle for inspecting a [`ScriptedModel`] after it has been moved.
#[derive(Debug, Clone)]
pub struct Probe {
    live: Arc<AtomicUsize>,
    record: Arc<Mutex<Record>>,
}

impl Probe {
    pub fn live_caches(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<Vec<u32>> {
        self.record.lock().expect("record lock").windows.clone()
    }

    pub fn live_at_step(&self) -> Vec<usize> {
        self.record.lock().expect("record lock").live_at_step.clone()
    }

    pub fn past_shapes(&self) -> Vec<Vec<usize>> {
        self.record.lock().expect("record lock").past_shapes.clone()
    }

    pub fn steps(&self) -> usize {
        self.record.lock().expect("record lock").windows.len()
    }
}

enum Scores {
    /// Step `i` of a call strongly favors `script[i]` (the last entry
    /// repeats).
    Script(Vec<u32>),
    /// Deterministic spread of moderate scores that varies per step.
    Spread,
}

/// A fake network with scripted logits.
pub struct ScriptedModel {
    config: ModelRuntimeConfig,
    scores: Scores,
    fail_at: Option<usize>,
    io_fail_at: Option<usize>,
    short_cache_at: Option<usize>,
    live: Arc<AtomicUsize>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedModel {
    /// Greedy decoding of this model emits `script` token by token.
    pub fn scripted(script: Vec<u32>) -> Self {
        assert!(!script.is_empty());
        Self::with_scores(Scores::Script(script))
    }

    /// Spelling `text` then emitting the end-of-sequence token.
    pub fn spelling(text: &str) -> Self {
        let mut script = tokens(text);
        script.push(EOS);
        Self::scripted(script)
    }

    /// A model whose distribution is spread, for sampling tests.
    pub fn spread() -> Self {
        Self::with_scores(Scores::Spread)
    }

    fn with_scores(scores: Scores) -> Self {
        Self {
            config: small_config(),
            scores,
            fail_at: None,
            io_fail_at: None,
            short_cache_at: None,
            live: Arc::new(AtomicUsize::new(0)),
            record: Arc::new(Mutex::new(Record::default())),
        }
    }

    /// Make the step with this index fail, in every call.
    pub fn failing_at(mut self, step: usize) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Make the step with this index fail with an I/O error.
    pub fn io_failing_at(mut self, step: usize) -> Self {
        self.io_fail_at = Some(step);
        self
    }

    /// Make the step with this index return one cache entry too few.
    pub fn short_cache_at(mut self, step: usize) -> Self {
        self.short_cache_at = Some(step);
        self
    }

    pub fn probe(&self) -> Probe {
        Probe {
            live: Arc::clone(&self.live),
            record: Arc::clone(&self.record),
        }
    }
}

impl Model for ScriptedModel {
    type Cache = CountedCache;

    fn config(&self) -> ModelRuntimeConfig {
        self.config
    }

    fn zeroed_cache(&self, shape: &[usize]) -> Result<CountedCache> {
        Ok(CountedCache::new(&self.live, shape))
    }

    fn step(&self, input_ids: &[u32], past: &[CountedCache]) -> Result<StepOutput<CountedCache>> {
        // The past sequence length grows by one per step, starting at 1.
        let step = past.first().map_or(0, |c| c.shape[3] - 1);
        {
            let mut record = self.record.lock().expect("record lock");
            record.windows.push(input_ids.to_vec());
            record.live_at_step.push(self.live.load(Ordering::SeqCst));
            record
                .past_shapes
                .push(past.first().map(|c| c.shape.clone()).unwrap_or_default());
        }

        if self.fail_at == Some(step) {
            return Err(Error::Generation(format!("scripted failure at step {step}")));
        }
        if self.io_fail_at == Some(step) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device lost",
            )));
        }

        let seq_len = input_ids.len();
        let mut logits = vec![0.0f32; seq_len * VOCAB_SIZE];
        let last = &mut logits[(seq_len - 1) * VOCAB_SIZE..];
        match &self.scores {
            Scores::Script(script) => {
                let favored = script[step.min(script.len() - 1)];
                last[favored as usize] = 10.0;
            }
            Scores::Spread => {
                for (i, score) in last.iter_mut().enumerate() {
                    #[allow(clippy::cast_precision_loss)]
                    let value = ((i * 7 + step * 3) % 11) as f32;
                    *score = value / 4.0;
                }
                // Keep sampling away from the end-of-sequence token.
                last[EOS as usize] = -10.0;
            }
        }

        let head_dim = self.config.head_dim();
        let shape = [2, 1, self.config.num_attention_heads, step + 2, head_dim];
        let mut layers = self.config.num_hidden_layers;
        if self.short_cache_at == Some(step) {
            layers -= 1;
        }
        let past = (0..layers)
            .map(|_| CountedCache::new(&self.live, &shape))
            .collect();

        Ok(StepOutput {
            logits: HostTensor::new(&[seq_len, VOCAB_SIZE], logits)?,
            past,
        })
    }
}
