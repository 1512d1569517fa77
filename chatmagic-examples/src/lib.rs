//! Support code shared by the demos: a toy bigram [`Model`] and a
//! conversation file reader.

use std::path::Path;

use chatmagic::{
    ChatMessage, Error, HostTensor, Model, ModelRuntimeConfig, Result, StepOutput, Tensor,
    Tokenizer,
};

/// Short exchanges the demo bigram table is counted from.
pub const DEMO_CORPUS: &[&str] = &[
    "User: Hello\nBot: Hi there! How can I help you today?",
    "User: How are you?\nBot: I am doing well, thank you for asking!",
    "User: What is the weather like?\nBot: I think it is sunny and warm outside.",
    "User: Tell me something\nBot: The sea is salty and the sky is blue.",
    "User: Thanks\nBot: You are welcome! Have a nice day.",
];

/// Next-token scores from bigram counts, with a host-memory cache that only
/// tracks the sequence length.
pub struct BigramModel {
    config: ModelRuntimeConfig,
    vocab_size: usize,
    /// Row-major `vocab_size x vocab_size` log counts
    scores: Vec<f32>,
}

impl BigramModel {
    /// Count bigrams over `corpus`, with an end-of-sequence id after each
    /// text.
    ///
    /// # Errors
    /// Returns a tokenization error if a text cannot be encoded.
    pub fn train<T: Tokenizer>(
        config: ModelRuntimeConfig,
        tokenizer: &T,
        corpus: &[&str],
    ) -> Result<Self> {
        let vocab_size = tokenizer.vocab_size();
        let eos = tokenizer.eos_token_id();
        let mut counts = vec![0u32; vocab_size * vocab_size];
        for text in corpus {
            let mut ids = tokenizer.encode(text)?;
            ids.push(eos);
            for pair in ids.windows(2) {
                let (prev, next) = (pair[0] as usize, pair[1] as usize);
                if prev < vocab_size && next < vocab_size {
                    counts[prev * vocab_size + next] += 1;
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let scores = counts.iter().map(|&c| (c as f32 + 0.01).ln()).collect();
        Ok(Self {
            config,
            vocab_size,
            scores,
        })
    }
}

impl Model for BigramModel {
    type Cache = HostTensor;

    fn config(&self) -> ModelRuntimeConfig {
        self.config
    }

    fn zeroed_cache(&self, shape: &[usize]) -> Result<HostTensor> {
        Ok(HostTensor::zeros(shape))
    }

    fn step(&self, input_ids: &[u32], past: &[HostTensor]) -> Result<StepOutput<HostTensor>> {
        let last = *input_ids
            .last()
            .ok_or_else(|| Error::Generation("empty input".into()))? as usize;
        if last >= self.vocab_size {
            return Err(Error::Generation(format!("token {last} out of vocabulary")));
        }
        let row = self.scores[last * self.vocab_size..(last + 1) * self.vocab_size].to_vec();

        let next_past = past
            .iter()
            .map(|entry| {
                let mut shape = entry.shape().to_vec();
                if let Some(seq_len) = shape.get_mut(3) {
                    *seq_len += input_ids.len();
                }
                HostTensor::zeros(&shape)
            })
            .collect();

        Ok(StepOutput {
            logits: HostTensor::new(&[1, self.vocab_size], row)?,
            past: next_past,
        })
    }
}

/// Read a conversation file: one message per line, `U:` for the user and
/// `B:` for the bot. Blank lines are skipped.
///
/// # Errors
/// Returns an error if the file cannot be read or a line has no prefix.
pub fn read_conversation(path: &Path) -> Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)?;
    parse_conversation(&content).map_err(|e| match e {
        Error::Configuration(msg) => Error::Configuration(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Parse conversation text in the [`read_conversation`] format.
///
/// # Errors
/// Returns a configuration error naming the first line without a prefix.
pub fn parse_conversation(content: &str) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message = if let Some(text) = line.strip_prefix("U:") {
            ChatMessage::user(text.trim())
        } else if let Some(text) = line.strip_prefix("B:") {
            ChatMessage::bot(text.trim())
        } else {
            return Err(Error::Configuration(format!(
                "line {}: expected a `U:` or `B:` prefix",
                lineno + 1
            )));
        };
        messages.push(message);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmagic::{argmax, BundleConfig, GenerationParameters};
    use chatmagic_runtime::{FinishReason, Runtime};

    const BUNDLE: &str = include_str!("../data/bundle.json");

    fn bundle() -> BundleConfig {
        BundleConfig::from_json(BUNDLE).expect("demo bundle parses")
    }

    #[test]
    fn demo_bundle_has_both_formatters() {
        let bundle = bundle();
        assert!(bundle.formatter("pair").is_ok());
        assert!(bundle.formatter("turn").is_ok());
        assert!(bundle.generation_parameters.is_some_and(|p| p.do_sample));
        // Single-byte tokens would ban most letters.
        assert!(bundle.bad_words().is_empty());
    }

    #[test]
    fn bigram_scores_follow_the_corpus() {
        let bundle = bundle();
        let tokenizer = bundle.tokenizer().expect("tokenizer");
        let config = bundle.model("test").expect("variant");
        let model = BigramModel::train(config, &tokenizer, &["abab"]).expect("train");

        let a = tokenizer.encode("a").expect("encode");
        let b = tokenizer.encode("b").expect("encode");
        let out = model.step(&a, &[]).expect("step");
        let scores = out.next_token_scores().expect("scores");
        assert_eq!(argmax(scores), Some(b[0] as usize));
    }

    #[test]
    fn cache_grows_by_the_input_length() {
        let bundle = bundle();
        let tokenizer = bundle.tokenizer().expect("tokenizer");
        let config = bundle.model("test").expect("variant");
        let model = BigramModel::train(config, &tokenizer, DEMO_CORPUS).expect("train");

        let shape = config.empty_cache_shape();
        let past = vec![model.zeroed_cache(&shape).expect("cache"); config.num_hidden_layers];
        let out = model.step(&[5, 6, 7], &past).expect("step");
        assert_eq!(out.past.len(), config.num_hidden_layers);
        assert_eq!(out.past[0].shape(), &[2, 1, 2, 4, 8]);
    }

    #[test]
    fn out_of_vocabulary_input_is_an_error() {
        let bundle = bundle();
        let tokenizer = bundle.tokenizer().expect("tokenizer");
        let model = BigramModel::train(bundle.model("test").expect("variant"), &tokenizer, &[])
            .expect("train");
        assert!(matches!(model.step(&[100_000], &[]), Err(Error::Generation(_))));
        assert!(matches!(model.step(&[], &[]), Err(Error::Generation(_))));
    }

    #[test]
    fn runtime_replies_from_the_demo_bundle() {
        let bundle = bundle();
        let tokenizer = bundle.tokenizer().expect("tokenizer");
        let config = bundle.model("test").expect("variant");
        let model = BigramModel::train(config, &tokenizer, DEMO_CORPUS).expect("train");
        let runtime = Runtime::from_bundle(model, &bundle, "pair").expect("runtime");

        let messages = [ChatMessage::user("Hello")];
        assert_eq!(
            runtime.prepare_prompt(&messages).expect("prompt"),
            "User: Hello\nBot:"
        );
        let params = GenerationParameters::greedy(16);
        let completion = runtime
            .reply_stream(&messages, &params, None, |_| true)
            .expect("reply");
        assert!(!completion.token_ids.is_empty());
        assert!(completion.token_ids.len() <= 15);
        assert_ne!(completion.finish_reason, FinishReason::Cancelled);
    }

    #[test]
    fn conversation_lines_need_a_prefix() {
        let messages = parse_conversation("U: hi\n\nB: hello\n").expect("parse");
        assert_eq!(messages, vec![ChatMessage::user("hi"), ChatMessage::bot("hello")]);

        let err = parse_conversation("U: hi\nhello\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
