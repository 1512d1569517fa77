//! Chat with a toy bigram model through the full runtime.
//!
//! The bigram table is counted from [`DEMO_CORPUS`] with the bundle's
//! tokenizer, so the whole pipeline runs without any network weights.
//!
//! Usage:
//!   cargo run --example generate -- "Hello there"
//!   cargo run --example generate -- --greedy -n 40 "How are you?"
//!   cargo run --example generate -- -t 0.9 -k 8 -s 42 "Tell me something"

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatmagic::{BundleConfig, ChatMessage, GenerationParameters, Result};
use chatmagic_examples::{BigramModel, DEMO_CORPUS};
use chatmagic_runtime::Runtime;

#[derive(Parser)]
#[command(name = "generate")]
#[command(about = "Stream a chat reply from a toy bigram model")]
struct Cli {
    /// User message to reply to
    #[arg(default_value = "Hello")]
    message: String,

    /// Path to the model bundle JSON
    #[arg(short, long, env = "CHATMAGIC_BUNDLE", default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/data/bundle.json"))]
    bundle: PathBuf,

    /// Model variant whose shape sizes the cache
    #[arg(long, default_value = "test")]
    variant: String,

    /// Formatter key in the bundle
    #[arg(short, long, default_value = "pair")]
    formatter: String,

    /// Maximum number of tokens to generate
    #[arg(short = 'n', long)]
    max_tokens: Option<usize>,

    /// Use greedy decoding
    #[arg(long)]
    greedy: bool,

    /// Sampling temperature
    #[arg(short = 't', long)]
    temperature: Option<f32>,

    /// Top-k candidates
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Top-p (nucleus) threshold
    #[arg(short = 'p', long)]
    top_p: Option<f32>,

    /// Repetition penalty
    #[arg(short = 'r', long)]
    repetition_penalty: Option<f32>,

    /// Random seed for sampling
    #[arg(short = 's', long)]
    seed: Option<u64>,
}

impl Cli {
    fn params(&self, defaults: Option<GenerationParameters>) -> GenerationParameters {
        let mut params = defaults.unwrap_or_else(|| GenerationParameters::greedy(64));
        if self.greedy {
            params.do_sample = false;
        }
        if let Some(n) = self.max_tokens {
            params.max_new_tokens = n;
        }
        if let Some(t) = self.temperature {
            params.temperature = t;
        }
        if let Some(k) = self.top_k {
            params.top_k = k;
        }
        if let Some(p) = self.top_p {
            params.top_p = p;
        }
        if let Some(r) = self.repetition_penalty {
            params.repetition_penalty = r;
        }
        params
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let bundle = BundleConfig::from_file(&cli.bundle)?;
    let params = cli.params(bundle.generation_parameters);
    let tokenizer = bundle.tokenizer()?;
    let model = BigramModel::train(bundle.model(&cli.variant)?, &tokenizer, DEMO_CORPUS)?;

    tracing::info!(variant = %cli.variant, formatter = %cli.formatter, "Trained demo bigram model");

    let runtime = Runtime::from_bundle(model, &bundle, &cli.formatter)?;
    let messages = [ChatMessage::user(cli.message.as_str())];
    eprintln!("{}", runtime.prepare_prompt(&messages)?);

    let start = Instant::now();
    let mut printed = String::new();
    let completion = runtime.reply_stream(&messages, &params, cli.seed, |reply| {
        if let Some(delta) = reply.strip_prefix(printed.as_str()) {
            print!("{delta}");
            let _ = io::stdout().flush();
            printed = reply.to_string();
        }
        true
    })?;
    println!();

    let elapsed = start.elapsed().as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let rate = completion.token_ids.len() as f64 / elapsed.max(f64::EPSILON);
    eprintln!(
        "Generated {} tokens in {elapsed:.3}s ({rate:.1} tok/s), finish reason {:?}",
        completion.token_ids.len(),
        completion.finish_reason
    );

    Ok(())
}
