//! Show the prompt a formatter builds for a conversation.
//!
//! Usage:
//!   cargo run --example prompt -- --formatter turn
//!   cargo run --example prompt -- -c my_chat.txt --max-tokens 40
//!
//! Conversation files hold one message per line, prefixed `U:` for the user
//! and `B:` for the bot.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatmagic::{BundleConfig, ChatFormatter, MessageBudget, Result, Tokenizer};
use chatmagic_examples::read_conversation;

#[derive(Parser)]
#[command(name = "prompt")]
#[command(about = "Assemble a chat prompt from a conversation file")]
struct Cli {
    /// Path to the model bundle JSON
    #[arg(short, long, env = "CHATMAGIC_BUNDLE", default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/data/bundle.json"))]
    bundle: PathBuf,

    /// Conversation file (`U:` / `B:` lines)
    #[arg(short, long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/data/conversation.txt"))]
    conversation: PathBuf,

    /// Formatter key in the bundle
    #[arg(short, long, default_value = "pair")]
    formatter: String,

    /// Override the formatter's token budget
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Print the encoded token ids
    #[arg(long)]
    ids: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let bundle = BundleConfig::from_file(&cli.bundle)?;
    let tokenizer = bundle.tokenizer()?;

    let mut formatter = bundle.formatter(&cli.formatter)?;
    if let Some(max_tokens) = cli.max_tokens {
        let budget = MessageBudget {
            max_tokens,
            ..formatter.budget()
        };
        formatter = ChatFormatter::new(budget, formatter.template().clone())?;
    }

    let messages = read_conversation(&cli.conversation)?;
    let selected = formatter.select_messages(&messages, &tokenizer)?;
    eprintln!(
        "Selected {} of {} messages (budget {} tokens, {} messages)",
        selected.len(),
        messages.len(),
        formatter.budget().max_tokens,
        formatter.budget().max_messages
    );

    let prompt = formatter.prepare_prompt(&messages, &tokenizer)?;
    println!("{prompt}");

    let ids = tokenizer.encode(&prompt)?;
    eprintln!("Prompt is {} tokens", ids.len());
    if cli.ids {
        println!("{ids:?}");
    }

    Ok(())
}
