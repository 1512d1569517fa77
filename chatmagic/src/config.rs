//! Model bundle configuration
//!
//! A bundle is a single JSON blob with everything needed to use a family
//! of model variants: the tokenizer tables, the shape parameters of each
//! variant, the chat formatters, and the caller's generation defaults.
//!
//! ```json
//! {
//!   "tokenizer": { "model": { "vocab": { "<|endoftext|>": 0, ... }, "merges": ["Ġ t", ...] } },
//!   "models": { "s": { "num_attention_heads": 12, "num_hidden_layers": 12, "hidden_size": 768 } },
//!   "formatters": { "pair": { "name": "ConvPairFormatter", "maxTokens": 1800, ... } },
//!   "generation_parameters": { "doSample": true, "temperature": 0.5, ... }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::chat_formatter::{ChatFormatter, FormatterConfig};
use crate::model::ModelRuntimeConfig;
use crate::sampling::GenerationParameters;
use crate::tokenizer::BpeTokenizer;
use crate::{Error, Result};

/// Tokenizer tables in the Hugging Face `tokenizer.json` layout.
///
/// Only `model.vocab` and `model.merges` are read; other keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerConfig {
    pub model: BpeModelConfig,
    /// End-of-sequence token ID
    #[serde(default)]
    pub eos_token_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BpeModelConfig {
    /// Token string → ID
    pub vocab: HashMap<String, u32>,
    /// Merge rules; list order is rank order.
    #[serde(default)]
    pub merges: Vec<MergeRule>,
}

/// One merge rule, either `"left right"` or `["left", "right"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeRule {
    Joined(String),
    Pair(String, String),
}

impl MergeRule {
    /// Split the rule into its two sides.
    ///
    /// # Errors
    /// Returns a configuration error unless a joined rule has exactly two
    /// space-separated parts.
    pub fn to_pair(&self) -> Result<(String, String)> {
        match self {
            Self::Pair(left, right) => Ok((left.clone(), right.clone())),
            Self::Joined(rule) => {
                let mut parts = rule.split(' ');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(left), Some(right), None) if !left.is_empty() && !right.is_empty() => {
                        Ok((left.to_string(), right.to_string()))
                    }
                    _ => Err(Error::Configuration(format!(
                        "merge rule {rule:?} is not of the form \"left right\""
                    ))),
                }
            }
        }
    }
}

/// A complete model bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleConfig {
    pub tokenizer: TokenizerConfig,
    /// Shape parameters keyed by model variant (`"s"`, `"m"`, ...)
    pub models: BTreeMap<String, ModelRuntimeConfig>,
    /// Formatter configurations keyed by formatter id
    #[serde(default)]
    pub formatters: BTreeMap<String, FormatterConfig>,
    /// The caller's generation defaults, if the bundle ships any
    #[serde(default)]
    pub generation_parameters: Option<GenerationParameters>,
    /// Banned phrases; `None` means the built-in list
    #[serde(default)]
    pub bad_words: Option<Vec<String>>,
}

impl BundleConfig {
    /// Parse and validate a bundle from a JSON string.
    ///
    /// # Errors
    /// Returns a configuration error if the JSON is malformed or a section
    /// fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid model bundle: {e}")))?;
        config.validate()?;
        tracing::info!(
            vocab_size = config.tokenizer.model.vocab.len(),
            variants = config.models.len(),
            formatters = config.formatters.len(),
            "Loaded model bundle"
        );
        Ok(config)
    }

    /// Load a bundle from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the bundle is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Reading model bundle");
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn validate(&self) -> Result<()> {
        BpeTokenizer::from_config(&self.tokenizer)
            .map_err(|e| Error::Configuration(format!("tokenizer: {e}")))?;
        for (variant, model) in &self.models {
            model.validate().map_err(|e| {
                Error::Configuration(format!("model variant {variant:?}: {e}"))
            })?;
        }
        for (key, formatter) in &self.formatters {
            formatter
                .validate()
                .map_err(|e| Error::Configuration(format!("formatter {key:?}: {e}")))?;
        }
        if let Some(params) = &self.generation_parameters {
            params
                .validate()
                .map_err(|e| Error::Configuration(format!("generation_parameters: {e}")))?;
        }
        Ok(())
    }

    /// Shape parameters of a model variant.
    ///
    /// # Errors
    /// Returns a configuration error if the variant is unknown.
    pub fn model(&self, variant: &str) -> Result<ModelRuntimeConfig> {
        self.models.get(variant).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "unknown model variant {variant:?} (available: {:?})",
                self.models.keys().collect::<Vec<_>>()
            ))
        })
    }

    /// Build the bundle's tokenizer.
    ///
    /// # Errors
    /// Returns a configuration error if the tokenizer tables are invalid.
    pub fn tokenizer(&self) -> Result<BpeTokenizer> {
        BpeTokenizer::from_config(&self.tokenizer)
    }

    /// Build the formatter registered under `key`.
    ///
    /// # Errors
    /// Returns a configuration error if no formatter has that key.
    pub fn formatter(&self, key: &str) -> Result<ChatFormatter> {
        let config = self.formatters.get(key).ok_or_else(|| {
            Error::Configuration(format!("unknown formatter {key:?}"))
        })?;
        ChatFormatter::from_config(config)
    }

    /// The banned-phrase list, falling back to the built-in one.
    #[must_use]
    pub fn bad_words(&self) -> Vec<&str> {
        match &self.bad_words {
            Some(words) => words.iter().map(String::as_str).collect(),
            None => DEFAULT_BAD_WORDS.to_vec(),
        }
    }
}

/// Built-in banned phrases. Each is suppressed token by token.
pub const DEFAULT_BAD_WORDS: &[&str] = &[
    "sex", "pussy", "boob", "breast", "chest", "vagina", "porn", "dick", "cum", "oppai", "anal",
    "blowjob", "penis", "erect", "ejaculat", "orgasm", "clit", "masturbat", "horny", "impregnate",
    "nipple", "fuck", "tits", "murder", "kill", "bomb", "dynamite", "poison", "gun", "firearm",
    "weed", "cocaine", "opium", "rape", "theft", "kidnap", "terror", "explosiv", "bullet", "suicid",
];
