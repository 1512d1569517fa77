//! Chat formatters for converting a conversation to a model prompt
//!
//! A [`ChatFormatter`] first picks the most recent messages that fit a token
//! budget ([`MessageBudget`]), then renders them with a [`ChatTemplate`].
//! Two templates exist: [`ConvPairTemplate`] for `User: ... / Bot: ...`
//! style prompts and [`TurnBasedTemplate`] for models trained with a turn
//! delimiter token.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::tokenizer::Tokenizer;
use crate::{Error, Result};

/// Stand-in user message used when not even the latest message fits.
pub const FALLBACK_MESSAGE: &str = "Please write a message that says \"Your message is too long for me to digest. Please reset the chat and send a shorter message.\"";

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// `true` for the user, `false` for the assistant.
    pub is_user: bool,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            is_user: true,
            content: content.into(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            is_user: false,
            content: content.into(),
        }
    }
}

/// Renders an already-selected list of messages into prompt text.
pub trait ChatTemplate: Send + Sync {
    /// Apply the template to a list of messages, producing a prompt string.
    fn apply(&self, messages: &[ChatMessage]) -> String;
}

impl ChatTemplate for Box<dyn ChatTemplate> {
    fn apply(&self, messages: &[ChatMessage]) -> String {
        (**self).apply(messages)
    }
}

/// `prefix + content + separator` per message, then an empty bot turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvPairTemplate {
    pub user_prefix: String,
    pub bot_prefix: String,
    pub separator: String,
    /// Strip trailing whitespace from the rendered prompt.
    pub trim: bool,
}

impl ChatTemplate for ConvPairTemplate {
    fn apply(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let prefix = if message.is_user {
                &self.user_prefix
            } else {
                &self.bot_prefix
            };
            prompt.push_str(prefix);
            prompt.push_str(&message.content);
            prompt.push_str(&self.separator);
        }
        // Cue the network to answer as the assistant.
        prompt.push_str(&self.bot_prefix);
        if self.trim {
            prompt.truncate(prompt.trim_end().len());
        }
        prompt
    }
}

/// `content + turn_token` per message; sender roles are not rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnBasedTemplate {
    pub turn_token: String,
    /// Strip trailing whitespace from the rendered prompt.
    pub trim: bool,
}

impl ChatTemplate for TurnBasedTemplate {
    fn apply(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str(&message.content);
            prompt.push_str(&self.turn_token);
        }
        if self.trim {
            prompt.truncate(prompt.trim_end().len());
        }
        prompt
    }
}

/// Limits on how much conversation history goes into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBudget {
    /// Upper bound on the summed token count of the selected contents.
    pub max_tokens: usize,
    /// Upper bound on the number of selected messages. At least 1.
    pub max_messages: usize,
}

impl MessageBudget {
    /// Select the conversation suffix to render.
    ///
    /// Walks back from the latest message while the running token total
    /// stays within `max_tokens`, keeps at most `max_messages` of that
    /// suffix, and drops leading bot messages while two or more remain.
    /// If nothing fits, the selection is the single [`FALLBACK_MESSAGE`].
    ///
    /// # Errors
    /// Returns a tokenization error if a message cannot be encoded.
    pub fn select<'a, T>(
        &self,
        messages: &'a [ChatMessage],
        tokenizer: &T,
    ) -> Result<Cow<'a, [ChatMessage]>>
    where
        T: Tokenizer + ?Sized,
    {
        let mut total = 0;
        let mut start = messages.len();
        for message in messages.iter().rev() {
            let count = tokenizer.count_tokens(&message.content)?;
            if total + count > self.max_tokens {
                break;
            }
            total += count;
            start -= 1;
        }

        if start == messages.len() {
            tracing::debug!(
                max_tokens = self.max_tokens,
                "Latest message exceeds the token budget, using fallback"
            );
            return Ok(Cow::Owned(vec![ChatMessage::user(FALLBACK_MESSAGE)]));
        }

        let start = start.max(messages.len().saturating_sub(self.max_messages));
        let mut selected = &messages[start..];
        while selected.len() >= 2 && !selected[0].is_user {
            selected = &selected[1..];
        }
        tracing::trace!(
            selected = selected.len(),
            total_messages = messages.len(),
            "Selected conversation suffix"
        );
        Ok(Cow::Borrowed(selected))
    }
}

/// Rendering strategy of a [`ChatFormatter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatterTemplate {
    ConvPair(ConvPairTemplate),
    TurnBased(TurnBasedTemplate),
}

impl ChatTemplate for FormatterTemplate {
    fn apply(&self, messages: &[ChatMessage]) -> String {
        match self {
            Self::ConvPair(template) => template.apply(messages),
            Self::TurnBased(template) => template.apply(messages),
        }
    }
}

/// Budgeted prompt assembly: selection followed by rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFormatter {
    budget: MessageBudget,
    template: FormatterTemplate,
}

impl ChatFormatter {
    /// # Errors
    /// Returns a configuration error if `max_messages` is 0.
    pub fn new(budget: MessageBudget, template: FormatterTemplate) -> Result<Self> {
        if budget.max_messages == 0 {
            return Err(Error::Configuration(
                "maxMessages must be at least 1".into(),
            ));
        }
        Ok(Self { budget, template })
    }

    /// Build a formatter from its bundle configuration.
    ///
    /// # Errors
    /// Returns a configuration error if the configuration is invalid.
    pub fn from_config(config: &FormatterConfig) -> Result<Self> {
        let budget = config.budget();
        let template = match config {
            FormatterConfig::ConvPair {
                user_prefix,
                bot_prefix,
                user_bot_separator,
                trim,
                ..
            } => FormatterTemplate::ConvPair(ConvPairTemplate {
                user_prefix: user_prefix.clone(),
                bot_prefix: bot_prefix.clone(),
                separator: user_bot_separator.clone(),
                trim: *trim,
            }),
            FormatterConfig::TurnBased {
                turn_token, trim, ..
            } => FormatterTemplate::TurnBased(TurnBasedTemplate {
                turn_token: turn_token.clone(),
                trim: *trim,
            }),
        };
        Self::new(budget, template)
    }

    #[must_use]
    pub fn budget(&self) -> MessageBudget {
        self.budget
    }

    #[must_use]
    pub fn template(&self) -> &FormatterTemplate {
        &self.template
    }

    /// Messages that [`prepare_prompt`](Self::prepare_prompt) would render.
    ///
    /// # Errors
    /// Returns a tokenization error if a message cannot be encoded.
    pub fn select_messages<'a, T>(
        &self,
        messages: &'a [ChatMessage],
        tokenizer: &T,
    ) -> Result<Cow<'a, [ChatMessage]>>
    where
        T: Tokenizer + ?Sized,
    {
        self.budget.select(messages, tokenizer)
    }

    /// Assemble the prompt for the next assistant reply.
    ///
    /// # Errors
    /// Returns a tokenization error if a message cannot be encoded.
    pub fn prepare_prompt<T>(&self, messages: &[ChatMessage], tokenizer: &T) -> Result<String>
    where
        T: Tokenizer + ?Sized,
    {
        let selected = self.select_messages(messages, tokenizer)?;
        Ok(self.template.apply(&selected))
    }
}

/// Formatter configuration, tagged by its `name` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum FormatterConfig {
    #[serde(rename = "ConvPairFormatter", rename_all = "camelCase")]
    ConvPair {
        max_tokens: usize,
        max_messages: usize,
        user_prefix: String,
        bot_prefix: String,
        user_bot_separator: String,
        #[serde(default)]
        trim: bool,
    },
    #[serde(rename = "TurnBasedFormatter", rename_all = "camelCase")]
    TurnBased {
        max_tokens: usize,
        max_messages: usize,
        turn_token: String,
        #[serde(default)]
        trim: bool,
    },
}

impl FormatterConfig {
    #[must_use]
    pub fn budget(&self) -> MessageBudget {
        match *self {
            Self::ConvPair {
                max_tokens,
                max_messages,
                ..
            }
            | Self::TurnBased {
                max_tokens,
                max_messages,
                ..
            } => MessageBudget {
                max_tokens,
                max_messages,
            },
        }
    }

    /// # Errors
    /// Returns a configuration error if `maxMessages` is 0.
    pub fn validate(&self) -> Result<()> {
        if self.budget().max_messages == 0 {
            return Err(Error::Configuration(
                "maxMessages must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts one token per whitespace-separated word.
    struct WordCounter;

    impl Tokenizer for WordCounter {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.split_whitespace().map(|_| 1).collect())
        }

        fn decode_bytes(&self, _ids: &[u32]) -> Result<Vec<u8>> {
            Err(Error::Tokenization("word counter cannot decode".into()))
        }

        fn vocab_size(&self) -> usize {
            2
        }

        fn eos_token_id(&self) -> u32 {
            0
        }
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("Hello"),
            ChatMessage::bot("Hi there! How can I help you today?"),
            ChatMessage::user("I need help with my account"),
            ChatMessage::bot("Sure thing! What's your account number?"),
            ChatMessage::user("123456"),
        ]
    }

    fn pair(max_tokens: usize, max_messages: usize) -> ChatFormatter {
        ChatFormatter::new(
            MessageBudget {
                max_tokens,
                max_messages,
            },
            FormatterTemplate::ConvPair(ConvPairTemplate {
                user_prefix: "User: ".into(),
                bot_prefix: "Bot: ".into(),
                separator: "\n".into(),
                trim: true,
            }),
        )
        .unwrap()
    }

    fn turn(max_tokens: usize, max_messages: usize) -> ChatFormatter {
        ChatFormatter::new(
            MessageBudget {
                max_tokens,
                max_messages,
            },
            FormatterTemplate::TurnBased(TurnBasedTemplate {
                turn_token: "<turn>".into(),
                trim: true,
            }),
        )
        .unwrap()
    }

    #[test]
    fn conv_pair_short_conversation() {
        let messages = vec![
            ChatMessage::user("Hello"),
            ChatMessage::bot("Hi"),
            ChatMessage::user("Bye"),
        ];
        let prompt = pair(1800, 10).prepare_prompt(&messages, &WordCounter).unwrap();
        assert_eq!(prompt, "User: Hello\nBot: Hi\nUser: Bye\nBot:");
    }

    #[test]
    fn conv_pair_full_conversation() {
        let prompt = pair(1800, 10)
            .prepare_prompt(&conversation(), &WordCounter)
            .unwrap();
        assert_eq!(
            prompt,
            "User: Hello\n\
             Bot: Hi there! How can I help you today?\n\
             User: I need help with my account\n\
             Bot: Sure thing! What's your account number?\n\
             User: 123456\n\
             Bot:"
        );
    }

    #[test]
    fn turn_based_full_conversation() {
        let prompt = turn(1800, 10)
            .prepare_prompt(&conversation(), &WordCounter)
            .unwrap();
        assert_eq!(
            prompt,
            "Hello<turn>\
             Hi there! How can I help you today?<turn>\
             I need help with my account<turn>\
             Sure thing! What's your account number?<turn>\
             123456<turn>"
        );
    }

    #[test]
    fn token_budget_keeps_recent_suffix() {
        // 1 + 6 + 6 tokens fit in 13; adding the 8-token bot message does not.
        let prompt = turn(13, 10)
            .prepare_prompt(&conversation(), &WordCounter)
            .unwrap();
        assert_eq!(
            prompt,
            "I need help with my account<turn>\
             Sure thing! What's your account number?<turn>\
             123456<turn>"
        );
    }

    #[test]
    fn message_cap_keeps_recent_messages() {
        let prompt = turn(1800, 3)
            .prepare_prompt(&conversation(), &WordCounter)
            .unwrap();
        assert_eq!(
            prompt,
            "I need help with my account<turn>\
             Sure thing! What's your account number?<turn>\
             123456<turn>"
        );
    }

    #[test]
    fn leading_bot_message_is_dropped() {
        let prompt = turn(1800, 2)
            .prepare_prompt(&conversation(), &WordCounter)
            .unwrap();
        assert_eq!(prompt, "123456<turn>");
    }

    #[test]
    fn consecutive_leading_bot_messages_are_all_dropped() {
        let messages = vec![
            ChatMessage::bot("a"),
            ChatMessage::bot("b"),
            ChatMessage::bot("c"),
            ChatMessage::user("d"),
            ChatMessage::bot("e"),
        ];
        let selected = pair(1800, 10).select_messages(&messages, &WordCounter).unwrap();
        assert_eq!(
            selected.as_ref(),
            &[ChatMessage::user("d"), ChatMessage::bot("e")]
        );
    }

    #[test]
    fn all_bot_selection_keeps_the_latest() {
        let messages = vec![ChatMessage::bot("a"); 3];
        let selected = pair(3, 3).select_messages(&messages, &WordCounter).unwrap();
        assert_eq!(selected.as_ref(), &[ChatMessage::bot("a")]);
    }

    #[test]
    fn lone_bot_message_is_kept() {
        let messages = vec![ChatMessage::user("a b c"), ChatMessage::bot("hi")];
        let selected = turn(1800, 1).select_messages(&messages, &WordCounter).unwrap();
        assert_eq!(selected.as_ref(), &[ChatMessage::bot("hi")]);
    }

    #[test]
    fn over_budget_message_falls_back() {
        let messages = vec![ChatMessage::user("one two three")];
        let selected = turn(2, 10).select_messages(&messages, &WordCounter).unwrap();
        assert_eq!(selected.as_ref(), &[ChatMessage::user(FALLBACK_MESSAGE)]);

        let prompt = turn(2, 10).prepare_prompt(&conversation(), &WordCounter).unwrap();
        assert!(!prompt.is_empty());
    }

    #[test]
    fn empty_conversation_falls_back() {
        let selected = pair(10, 10).select_messages(&[], &WordCounter).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected[0].is_user);
    }

    #[test]
    fn zero_message_cap_is_rejected() {
        let err = ChatFormatter::new(
            MessageBudget {
                max_tokens: 10,
                max_messages: 0,
            },
            FormatterTemplate::TurnBased(TurnBasedTemplate {
                turn_token: String::new(),
                trim: false,
            }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn untrimmed_turn_token_keeps_trailing_newline() {
        let template = TurnBasedTemplate {
            turn_token: "<|eot|>\n".into(),
            trim: false,
        };
        assert_eq!(template.apply(&[ChatMessage::user("Hi")]), "Hi<|eot|>\n");
    }

    #[test]
    fn config_round_trip_through_serde() {
        let json = r#"{
            "name": "ConvPairFormatter",
            "maxTokens": 1800,
            "maxMessages": 10,
            "userPrefix": "Human:\n",
            "botPrefix": "Assistant:\n",
            "userBotSeparator": "\n\n"
        }"#;
        let config: FormatterConfig = serde_json::from_str(json).unwrap();
        let formatter = ChatFormatter::from_config(&config).unwrap();
        assert_eq!(formatter.budget().max_tokens, 1800);
        let FormatterTemplate::ConvPair(template) = formatter.template() else {
            panic!("expected a paired template");
        };
        assert!(!template.trim);

        let prompt = formatter
            .prepare_prompt(&[ChatMessage::user("Who?")], &WordCounter)
            .unwrap();
        assert_eq!(prompt, "Human:\nWho?\n\nAssistant:\n");
    }

    #[test]
    fn unknown_config_name_fails_to_parse() {
        let json = r#"{ "name": "Other", "maxTokens": 1, "maxMessages": 1 }"#;
        assert!(serde_json::from_str::<FormatterConfig>(json).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn message() -> impl Strategy<Value = ChatMessage> {
            (any::<bool>(), "[a-z]{1,3}( [a-z]{1,3}){0,6}").prop_map(|(is_user, content)| {
                ChatMessage { is_user, content }
            })
        }

        proptest! {
            #[test]
            fn selection_respects_budget_and_user_first(
                messages in proptest::collection::vec(message(), 0..12),
                max_tokens in 0usize..30,
                max_messages in 1usize..8,
            ) {
                let budget = MessageBudget { max_tokens, max_messages };
                let selected = budget.select(&messages, &WordCounter).unwrap();

                prop_assert!(!selected.is_empty());
                if selected[0].content == FALLBACK_MESSAGE {
                    prop_assert_eq!(selected.len(), 1);
                } else {
                    let total: usize = selected
                        .iter()
                        .map(|m| m.content.split_whitespace().count())
                        .sum();
                    prop_assert!(total <= max_tokens);
                    prop_assert!(selected.len() <= max_messages);
                    prop_assert!(messages.ends_with(&selected));
                }
                if selected.len() >= 2 {
                    prop_assert!(selected[0].is_user);
                }
            }
        }
    }
}
