//! Protocol renderer: conversations in, token streams out.
//!
//! One message renders as
//!
//! ```text
//! <|start|> role [<|channel|> channel-text] [" to=recipient"]
//! [<|constrain|> content-type] <|message|> body end-marker
//! ```
//!
//! where the end-marker is `<|call|>` for assistant messages addressed to a
//! tool and `<|end|>` otherwise. System and developer bodies are structured
//! plain-text blocks assembled here and BPE-encoded like any other text.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::chat::{
    Content, Conversation, DeveloperContent, Message, Role, SystemContent,
};
use crate::core::{Rank, Tokenizer};
use crate::error::HarmonyError;
use crate::parser::StreamableParser;
use crate::tools::render_tools_section;

/// Reserved literal spellings of the harmony protocol.
pub mod literals {
    pub const START: &str = "<|start|>";
    pub const END: &str = "<|end|>";
    pub const MESSAGE: &str = "<|message|>";
    pub const CHANNEL: &str = "<|channel|>";
    pub const CONSTRAIN: &str = "<|constrain|>";
    pub const CALL: &str = "<|call|>";
    pub const RETURN: &str = "<|return|>";
    pub const REFUSAL: &str = "<|refusal|>";
    pub const SYSTEM: &str = "<|system|>";
    pub const USER: &str = "<|user|>";
    pub const ASSISTANT: &str = "<|assistant|>";
    pub const DEVELOPER: &str = "<|developer|>";
    pub const TOOL: &str = "<|tool|>";
}

/// The channel carrying interior reasoning.
pub const ANALYSIS_CHANNEL: &str = "analysis";
/// The channel carrying the user-visible answer.
pub const FINAL_CHANNEL: &str = "final";

/// Configuration for conversation rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderConversationConfig {
    /// Omit assistant `analysis` messages that precede the last assistant
    /// `final` message when rendering for the next turn.
    pub auto_drop_analysis: bool,
}

impl Default for RenderConversationConfig {
    fn default() -> Self {
        Self {
            auto_drop_analysis: true,
        }
    }
}

/// Per-message rendering options derived from the whole conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    /// Whether a `functions` tool namespace exists anywhere in the
    /// conversation; controls the commentary-channel hint line.
    pub conversation_has_function_tools: bool,
}

/// A named tokenizer plus the harmony rendering and parsing rules.
///
/// Immutable after construction and safe to share across threads; all
/// rendering and parsing goes through `&self`.
#[derive(Debug)]
pub struct HarmonyEncoding {
    name: String,
    tokenizer: Tokenizer,
}

impl HarmonyEncoding {
    pub fn new(name: impl Into<String>, tokenizer: Tokenizer) -> Self {
        let name = name.into();
        debug!(encoding = %name, "constructed harmony encoding");
        Self { name, tokenizer }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Rank of a reserved literal.
    pub(crate) fn special_token(&self, literal: &str) -> Result<Rank, HarmonyError> {
        self.tokenizer
            .special_token(literal)
            .ok_or_else(|| HarmonyError::MissingSpecialToken(literal.to_string()))
    }

    /// Rank of the role special for `role`.
    pub(crate) fn role_token(&self, role: Role) -> Result<Rank, HarmonyError> {
        let literal = match role {
            Role::System => literals::SYSTEM,
            Role::User => literals::USER,
            Role::Assistant => literals::ASSISTANT,
            Role::Developer => literals::DEVELOPER,
            Role::Tool => literals::TOOL,
        };
        self.special_token(literal)
    }

    /// Role named by a reserved rank, if it is a role special.
    pub(crate) fn role_of_token(&self, token: Rank) -> Option<Role> {
        match self.tokenizer.special_token_literal(token)? {
            literals::SYSTEM => Some(Role::System),
            literals::USER => Some(Role::User),
            literals::ASSISTANT => Some(Role::Assistant),
            literals::DEVELOPER => Some(Role::Developer),
            literals::TOOL => Some(Role::Tool),
            _ => None,
        }
    }

    /// Ranks a sampler should treat as end-of-turn.
    pub fn stop_tokens(&self) -> Result<FxHashSet<Rank>, HarmonyError> {
        Ok([
            self.special_token(literals::RETURN)?,
            self.special_token(literals::CALL)?,
        ]
        .into_iter()
        .collect())
    }

    /// Stop ranks when sampling assistant actions, where `<|end|>` also
    /// terminates the turn.
    pub fn stop_tokens_for_assistant_actions(&self) -> Result<FxHashSet<Rank>, HarmonyError> {
        let mut stops = self.stop_tokens()?;
        stops.insert(self.special_token(literals::END)?);
        Ok(stops)
    }

    fn render_text_into(&self, text: &str, into: &mut Vec<Rank>) -> Result<(), HarmonyError> {
        into.extend(self.tokenizer.encode_ordinary(text)?);
        Ok(())
    }

    /// Render one message.
    pub fn render(
        &self,
        message: &Message,
        options: Option<&RenderOptions>,
    ) -> Result<Vec<Rank>, HarmonyError> {
        let mut tokens = Vec::new();
        self.render_into(message, &mut tokens, options)?;
        Ok(tokens)
    }

    /// Render one message into an existing buffer.
    pub fn render_into(
        &self,
        message: &Message,
        into: &mut Vec<Rank>,
        options: Option<&RenderOptions>,
    ) -> Result<(), HarmonyError> {
        self.render_message_with_marker(message, into, options, None)
    }

    fn render_message_with_marker(
        &self,
        message: &Message,
        into: &mut Vec<Rank>,
        options: Option<&RenderOptions>,
        end_marker_override: Option<&str>,
    ) -> Result<(), HarmonyError> {
        // A message with nothing to say renders to nothing, so rendering and
        // parsing stay inverse up to empty messages.
        if message.content.is_empty() {
            return Ok(());
        }

        let options = options.copied().unwrap_or_default();

        into.push(self.special_token(literals::START)?);
        if let Some(name) = &message.author.name {
            self.render_text_into(name, into)?;
        }
        into.push(self.role_token(message.author.role)?);

        if let Some(channel) = &message.channel {
            into.push(self.special_token(literals::CHANNEL)?);
            self.render_text_into(channel, into)?;
        }

        if let Some(recipient) = &message.recipient {
            self.render_text_into(&format!(" to={recipient}"), into)?;
        }

        if let Some(content_type) = &message.content_type {
            into.push(self.special_token(literals::CONSTRAIN)?);
            self.render_text_into(content_type, into)?;
        }

        into.push(self.special_token(literals::MESSAGE)?);

        for content in &message.content {
            match content {
                Content::Text(text) => self.render_text_into(&text.text, into)?,
                Content::SystemContent(system) => {
                    let body = render_system_content(system, &options);
                    self.render_text_into(&body, into)?;
                }
                Content::DeveloperContent(developer) => {
                    let body = render_developer_content(developer);
                    self.render_text_into(&body, into)?;
                }
            }
        }

        let end_marker = end_marker_override.unwrap_or(
            if message.author.role == Role::Assistant && message.recipient.is_some() {
                literals::CALL
            } else {
                literals::END
            },
        );
        into.push(self.special_token(end_marker)?);
        Ok(())
    }

    /// Render a whole conversation.
    pub fn render_conversation(
        &self,
        conversation: &Conversation,
        _config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Rank>, HarmonyError> {
        let mut tokens = Vec::new();
        self.render_conversation_into(conversation, &mut tokens)?;
        Ok(tokens)
    }

    /// Render a whole conversation into an existing buffer.
    pub fn render_conversation_into(
        &self,
        conversation: &Conversation,
        into: &mut Vec<Rank>,
    ) -> Result<(), HarmonyError> {
        let options = RenderOptions {
            conversation_has_function_tools: conversation_has_function_tools(conversation),
        };
        for message in &conversation.messages {
            self.render_into(message, into, Some(&options))?;
        }
        Ok(())
    }

    /// Render a conversation and prime the next turn: the output ends with
    /// `<|start|>` followed by the role special for `next_turn_role`.
    pub fn render_conversation_for_completion(
        &self,
        conversation: &Conversation,
        next_turn_role: Role,
        config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Rank>, HarmonyError> {
        let config = config.copied().unwrap_or_default();
        let options = RenderOptions {
            conversation_has_function_tools: conversation_has_function_tools(conversation),
        };

        let kept: Vec<&Message> = if config.auto_drop_analysis {
            drop_interior_analysis(&conversation.messages)
        } else {
            conversation.messages.iter().collect()
        };

        let mut tokens = Vec::new();
        for message in kept {
            self.render_into(message, &mut tokens, Some(&options))?;
        }
        tokens.push(self.special_token(literals::START)?);
        tokens.push(self.role_token(next_turn_role)?);
        Ok(tokens)
    }

    /// Render a conversation for training: a trailing assistant `final`
    /// message ends with `<|return|>` instead of `<|end|>`.
    pub fn render_conversation_for_training(
        &self,
        conversation: &Conversation,
        _config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Rank>, HarmonyError> {
        let options = RenderOptions {
            conversation_has_function_tools: conversation_has_function_tools(conversation),
        };

        let mut tokens = Vec::new();
        let last = conversation.messages.len().checked_sub(1);
        for (i, message) in conversation.messages.iter().enumerate() {
            let ends_sampling = Some(i) == last
                && message.author.role == Role::Assistant
                && message.channel.as_deref() == Some(FINAL_CHANNEL)
                && message.recipient.is_none();
            let marker = ends_sampling.then_some(literals::RETURN);
            self.render_message_with_marker(message, &mut tokens, Some(&options), marker)?;
        }
        Ok(tokens)
    }

    /// Parse a finished completion token sequence into messages.
    ///
    /// `role` pre-seeds the author for streams that begin after a rendered
    /// `<|start|>` + role prime. A trailing in-progress message is dropped.
    pub fn parse_messages_from_completion_tokens(
        &self,
        tokens: &[Rank],
        role: Option<Role>,
    ) -> Result<Vec<Message>, HarmonyError> {
        let mut parser = StreamableParser::new(self, role);
        for &token in tokens {
            parser.process(token)?;
        }
        parser.process_eos()?;
        Ok(parser.into_messages())
    }

    /// Strict variant: a stream that ends mid-message fails with
    /// [`HarmonyError::UnterminatedMessage`].
    pub fn parse_messages_from_completion_tokens_strict(
        &self,
        tokens: &[Rank],
        role: Option<Role>,
    ) -> Result<Vec<Message>, HarmonyError> {
        let mut parser = StreamableParser::new(self, role);
        for &token in tokens {
            parser.process(token)?;
        }
        parser.process_eos()?;
        if parser.is_mid_message() {
            return Err(HarmonyError::UnterminatedMessage);
        }
        Ok(parser.into_messages())
    }
}

/// Whether any system or developer message carries a `functions` namespace.
fn conversation_has_function_tools(conversation: &Conversation) -> bool {
    conversation.messages.iter().any(|message| {
        message.content.iter().any(|content| match content {
            Content::SystemContent(system) => system
                .tools
                .as_ref()
                .is_some_and(|tools| tools.contains_key("functions")),
            Content::DeveloperContent(developer) => developer
                .tools
                .as_ref()
                .is_some_and(|tools| tools.contains_key("functions")),
            Content::Text(_) => false,
        })
    })
}

/// Keep every message except assistant `analysis` turns that precede the
/// last assistant `final` turn. Applying this twice equals applying it once.
fn drop_interior_analysis(messages: &[Message]) -> Vec<&Message> {
    let last_final = messages.iter().rposition(|message| {
        message.author.role == Role::Assistant
            && message.channel.as_deref() == Some(FINAL_CHANNEL)
    });

    messages
        .iter()
        .enumerate()
        .filter(|(i, message)| {
            let interior_analysis = message.author.role == Role::Assistant
                && message.channel.as_deref() == Some(ANALYSIS_CHANNEL)
                && last_final.is_some_and(|f| *i < f);
            !interior_analysis
        })
        .map(|(_, message)| message)
        .collect()
}

/// Assemble the structured plain-text body of a system message.
fn render_system_content(system: &SystemContent, options: &RenderOptions) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(identity) = &system.model_identity {
        lines.push(identity.clone());
    }
    if let Some(cutoff) = &system.knowledge_cutoff {
        lines.push(format!("Knowledge cutoff: {cutoff}"));
    }
    if let Some(date) = &system.conversation_start_date {
        lines.push(format!("Current date: {date}"));
    }
    if let Some(effort) = &system.reasoning_effort {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("Reasoning: {effort}"));
    }
    if let Some(tools) = &system.tools {
        if !tools.is_empty() {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(render_tools_section(tools));
        }
    }
    if let Some(channel_config) = &system.channel_config {
        if channel_config.channel_required && !channel_config.valid_channels.is_empty() {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(format!(
                "Valid channels: {}. Channel must be included for every message.",
                channel_config.valid_channels.join(", ")
            ));
            if options.conversation_has_function_tools {
                lines.push(
                    "Calls to these tools must go to the commentary channel: 'functions'."
                        .to_string(),
                );
            }
        }
    }

    lines.join("\n")
}

/// Assemble the structured plain-text body of a developer message.
fn render_developer_content(developer: &DeveloperContent) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(instructions) = &developer.instructions {
        sections.push(format!("# Instructions\n\n{instructions}"));
    }
    if let Some(tools) = &developer.tools {
        if !tools.is_empty() {
            sections.push(render_tools_section(tools));
        }
    }

    sections.join("\n\n")
}
