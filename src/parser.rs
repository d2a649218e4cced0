//! Pull-driven streaming parser for harmony token streams.
//!
//! One parser per stream, fed one rank at a time. The machine has three
//! states:
//!
//! - `ExpectStart`: only `<|start|>` is legal
//! - `Header`: optional author-name text, then exactly one role special
//! - `Content`: a mixed stream in which `<|channel|>`, `<|constrain|>` and
//!   `<|message|>` redirect subsequent text, and `<|end|>` / `<|call|>` /
//!   `<|return|>` finalize the message
//!
//! Body bytes go through a [`Utf8Assembler`] so `last_content_delta` is
//! always complete UTF-8 even when a token ends mid-code-point. All other
//! text (names, channels, content types) accumulates as raw bytes and is
//! validated when the run ends.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::chat::{Author, Content, Message, Role, TextContent};
use crate::core::{Rank, Utf8Assembler};
use crate::encoding::{literals, HarmonyEncoding};
use crate::error::HarmonyError;

/// Parser state, serialized as a lowercase tag in state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    ExpectStart,
    Header,
    Content,
}

/// Which terminal special closed a completed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndMarker {
    /// `<|end|>`: an ordinary completed message.
    Normal,
    /// `<|call|>`: the assistant is invoking a tool.
    ToolCall,
    /// `<|return|>`: a final assistant turn, sampling is done.
    FinalReturn,
}

/// Destination of ordinary text ranks inside the `Content` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    /// Between the role special and the first marker; holds recipient text.
    Meta,
    Channel,
    ContentType,
    Body,
}

/// Incremental parser over a borrowed encoding.
#[derive(Debug)]
pub struct StreamableParser<'a> {
    encoding: &'a HarmonyEncoding,
    state: StreamState,
    sink: Sink,
    tokens: Vec<Rank>,
    messages: Vec<Message>,
    end_markers: Vec<EndMarker>,

    header_bytes: Vec<u8>,
    meta_bytes: Vec<u8>,
    channel_bytes: Vec<u8>,
    content_type_bytes: Vec<u8>,
    assembler: Utf8Assembler,

    content: String,
    last_content_delta: String,
    current_role: Option<Role>,
    current_name: Option<String>,
    current_channel: Option<String>,
    current_recipient: Option<String>,
    current_content_type: Option<String>,
}

impl<'a> StreamableParser<'a> {
    /// Create a parser. When `role` is given the stream is a completion
    /// primed with `<|start|>` and that role, so parsing begins directly in
    /// the `Content` state with the author preset.
    pub fn new(encoding: &'a HarmonyEncoding, role: Option<Role>) -> Self {
        let state = if role.is_some() {
            StreamState::Content
        } else {
            StreamState::ExpectStart
        };
        Self {
            encoding,
            state,
            sink: Sink::Meta,
            tokens: Vec::new(),
            messages: Vec::new(),
            end_markers: Vec::new(),
            header_bytes: Vec::new(),
            meta_bytes: Vec::new(),
            channel_bytes: Vec::new(),
            content_type_bytes: Vec::new(),
            assembler: Utf8Assembler::new(),
            content: String::new(),
            last_content_delta: String::new(),
            current_role: role,
            current_name: None,
            current_channel: None,
            current_recipient: None,
            current_content_type: None,
        }
    }

    /// Consume one token and advance the machine.
    pub fn process(&mut self, token: Rank) -> Result<&mut Self, HarmonyError> {
        self.tokens.push(token);
        self.last_content_delta.clear();

        match self.state {
            StreamState::ExpectStart => {
                if self.is_literal(token, literals::START) {
                    self.state = StreamState::Header;
                } else {
                    return Err(self.violation(token));
                }
            }
            StreamState::Header => {
                if let Some(role) = self.encoding.role_of_token(token) {
                    let name = take_utf8(&mut self.header_bytes)?;
                    let name = name.trim();
                    self.current_name = (!name.is_empty()).then(|| name.to_string());
                    self.current_role = Some(role);
                    self.state = StreamState::Content;
                    self.sink = Sink::Meta;
                } else if self.encoding.tokenizer().is_special_token(token) {
                    return Err(self.violation(token));
                } else {
                    let bytes = self.encoding.tokenizer().token_bytes(token)?;
                    self.header_bytes.extend_from_slice(bytes);
                }
            }
            StreamState::Content => {
                if self.is_literal(token, literals::CHANNEL) {
                    self.finish_sink()?;
                    self.sink = Sink::Channel;
                } else if self.is_literal(token, literals::CONSTRAIN) {
                    self.finish_sink()?;
                    self.sink = Sink::ContentType;
                } else if self.is_literal(token, literals::MESSAGE) {
                    self.finish_sink()?;
                    self.sink = Sink::Body;
                } else if self.is_literal(token, literals::END) {
                    self.finalize_message(EndMarker::Normal, token)?;
                } else if self.is_literal(token, literals::CALL) {
                    self.finalize_message(EndMarker::ToolCall, token)?;
                } else if self.is_literal(token, literals::RETURN) {
                    self.finalize_message(EndMarker::FinalReturn, token)?;
                } else if self.encoding.tokenizer().is_special_token(token) {
                    // Role specials and `<|start|>` are illegal mid-message.
                    return Err(self.violation(token));
                } else {
                    let bytes = self.encoding.tokenizer().token_bytes(token)?.to_vec();
                    match self.sink {
                        Sink::Meta => self.meta_bytes.extend_from_slice(&bytes),
                        Sink::Channel => self.channel_bytes.extend_from_slice(&bytes),
                        Sink::ContentType => self.content_type_bytes.extend_from_slice(&bytes),
                        Sink::Body => {
                            let delta = self.assembler.push_bytes(&bytes);
                            self.content.push_str(&delta);
                            self.last_content_delta = delta;
                        }
                    }
                }
            }
        }
        Ok(self)
    }

    /// Signal end of stream.
    ///
    /// Fails with [`HarmonyError::TruncatedUtf8`] when the body byte tail is
    /// not a complete code point. A message still in progress is left to the
    /// caller: the bulk parser drops it, the strict variant reports it.
    pub fn process_eos(&mut self) -> Result<&mut Self, HarmonyError> {
        if self.assembler.has_pending() {
            return Err(HarmonyError::TruncatedUtf8);
        }
        Ok(self)
    }

    fn is_literal(&self, token: Rank, literal: &str) -> bool {
        self.encoding.tokenizer().special_token(literal) == Some(token)
    }

    fn violation(&self, token: Rank) -> HarmonyError {
        HarmonyError::ProtocolViolation {
            token,
            position: self.tokens.len() - 1,
            state: self.state,
        }
    }

    /// Close out the text run feeding the current sink.
    fn finish_sink(&mut self) -> Result<(), HarmonyError> {
        match self.sink {
            Sink::Meta => {
                let text = take_utf8(&mut self.meta_bytes)?;
                let text = text.trim();
                if !text.is_empty() {
                    let recipient = text.strip_prefix("to=").unwrap_or(text);
                    self.current_recipient = Some(recipient.to_string());
                }
            }
            Sink::Channel => {
                let text = take_utf8(&mut self.channel_bytes)?;
                // The recipient marker rides on the channel text as a suffix.
                if let Some(idx) = text.rfind(" to=") {
                    self.current_channel = Some(text[..idx].trim().to_string());
                    self.current_recipient = Some(text[idx + " to=".len()..].trim().to_string());
                } else {
                    self.current_channel = Some(text.trim().to_string());
                }
            }
            Sink::ContentType => {
                let text = take_utf8(&mut self.content_type_bytes)?;
                self.current_content_type = Some(text.trim().to_string());
            }
            Sink::Body => {}
        }
        Ok(())
    }

    fn finalize_message(&mut self, marker: EndMarker, token: Rank) -> Result<(), HarmonyError> {
        self.finish_sink()?;
        if self.assembler.has_pending() {
            return Err(HarmonyError::TruncatedUtf8);
        }

        // The content state is only reachable once a role is known.
        let Some(role) = self.current_role else {
            return Err(self.violation(token));
        };
        let author = Author {
            role,
            name: self.current_name.take(),
        };
        self.messages.push(Message {
            author,
            recipient: self.current_recipient.take(),
            content: vec![Content::Text(TextContent::new(std::mem::take(
                &mut self.content,
            )))],
            channel: self.current_channel.take(),
            content_type: self.current_content_type.take(),
        });
        self.end_markers.push(marker);

        self.current_role = None;
        self.last_content_delta.clear();
        self.state = StreamState::ExpectStart;
        self.sink = Sink::Meta;
        Ok(())
    }

    /// Whether a message is currently in progress.
    pub fn is_mid_message(&self) -> bool {
        match self.state {
            StreamState::ExpectStart => false,
            StreamState::Header => true,
            // A preset role with nothing consumed yet is not "in progress".
            StreamState::Content => {
                !self.tokens.is_empty()
                    || !self.content.is_empty()
                    || self.current_channel.is_some()
            }
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn current_role(&self) -> Option<Role> {
        self.current_role
    }

    pub fn current_channel(&self) -> Option<&str> {
        self.current_channel.as_deref()
    }

    pub fn current_recipient(&self) -> Option<&str> {
        self.current_recipient.as_deref()
    }

    pub fn current_content_type(&self) -> Option<&str> {
        self.current_content_type.as_deref()
    }

    /// The full body accumulated for the in-progress message.
    pub fn current_content(&self) -> &str {
        &self.content
    }

    /// The fragment contributed by the most recent token; empty when that
    /// token was structural.
    pub fn last_content_delta(&self) -> &str {
        &self.last_content_delta
    }

    /// Completed messages so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// End markers aligned with [`Self::messages`].
    pub fn end_markers(&self) -> &[EndMarker] {
        &self.end_markers
    }

    /// Every token consumed so far, in order.
    pub fn tokens(&self) -> &[Rank] {
        &self.tokens
    }

    /// Consume the parser, keeping only the completed messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Cross-language JSON snapshot of the parser state.
    pub fn state_json(&self) -> serde_json::Value {
        json!({
            "state": self.state,
            "tokens": self.tokens,
            "messages": self.messages,
            "current_role": self.current_role,
            "current_channel": self.current_channel,
            "current_recipient": self.current_recipient,
            "current_content_type": self.current_content_type,
            "current_content": self.content,
        })
    }
}

/// Drain a byte buffer into a string, failing when it is not valid UTF-8.
fn take_utf8(bytes: &mut Vec<u8>) -> Result<String, HarmonyError> {
    String::from_utf8(std::mem::take(bytes)).map_err(|_| HarmonyError::TruncatedUtf8)
}
