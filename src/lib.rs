//! Codec for the harmony structured chat protocol.
//!
//! Converts between a typed conversation of messages — roles, channels,
//! recipients, content-type constraints — and the flat token sequences an
//! open-weight model consumes and emits, and parses those sequences back
//! incrementally as the model streams them.
//!
//! The crate has three tightly coupled subsystems:
//!
//! - [`core`]: a BPE tokenizer with reserved special tokens that never
//!   participate in merging
//! - [`encoding`]: the protocol renderer, interleaving BPE-encoded text
//!   with the reserved boundary and metadata tokens
//! - [`parser`]: a pull-driven state machine consuming tokens one at a
//!   time and exposing the in-progress message after each one
//!
//! ```no_run
//! use openai_harmony::{
//!     load_harmony_encoding, Conversation, HarmonyEncodingName, Message, Role,
//! };
//!
//! # fn main() -> Result<(), openai_harmony::HarmonyError> {
//! let encoding = load_harmony_encoding(HarmonyEncodingName::HarmonyGptOss)?;
//! let conversation = Conversation::from_messages([
//!     Message::from_role_and_content(Role::User, "What is 2 + 2?"),
//! ]);
//! let tokens =
//!     encoding.render_conversation_for_completion(&conversation, Role::Assistant, None)?;
//! # let _ = tokens;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod core;
pub mod encoding;
pub mod error;
pub mod parser;
pub mod registry;
pub mod tools;

pub use chat::{
    Author, ChannelConfig, Content, Conversation, DeveloperContent, Message, ReasoningEffort,
    Role, SystemContent, TextContent, ToolDescription, ToolNamespaceConfig,
};
pub use self::core::{Rank, Tokenizer, TokenizerError};
pub use encoding::{HarmonyEncoding, RenderConversationConfig, RenderOptions};
pub use error::HarmonyError;
pub use parser::{EndMarker, StreamState, StreamableParser};
pub use registry::{
    harmony_special_tokens, load_harmony_encoding, load_harmony_encoding_from_bytes,
    HarmonyEncodingName, O200K_HARMONY_PATTERN,
};
