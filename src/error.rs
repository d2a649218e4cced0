//! Protocol-level error type.
//!
//! Tokenizer-internal failures ([`TokenizerError`], [`VocabError`]) convert
//! into [`HarmonyError`] at the protocol boundary. Nothing is retried
//! internally; every error surfaces to the caller, and parse errors carry
//! the offending token's stream position and the parser state at the time.

use thiserror::Error;

use crate::core::{Rank, TokenizerError, VocabError};
use crate::parser::StreamState;

#[derive(Error, Debug)]
pub enum HarmonyError {
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error("could not read vocabulary asset: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("special token {0:?} is not mapped by this encoding")]
    MissingSpecialToken(String),
    #[error("unexpected token {token} at position {position} in state {state:?}")]
    ProtocolViolation {
        token: Rank,
        position: usize,
        state: StreamState,
    },
    #[error("stream ended inside a multi-byte UTF-8 sequence")]
    TruncatedUtf8,
    #[error("stream ended before the current message was terminated")]
    UnterminatedMessage,
}
