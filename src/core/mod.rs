//! Tokenizer core: pretokenization, BPE and special-token handling.
//!
//! The pieces fit together as follows:
//!
//! - [`byte_pair_encode`]: the byte-pair merge loop over one pretokenized
//!   piece
//! - [`load_tiktoken_bpe`]: tiktoken-format vocabulary loading
//! - [`Tokenizer`]: the shared immutable tokenizer — pretokenizer regex,
//!   Aho-Corasick special-token scanner, LRU piece cache
//! - [`Utf8Assembler`]: byte accumulator releasing complete UTF-8, used by
//!   the streaming protocol parser

mod bpe;
mod streaming;
mod tokenizer;
mod vocab;

/// Integer identifier of a vocabulary entry, ordinary or special.
pub type Rank = u32;

pub use bpe::byte_pair_encode;
pub use streaming::Utf8Assembler;
pub use tokenizer::{Tokenizer, TokenizerError};
pub use vocab::{build_decoder, load_tiktoken_bpe, load_tiktoken_bpe_file, VocabError};
