//! Encoding registry: names, the harmony special-token table, and loaders.
//!
//! The only defined encoding is `o200k_harmony`: the o200k ordinary
//! vocabulary (199,998 ranks loaded from an external tiktoken-format asset)
//! plus the reserved harmony specials at fixed offsets from 200000. Keeping
//! the reserved range disjoint and the offsets fixed is what lets every
//! consumer agree on which integer means which literal.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::core::{load_tiktoken_bpe, load_tiktoken_bpe_file, Rank, Tokenizer};
use crate::encoding::HarmonyEncoding;
use crate::error::HarmonyError;

/// Pretokenizer pattern of the o200k family.
///
/// Alternation arms: case-aware letter runs with an optional non-letter
/// prefix and contraction suffix, 1–3 digit runs, punctuation runs with
/// trailing newlines, whitespace-newline groups, and whitespace runs.
pub const O200K_HARMONY_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Environment variable naming the o200k_harmony vocabulary asset.
pub const O200K_HARMONY_VOCAB_ENV: &str = "O200K_HARMONY_VOCAB";

/// Default path of the vocabulary asset.
const O200K_HARMONY_VOCAB_PATH: &str = "vocabs/o200k_harmony.tiktoken";

/// Reserved ranks of the harmony special tokens.
///
/// Fixed offsets above the ordinary o200k vocabulary, which tops out at
/// rank 199,997.
pub mod harmony_tokens {
    use super::Rank;

    pub const START: Rank = 200000;
    pub const END: Rank = 200001;
    pub const MESSAGE: Rank = 200002;
    pub const CHANNEL: Rank = 200003;
    pub const CONSTRAIN: Rank = 200004;
    pub const CALL: Rank = 200005;
    pub const RETURN: Rank = 200006;
    pub const REFUSAL: Rank = 200007;
    pub const SYSTEM: Rank = 200008;
    pub const USER: Rank = 200009;
    pub const ASSISTANT: Rank = 200010;
    pub const DEVELOPER: Rank = 200011;
    pub const TOOL: Rank = 200012;
}

/// The harmony special-token table.
pub fn harmony_special_tokens() -> FxHashMap<String, Rank> {
    let mut special = FxHashMap::default();
    special.insert("<|start|>".to_string(), harmony_tokens::START);
    special.insert("<|end|>".to_string(), harmony_tokens::END);
    special.insert("<|message|>".to_string(), harmony_tokens::MESSAGE);
    special.insert("<|channel|>".to_string(), harmony_tokens::CHANNEL);
    special.insert("<|constrain|>".to_string(), harmony_tokens::CONSTRAIN);
    special.insert("<|call|>".to_string(), harmony_tokens::CALL);
    special.insert("<|return|>".to_string(), harmony_tokens::RETURN);
    special.insert("<|refusal|>".to_string(), harmony_tokens::REFUSAL);
    special.insert("<|system|>".to_string(), harmony_tokens::SYSTEM);
    special.insert("<|user|>".to_string(), harmony_tokens::USER);
    special.insert("<|assistant|>".to_string(), harmony_tokens::ASSISTANT);
    special.insert("<|developer|>".to_string(), harmony_tokens::DEVELOPER);
    special.insert("<|tool|>".to_string(), harmony_tokens::TOOL);
    special
}

/// Names of the defined harmony encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarmonyEncodingName {
    HarmonyGptOss,
}

impl HarmonyEncodingName {
    /// Name of the tokenizer this encoding is built on.
    pub fn tokenizer_name(&self) -> &'static str {
        match self {
            HarmonyEncodingName::HarmonyGptOss => "o200k_harmony",
        }
    }
}

impl fmt::Display for HarmonyEncodingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarmonyEncodingName::HarmonyGptOss => f.write_str("HarmonyGptOss"),
        }
    }
}

impl FromStr for HarmonyEncodingName {
    type Err = HarmonyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HarmonyGptOss" => Ok(HarmonyEncodingName::HarmonyGptOss),
            other => Err(HarmonyError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Load a harmony encoding, reading the ordinary vocabulary from the
/// external asset.
///
/// The asset path comes from [`O200K_HARMONY_VOCAB_ENV`] when set, else the
/// default `vocabs/o200k_harmony.tiktoken`. Construction does no other I/O
/// and the returned encoding is immutable and thread-safe.
pub fn load_harmony_encoding(name: HarmonyEncodingName) -> Result<HarmonyEncoding, HarmonyError> {
    match name {
        HarmonyEncodingName::HarmonyGptOss => {
            let path = std::env::var(O200K_HARMONY_VOCAB_ENV)
                .unwrap_or_else(|_| O200K_HARMONY_VOCAB_PATH.to_string());
            debug!(%path, "loading o200k_harmony vocabulary asset");
            let encoder = load_tiktoken_bpe_file(&path)?;
            let tokenizer =
                Tokenizer::new(encoder, harmony_special_tokens(), O200K_HARMONY_PATTERN)?;
            info!(
                encoding = name.tokenizer_name(),
                vocab_size = tokenizer.vocab_size(),
                "loaded harmony encoding"
            );
            Ok(HarmonyEncoding::new(name.tokenizer_name(), tokenizer))
        }
    }
}

/// Load a harmony encoding from an in-memory vocabulary blob.
///
/// For embedders that ship the asset themselves.
pub fn load_harmony_encoding_from_bytes(
    name: HarmonyEncodingName,
    vocab_data: &[u8],
) -> Result<HarmonyEncoding, HarmonyError> {
    match name {
        HarmonyEncodingName::HarmonyGptOss => {
            let encoder = load_tiktoken_bpe(vocab_data)?;
            let tokenizer =
                Tokenizer::new(encoder, harmony_special_tokens(), O200K_HARMONY_PATTERN)?;
            Ok(HarmonyEncoding::new(name.tokenizer_name(), tokenizer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_name_strings() {
        assert_eq!(HarmonyEncodingName::HarmonyGptOss.to_string(), "HarmonyGptOss");
        assert_eq!(
            "HarmonyGptOss".parse::<HarmonyEncodingName>().unwrap(),
            HarmonyEncodingName::HarmonyGptOss
        );
        assert!(matches!(
            "o100k_harmony".parse::<HarmonyEncodingName>(),
            Err(HarmonyError::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_special_ranks_are_disjoint_and_fixed() {
        let specials = harmony_special_tokens();
        assert_eq!(specials.len(), 13);
        assert_eq!(specials["<|start|>"], 200000);
        assert_eq!(specials["<|tool|>"], 200012);
        // No literal maps into the ordinary o200k range.
        assert!(specials.values().all(|&rank| rank >= 200000));
    }

    #[test]
    fn test_load_from_bytes() {
        // "Hi" base64 = "SGk=", "a" = "YQ=="
        let encoding = load_harmony_encoding_from_bytes(
            HarmonyEncodingName::HarmonyGptOss,
            b"SGk= 0\nYQ== 1\n",
        )
        .unwrap();
        assert_eq!(encoding.name(), "o200k_harmony");
        assert_eq!(
            encoding.tokenizer().special_token("<|start|>"),
            Some(200000)
        );
    }
}
