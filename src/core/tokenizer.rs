//! BPE tokenizer with reserved special tokens.
//!
//! A [`Tokenizer`] owns three immutable tables: the ordinary byte-string
//! vocabulary and its inverse, and the special-token table whose ranks live
//! in a disjoint high range. Encoding splits the input with a fixed
//! pretokenizer regex and BPE-merges each piece independently; special
//! literals are located up front with an Aho-Corasick automaton so BPE never
//! sees them. Everything but the LRU chunk cache is read-only after
//! construction, so one tokenizer can be shared across threads.

use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use aho_corasick::AhoCorasick;
use fancy_regex::Regex;
use lru::LruCache;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use thiserror::Error;

use super::bpe::byte_pair_encode;
use super::vocab::{build_decoder, VocabError};
use super::Rank;

/// Errors raised by encoding and decoding.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("regex error: {0}")]
    Regex(#[from] fancy_regex::Error),
    #[error("vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("aho-corasick build error: {0}")]
    AhoCorasick(#[from] aho_corasick::BuildError),
    #[error("no vocabulary entry for byte sequence {0:?}")]
    VocabularyGap(Vec<u8>),
    #[error("rank {0} is not in the vocabulary or the special-token table")]
    DecodeRank(Rank),
    #[error("decoded bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Default size of the per-tokenizer LRU cache of encoded pieces.
const DEFAULT_CACHE_SIZE: usize = 4096;

/// BPE tokenizer over an immutable vocabulary, special-token table and
/// pretokenizer regex.
///
/// All read paths are lock-free; the chunk cache sits behind a [`Mutex`] and
/// is the only mutable state, so `&Tokenizer` is safe to share across
/// threads and encode/decode are pure functions of their inputs.
#[derive(Debug)]
pub struct Tokenizer {
    encoder: FxHashMap<Vec<u8>, Rank>,
    decoder: FxHashMap<Rank, Vec<u8>>,
    special_tokens: FxHashMap<String, Rank>,
    special_tokens_decoder: FxHashMap<Rank, String>,
    special_token_strings: Vec<String>,
    regex: Regex,
    special_matcher: Option<AhoCorasick>,
    chunk_cache: Mutex<LruCache<u64, Vec<Rank>>>,
}

impl Tokenizer {
    /// Build a tokenizer from an encoder map, special tokens and a
    /// pretokenizer pattern.
    pub fn new(
        encoder: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
    ) -> Result<Self, TokenizerError> {
        Self::with_cache_size(encoder, special_tokens, pattern, DEFAULT_CACHE_SIZE)
    }

    /// Build a tokenizer with an explicit chunk-cache capacity.
    pub fn with_cache_size(
        encoder: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        let decoder = build_decoder(&encoder);
        let special_tokens_decoder: FxHashMap<Rank, String> = special_tokens
            .iter()
            .map(|(k, v)| (*v, k.clone()))
            .collect();

        let regex = Regex::new(pattern)?;

        let special_token_strings: Vec<String> = special_tokens.keys().cloned().collect();
        let special_matcher = if special_token_strings.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&special_token_strings)?)
        };

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let chunk_cache = Mutex::new(LruCache::new(cache_size));

        Ok(Self {
            encoder,
            decoder,
            special_tokens,
            special_tokens_decoder,
            special_token_strings,
            regex,
            special_matcher,
            chunk_cache,
        })
    }

    /// BPE-encode one pretokenized piece.
    ///
    /// Whole-piece vocabulary hits bypass both the merge loop and the
    /// cache; anything else is memoized in the LRU cache, keyed by the
    /// FxHash of the piece bytes. The lock is taken once per lookup and
    /// a miss runs the merge while the slot is held.
    fn encode_piece(&self, piece: &[u8]) -> Result<Vec<Rank>, TokenizerError> {
        if let Some(&rank) = self.encoder.get(piece) {
            return Ok(vec![rank]);
        }

        let mut hasher = FxHasher::default();
        hasher.write(piece);
        let key = hasher.finish();

        match self.chunk_cache.lock() {
            Ok(mut cache) => cache
                .try_get_or_insert(key, || byte_pair_encode(piece, &self.encoder))
                .map(|tokens| tokens.clone()),
            // Poisoned cache: encode without memoizing.
            Err(_) => byte_pair_encode(piece, &self.encoder),
        }
    }

    /// Encode a stretch of ordinary text into `out`, returning the number of
    /// ranks contributed by the final pretokenizer piece.
    fn encode_ordinary_into(
        &self,
        text: &str,
        out: &mut Vec<Rank>,
    ) -> Result<usize, TokenizerError> {
        let mut last_piece_token_len = 0;
        for m in self.regex.find_iter(text) {
            let m = m?;
            let piece = text[m.start()..m.end()].as_bytes();
            let before = out.len();
            out.extend(self.encode_piece(piece)?);
            last_piece_token_len = out.len() - before;
        }
        Ok(last_piece_token_len)
    }

    /// Encode text with special literals never recognized.
    ///
    /// Reserved literals appearing in the input are treated as ordinary text
    /// and BPE-encoded byte by byte; no rank in the output lies in the
    /// reserved range.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<Rank>, TokenizerError> {
        let mut out = Vec::new();
        self.encode_ordinary_into(text, &mut out)?;
        Ok(out)
    }

    /// Encode text, mapping occurrences of the allowed special literals to
    /// their reserved ranks.
    ///
    /// Ordinary stretches between specials go through the pretokenizer and
    /// BPE. Literals outside `allowed_special` stay in the ordinary
    /// stretches. Returns the ranks and `last_piece_token_len`, the number of
    /// ranks contributed by the final segment (zero when the text ends with a
    /// special token), which streaming callers use to re-encode a growing
    /// suffix.
    pub fn encode(
        &self,
        text: &str,
        allowed_special: &FxHashSet<&str>,
    ) -> Result<(Vec<Rank>, usize), TokenizerError> {
        let mut out = Vec::new();

        let Some(matcher) = &self.special_matcher else {
            let last = self.encode_ordinary_into(text, &mut out)?;
            return Ok((out, last));
        };

        let mut last_piece_token_len = 0;
        let mut pos = 0;
        for m in matcher.find_iter(text) {
            let literal = &self.special_token_strings[m.pattern().as_usize()];
            if !allowed_special.contains(literal.as_str()) {
                continue;
            }
            if m.start() > pos {
                last_piece_token_len =
                    self.encode_ordinary_into(&text[pos..m.start()], &mut out)?;
            }
            out.push(self.special_tokens[literal]);
            last_piece_token_len = 0;
            pos = m.end();
        }
        if pos < text.len() {
            last_piece_token_len = self.encode_ordinary_into(&text[pos..], &mut out)?;
        }

        Ok((out, last_piece_token_len))
    }

    /// Encode text with every special literal allowed.
    pub fn encode_with_special_tokens(&self, text: &str) -> Result<Vec<Rank>, TokenizerError> {
        let allowed: FxHashSet<&str> = self
            .special_token_strings
            .iter()
            .map(|s| s.as_str())
            .collect();
        Ok(self.encode(text, &allowed)?.0)
    }

    /// Decode ranks to their concatenated byte images.
    pub fn decode_bytes(&self, tokens: &[Rank]) -> Result<Vec<u8>, TokenizerError> {
        let mut out = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            out.extend_from_slice(self.token_bytes(token)?);
        }
        Ok(out)
    }

    /// Decode ranks to a UTF-8 string.
    pub fn decode_utf8(&self, tokens: &[Rank]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|_| TokenizerError::InvalidUtf8)
    }

    /// Byte image of a single rank, ordinary or special.
    pub fn token_bytes(&self, token: Rank) -> Result<&[u8], TokenizerError> {
        if let Some(bytes) = self.decoder.get(&token) {
            Ok(bytes)
        } else if let Some(literal) = self.special_tokens_decoder.get(&token) {
            Ok(literal.as_bytes())
        } else {
            Err(TokenizerError::DecodeRank(token))
        }
    }

    /// Whether a rank names a reserved special token.
    pub fn is_special_token(&self, token: Rank) -> bool {
        self.special_tokens_decoder.contains_key(&token)
    }

    /// Rank of a special literal, if this tokenizer defines it.
    pub fn special_token(&self, literal: &str) -> Option<Rank> {
        self.special_tokens.get(literal).copied()
    }

    /// Literal of a reserved rank, if this tokenizer defines it.
    pub fn special_token_literal(&self, token: Rank) -> Option<&str> {
        self.special_tokens_decoder.get(&token).map(|s| s.as_str())
    }

    /// The special-token table.
    pub fn special_tokens(&self) -> &FxHashMap<String, Rank> {
        &self.special_tokens
    }

    /// Total vocabulary span: highest rank plus one, specials included.
    pub fn vocab_size(&self) -> usize {
        let max_ordinary = self.decoder.keys().max().copied().unwrap_or(0);
        let max_special = self.special_tokens.values().max().copied().unwrap_or(0);
        (max_ordinary.max(max_special) + 1) as usize
    }

    /// Encode a batch of texts in parallel with specials never recognized.
    pub fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<Rank>>, TokenizerError> {
        texts.par_iter().map(|t| self.encode_ordinary(t)).collect()
    }

    /// Decode a batch of rank lists in parallel.
    pub fn decode_batch(&self, token_lists: &[Vec<Rank>]) -> Result<Vec<String>, TokenizerError> {
        token_lists.par_iter().map(|t| self.decode_utf8(t)).collect()
    }

    /// Drop every cached piece encoding.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.chunk_cache.lock() {
            cache.clear();
        }
    }

    /// Number of cached piece encodings.
    pub fn cache_len(&self) -> usize {
        self.chunk_cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}
