//! Vocabulary loading for the tiktoken text format.
//!
//! The ordinary vocabulary ships as a plain-text asset with one entry per
//! line: the token bytes base64-encoded, a single space, and the decimal
//! rank. Lower ranks merge earlier during BPE.
//!
//! ```text
//! cmU= 17
//! bG93 4
//! bG93ZXI= 901
//! ```
//!
//! The full `o200k_harmony` asset carries 199,998 entries; reserved special
//! tokens are not part of the file and live in a disjoint range above it
//! (see [`crate::registry`]).

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::Rank;

/// Errors raised while parsing a vocabulary asset.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("vocabulary line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a tiktoken-format vocabulary from raw bytes.
///
/// Blank lines are permitted anywhere. Errors report the 1-based line
/// number of the offending entry.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let mut encoder = FxHashMap::default();
    for (idx, line) in data.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let (token, rank) = parse_entry(line).map_err(|reason| VocabError::Parse {
            line: idx + 1,
            reason,
        })?;
        encoder.insert(token, rank);
    }
    Ok(encoder)
}

/// Split one `base64-token rank` line at its first space.
///
/// The base64 alphabet never contains a space, so the first space is always
/// the column separator.
fn parse_entry(line: &[u8]) -> Result<(Vec<u8>, Rank), String> {
    let sep = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| "missing rank column".to_string())?;
    let (encoded, rest) = line.split_at(sep);

    let token = STANDARD
        .decode(encoded)
        .map_err(|e| format!("bad base64 token: {e}"))?;
    if token.is_empty() {
        return Err("token decodes to zero bytes".to_string());
    }

    let rank = std::str::from_utf8(&rest[1..])
        .ok()
        .and_then(|s| s.trim_end().parse::<Rank>().ok())
        .ok_or_else(|| "rank is not an unsigned integer".to_string())?;

    Ok((token, rank))
}

/// Read and parse a tiktoken-format vocabulary file.
pub fn load_tiktoken_bpe_file(path: &str) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let data = std::fs::read(path)?;
    load_tiktoken_bpe(&data)
}

/// Invert an encoder map into the rank-to-bytes decoder.
pub fn build_decoder(encoder: &FxHashMap<Vec<u8>, Rank>) -> FxHashMap<Rank, Vec<u8>> {
    encoder.iter().map(|(k, v)| (*v, k.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fixtures: "re" is cmU=, "low" is bG93, "lower" is bG93ZXI=.
    const THREE_ENTRIES: &[u8] = b"cmU= 17\nbG93 4\n\nbG93ZXI= 901\n";

    #[test]
    fn test_parses_entries_and_skips_blank_lines() {
        let encoder = load_tiktoken_bpe(THREE_ENTRIES).unwrap();
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.get(b"re".as_slice()), Some(&17));
        assert_eq!(encoder.get(b"low".as_slice()), Some(&4));
        assert_eq!(encoder.get(b"lower".as_slice()), Some(&901));
    }

    #[test]
    fn test_error_carries_line_number() {
        let err = load_tiktoken_bpe(b"cmU= 17\nnot-a-line\n").unwrap_err();
        match err {
            VocabError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rank_must_be_an_unsigned_integer() {
        assert!(load_tiktoken_bpe(b"cmU= seventeen\n").is_err());
        assert!(load_tiktoken_bpe(b"cmU= -3\n").is_err());
    }

    #[test]
    fn test_zero_byte_token_is_rejected() {
        // Base64 of the empty string decodes to zero bytes.
        assert!(load_tiktoken_bpe(b" 3\n").is_err());
    }

    #[test]
    fn test_decoder_inverts_encoder() {
        let encoder = load_tiktoken_bpe(THREE_ENTRIES).unwrap();
        let decoder = build_decoder(&encoder);
        assert_eq!(decoder.len(), encoder.len());
        for (bytes, rank) in &encoder {
            assert_eq!(decoder.get(rank), Some(bytes));
        }
    }
}
