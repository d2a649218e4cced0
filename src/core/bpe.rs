//! Low-level byte-pair encoding over a ranked vocabulary.
//!
//! A piece starts as a run of single-byte parts. Each part is annotated with
//! the rank of the two-part window beginning at it (or `Rank::MAX` when the
//! window has no vocabulary entry). The loop merges the window with the
//! smallest rank, leftmost on ties, recomputes the two windows overlapping
//! the merge point, and stops when no window has a rank. The surviving parts
//! are looked up to produce the output ranks.
//!
//! Merges only ever create byte ranges that exist in the vocabulary, so the
//! only way an encode can fail is a single byte with no vocabulary entry.

use rustc_hash::FxHashMap;

use super::tokenizer::TokenizerError;
use super::Rank;

/// Encode one pretokenized piece to ranks.
///
/// The decoded concatenation of the returned ranks is byte-for-byte equal to
/// `piece`. Fails with [`TokenizerError::VocabularyGap`] when a surviving
/// part (in practice: a single byte) has no vocabulary entry.
pub fn byte_pair_encode(
    piece: &[u8],
    encoder: &FxHashMap<Vec<u8>, Rank>,
) -> Result<Vec<Rank>, TokenizerError> {
    debug_assert!(!piece.is_empty());

    if piece.len() == 1 {
        return match encoder.get(piece) {
            Some(&rank) => Ok(vec![rank]),
            None => Err(TokenizerError::VocabularyGap(piece.to_vec())),
        };
    }

    let parts = byte_pair_merge(piece, encoder);
    let mut out = Vec::with_capacity(parts.len() - 1);
    for window in parts.windows(2) {
        let span = &piece[window[0].0..window[1].0];
        match encoder.get(span) {
            Some(&rank) => out.push(rank),
            None => return Err(TokenizerError::VocabularyGap(span.to_vec())),
        }
    }
    Ok(out)
}

/// Run the merge loop and return the surviving part boundaries.
///
/// The result holds `(byte_offset, window_rank)` pairs plus a sentinel at
/// `piece.len()`; consecutive offsets delimit the final parts.
fn byte_pair_merge(piece: &[u8], encoder: &FxHashMap<Vec<u8>, Rank>) -> Vec<(usize, Rank)> {
    let mut parts: Vec<(usize, Rank)> = Vec::with_capacity(piece.len() + 1);

    // (rank, index into parts) of the current best window.
    let mut min_rank: (Rank, usize) = (Rank::MAX, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = *encoder.get(&piece[i..i + 2]).unwrap_or(&Rank::MAX);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    parts.push((piece.len() - 1, Rank::MAX));
    parts.push((piece.len(), Rank::MAX));

    // Rank of the window spanning parts[i] and parts[i + 1] after a merge.
    let window_rank = |parts: &[(usize, Rank)], i: usize| {
        if i + 3 < parts.len() {
            *encoder
                .get(&piece[parts[i].0..parts[i + 3].0])
                .unwrap_or(&Rank::MAX)
        } else {
            Rank::MAX
        }
    };

    while min_rank.0 != Rank::MAX {
        let i = min_rank.1;
        // The windows overlapping the merge point are the one starting at the
        // previous part and the one starting at the merged part itself.
        if i > 0 {
            parts[i - 1].1 = window_rank(&parts, i - 1);
        }
        parts[i].1 = window_rank(&parts, i);
        parts.remove(i + 1);

        // Leftmost scan breaks rank ties at the smallest index.
        min_rank = (Rank::MAX, usize::MAX);
        for (j, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, j);
            }
        }
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge_vocab() -> FxHashMap<Vec<u8>, Rank> {
        let mut encoder = FxHashMap::default();
        for (i, b) in [b'u', b'n', b'r', b'e', b'l', b'a', b't', b'd']
            .into_iter()
            .enumerate()
        {
            encoder.insert(vec![b], i as Rank);
        }
        encoder.insert(b"re".to_vec(), 8);
        encoder.insert(b"at".to_vec(), 9);
        encoder.insert(b"ed".to_vec(), 10);
        encoder.insert(b"un".to_vec(), 11);
        encoder.insert(b"ated".to_vec(), 12);
        encoder.insert(b"rel".to_vec(), 13);
        encoder.insert(b"related".to_vec(), 14);
        encoder.insert(b"unrelated".to_vec(), 15);
        encoder
    }

    #[test]
    fn test_merges_to_single_token() {
        let encoder = merge_vocab();
        assert_eq!(byte_pair_encode(b"unrelated", &encoder).unwrap(), vec![15]);
        assert_eq!(byte_pair_encode(b"un", &encoder).unwrap(), vec![11]);
    }

    #[test]
    fn test_partial_merges() {
        let encoder = merge_vocab();
        assert_eq!(byte_pair_encode(b"unat", &encoder).unwrap(), vec![11, 9]);
        // No pair entry for "nu", so both bytes survive.
        assert_eq!(byte_pair_encode(b"nu", &encoder).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_single_byte() {
        let encoder = merge_vocab();
        assert_eq!(byte_pair_encode(b"u", &encoder).unwrap(), vec![0]);
    }

    #[test]
    fn test_vocabulary_gap_on_unknown_byte() {
        let encoder = merge_vocab();
        let err = byte_pair_encode(b"z", &encoder).unwrap_err();
        assert!(matches!(err, TokenizerError::VocabularyGap(bytes) if bytes == b"z"));
    }

    #[test]
    fn test_lower_rank_merges_first() {
        // "ab" and "bc" both exist; "ab" has the lower rank and must win,
        // leaving "c" unmerged since "abc" is absent.
        let mut encoder = FxHashMap::default();
        encoder.insert(b"a".to_vec(), 0);
        encoder.insert(b"b".to_vec(), 1);
        encoder.insert(b"c".to_vec(), 2);
        encoder.insert(b"ab".to_vec(), 3);
        encoder.insert(b"bc".to_vec(), 4);
        assert_eq!(byte_pair_encode(b"abc", &encoder).unwrap(), vec![3, 2]);
    }

    #[test]
    fn test_leftmost_tie_break() {
        // Two disjoint windows with the same rank: the leftmost merges first.
        // Both end up merged either way; exercise determinism across repeats.
        let mut encoder = FxHashMap::default();
        for b in [b'x', b'y'] {
            encoder.insert(vec![b], b as Rank);
        }
        encoder.insert(b"xy".to_vec(), 300);
        let first = byte_pair_encode(b"xyxy", &encoder).unwrap();
        for _ in 0..8 {
            assert_eq!(byte_pair_encode(b"xyxy", &encoder).unwrap(), first);
        }
        assert_eq!(first, vec![300, 300]);
    }

    #[test]
    fn test_roundtrip_bytes() {
        let mut encoder = FxHashMap::default();
        for b in 0u8..=255 {
            encoder.insert(vec![b], b as Rank);
        }
        encoder.insert(b"he".to_vec(), 256);
        encoder.insert(b"llo".to_vec(), 257);
        let tokens = byte_pair_encode(b"hello", &encoder).unwrap();
        let decoded: Vec<u8> = tokens
            .iter()
            .flat_map(|r| {
                encoder
                    .iter()
                    .find(|(_, &v)| v == *r)
                    .map(|(k, _)| k.clone())
                    .unwrap()
            })
            .collect();
        assert_eq!(decoded, b"hello");
    }
}
