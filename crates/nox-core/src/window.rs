//! Sliding-window policy over the backend's KV operations.
//!
//! The cache manager is not an object with state of its own: the serve loop
//! owns the token history, the backend owns the cells, and these functions
//! keep the two aligned.

use nox_abi::{ModelBackend, Token};

/// Longest common prefix of two token sequences.
pub fn common_prefix_len(a: &[Token], b: &[Token]) -> usize {
    let n = a.len().min(b.len());
    for i in 0..n {
        if a[i] != b[i] {
            return i;
        }
    }
    n
}

/// Drop the oldest cache positions so the next decode step fits inside
/// `window`, renumbering the survivors down to `[0, window - 1)`. Returns
/// the adjusted position.
///
/// When the backend cannot renumber (`kv_can_shift` false) the position is
/// returned untouched and the next decode surfaces `KvCacheFull`.
pub fn shift<B: ModelBackend>(backend: &mut B, cur_pos: usize, window: usize) -> usize {
    if window == 0 || cur_pos < window {
        return cur_pos;
    }
    if !backend.kv_can_shift() {
        return cur_pos;
    }
    let discard = cur_pos - (window - 1);
    if discard == 0 || discard >= cur_pos {
        return cur_pos;
    }
    backend.kv_seq_rm(0, 0, discard as i32);
    backend.kv_seq_add(0, discard as i32, cur_pos as i32, -(discard as i32));
    cur_pos - discard
}

/// Trim the logical token history to the trailing `window` entries so it
/// stays aligned with what the shifted cache actually holds.
pub fn trim_tokens(tokens: &mut Vec<Token>, window: usize) {
    if window == 0 || tokens.len() <= window {
        return;
    }
    let cut = tokens.len() - window;
    tokens.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nox_abi::testing::MockBackend;

    fn toks(ids: &[i32]) -> Vec<Token> {
        ids.iter().copied().map(Token).collect()
    }

    #[test]
    fn lcp_basics() {
        assert_eq!(common_prefix_len(&toks(&[1, 2, 3]), &toks(&[1, 2, 4])), 2);
        assert_eq!(common_prefix_len(&toks(&[1, 2]), &toks(&[1, 2, 3])), 2);
        assert_eq!(common_prefix_len(&toks(&[]), &toks(&[1])), 0);
        assert_eq!(common_prefix_len(&toks(&[9]), &toks(&[1])), 0);
    }

    #[test]
    fn trim_keeps_trailing_window() {
        let mut t = toks(&[1, 2, 3, 4, 5]);
        trim_tokens(&mut t, 3);
        assert_eq!(t, toks(&[3, 4, 5]));

        let mut t = toks(&[1, 2]);
        trim_tokens(&mut t, 3);
        assert_eq!(t, toks(&[1, 2]));

        let mut t = toks(&[1, 2]);
        trim_tokens(&mut t, 0);
        assert_eq!(t, toks(&[1, 2]));
    }

    #[test]
    fn shift_renumbers_and_frees_one_slot() {
        let mut b = MockBackend::new(0, 8);
        // Fill positions 0..8.
        for chunk in 0..2 {
            b.batch_clear();
            for i in 0..4 {
                b.batch_add(Token(5), chunk * 4 + i, i == 3);
            }
            b.decode().unwrap();
        }
        let pos = shift(&mut b, 8, 8);
        assert_eq!(pos, 7);
        assert_eq!(b.cache_positions(), (0..7).collect::<Vec<i32>>());
        assert_eq!(b.journal.kv_seq_rms, vec![(0, 0, 1)]);
        assert_eq!(b.journal.kv_seq_adds, vec![(0, 1, 8, -1)]);
    }

    #[test]
    fn shift_is_noop_below_window_or_when_unsupported() {
        let mut b = MockBackend::new(0, 4);
        assert_eq!(shift(&mut b, 3, 8), 3);
        b.set_can_shift(false);
        assert_eq!(shift(&mut b, 8, 8), 8);
        assert!(b.journal.kv_seq_rms.is_empty());
    }
}
