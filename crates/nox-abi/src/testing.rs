//! Deterministic in-memory backend for hermetic tests.
//!
//! The mock models everything the runner's policy layers observe: a small
//! fixed vocabulary, logits that are a pure function of the last decoded
//! token, real KV position bookkeeping, and JSON session files. It also
//! journals every decode and cache operation so tests can assert on prefill
//! chunking, prefix reuse, and window shifts.
//!
//! Contract violations (out-of-order positions, overfull batches) panic:
//! a policy bug should fail a test loudly, not decode garbage.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::backend::{BackendConfig, ModelBackend};
use crate::error::BackendError;
use crate::token::Token;

pub const VOCAB_SIZE: i32 = 32;
pub const BOS: Token = Token(1);
pub const EOG: Token = Token(2);

/// Deterministic successor function: the token the mock's logits rank first
/// after `last` was decoded. `Token(9)` is the one id whose successor is
/// [`EOG`], which lets tests provoke a natural end of generation.
pub fn next_token(last: Token) -> Token {
    Token((last.0 * 3 + 7).rem_euclid(VOCAB_SIZE))
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    token: Token,
    pos: i32,
    want_logits: bool,
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    pos: i32,
    token: Token,
}

/// Per-session journal of backend calls, for test assertions.
#[derive(Debug, Default)]
pub struct Journal {
    /// Positions fed to each decode call, in call order.
    pub decoded_positions: Vec<Vec<i32>>,
    pub kv_clears: usize,
    /// `(seq, p0, p1)` per `kv_seq_rm`.
    pub kv_seq_rms: Vec<(i32, i32, i32)>,
    /// `(seq, p0, p1, delta)` per `kv_seq_add`.
    pub kv_seq_adds: Vec<(i32, i32, i32, i32)>,
    pub sampler_resets: usize,
}

impl Journal {
    pub fn decode_calls(&self) -> usize {
        self.decoded_positions.len()
    }

    /// Total number of token slots decoded across all calls.
    pub fn decoded_slots(&self) -> usize {
        self.decoded_positions.iter().map(Vec::len).sum()
    }
}

pub struct MockBackend {
    ctx_length: usize,
    batch_capacity: usize,
    can_shift: bool,
    batch: Vec<Slot>,
    cache: Vec<Cell>,
    logits: Vec<f32>,
    accepted: Vec<Token>,
    /// `add_special` flag of each tokenize call (tokenize takes `&self`).
    tokenize_add_special: std::cell::RefCell<Vec<bool>>,
    pub journal: Journal,
}

impl MockBackend {
    pub fn new(ctx_length: usize, batch_size: usize) -> Self {
        Self {
            ctx_length,
            batch_capacity: batch_size.max(1),
            can_shift: true,
            batch: Vec::new(),
            cache: Vec::new(),
            logits: vec![0.0; VOCAB_SIZE as usize],
            accepted: Vec::new(),
            tokenize_add_special: std::cell::RefCell::new(Vec::new()),
            journal: Journal::default(),
        }
    }

    /// Pretend the attention implementation cannot renumber cache positions.
    pub fn set_can_shift(&mut self, can_shift: bool) {
        self.can_shift = can_shift;
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Cache positions in insertion order. A healthy single-sequence cache
    /// is exactly `0..cache_len()`: no hole, no stale tail.
    pub fn cache_positions(&self) -> Vec<i32> {
        self.cache.iter().map(|c| c.pos).collect()
    }

    pub fn cache_tokens(&self) -> Vec<Token> {
        self.cache.iter().map(|c| c.token).collect()
    }

    pub fn accepted_tokens(&self) -> &[Token] {
        &self.accepted
    }

    /// `add_special` flag of each tokenize call, in call order.
    pub fn tokenize_add_special(&self) -> Vec<bool> {
        self.tokenize_add_special.borrow().clone()
    }

    fn refresh_logits(&mut self, last: Token) {
        let favored = next_token(last);
        let runner_up = Token((favored.0 + 1).rem_euclid(VOCAB_SIZE));
        for (j, v) in self.logits.iter_mut().enumerate() {
            // Small descending tail keeps the argmax unambiguous.
            *v = -(j as f32) * 1e-3;
        }
        self.logits[favored.0 as usize] = 8.0;
        self.logits[runner_up.0 as usize] = 4.0;
    }
}

/// Stable word id in `[3, VOCAB_SIZE)`; ids 0..3 are reserved for specials.
fn word_token(word: &str) -> Token {
    let h = word
        .bytes()
        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
    Token(3 + (h % (VOCAB_SIZE as u32 - 3)) as i32)
}

impl ModelBackend for MockBackend {
    fn open(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self::new(config.ctx_length, config.batch_size))
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        _parse_special: bool,
    ) -> Result<Vec<Token>, BackendError> {
        self.tokenize_add_special.borrow_mut().push(add_special);
        let mut toks: Vec<Token> = Vec::new();
        if add_special {
            toks.push(BOS);
        }
        toks.extend(text.split_whitespace().map(word_token));
        if toks.is_empty() {
            return Err(BackendError::Tokenize("empty tokens".into()));
        }
        Ok(toks)
    }

    fn token_piece(&self, token: Token) -> Vec<u8> {
        format!("<{}>", token.0).into_bytes()
    }

    fn is_eog(&self, token: Token) -> bool {
        token == EOG
    }

    fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    fn batch_clear(&mut self) {
        self.batch.clear();
    }

    fn batch_add(&mut self, token: Token, pos: i32, want_logits: bool) {
        assert!(
            self.batch.len() < self.batch_capacity,
            "batch overflow: capacity {}",
            self.batch_capacity
        );
        self.batch.push(Slot {
            token,
            pos,
            want_logits,
        });
    }

    fn decode(&mut self) -> Result<(), BackendError> {
        assert!(!self.batch.is_empty(), "decode on empty batch");
        if self.ctx_length > 0 && self.cache.len() + self.batch.len() > self.ctx_length {
            return Err(BackendError::KvCacheFull);
        }
        self.journal
            .decoded_positions
            .push(self.batch.iter().map(|s| s.pos).collect());

        let mut flagged: Option<Token> = None;
        for slot in std::mem::take(&mut self.batch) {
            assert_eq!(
                slot.pos,
                self.cache.len() as i32,
                "decode position out of step with resident cache"
            );
            self.cache.push(Cell {
                pos: slot.pos,
                token: slot.token,
            });
            if slot.want_logits {
                flagged = Some(slot.token);
            }
        }
        if let Some(last) = flagged {
            self.refresh_logits(last);
        }
        Ok(())
    }

    fn last_logits(&self) -> Vec<f32> {
        self.logits.clone()
    }

    fn sample(&mut self) -> Token {
        let mut best = 0usize;
        for (j, v) in self.logits.iter().enumerate() {
            if *v > self.logits[best] {
                best = j;
            }
        }
        Token(best as i32)
    }

    fn accept(&mut self, token: Token) {
        self.accepted.push(token);
    }

    fn sampler_reset(&mut self) {
        self.accepted.clear();
        self.journal.sampler_resets += 1;
    }

    fn kv_clear(&mut self) {
        self.cache.clear();
        self.journal.kv_clears += 1;
    }

    fn kv_seq_rm(&mut self, seq: i32, p0: i32, p1: i32) {
        self.journal.kv_seq_rms.push((seq, p0, p1));
        self.cache
            .retain(|c| c.pos < p0 || (p1 >= 0 && c.pos >= p1));
    }

    fn kv_seq_add(&mut self, seq: i32, p0: i32, p1: i32, delta: i32) {
        self.journal.kv_seq_adds.push((seq, p0, p1, delta));
        for c in &mut self.cache {
            if c.pos >= p0 && (p1 < 0 || c.pos < p1) {
                c.pos += delta;
            }
        }
    }

    fn kv_can_shift(&self) -> bool {
        self.can_shift
    }

    fn state_save_file(&mut self, path: &Path, tokens: &[Token]) -> Result<(), BackendError> {
        let file = File::create(path).map_err(|e| BackendError::state_io(path, e))?;
        let ids: Vec<i32> = tokens.iter().map(|t| t.0).collect();
        serde_json::to_writer(BufWriter::new(file), &ids)
            .map_err(|e| BackendError::state_io(path, e))
    }

    fn state_load_file(
        &mut self,
        path: &Path,
        max_tokens: usize,
    ) -> Result<Vec<Token>, BackendError> {
        let file = File::open(path).map_err(|e| BackendError::state_io(path, e))?;
        let mut ids: Vec<i32> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| BackendError::state_io(path, e))?;
        ids.truncate(max_tokens);
        let tokens: Vec<Token> = ids.into_iter().map(Token).collect();
        self.cache = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| Cell {
                pos: i as i32,
                token: *t,
            })
            .collect();
        if let Some(last) = tokens.last() {
            self.refresh_logits(*last);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_of_nine_is_eog() {
        assert_eq!(next_token(Token(9)), EOG);
    }

    #[test]
    fn word_tokens_are_stable_and_in_range() {
        let a = word_token("hello");
        assert_eq!(a, word_token("hello"));
        assert!(a.0 >= 3 && a.0 < VOCAB_SIZE);
    }

    #[test]
    fn decode_tracks_positions() {
        let mut b = MockBackend::new(8, 4);
        b.batch_add(Token(5), 0, false);
        b.batch_add(Token(6), 1, true);
        b.decode().unwrap();
        assert_eq!(b.cache_positions(), vec![0, 1]);
        assert_eq!(b.sample(), next_token(Token(6)));
    }

    #[test]
    fn decode_reports_cache_full() {
        let mut b = MockBackend::new(1, 4);
        b.batch_add(Token(5), 0, true);
        b.decode().unwrap();
        b.batch_clear();
        b.batch_add(Token(6), 1, true);
        assert!(matches!(b.decode(), Err(BackendError::KvCacheFull)));
    }
}
