use std::path::{Path, PathBuf};

use crate::error::BackendError;
use crate::sampling::SamplingParams;
use crate::token::Token;

/// Everything a backend needs to open one inference session: model weights,
/// a decode context, one reusable batch, and a sampler.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub model_path: PathBuf,
    /// Context capacity in tokens (n_ctx).
    pub ctx_length: usize,
    /// Batch slot capacity; also the prefill chunk size.
    pub batch_size: usize,
    pub threads: i32,
    /// Lock weights in RAM after mapping (best-effort on the backend side).
    pub use_mlock: bool,
    pub sampling: SamplingParams,
}

/// Backend-agnostic capability set for a single-sequence inference session.
///
/// This is the only dynamic-dispatch seam in the runner: the generation
/// loop, KV window policy, and serve loop are all written against it, and a
/// deterministic test double ([`crate::testing::MockBackend`]) stands in for
/// the native library in tests. No policy lives behind these methods; each
/// one is a single backend call.
pub trait ModelBackend {
    /// Load the model and build the session (context + batch + sampler).
    fn open(config: &BackendConfig) -> Result<Self, BackendError>
    where
        Self: Sized;

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, BackendError>;

    /// Detokenised byte fragment for one token. Pieces concatenate to the
    /// final text; they need not align with UTF-8 boundaries.
    fn token_piece(&self, token: Token) -> Vec<u8>;

    /// End-of-generation predicate (EOS and friends).
    fn is_eog(&self, token: Token) -> bool;

    // ── batch ────────────────────────────────────────────────────────────

    fn batch_capacity(&self) -> usize;

    fn batch_clear(&mut self);

    /// Append one slot. `pos` is the absolute cache position; `want_logits`
    /// marks the slot whose logits the next [`Self::last_logits`] /
    /// [`Self::sample`] refer to. Sequence id is fixed at 0.
    fn batch_add(&mut self, token: Token, pos: i32, want_logits: bool);

    /// Run one decode over the prepared batch. Cache exhaustion must come
    /// back as [`BackendError::KvCacheFull`].
    fn decode(&mut self) -> Result<(), BackendError>;

    /// Vocabulary-sized logits of the last slot that requested them.
    fn last_logits(&self) -> Vec<f32>;

    // ── sampler ──────────────────────────────────────────────────────────

    fn sample(&mut self) -> Token;

    /// Push a sampled token onto the repetition window.
    fn accept(&mut self, token: Token);

    /// Clear sampler state. Called at the start of every generation run.
    fn sampler_reset(&mut self);

    // ── kv cache ─────────────────────────────────────────────────────────

    fn kv_clear(&mut self);

    /// Remove positions `[p0, p1)` from `seq`; `p1 < 0` means to the end.
    fn kv_seq_rm(&mut self, seq: i32, p0: i32, p1: i32);

    /// Add `delta` to the positions in `[p0, p1)` of `seq`.
    fn kv_seq_add(&mut self, seq: i32, p0: i32, p1: i32, delta: i32);

    fn kv_can_shift(&self) -> bool;

    // ── session state ────────────────────────────────────────────────────

    /// Persist the cache plus the token list that produced it. A file saved
    /// here must round-trip through [`Self::state_load_file`] in a fresh
    /// process.
    fn state_save_file(&mut self, path: &Path, tokens: &[Token]) -> Result<(), BackendError>;

    /// Restore a saved session; returns the token list (at most
    /// `max_tokens` entries) and leaves the cache at the matching position.
    fn state_load_file(
        &mut self,
        path: &Path,
        max_tokens: usize,
    ) -> Result<Vec<Token>, BackendError>;
}
