//! The generation engine: chunked prefill plus the autoregressive decode
//! loop, written entirely against the [`ModelBackend`] seam.

use std::io::Write;
use std::path::Path;

use thiserror::Error;

use nox_abi::{BackendError, ModelBackend, Token};

use crate::stats::RunStats;
use crate::stream::StreamWriter;

mod decode;
mod prefill;

/// Knobs that hold for every run of one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_tokens: usize,
    /// Sliding KV window size; 0 disables the window entirely.
    pub kv_window: usize,
    /// Raw output: no `nox:` header, no framing newlines.
    pub raw: bool,
}

/// Session snapshot written right after prefill: the logical token sequence
/// resident in the cache once prefill completes (including any pre-existing
/// prefix).
pub struct StateSave<'a> {
    pub path: &'a Path,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("empty tokens")]
    EmptyPrompt,

    #[error("prompt tokens ({needed}) exceed kv-window ({window})")]
    PromptTooLong { needed: usize, window: usize },

    #[error(
        "kv cache full during prompt prefill (increase --ctx or reduce prompt length; \
         or enable --kv-window for sliding context)"
    )]
    PrefillCacheFull,

    #[error("decode (prompt) failed: {reason}")]
    PrefillDecode { reason: String },

    #[error(
        "kv cache full during generation (try increasing --ctx or --kv-window; \
         current --kv-window={window})"
    )]
    GenerationCacheFullWindowed { window: usize, generated: Vec<Token> },

    #[error("kv cache full during generation (increase --ctx or enable --kv-window for sliding context)")]
    GenerationCacheFull { generated: Vec<Token> },

    #[error("decode (gen) failed: {reason}")]
    GenerationDecode { reason: String, generated: Vec<Token> },

    #[error("write failed: {reason}")]
    Io { reason: String, generated: Vec<Token> },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EngineError {
    /// Tokens that were generated (and already streamed) before the failure.
    pub fn partial(&self) -> &[Token] {
        match self {
            EngineError::GenerationCacheFullWindowed { generated, .. }
            | EngineError::GenerationCacheFull { generated }
            | EngineError::GenerationDecode { generated, .. }
            | EngineError::Io { generated, .. } => generated,
            _ => &[],
        }
    }
}

/// One `Engine` drives one backend session. The serve loop reuses it across
/// turns; single-shot runs use it once.
pub struct Engine<B: ModelBackend> {
    backend: B,
    opts: EngineOptions,
}

impl<B: ModelBackend> Engine<B> {
    pub fn new(backend: B, opts: EngineOptions) -> Self {
        Self { backend, opts }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The serve loop reaches through for prefix-retain and input-only
    /// cache surgery; the policy for those lives in [`crate::window`] and
    /// [`crate::serve`], not here.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Tokenize one prompt; an empty token list is an error.
    pub fn tokenize_prompt(&self, prompt: &str, add_special: bool) -> Result<Vec<Token>, EngineError> {
        Ok(self.backend.tokenize(prompt, add_special, true)?)
    }

    /// Cold single-prompt run: clear the cache, tokenize with specials, and
    /// generate from position zero.
    pub fn run_prompt<W: Write>(
        &mut self,
        prompt: &str,
        out: &mut StreamWriter<W>,
        mut stats: Option<&mut RunStats>,
        state_save: Option<&Path>,
        metrics: Option<&mut dyn Write>,
    ) -> Result<Vec<Token>, EngineError> {
        self.backend.kv_clear();
        self.backend.sampler_reset();

        let toks = self.tokenize_prompt(prompt, true)?;
        if let Some(stats) = stats.as_deref_mut() {
            stats.prompt_tokens = toks.len();
        }
        let save = state_save.map(|path| StateSave {
            path,
            tokens: toks.clone(),
        });
        self.run_tokens(&toks, 0, 0, out, stats, save.as_ref(), metrics)
    }

    /// Single-shot dispatch over an optional restored session: a restored
    /// prefix shifts the base position and suppresses the duplicate BOS.
    pub fn run_single<W: Write>(
        &mut self,
        prompt: &str,
        loaded_tokens: &[Token],
        out: &mut StreamWriter<W>,
        stats: Option<&mut RunStats>,
        state_save: Option<&Path>,
        metrics: Option<&mut dyn Write>,
    ) -> Result<Vec<Token>, EngineError> {
        if loaded_tokens.is_empty() {
            return self.run_prompt(prompt, out, stats, state_save, metrics);
        }
        let toks = self.tokenize_prompt(prompt, false)?;
        let save = state_save.map(|path| {
            let mut tokens = loaded_tokens.to_vec();
            tokens.extend_from_slice(&toks);
            StateSave { path, tokens }
        });
        self.run_tokens(
            &toks,
            0,
            loaded_tokens.len(),
            out,
            stats,
            save.as_ref(),
            metrics,
        )
    }

    /// Feed `toks[start_pos..]` at absolute positions starting from
    /// `pos_offset + start_pos`, then stream sampled tokens until EOG or the
    /// token cap. Tokens before `start_pos` are assumed resident in cache
    /// from prefix retention.
    pub fn run_tokens<W: Write>(
        &mut self,
        toks: &[Token],
        start_pos: usize,
        pos_offset: usize,
        out: &mut StreamWriter<W>,
        mut stats: Option<&mut RunStats>,
        save: Option<&StateSave<'_>>,
        metrics: Option<&mut dyn Write>,
    ) -> Result<Vec<Token>, EngineError> {
        if toks.is_empty() {
            return Err(EngineError::EmptyPrompt);
        }
        self.backend.sampler_reset();
        let start_pos = start_pos.min(toks.len());

        let window = self.opts.kv_window;
        if window > 0 && pos_offset + toks.len() > window {
            return Err(EngineError::PromptTooLong {
                needed: pos_offset + toks.len(),
                window,
            });
        }

        self.prefill(toks, start_pos, pos_offset, stats.as_deref_mut(), save)?;

        if !self.opts.raw {
            out.write_passthrough(b"nox:\n")
                .map_err(|e| EngineError::Io {
                    reason: e.to_string(),
                    generated: Vec::new(),
                })?;
        }

        self.decode_loop(toks, pos_offset, out, stats, metrics)
    }
}
