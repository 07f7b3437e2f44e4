use std::path::Path;
use std::sync::Arc;

use nox_abi::{BackendConfig, BackendError, ModelBackend, Token};

use crate::batch::LlamaBatch;
use crate::context::LlamaContext;
use crate::model::LlamaModel;
use crate::sampler::LlamaSampler;

/// One loaded model + one decode context + one batch + one sampler: the
/// whole session the runner drives through [`ModelBackend`].
pub struct LlamaBackend {
    // Field order is drop order: the context borrows the model and must go
    // first; the model Arc goes last.
    context: LlamaContext<'static>,
    batch: LlamaBatch,
    sampler: LlamaSampler,
    model: Arc<LlamaModel>,
}

impl ModelBackend for LlamaBackend {
    fn open(config: &BackendConfig) -> Result<Self, BackendError> {
        let model = Arc::new(LlamaModel::load_from_file(
            &config.model_path,
            config.use_mlock,
        )?);

        // The context holds a raw pointer into the model; the Arc in the
        // same struct keeps the model alive for as long as the context, so
        // widening the borrow to 'static is sound here.
        let static_ref: &'static LlamaModel =
            unsafe { std::mem::transmute::<&LlamaModel, &'static LlamaModel>(model.as_ref()) };
        let context = LlamaContext::new(
            static_ref,
            config.ctx_length as u32,
            config.batch_size as u32,
            config.threads,
        )?;

        let sampler = LlamaSampler::new(&config.sampling)?;
        let batch = LlamaBatch::new(config.batch_size.max(1));

        Ok(Self {
            context,
            batch,
            sampler,
            model,
        })
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, BackendError> {
        let toks = self.model.tokenize(text, add_special, parse_special)?;
        if toks.is_empty() {
            return Err(BackendError::Tokenize("empty tokens".into()));
        }
        Ok(toks)
    }

    fn token_piece(&self, token: Token) -> Vec<u8> {
        self.model.token_piece(token)
    }

    fn is_eog(&self, token: Token) -> bool {
        self.model.is_eog(token)
    }

    fn batch_capacity(&self) -> usize {
        self.batch.capacity()
    }

    fn batch_clear(&mut self) {
        self.batch.clear();
    }

    fn batch_add(&mut self, token: Token, pos: i32, want_logits: bool) {
        self.batch.add(token, pos, want_logits, 0);
    }

    fn decode(&mut self) -> Result<(), BackendError> {
        self.context.decode(&mut self.batch)
    }

    fn last_logits(&self) -> Vec<f32> {
        self.context.last_logits()
    }

    fn sample(&mut self) -> Token {
        self.sampler.sample(&self.context)
    }

    fn accept(&mut self, _token: Token) {
        // llama_sampler_sample already folds acceptance of the drawn token
        // into the chain.
    }

    fn sampler_reset(&mut self) {
        self.sampler.reset();
    }

    fn kv_clear(&mut self) {
        self.context.kv_clear();
    }

    fn kv_seq_rm(&mut self, seq: i32, p0: i32, p1: i32) {
        self.context.kv_seq_rm(seq, p0, p1);
    }

    fn kv_seq_add(&mut self, seq: i32, p0: i32, p1: i32, delta: i32) {
        self.context.kv_seq_add(seq, p0, p1, delta);
    }

    fn kv_can_shift(&self) -> bool {
        self.context.kv_can_shift()
    }

    fn state_save_file(&mut self, path: &Path, tokens: &[Token]) -> Result<(), BackendError> {
        self.context.state_save_file(path, tokens)
    }

    fn state_load_file(
        &mut self,
        path: &Path,
        max_tokens: usize,
    ) -> Result<Vec<Token>, BackendError> {
        self.context.state_load_file(path, max_tokens)
    }
}
