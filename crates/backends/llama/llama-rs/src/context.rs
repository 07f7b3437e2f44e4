// Borrowed context tied to a model's lifetime. All decode-time mutation
// lives here; the `LlamaModel` itself is immutable and Sync once loaded.

use std::ffi::CString;
use std::path::Path;
use std::ptr::NonNull;
use std::slice;

use nox_abi::{BackendError, Token};
use nox_llama_sys as sys;

use crate::batch::LlamaBatch;
use crate::model::LlamaModel;

pub struct LlamaContext<'a> {
    model: &'a LlamaModel,
    ctx: NonNull<sys::llama_context>,
    pub n_ctx: u32,
}

impl<'a> LlamaContext<'a> {
    /// Build a single-sequence decode context. `batch_size` bounds both the
    /// logical and physical batch.
    pub fn new(
        model: &'a LlamaModel,
        ctx_length: u32,
        batch_size: u32,
        threads: i32,
    ) -> Result<Self, BackendError> {
        let mut params = unsafe { sys::llama_context_default_params() };
        params.n_ctx = ctx_length;
        params.n_batch = batch_size;
        params.n_ubatch = batch_size;
        params.n_seq_max = 1;
        params.n_threads = threads;
        params.n_threads_batch = threads;

        let ptr = unsafe { sys::llama_new_context_with_model(model.as_ptr(), params) };
        let ctx = NonNull::new(ptr)
            .ok_or_else(|| BackendError::Context("llama_new_context_with_model returned null".into()))?;
        Ok(Self {
            model,
            ctx,
            n_ctx: ctx_length,
        })
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut sys::llama_context {
        self.ctx.as_ptr()
    }

    /// Decode an already-prepared batch. Return code 1 means no free cache
    /// slot; anything else nonzero is a hard decode failure.
    pub fn decode(&mut self, batch: &mut LlamaBatch) -> Result<(), BackendError> {
        let rc = unsafe { sys::llama_decode(self.ctx.as_ptr(), batch.raw) };
        match rc {
            0 => Ok(()),
            1 => Err(BackendError::KvCacheFull),
            rc => Err(BackendError::Decode(format!(
                "llama_decode returned {rc}"
            ))),
        }
    }

    /// Logits of the last slot that requested them. Length == vocab size.
    pub fn last_logits(&self) -> Vec<f32> {
        let ptr = unsafe { sys::llama_get_logits_ith(self.ctx.as_ptr(), -1) };
        if ptr.is_null() {
            return Vec::new();
        }
        let n_vocab = self.model.n_vocab();
        unsafe { slice::from_raw_parts(ptr, n_vocab) }.to_vec()
    }

    #[inline]
    fn memory(&self) -> sys::llama_memory_t {
        unsafe { sys::llama_get_memory(self.ctx.as_ptr()) }
    }

    /// Drop every cached position (data buffers included).
    pub fn kv_clear(&mut self) {
        unsafe { sys::llama_memory_clear(self.memory(), true) };
    }

    pub fn kv_seq_rm(&mut self, seq: i32, p0: i32, p1: i32) {
        unsafe { sys::llama_memory_seq_rm(self.memory(), seq, p0, p1) };
    }

    pub fn kv_seq_add(&mut self, seq: i32, p0: i32, p1: i32, delta: i32) {
        unsafe { sys::llama_memory_seq_add(self.memory(), seq, p0, p1, delta) };
    }

    pub fn kv_can_shift(&self) -> bool {
        unsafe { sys::llama_memory_can_shift(self.memory()) }
    }

    /// Persist cache + token list in llama.cpp's native session format.
    pub fn state_save_file(&mut self, path: &Path, tokens: &[Token]) -> Result<(), BackendError> {
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| BackendError::state_io(path, e))?;
        let ids: Vec<i32> = tokens.iter().map(|t| t.0).collect();
        let ok = unsafe {
            sys::llama_state_save_file(
                self.ctx.as_ptr(),
                c_path.as_ptr(),
                ids.as_ptr(),
                ids.len(),
            )
        };
        if ok {
            Ok(())
        } else {
            Err(BackendError::state_io(path, "llama_state_save_file failed"))
        }
    }

    /// Restore a saved session; returns at most `max_tokens` token ids and
    /// leaves the cache at the matching position.
    pub fn state_load_file(
        &mut self,
        path: &Path,
        max_tokens: usize,
    ) -> Result<Vec<Token>, BackendError> {
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| BackendError::state_io(path, e))?;
        let mut ids = vec![0i32; max_tokens];
        let mut count: usize = 0;
        let ok = unsafe {
            sys::llama_state_load_file(
                self.ctx.as_ptr(),
                c_path.as_ptr(),
                ids.as_mut_ptr(),
                ids.len(),
                &mut count,
            )
        };
        if !ok {
            return Err(BackendError::state_io(path, "llama_state_load_file failed"));
        }
        ids.truncate(count);
        Ok(ids.into_iter().map(Token).collect())
    }
}

impl<'a> Drop for LlamaContext<'a> {
    fn drop(&mut self) {
        unsafe { sys::llama_free(self.ctx.as_ptr()) };
    }
}
