// Safe wrapper around `llama_model*`. The model is immutable once loaded;
// all mutation lives in `LlamaContext`.

use std::ffi::CString;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Once;

use nox_abi::{BackendError, Token};
use nox_llama_sys as sys;

/// Whether this build/device can pin weights in RAM.
pub fn supports_mlock() -> bool {
    unsafe { sys::llama_supports_mlock() }
}

fn backend_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| unsafe { sys::llama_backend_init() });
}

pub struct LlamaModel {
    model: NonNull<sys::llama_model>,
}

impl LlamaModel {
    /// Load GGUF weights. Memory-mapped always; `use_mlock` additionally
    /// pins the mapping (best-effort, the warmup layer decides).
    pub fn load_from_file(path: &Path, use_mlock: bool) -> Result<Self, BackendError> {
        backend_init();
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|e| BackendError::ModelLoad(format!("bad model path: {e}")))?;

        let mut params = unsafe { sys::llama_model_default_params() };
        params.use_mmap = true;
        params.use_mlock = use_mlock;

        let ptr = unsafe { sys::llama_load_model_from_file(c_path.as_ptr(), params) };
        NonNull::new(ptr)
            .map(|model| Self { model })
            .ok_or_else(|| BackendError::ModelLoad(format!("cannot open {}", path.display())))
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut sys::llama_model {
        self.model.as_ptr()
    }

    #[inline]
    pub(crate) fn vocab_ptr(&self) -> *const sys::llama_vocab {
        unsafe { sys::llama_model_get_vocab(self.as_ptr()) }
    }

    pub fn n_vocab(&self) -> usize {
        unsafe { sys::llama_n_vocab(self.vocab_ptr()) as usize }
    }

    /// Two-pass tokenize: probe for the required size, then fill. Some
    /// builds report the probe as `+needed`, others as `-needed`.
    pub fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, BackendError> {
        let vocab = self.vocab_ptr();
        let probe = unsafe {
            sys::llama_tokenize(
                vocab,
                text.as_ptr() as *const _,
                text.len() as i32,
                std::ptr::null_mut(),
                0,
                add_special,
                parse_special,
            )
        };
        let needed = probe.unsigned_abs() as usize;
        if needed == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0i32; needed];
        let filled = unsafe {
            sys::llama_tokenize(
                vocab,
                text.as_ptr() as *const _,
                text.len() as i32,
                buf.as_mut_ptr(),
                buf.len() as i32,
                add_special,
                parse_special,
            )
        };
        if filled < 0 {
            return Err(BackendError::Tokenize(format!(
                "llama_tokenize failed: {filled}"
            )));
        }
        buf.truncate(filled as usize);
        Ok(buf.into_iter().map(Token).collect())
    }

    /// Detokenised byte fragment for one token; retries once when the
    /// stack buffer is too small.
    pub fn token_piece(&self, token: Token) -> Vec<u8> {
        let vocab = self.vocab_ptr();
        let mut buf = vec![0u8; 64];
        let mut wrote = unsafe {
            sys::llama_token_to_piece(
                vocab,
                token.0,
                buf.as_mut_ptr() as *mut _,
                buf.len() as i32,
                0,
                false,
            )
        };
        if wrote < 0 {
            buf.resize((-wrote) as usize, 0);
            wrote = unsafe {
                sys::llama_token_to_piece(
                    vocab,
                    token.0,
                    buf.as_mut_ptr() as *mut _,
                    buf.len() as i32,
                    0,
                    false,
                )
            };
        }
        buf.truncate(wrote.max(0) as usize);
        buf
    }

    pub fn is_eog(&self, token: Token) -> bool {
        unsafe { sys::llama_vocab_is_eog(self.vocab_ptr(), token.0) }
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        unsafe { sys::llama_free_model(self.model.as_ptr()) };
    }
}

// SAFETY: llama.cpp models are immutable after load; contexts carry all
// mutable state and stay !Send/!Sync.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}
