//! Persistent llama.cpp sampler chain built from [`SamplingParams`].

use std::ptr::NonNull;

use nox_abi::{BackendError, SamplingParams, Token};
use nox_llama_sys as sys;

use crate::context::LlamaContext;

pub struct LlamaSampler {
    chain: NonNull<sys::llama_sampler>,
}

impl LlamaSampler {
    /// Chain order: repetition penalties over the last-N window, top-k
    /// truncation, top-p nucleus, temperature, then the terminal selector
    /// (greedy argmax for the fast preset, seeded dist otherwise).
    pub fn new(params: &SamplingParams) -> Result<Self, BackendError> {
        let chain_params = unsafe { sys::llama_sampler_chain_default_params() };
        let chain = NonNull::new(unsafe { sys::llama_sampler_chain_init(chain_params) })
            .ok_or_else(|| BackendError::Sampler("llama_sampler_chain_init returned null".into()))?;
        let sp = chain.as_ptr();

        unsafe {
            if params.repeat_last_n > 0 && params.repeat_penalty != 1.0 {
                sys::llama_sampler_chain_add(
                    sp,
                    sys::llama_sampler_init_penalties(
                        params.repeat_last_n,
                        params.repeat_penalty,
                        0.0,
                        0.0,
                    ),
                );
            }
            if params.is_greedy() {
                sys::llama_sampler_chain_add(sp, sys::llama_sampler_init_greedy());
            } else {
                if params.top_k > 0 {
                    sys::llama_sampler_chain_add(sp, sys::llama_sampler_init_top_k(params.top_k));
                }
                if params.top_p > 0.0 && params.top_p < 1.0 {
                    sys::llama_sampler_chain_add(
                        sp,
                        sys::llama_sampler_init_top_p(params.top_p, 1),
                    );
                }
                if params.temp > 0.0 {
                    sys::llama_sampler_chain_add(sp, sys::llama_sampler_init_temp(params.temp));
                }
                sys::llama_sampler_chain_add(
                    sp,
                    sys::llama_sampler_init_dist(sys::LLAMA_DEFAULT_SEED),
                );
            }
        }

        Ok(Self { chain })
    }

    /// Draw one token from the last decoded logits. llama.cpp folds the
    /// acceptance of the drawn token into the chain here.
    pub fn sample(&mut self, ctx: &LlamaContext<'_>) -> Token {
        Token(unsafe { sys::llama_sampler_sample(self.chain.as_ptr(), ctx.as_ptr(), -1) })
    }

    /// Clear repetition memory and RNG state between runs.
    pub fn reset(&mut self) {
        unsafe { sys::llama_sampler_reset(self.chain.as_ptr()) };
    }
}

impl Drop for LlamaSampler {
    fn drop(&mut self) {
        unsafe { sys::llama_sampler_free(self.chain.as_ptr()) };
    }
}
