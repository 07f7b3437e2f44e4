// Thin RAII wrapper over `llama_batch`.
// - Alloc via `llama_batch_init`, token mode, single sequence.
// - We own the per-slot `seq_id` buffers and null them out before
//   `llama_batch_free` so llama.cpp never frees what we allocated.

use std::ptr;

use nox_abi::Token;
use nox_llama_sys as sys;

pub struct LlamaBatch {
    pub(crate) raw: sys::llama_batch,
    capacity: usize,
    seq_buffers: Vec<Box<[i32; 1]>>,
}

impl LlamaBatch {
    /// Token-mode batch with room for `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let raw = unsafe { sys::llama_batch_init(capacity as i32, 0, 1) };
        Self {
            raw,
            capacity,
            seq_buffers: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one slot at the next index. `pos` is the absolute cache
    /// position; `want_logits` marks the slot the sampler will read.
    pub fn add(&mut self, token: Token, pos: i32, want_logits: bool, seq: i32) {
        let index = self.raw.n_tokens as usize;
        assert!(
            index < self.capacity,
            "batch overflow: index {index} >= capacity {}",
            self.capacity
        );

        unsafe {
            *self.raw.token.add(index) = token.0;
            *self.raw.pos.add(index) = pos;
            if !self.raw.logits.is_null() {
                *self.raw.logits.add(index) = want_logits as i8;
            }
            if !self.raw.seq_id.is_null() && !self.raw.n_seq_id.is_null() {
                let boxed = Box::new([seq]);
                let ptr = boxed.as_ptr() as *mut i32;
                self.seq_buffers.push(boxed);
                *self.raw.seq_id.add(index) = ptr;
                *self.raw.n_seq_id.add(index) = 1;
            }
        }
        self.raw.n_tokens = (index + 1) as i32;
    }

    /// Reset for reuse: zero the logits flags, drop our seq buffers.
    pub fn clear(&mut self) {
        unsafe {
            if !self.raw.seq_id.is_null() && !self.raw.n_seq_id.is_null() {
                for i in 0..self.capacity {
                    *self.raw.seq_id.add(i) = ptr::null_mut();
                    *self.raw.n_seq_id.add(i) = 0;
                }
            }
            if !self.raw.logits.is_null() {
                for i in 0..self.capacity {
                    *self.raw.logits.add(i) = 0;
                }
            }
        }
        self.seq_buffers.clear();
        self.raw.n_tokens = 0;
    }
}

impl Drop for LlamaBatch {
    fn drop(&mut self) {
        unsafe {
            if !self.raw.seq_id.is_null() && !self.raw.n_seq_id.is_null() {
                for i in 0..self.capacity {
                    *self.raw.seq_id.add(i) = ptr::null_mut();
                    *self.raw.n_seq_id.add(i) = 0;
                }
            }
            sys::llama_batch_free(self.raw);
        }
        // `seq_buffers` drops here (our memory).
    }
}
