use std::time::Instant;

use nox_abi::{BackendError, ModelBackend, Token};

use super::{Engine, EngineError, StateSave};
use crate::stats::RunStats;

impl<B: ModelBackend> Engine<B> {
    /// Push `toks[start_pos..]` through the model in batch-sized chunks.
    /// Only the final token of the whole prompt requests logits; everything
    /// before it exists to populate the cache.
    pub(super) fn prefill(
        &mut self,
        toks: &[Token],
        start_pos: usize,
        pos_offset: usize,
        mut stats: Option<&mut RunStats>,
        save: Option<&StateSave<'_>>,
    ) -> Result<(), EngineError> {
        let prefill_start = Instant::now();

        let mut pos = start_pos;
        while pos < toks.len() {
            self.backend.batch_clear();
            let chunk = (toks.len() - pos).min(self.backend.batch_capacity());
            for i in 0..chunk {
                let idx = pos + i;
                let abs_pos = (pos_offset + idx) as i32;
                let want_logits = idx == toks.len() - 1;
                self.backend.batch_add(toks[idx], abs_pos, want_logits);
            }
            tracing::debug!(pos, chunk, "prefill chunk");
            match self.backend.decode() {
                Ok(()) => {}
                Err(BackendError::KvCacheFull) => return Err(EngineError::PrefillCacheFull),
                Err(e) => {
                    return Err(EngineError::PrefillDecode {
                        reason: e.to_string(),
                    })
                }
            }
            pos += chunk;
        }

        if let Some(stats) = stats.as_deref_mut() {
            stats.prefill = prefill_start.elapsed();
        }

        // The snapshot captures the cache as it stands after prefill; a
        // failed save aborts the run before any token is generated.
        if let Some(save) = save {
            self.backend.state_save_file(save.path, &save.tokens)?;
        }
        Ok(())
    }
}
