use std::io::Write;
use std::time::Instant;

use nox_abi::{BackendError, ModelBackend, Token};

use super::{Engine, EngineError};
use crate::stats::RunStats;
use crate::stream::StreamWriter;
use crate::{metrics, window};

impl<B: ModelBackend> Engine<B> {
    /// One token per decode step until EOG or the cap. The window shift (if
    /// any) runs before the step, so `cur_pos` never reaches the window
    /// after a completed step.
    pub(super) fn decode_loop<W: Write>(
        &mut self,
        toks: &[Token],
        pos_offset: usize,
        out: &mut StreamWriter<W>,
        mut stats: Option<&mut RunStats>,
        mut metrics_out: Option<&mut dyn Write>,
    ) -> Result<Vec<Token>, EngineError> {
        let window = self.opts.kv_window;
        let mut last = toks[toks.len() - 1];
        let mut cur_pos = pos_offset + toks.len();

        let mut generated: Vec<Token> = Vec::with_capacity(self.opts.max_tokens);
        let gen_start = Instant::now();

        for _ in 0..self.opts.max_tokens {
            if window > 0 && cur_pos >= window {
                cur_pos = window::shift(&mut self.backend, cur_pos, window);
            }

            self.backend.batch_clear();
            self.backend.batch_add(last, cur_pos as i32, true);
            match self.backend.decode() {
                Ok(()) => {}
                Err(BackendError::KvCacheFull) => {
                    return Err(if window > 0 {
                        EngineError::GenerationCacheFullWindowed { window, generated }
                    } else {
                        EngineError::GenerationCacheFull { generated }
                    });
                }
                Err(e) => {
                    return Err(EngineError::GenerationDecode {
                        reason: e.to_string(),
                        generated,
                    });
                }
            }

            let top2 = metrics_out
                .is_some()
                .then(|| metrics::logits_top2(&self.backend.last_logits()));

            let token = self.backend.sample();
            self.backend.accept(token);
            if self.backend.is_eog(token) {
                break;
            }

            generated.push(token);
            let piece = self.backend.token_piece(token);
            if let Err(e) = out.write_piece(&piece) {
                return Err(EngineError::Io {
                    reason: e.to_string(),
                    generated,
                });
            }

            if let (Some(m), Some((max1, max2))) = (metrics_out.as_deref_mut(), top2) {
                let _ = metrics::write_line(m, token, max1, max2);
            }

            last = token;
            cur_pos += 1;
        }

        if let Err(e) = out.flush() {
            return Err(EngineError::Io {
                reason: e.to_string(),
                generated,
            });
        }
        if let Some(stats) = stats.as_deref_mut() {
            stats.generated_tokens = generated.len();
            stats.generate = gen_start.elapsed();
        }
        Ok(generated)
    }
}
