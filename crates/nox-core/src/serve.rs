//! Serve mode: successive prompts on stdin, one bracketed payload per turn.
//!
//! The loop owns the logical token history (`prev_tokens`) that mirrors
//! what the KV cache holds for sequence 0, and keeps the two aligned across
//! the append / keep-cache / reset dispatch modes.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use nox_abi::{ModelBackend, Token};

use crate::engine::{Engine, StateSave};
use crate::stats::round_ms;
use crate::stream::StreamWriter;
use crate::window::{common_prefix_len, trim_tokens};

/// Default end-of-turn sentinel on stdout.
pub const END_MARKER: &str = "\n<<<NOX_END>>>\n";
/// ASCII record separator, the alternate one-byte sentinel and delimiter.
pub const RS: u8 = 0x1e;

#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    pub raw: bool,
    /// Delimit prompts and turns with the record separator instead of
    /// newlines and the `<<<NOX_END>>>` marker.
    pub use_rs: bool,
    pub keep_cache: bool,
    pub append: bool,
    /// Keep the cache aligned to the prompt only; generated tokens are
    /// removed from the cache after each turn.
    pub input_only: bool,
    pub state_save: Option<PathBuf>,
    pub kv_window: usize,
}

/// Read one prompt from the reader. `Ok(None)` is clean end-of-input. The
/// delimiter is consumed and trailing `\r`/`\n` are stripped; a final
/// unterminated chunk still counts as a prompt.
pub fn read_prompt<R: BufRead>(reader: &mut R, use_rs: bool) -> io::Result<Option<String>> {
    let delim = if use_rs { RS } else { b'\n' };
    let mut buf = Vec::new();
    let n = reader.read_until(delim, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&delim) {
        buf.pop();
    }
    let text = String::from_utf8_lossy(&buf);
    Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
}

/// Drive the engine over every prompt on `input` until EOF or an explicit
/// `exit`/`quit`. Per-turn failures are reported on stderr and the loop
/// continues; only read errors on `input` abort it.
pub fn serve_loop<B, R, W>(
    engine: &mut Engine<B>,
    mut input: R,
    out: &mut StreamWriter<W>,
    opts: &ServeOptions,
    initial_tokens: Vec<Token>,
    mut metrics: Option<&mut dyn Write>,
) -> io::Result<()>
where
    B: ModelBackend,
    R: BufRead,
    W: Write,
{
    let end_marker: &[u8] = if opts.use_rs {
        &[RS]
    } else {
        END_MARKER.as_bytes()
    };

    let mut prev_tokens = initial_tokens;
    let cache_generated = !opts.input_only;
    let retaining = opts.append || opts.keep_cache;

    loop {
        let prompt = match read_prompt(&mut input, opts.use_rs)? {
            Some(p) => p,
            None => return Ok(()),
        };
        if prompt.trim().is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            return Ok(());
        }

        let turn_start = Instant::now();

        // Suppress the BOS when appending onto an existing conversation.
        let add_special = !(opts.append && !prev_tokens.is_empty());
        let toks = match engine.tokenize_prompt(&prompt, add_special) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("tokenization failed: {e}");
                continue;
            }
        };

        let save = opts.state_save.as_deref().map(|path| {
            let tokens = if opts.append {
                let mut t = prev_tokens.clone();
                t.extend_from_slice(&toks);
                t
            } else {
                toks.clone()
            };
            StateSave { path, tokens }
        });

        let m: Option<&mut dyn Write> = match metrics {
            Some(ref mut w) => Some(&mut **w),
            None => None,
        };
        let result = if opts.append {
            let base = prev_tokens.len();
            let r = engine.run_tokens(&toks, 0, base, out, None, save.as_ref(), m);
            prev_tokens.extend_from_slice(&toks);
            r
        } else if opts.keep_cache {
            let common = common_prefix_len(&prev_tokens, &toks);
            if common == 0 {
                engine.backend_mut().kv_clear();
            } else if common < prev_tokens.len() {
                engine.backend_mut().kv_seq_rm(0, common as i32, -1);
            }
            tracing::debug!(common, new_len = toks.len(), "prefix retain");
            let r = engine.run_tokens(&toks, common, 0, out, None, save.as_ref(), m);
            prev_tokens = toks;
            r
        } else {
            engine.backend_mut().kv_clear();
            let r = engine.run_tokens(&toks, 0, 0, out, None, save.as_ref(), m);
            prev_tokens = toks;
            r
        };

        let generated = match result {
            Ok(g) => g,
            Err(e) => {
                eprintln!("inference failed: {e}");
                e.partial().to_vec()
            }
        };

        if !generated.is_empty() && cache_generated && retaining {
            prev_tokens.extend_from_slice(&generated);
        } else if opts.input_only && retaining {
            // Drop whatever generation put in the cache beyond the prompt.
            if prev_tokens.is_empty() {
                engine.backend_mut().kv_clear();
            } else {
                engine.backend_mut().kv_seq_rm(0, prev_tokens.len() as i32, -1);
            }
        }

        if opts.kv_window > 0 {
            trim_tokens(&mut prev_tokens, opts.kv_window);
        }

        if !opts.raw {
            out.flush()?;
            out.write_passthrough(b"\n")?;
        }
        out.write_passthrough(end_marker)?;
        out.flush()?;
        if !opts.raw {
            eprintln!("\ncompleted in {:?}", round_ms(turn_start.elapsed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn line_mode_strips_newlines() {
        let mut r = Cursor::new(b"hello world\r\n".to_vec());
        assert_eq!(read_prompt(&mut r, false).unwrap(), Some("hello world".into()));
        assert_eq!(read_prompt(&mut r, false).unwrap(), None);
    }

    #[test]
    fn rs_mode_consumes_separator() {
        let mut r = Cursor::new(b"one\x1etwo\x1e".to_vec());
        assert_eq!(read_prompt(&mut r, true).unwrap(), Some("one".into()));
        assert_eq!(read_prompt(&mut r, true).unwrap(), Some("two".into()));
        assert_eq!(read_prompt(&mut r, true).unwrap(), None);
    }

    #[test]
    fn rs_mode_embedded_newlines_survive() {
        let mut r = Cursor::new(b"line one\nline two\n\x1e".to_vec());
        assert_eq!(
            read_prompt(&mut r, true).unwrap(),
            Some("line one\nline two".into())
        );
    }

    #[test]
    fn unterminated_tail_is_still_a_prompt() {
        let mut r = Cursor::new(b"tail".to_vec());
        assert_eq!(read_prompt(&mut r, false).unwrap(), Some("tail".into()));
        assert_eq!(read_prompt(&mut r, false).unwrap(), None);
    }
}
