//! Command-line surface of the runner. Flag names, defaults, and help text
//! follow the original runner; spelling is GNU `--flag` style.

use std::path::PathBuf;

use clap::Parser;

use nox_abi::SamplingParams;
use nox_core::config::{detect_threads, parse_bool, RunnerConfig, TriBool, DEFAULT_MODEL_PATH};

fn tri_bool(s: &str) -> Result<bool, String> {
    parse_bool(s).ok_or_else(|| format!("invalid boolean {s:?}"))
}

#[derive(Parser, Debug)]
#[command(name = "nox-runner")]
#[command(version)]
#[command(about = "Local GGUF inference runner for the Noctics stack")]
pub struct Args {
    /// Path to the GGUF model (defaults to assets/models/nox.gguf)
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Maximum tokens to generate
    #[arg(long = "max-tokens", value_name = "N", default_value_t = 128)]
    pub max_tokens: usize,

    /// Context length
    #[arg(long, value_name = "N", default_value_t = 1024)]
    pub ctx: usize,

    /// Batch size
    #[arg(long, value_name = "N", default_value_t = 32)]
    pub batch: usize,

    /// Temperature
    #[arg(long, default_value_t = 0.6)]
    pub temp: f32,

    /// Top-p
    #[arg(long = "top-p", default_value_t = 0.9)]
    pub top_p: f32,

    /// Top-k
    #[arg(long = "top-k", default_value_t = 40)]
    pub top_k: i32,

    /// Repetition window
    #[arg(long = "repeat-last-n", value_name = "N", default_value_t = 64)]
    pub repeat_last_n: i32,

    /// Repetition penalty
    #[arg(long = "repeat-penalty", default_value_t = 1.05)]
    pub repeat_penalty: f32,

    /// Fast/greedy sampling preset for lower latency
    #[arg(long)]
    pub fast: bool,

    /// Emit only generated tokens (no prefix/newlines)
    #[arg(long)]
    pub raw: bool,

    /// Buffer N bytes before flushing output (0 = flush each token)
    #[arg(long = "stream-bytes", value_name = "N", default_value_t = 0)]
    pub stream_bytes: usize,

    /// Sliding KV window size (0 = disabled)
    #[arg(long = "kv-window", value_name = "N", default_value_t = 0)]
    pub kv_window: usize,

    /// Emit per-token logit metrics to stderr (NR|token|max|second|margin)
    #[arg(long)]
    pub metrics: bool,

    /// Print benchmark stats to stderr
    #[arg(long)]
    pub bench: bool,

    /// Serve prompts from stdin (one per line)
    #[arg(long)]
    pub serve: bool,

    /// Use ASCII record separator (0x1e) as prompt delimiter
    #[arg(long = "serve-rs")]
    pub serve_rs: bool,

    /// Reuse KV cache between prompts when prefix matches
    #[arg(long = "keep-cache")]
    pub keep_cache: bool,

    /// Append prompts onto existing cache (no reset)
    #[arg(long = "append")]
    pub append: bool,

    /// Keep KV cache aligned to prompt only (do not append generated tokens)
    #[arg(long = "input-only")]
    pub input_only: bool,

    /// Save KV/cache state to a session file after each prompt
    #[arg(long = "state-save", value_name = "PATH")]
    pub state_save: Option<PathBuf>,

    /// Load KV/cache state from a session file before running
    #[arg(long = "state-load", value_name = "PATH")]
    pub state_load: Option<PathBuf>,

    /// Wrap prompts in a simple ChatML/Qwen-style chat format
    #[arg(long)]
    pub chat: bool,

    /// For --chat: request chain-of-thought style reasoning (more tokens,
    /// slower end-to-end)
    #[arg(long)]
    pub cot: bool,

    /// System prompt for --chat (default: minimal assistant)
    #[arg(long, value_name = "STRING", default_value = "")]
    pub system: String,

    /// Preload+lock model weights in RAM (mlock) for faster inference
    #[arg(long, value_name = "BOOL", value_parser = tri_bool)]
    pub prepack: Option<bool>,

    /// Warm OS cache by sequentially reading the model file
    #[arg(long, value_name = "BOOL", value_parser = tri_bool)]
    pub prefetch: Option<bool>,

    /// Prompt (single-shot only); words are joined with single spaces
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

impl Args {
    /// Positional words joined into one prompt.
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ").trim().to_string()
    }

    /// Resolve into the runner configuration: fast-preset rewrite, thread
    /// detection, and the default model location under the working
    /// directory.
    pub fn to_config(&self) -> RunnerConfig {
        let model_path = match &self.model {
            Some(p) => p.clone(),
            None => std::env::current_dir()
                .unwrap_or_default()
                .join(DEFAULT_MODEL_PATH),
        };
        let mut cfg = RunnerConfig {
            model_path,
            max_tokens: self.max_tokens,
            ctx_length: self.ctx,
            batch_size: self.batch,
            sampling: SamplingParams {
                top_k: self.top_k,
                top_p: self.top_p,
                temp: self.temp,
                repeat_last_n: self.repeat_last_n,
                repeat_penalty: self.repeat_penalty,
            },
            fast: self.fast,
            raw: self.raw,
            stream_bytes: self.stream_bytes,
            kv_window: self.kv_window,
            metrics: self.metrics,
            bench: self.bench,
            serve: self.serve,
            serve_rs: self.serve_rs,
            keep_cache: self.keep_cache,
            append: self.append,
            input_only: self.input_only,
            state_save: self.state_save.clone(),
            state_load: self.state_load.clone(),
            chat: self.chat,
            cot: self.cot,
            system: self.system.clone(),
            prepack: TriBool::from_flag(self.prepack),
            prefetch: TriBool::from_flag(self.prefetch),
            threads: detect_threads(std::env::var("NOX_NUM_THREADS").ok().as_deref()),
        };
        cfg.apply_fast();
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_surface() {
        let args = Args::parse_from(["nox-runner"]);
        let cfg = args.to_config();
        assert_eq!(cfg.max_tokens, 128);
        assert_eq!(cfg.ctx_length, 1024);
        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.sampling.top_k, 40);
        assert_eq!(cfg.sampling.top_p, 0.9);
        assert_eq!(cfg.sampling.temp, 0.6);
        assert_eq!(cfg.sampling.repeat_last_n, 64);
        assert_eq!(cfg.sampling.repeat_penalty, 1.05);
        assert_eq!(cfg.kv_window, 0);
        assert!(cfg.model_path.ends_with(DEFAULT_MODEL_PATH));
    }

    #[test]
    fn fast_preset_rewrites_sampling() {
        let args = Args::parse_from(["nox-runner", "--fast", "--temp", "0.9"]);
        let cfg = args.to_config();
        assert!(cfg.sampling.is_greedy());
        assert_eq!(cfg.sampling.repeat_penalty, 1.0);
    }

    #[test]
    fn positional_words_join_into_one_prompt() {
        let args = Args::parse_from(["nox-runner", "what", "is", "23*17?"]);
        assert_eq!(args.prompt_text(), "what is 23*17?");
    }

    #[test]
    fn tri_state_flags_accept_explicit_booleans() {
        let args = Args::parse_from(["nox-runner", "--prepack", "true", "--prefetch", "0"]);
        assert_eq!(args.prepack, Some(true));
        assert_eq!(args.prefetch, Some(false));
        let cfg = args.to_config();
        assert_eq!(cfg.prepack, TriBool::True);
        assert_eq!(cfg.prefetch, TriBool::False);

        let unset = Args::parse_from(["nox-runner"]);
        assert_eq!(unset.to_config().prepack, TriBool::Unset);
    }

    #[test]
    fn serve_and_state_flags_parse() {
        let args = Args::parse_from([
            "nox-runner",
            "--serve",
            "--serve-rs",
            "--keep-cache",
            "--input-only",
            "--state-save",
            "s.bin",
        ]);
        let cfg = args.to_config();
        assert!(cfg.serve && cfg.serve_rs && cfg.keep_cache && cfg.input_only);
        assert_eq!(cfg.state_save.as_deref(), Some(std::path::Path::new("s.bin")));
    }
}
