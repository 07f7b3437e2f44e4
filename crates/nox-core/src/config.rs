//! Resolved operational parameters and the tri-state warmup flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use nox_abi::SamplingParams;

pub const DEFAULT_MODEL_PATH: &str = "assets/models/nox.gguf";
pub const DEFAULT_THREADS: i32 = 4;

/// Model files at or above this size get prefetch and mlock by default.
const AUTO_WARMUP_MIN_BYTES: u64 = 1 << 30;

/// A boolean flag with an explicit "not given" state, so environment and
/// size-based auto defaults can fill in behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriBool {
    #[default]
    Unset,
    True,
    False,
}

impl TriBool {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => TriBool::Unset,
            Some(true) => TriBool::True,
            Some(false) => TriBool::False,
        }
    }

    /// Resolution order: explicit flag, then environment, then `auto`.
    /// An unparsable environment value counts as unset.
    pub fn resolve(self, env_value: Option<&str>, auto: bool) -> bool {
        match self {
            TriBool::True => true,
            TriBool::False => false,
            TriBool::Unset => env_value.and_then(parse_bool).unwrap_or(auto),
        }
    }
}

/// Boolean spellings accepted on flags and environment variables
/// (`1/t/T/TRUE/true/True` and the `0/f/F/FALSE/false/False` family).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Backend thread count: `NOX_NUM_THREADS` when it parses to a positive
/// integer, otherwise 4.
pub fn detect_threads(env_value: Option<&str>) -> i32 {
    if let Some(v) = env_value {
        if let Ok(n) = v.parse::<i32>() {
            if n > 0 {
                return n;
            }
        }
    }
    DEFAULT_THREADS
}

/// Size-based warmup defaults: `(prefetch, prepack)`, both on for models of
/// a GiB or more. A missing model file resolves to off; the load error
/// surfaces later with a better message.
pub fn auto_warmup(model_path: &Path) -> (bool, bool) {
    match std::fs::metadata(model_path) {
        Ok(meta) => {
            let big = meta.len() >= AUTO_WARMUP_MIN_BYTES;
            (big, big)
        }
        Err(_) => (false, false),
    }
}

/// Everything the session controller needs for one process lifetime,
/// after flag/env/auto resolution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub model_path: PathBuf,
    pub max_tokens: usize,
    pub ctx_length: usize,
    pub batch_size: usize,
    pub sampling: SamplingParams,
    pub fast: bool,
    pub raw: bool,
    pub stream_bytes: usize,
    pub kv_window: usize,
    pub metrics: bool,
    pub bench: bool,
    pub serve: bool,
    pub serve_rs: bool,
    pub keep_cache: bool,
    pub append: bool,
    pub input_only: bool,
    pub state_save: Option<PathBuf>,
    pub state_load: Option<PathBuf>,
    pub chat: bool,
    pub cot: bool,
    pub system: String,
    pub prepack: TriBool,
    pub prefetch: TriBool,
    pub threads: i32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            max_tokens: 128,
            ctx_length: 1024,
            batch_size: 32,
            sampling: SamplingParams::default(),
            fast: false,
            raw: false,
            stream_bytes: 0,
            kv_window: 0,
            metrics: false,
            bench: false,
            serve: false,
            serve_rs: false,
            keep_cache: false,
            append: false,
            input_only: false,
            state_save: None,
            state_load: None,
            chat: false,
            cot: false,
            system: String::new(),
            prepack: TriBool::Unset,
            prefetch: TriBool::Unset,
            threads: DEFAULT_THREADS,
        }
    }
}

impl RunnerConfig {
    /// `--fast` rewrites the sampling knobs to the greedy preset before the
    /// backend session is built.
    pub fn apply_fast(&mut self) {
        if self.fast {
            self.sampling = SamplingParams::fast();
        }
    }

    /// Chat wrapping applies when any of chat/cot/system is in play.
    pub fn chat_active(&self) -> bool {
        self.chat || self.cot || !self.system.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_env_beats_auto() {
        assert!(TriBool::True.resolve(Some("false"), false));
        assert!(!TriBool::False.resolve(Some("true"), true));
        assert!(TriBool::Unset.resolve(Some("true"), false));
        assert!(!TriBool::Unset.resolve(Some("0"), true));
        assert!(TriBool::Unset.resolve(None, true));
        assert!(!TriBool::Unset.resolve(None, false));
    }

    #[test]
    fn garbage_env_counts_as_unset() {
        assert!(TriBool::Unset.resolve(Some("yes"), true));
        assert!(!TriBool::Unset.resolve(Some(""), false));
    }

    #[test]
    fn bool_spellings() {
        for s in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(s), Some(true), "{s}");
        }
        for s in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(s), Some(false), "{s}");
        }
        assert_eq!(parse_bool("on"), None);
    }

    #[test]
    fn thread_detection() {
        assert_eq!(detect_threads(None), 4);
        assert_eq!(detect_threads(Some("8")), 8);
        assert_eq!(detect_threads(Some("0")), 4);
        assert_eq!(detect_threads(Some("-2")), 4);
        assert_eq!(detect_threads(Some("lots")), 4);
    }

    #[test]
    fn fast_rewrites_sampling() {
        let mut cfg = RunnerConfig {
            fast: true,
            ..Default::default()
        };
        cfg.apply_fast();
        assert!(cfg.sampling.is_greedy());
        assert_eq!(cfg.sampling.repeat_last_n, 0);
    }

    #[test]
    fn missing_model_disables_auto_warmup() {
        assert_eq!(auto_warmup(Path::new("/no/such/model.gguf")), (false, false));
    }
}
