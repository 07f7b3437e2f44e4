use serde::{Deserialize, Serialize};

/// User-tunable sampling knobs passed from the runner to a backend.
///
/// Backends apply them in the usual order: repetition penalty over the
/// last-N window, top-k truncation, top-p nucleus, temperature scaling,
/// then a weighted draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub top_k: i32,
    pub top_p: f32,
    pub temp: f32,
    /// Number of recent tokens the repetition penalty considers; <= 0 disables.
    pub repeat_last_n: i32,
    /// >= 1.0 reduces repetition; 1.0 disables.
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.9,
            temp: 0.6,
            repeat_last_n: 64,
            repeat_penalty: 1.05,
        }
    }
}

impl SamplingParams {
    /// Fast/greedy preset: deterministic argmax, no repetition penalty.
    pub fn fast() -> Self {
        Self {
            top_k: 1,
            top_p: 1.0,
            temp: 0.0,
            repeat_last_n: 0,
            repeat_penalty: 1.0,
        }
    }

    /// True when the knobs collapse to deterministic argmax. Backends must
    /// make this branch a pure function of (model, prompt, cache state).
    pub fn is_greedy(&self) -> bool {
        self.temp <= 0.0 && self.top_p >= 1.0 && self.top_k == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_preset_is_greedy() {
        assert!(SamplingParams::fast().is_greedy());
        assert!(!SamplingParams::default().is_greedy());
    }
}
