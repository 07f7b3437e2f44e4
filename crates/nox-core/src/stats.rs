use std::time::Duration;

/// Per-prompt timing and token counts, filled in by the generation loop.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub prefill: Duration,
    pub generate: Duration,
}

impl RunStats {
    /// The `bench:` stderr line. Tokens-per-second reports 0 when no time
    /// was spent generating.
    pub fn bench_line(&self) -> String {
        let total = self.prefill + self.generate;
        let tok_s = if self.generate > Duration::ZERO {
            self.generated_tokens as f64 / self.generate.as_secs_f64()
        } else {
            0.0
        };
        format!(
            "bench: prompt_tokens={} generated_tokens={} prefill_ms={} gen_ms={} total_ms={} tok_s={:.2}",
            self.prompt_tokens,
            self.generated_tokens,
            self.prefill.as_millis(),
            self.generate.as_millis(),
            total.as_millis(),
            tok_s,
        )
    }
}

/// Millisecond-rounded duration (to nearest, ties up) for the
/// `completed in` stderr lines.
pub fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(((d.as_nanos() + 500_000) / 1_000_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_line_shape() {
        let stats = RunStats {
            prompt_tokens: 7,
            generated_tokens: 4,
            prefill: Duration::from_millis(120),
            generate: Duration::from_millis(2000),
        };
        assert_eq!(
            stats.bench_line(),
            "bench: prompt_tokens=7 generated_tokens=4 prefill_ms=120 gen_ms=2000 total_ms=2120 tok_s=2.00"
        );
    }

    #[test]
    fn bench_line_zero_generation() {
        let stats = RunStats {
            prompt_tokens: 3,
            ..Default::default()
        };
        assert!(stats.bench_line().ends_with("tok_s=0.00"));
    }

    #[test]
    fn round_ms_rounds_to_nearest() {
        assert_eq!(round_ms(Duration::from_micros(1600)), Duration::from_millis(2));
        assert_eq!(round_ms(Duration::from_micros(1400)), Duration::from_millis(1));
        assert_eq!(round_ms(Duration::from_micros(1500)), Duration::from_millis(2));
        assert_eq!(round_ms(Duration::ZERO), Duration::ZERO);
    }
}
