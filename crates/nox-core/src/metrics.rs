//! Per-token top-2 logit telemetry (`NR|` stderr lines).

use std::io::{self, Write};

use nox_abi::Token;

pub const METRICS_PREFIX: &str = "NR|";

/// Largest and second-largest logit in one pass. Both maxima start at
/// negative infinity, so a duplicated maximum reports `max2 == max1` and a
/// zero margin. An empty vector reports `(0, 0)`.
pub fn logits_top2(logits: &[f32]) -> (f32, f32) {
    if logits.is_empty() {
        return (0.0, 0.0);
    }
    let mut max1 = f32::NEG_INFINITY;
    let mut max2 = f32::NEG_INFINITY;
    for &v in logits {
        if v > max1 {
            max2 = max1;
            max1 = v;
        } else if v > max2 {
            max2 = v;
        }
    }
    (max1, max2)
}

/// One telemetry line per generated token: `NR|<token>|<max1>|<max2>|<margin>`.
pub fn write_line(w: &mut dyn Write, token: Token, max1: f32, max2: f32) -> io::Result<()> {
    writeln!(
        w,
        "{METRICS_PREFIX}{}|{:.6}|{:.6}|{:.6}",
        token.0,
        max1,
        max2,
        max1 - max2
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top2_orders_maxima() {
        assert_eq!(logits_top2(&[0.5, 3.0, -1.0, 2.0]), (3.0, 2.0));
    }

    #[test]
    fn duplicate_maximum_gives_zero_margin() {
        let (max1, max2) = logits_top2(&[1.0, 4.0, 4.0]);
        assert_eq!(max1, max2);
    }

    #[test]
    fn empty_logits_report_zero() {
        assert_eq!(logits_top2(&[]), (0.0, 0.0));
    }

    #[test]
    fn line_format() {
        let mut buf = Vec::new();
        write_line(&mut buf, Token(42), 3.5, 1.5).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "NR|42|3.500000|1.500000|2.000000\n"
        );
    }
}
