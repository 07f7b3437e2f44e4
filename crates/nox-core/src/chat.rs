//! Minimal ChatML wrapping for instruct models.
//!
//! Qwen-style instruct models accept this directly; for anything else the
//! caller should pass raw prompts.

const DEFAULT_SYSTEM: &str = "You are nox. Be helpful, accurate, and concise.";
const COT_SUFFIX: &str =
    "Think step by step and show your reasoning. End with a final short answer.";

/// Resolve the effective system text from the `--system` flag and the
/// chat/cot modes. Returns an empty string when no system block applies.
pub fn resolve_system(system: &str, chat: bool, cot: bool) -> String {
    let mut text = system.to_string();
    if text.is_empty() && (chat || cot) {
        text = DEFAULT_SYSTEM.to_string();
    }
    if cot {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(COT_SUFFIX);
    }
    text
}

/// Wrap a user prompt in ChatML with an optional system block and an open
/// assistant tag. An empty user prompt comes back empty.
pub fn build_chatml(system: &str, user: &str) -> String {
    let user = user.trim();
    if user.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let system = system.trim();
    if !system.is_empty() {
        out.push_str("<|im_start|>system\n");
        out.push_str(system);
        out.push_str("\n<|im_end|>\n");
    }
    out.push_str("<|im_start|>user\n");
    out.push_str(user);
    out.push_str("\n<|im_end|>\n");
    out.push_str("<|im_start|>assistant\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_system_and_user() {
        let got = build_chatml("be brief", "hi");
        assert_eq!(
            got,
            "<|im_start|>system\nbe brief\n<|im_end|>\n\
             <|im_start|>user\nhi\n<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn omits_empty_system_block() {
        let got = build_chatml("", "hi");
        assert!(got.starts_with("<|im_start|>user\n"));
    }

    #[test]
    fn empty_user_yields_empty_prompt() {
        assert_eq!(build_chatml("sys", "   "), "");
    }

    #[test]
    fn chat_mode_defaults_system() {
        assert_eq!(resolve_system("", true, false), DEFAULT_SYSTEM);
        assert_eq!(resolve_system("", false, false), "");
        assert_eq!(resolve_system("custom", true, false), "custom");
    }

    #[test]
    fn cot_appends_reasoning_instruction() {
        let got = resolve_system("", true, true);
        assert_eq!(got, format!("{DEFAULT_SYSTEM}\n{COT_SUFFIX}"));
        // Explicit system text keeps its own wording ahead of the suffix.
        let got = resolve_system("terse.", false, true);
        assert_eq!(got, format!("terse.\n{COT_SUFFIX}"));
    }
}
