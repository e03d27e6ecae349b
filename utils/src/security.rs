//! Redaction helpers for secrets that must never reach logs or error chunks.
//!
//! Provider API keys and OAuth bearer tokens sometimes get echoed back inside
//! error bodies (a misconfigured proxy, a verbose 400 response). This module
//! gives every provider client a single place to strip them before the text
//! is logged or surfaced to a caller.

const MIN_SECRET_LENGTH: usize = 16;

/// Replace bearer tokens and common provider key prefixes with a redaction marker.
#[must_use]
pub fn redact_secrets(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.split_inclusive('\n') {
        out.push_str(&redact_line(line));
    }
    out
}

fn redact_line(line: &str) -> String {
    let lower = line.to_ascii_lowercase();
    if let Some(pos) = lower.find("bearer ") {
        let (prefix, rest) = line.split_at(pos + "bearer ".len());
        let token_end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        let (token, suffix) = rest.split_at(token_end);
        if token.len() >= MIN_SECRET_LENGTH {
            return format!("{prefix}[REDACTED]{suffix}");
        }
    }
    redact_known_prefixes(line)
}

const KNOWN_PREFIXES: &[&str] = &["sk-ant-", "sk-", "AIza", "glm-"];

fn redact_known_prefixes(line: &str) -> String {
    let mut result = line.to_string();
    for prefix in KNOWN_PREFIXES {
        while let Some(pos) = result.find(prefix) {
            let rest = &result[pos + prefix.len()..];
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(rest.len());
            if end < MIN_SECRET_LENGTH {
                break;
            }
            result.replace_range(pos..pos + prefix.len() + end, "[REDACTED]");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::redact_secrets;

    #[test]
    fn redacts_bearer_token() {
        let input = "Authorization: Bearer sk-ant-REDACTED\n";
        let redacted = redact_secrets(input);
        assert!(!redacted.contains("abcdefghijklmnopqrstuvwxyz"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn leaves_short_tokens_alone() {
        let input = "Bearer abc";
        assert_eq!(redact_secrets(input), "Bearer abc");
    }

    #[test]
    fn redacts_known_key_prefix_inline() {
        let input = "key=AIzaSyD1234567890abcdefghijklmno in request body";
        let redacted = redact_secrets(input);
        assert!(!redacted.contains("1234567890abcdefghijklmno"));
    }
}
