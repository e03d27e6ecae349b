//! Balanced-brace scanning for locating a complete `{...}` JSON object
//! inside a larger byte/text buffer, respecting string literals and escapes.
//! Shared by the Gemini-API iterator decode (a streamed JSON array) and the
//! Ollama tool-call fallback (fenced JSON embedded in free text), per the
//! scanning technique the spec describes for the latter (§4.5).

/// Return the index of the `}` that closes the object starting at index 0
/// of `bytes` (which must begin with `{`), or `None` if no balanced close
/// is present yet.
pub(crate) fn find_balanced_object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_end_of_simple_object() {
        let end = find_balanced_object_end(b"{\"a\":1}trailing").unwrap();
        assert_eq!(end, 6);
    }

    #[test]
    fn ignores_braces_inside_string_values() {
        let end = find_balanced_object_end(b"{\"a\":\"}\"}").unwrap();
        assert_eq!(&b"{\"a\":\"}\"}"[..=end], b"{\"a\":\"}\"}".as_ref());
    }

    #[test]
    fn returns_none_when_unbalanced() {
        assert!(find_balanced_object_end(b"{\"a\":1").is_none());
    }
}
