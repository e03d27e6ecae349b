//! Config file discovery and `${VAR}` expansion against a fixed,
//! known-safe variable allowlist — unrecognized `${...}` references are
//! left untouched rather than silently dropped (a config file full of
//! stray `${...}` placeholders should fail loudly elsewhere, not here).

use std::path::PathBuf;

const APP_DIR: &str = "forge";
const CONFIG_FILE: &str = "config.toml";

const ALLOWED_VARS: &[&str] = &[
    "HOME",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "FORGE_GEMINI_KEY",
    "FORGE_GLM_KEY",
    "FORGE_DEEPSEEK_KEY",
    "FORGE_OLLAMA_KEY",
];

/// `$XDG_CONFIG_HOME/forge/config.toml`, falling back to
/// `$HOME/.config/forge/config.toml`, then to [`dirs::config_dir`].
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join(APP_DIR));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home).join(".config").join(APP_DIR));
        }
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join(APP_DIR));
        }
    }
    dirs::data_dir().map(|dir| dir.join(APP_DIR))
}

/// Expand every `${NAME}` occurrence in `input` whose `NAME` is in
/// [`ALLOWED_VARS`] and set in the environment. Anything else — an
/// unknown name, or an allowlisted name that's unset — is left literal.
#[must_use]
pub fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        if ALLOWED_VARS.contains(&name) {
            if let Ok(value) = std::env::var(name) {
                out.push_str(&value);
            } else {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            }
        } else {
            out.push_str("${");
            out.push_str(name);
            out.push('}');
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_allowlisted_set_var() {
        unsafe { std::env::set_var("FORGE_GEMINI_KEY", "secret-value") };
        assert_eq!(expand_vars("key = \"${FORGE_GEMINI_KEY}\""), "key = \"secret-value\"");
        unsafe { std::env::remove_var("FORGE_GEMINI_KEY") };
    }

    #[test]
    fn leaves_unknown_var_literal() {
        assert_eq!(expand_vars("key = \"${SOME_RANDOM_VAR}\""), "key = \"${SOME_RANDOM_VAR}\"");
    }

    #[test]
    fn leaves_allowlisted_but_unset_var_literal() {
        unsafe { std::env::remove_var("FORGE_OLLAMA_KEY") };
        assert_eq!(expand_vars("${FORGE_OLLAMA_KEY}"), "${FORGE_OLLAMA_KEY}");
    }

    #[test]
    fn handles_multiple_vars_in_one_string() {
        unsafe {
            std::env::set_var("FORGE_GLM_KEY", "a");
            std::env::set_var("FORGE_DEEPSEEK_KEY", "b");
        }
        assert_eq!(expand_vars("${FORGE_GLM_KEY}-${FORGE_DEEPSEEK_KEY}"), "a-b");
        unsafe {
            std::env::remove_var("FORGE_GLM_KEY");
            std::env::remove_var("FORGE_DEEPSEEK_KEY");
        }
    }
}
