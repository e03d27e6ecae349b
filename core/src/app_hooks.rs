//! The seam between this workspace's engine-shaped concerns (provider
//! clients, the indexer) and whatever out-of-scope shell embeds them — a
//! CLI, a TUI, a test harness.
//!
//! Grounded on the teacher's `engine/src/app/mod.rs` (`App`, kept as
//! reference only — the engine crate itself is out of scope): rather than
//! reaching into global state, the shell hands the library a single handle
//! exposing exactly what it needs.

use std::path::Path;

use forge_config::Config;

/// What an embedding shell must provide for the library layer to operate
/// without reaching into process-global state.
pub trait AppHooks: Send + Sync {
    /// Stable identifier for the current session, used to namespace
    /// anything session-scoped (log correlation, cache sub-keys).
    fn session_id(&self) -> &str;

    /// The project root the indexer and gitignore matcher operate over.
    fn work_dir(&self) -> &Path;

    /// The loaded configuration.
    fn config(&self) -> &Config;

    /// An opaque handle to whatever tool registry the shell maintains.
    /// Tool execution itself is out of scope for this workspace; this
    /// exists only so a caller holding an `AppHooks` can recover its own
    /// concrete registry type via downcasting.
    fn tool_registry(&self) -> &dyn std::any::Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TestHooks {
        session_id: String,
        work_dir: PathBuf,
        config: Config,
    }

    impl AppHooks for TestHooks {
        fn session_id(&self) -> &str {
            &self.session_id
        }
        fn work_dir(&self) -> &Path {
            &self.work_dir
        }
        fn config(&self) -> &Config {
            &self.config
        }
        fn tool_registry(&self) -> &dyn std::any::Any {
            &()
        }
    }

    #[test]
    fn hooks_expose_session_and_work_dir() {
        let hooks = TestHooks {
            session_id: "sess-1".to_string(),
            work_dir: PathBuf::from("/tmp/project"),
            config: Config::default(),
        };
        assert_eq!(hooks.session_id(), "sess-1");
        assert_eq!(hooks.work_dir(), Path::new("/tmp/project"));
    }
}
