//! Project identity: a stable short id derived from a project's absolute
//! path, used to namespace every on-disk cache artifact.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// First 16 hex chars of SHA-256 of the normalized absolute project path.
#[must_use]
pub fn project_id(project_dir: &Path) -> String {
    let normalized = normalize(project_dir);
    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

fn normalize(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute.to_string_lossy().replace('\\', "/")
}

/// `<config>/semantic_cache/<project-id>/`.
#[must_use]
pub fn cache_dir(config_dir: &Path, project_dir: &Path) -> PathBuf {
    config_dir.join("semantic_cache").join(project_id(project_dir))
}
