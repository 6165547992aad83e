//! Shared helper functions used across CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use bymcp_adapters::AdapterError;
use tracing::debug;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Load `.env` files without overriding variables that are already set.
///
/// An explicit `env_file` is loaded first and must exist.  Then `.env` from
/// the current directory and from the directory of the executable are
/// loaded when present.
pub fn load_env(env_file: Option<&Path>) -> Result<()> {
    if let Some(path) = env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display()))?;
    }

    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(".env"));
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join(".env"));
    }

    for path in candidates.iter().filter(|p| p.is_file()) {
        match dotenvy::from_path(path) {
            Ok(()) => debug!(path = %path.display(), ".env loaded"),
            Err(e) => eprintln!("warning: ignoring {}: {e}", path.display()),
        }
    }
    Ok(())
}

/// The user-facing reason behind a configuration failure.
///
/// Configuration errors carry their own message; anything else is shown
/// with its full description.
pub fn config_reason(err: &AdapterError) -> String {
    match err {
        AdapterError::ConfigError(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_reason_strips_prefix() {
        let err = AdapterError::ConfigError("missing environment variables: MS_CLIENT_ID".into());
        assert_eq!(config_reason(&err), "missing environment variables: MS_CLIENT_ID");

        let err = AdapterError::Internal("boom".into());
        assert_eq!(config_reason(&err), "internal adapter error: boom");
    }

    #[test]
    fn explicit_env_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env(Some(&dir.path().join("missing.env"))).is_err());
    }
}
