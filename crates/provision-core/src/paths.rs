use crate::error::{ProvisionError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const STAGE_FILE: &str = "stage.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Platform default for persistent engine state.
pub fn default_state_dir() -> PathBuf {
    if cfg!(windows) {
        let base = std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        base.join("Provision")
    } else {
        PathBuf::from("/var/lib/provision")
    }
}

pub fn stage_file(state_dir: &Path) -> PathBuf {
    state_dir.join(STAGE_FILE)
}

pub fn settings_file(state_dir: &Path) -> PathBuf {
    state_dir.join(SETTINGS_FILE)
}

// ---------------------------------------------------------------------------
// Stage id validation
// ---------------------------------------------------------------------------

static STAGE_ID_RE: OnceLock<Regex> = OnceLock::new();

fn stage_id_re() -> &'static Regex {
    STAGE_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

pub fn validate_stage_id(id: &str) -> Result<()> {
    if stage_id_re().is_match(id) {
        Ok(())
    } else {
        Err(ProvisionError::InvalidStageId(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_stage_ids() {
        for id in ["0", "50", "post-sysprep", "v1.2", "A_b"] {
            validate_stage_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_stage_ids() {
        for id in ["", "-leading", "has space", "../up", "a/b"] {
            assert!(validate_stage_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let dir = Path::new("/tmp/state");
        assert_eq!(stage_file(dir), PathBuf::from("/tmp/state/stage.yaml"));
        assert_eq!(settings_file(dir), PathBuf::from("/tmp/state/settings.yaml"));
    }

    #[test]
    fn default_state_dir_is_absolute() {
        assert!(default_state_dir().is_absolute() || cfg!(windows));
    }
}
