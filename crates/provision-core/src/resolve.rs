//! Resolution of include references against the including document.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::error::{ProvisionError, Result};
use crate::fetch::is_remote;

/// Resolve `target` (as written in an `include` list) against `base`, the
/// origin of the including document.
///
/// Remote targets and absolute local paths are only normalized. Relative
/// targets join the base URL or the base file's directory.
pub fn resolve_include(base: &str, target: &str) -> Result<String> {
    if is_remote(target) {
        return Ok(normalize_origin(target));
    }

    if is_remote(base) {
        let err = |reason: String| ProvisionError::PathResolution {
            base: base.to_string(),
            target: target.to_string(),
            reason,
        };
        let base_url = Url::parse(base).map_err(|e| err(e.to_string()))?;
        let joined = base_url.join(target).map_err(|e| err(e.to_string()))?;
        return Ok(joined.to_string());
    }

    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return Ok(normalize_local(target));
    }
    let dir = Path::new(base).parent().unwrap_or_else(|| Path::new(""));
    Ok(normalize_path(&dir.join(target_path)))
}

/// Canonical spelling of a document origin, so that the same file reached
/// through different relative spellings compares equal.
pub fn normalize_origin(origin: &str) -> String {
    if is_remote(origin) {
        Url::parse(origin)
            .map(String::from)
            .unwrap_or_else(|_| origin.to_string())
    } else {
        normalize_local(origin)
    }
}

fn normalize_local(path: &str) -> String {
    normalize_path(Path::new(path))
}

/// Lexical cleanup: drops `.` segments and folds `..` into its parent.
/// Does not touch the filesystem.
fn normalize_path(path: &Path) -> String {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        ".".to_string()
    } else {
        out.to_string_lossy().into_owned()
    }
}
