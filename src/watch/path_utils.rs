// src/watch/path_utils.rs

//! Path normalisation shared by the matcher and the watcher.

use std::path::Path;

/// Convert `path` into a `/`-separated string relative to `root`.
///
/// A plain `strip_prefix` is tried first; if that fails, both sides are
/// canonicalized and compared again, since notify may report a different
/// absolute prefix for the same directory (symlinks, `/private/var` on macOS).
///
/// Returns `None` if `path` is not under `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(to_slash(rel));
    }

    let root_canon = root.canonicalize().ok()?;
    let path_canon = path.canonicalize().ok()?;
    path_canon.strip_prefix(&root_canon).ok().map(to_slash)
}

fn to_slash(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_root_prefix() {
        assert_eq!(
            relative_str(Path::new("/site"), Path::new("/site/src/a.js")).as_deref(),
            Some("src/a.js")
        );
        assert_eq!(relative_str(Path::new("/site"), Path::new("/other/a.js")), None);
    }
}
