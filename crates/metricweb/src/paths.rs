// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Archive-root containment checks.
//!
//! Every archive path that reaches a backend goes through [`contain`] first.
//! A path is accepted only if, after resolving `..` and symlinks, it lies
//! beneath the canonical archive root. Paths that do not exist yet are
//! checked through their longest existing ancestor, so `../../etc/nothing`
//! is rejected the same way as `../../etc/passwd`.

use crate::error::{BridgeError, Result};
use std::path::{Component, Path, PathBuf};

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            // Popping past the root is a no-op, as in the kernel.
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor of `path`, then re-append the
/// components that do not exist.
fn resolve_existing(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(normalize(&resolved));
            }
            Err(_) => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(BridgeError::BindFailure(format!(
                        "cannot resolve {}",
                        path.display()
                    )));
                };
                missing.push(name);
                if !existing.pop() {
                    return Err(BridgeError::BindFailure(format!(
                        "cannot resolve {}",
                        path.display()
                    )));
                }
            }
        }
    }
}

/// Canonical form of the archive root itself.
pub fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize().map_err(|e| {
        BridgeError::BindFailure(format!("archive root {}: {}", root.display(), e))
    })
}

/// Resolve `candidate` (absolute, or relative to `root`) and require it to lie
/// beneath `root`. Returns the resolved path.
pub fn contain(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let root = canonical_root(root)?;
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = resolve_existing(&normalize(&joined))?;
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(BridgeError::PathEscape {
            path: candidate.to_path_buf(),
            root,
        })
    }
}

/// True if an existing `path` canonicalizes outside `canonical_root`.
pub fn is_cursed(canonical_root: &Path, path: &Path) -> bool {
    match path.canonicalize() {
        Ok(resolved) => !resolved.starts_with(canonical_root),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_contain_accepts_nested() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("host1")).unwrap();
        let resolved = contain(dir.path(), Path::new("host1/20240101")).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("host1/20240101"));
    }

    #[test]
    fn test_contain_rejects_parent_escape() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("archives");
        std::fs::create_dir_all(&root).unwrap();

        for escape in ["../../etc/passwd", "../../etc/definitely-not-here", "a/../../x"] {
            assert!(matches!(
                contain(&root, Path::new(escape)),
                Err(BridgeError::PathEscape { .. })
            ));
        }
    }

    #[test]
    fn test_contain_rejects_absolute_outside() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        assert!(matches!(
            contain(dir.path(), other.path()),
            Err(BridgeError::PathEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_contain_rejects_symlink_escape() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(matches!(
            contain(dir.path(), Path::new("link/archive")),
            Err(BridgeError::PathEscape { .. })
        ));

        let root = dir.path().canonicalize().unwrap();
        assert!(is_cursed(&root, &dir.path().join("link")));
        assert!(!is_cursed(&root, dir.path()));
    }
}
