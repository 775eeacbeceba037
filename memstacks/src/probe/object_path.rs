//! Allocator object resolution for `-O`
//!
//! The flag accepts three spellings: a bare library name (`c` resolves to
//! `libc.so*`), an explicit file name, or a path. Names are searched across
//! the standard library directories, preferring an exact `lib<name>.so` over
//! versioned variants.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::TraceError;

const LIB_DIRS: &[&str] = &[
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/lib/x86_64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu",
    "/lib/aarch64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
];

/// Resolve the `-O` object specifier to a file path.
///
/// # Errors
/// Returns [`TraceError::ObjectNotFound`] when the specifier names neither an
/// existing file nor a library present in the standard directories.
pub fn resolve_object_path(object: &str) -> Result<PathBuf, TraceError> {
    let as_path = Path::new(object);
    if object.contains('/') || as_path.is_file() {
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }
        return Err(TraceError::ObjectNotFound(object.to_string()));
    }

    let dirs: Vec<PathBuf> = LIB_DIRS.iter().map(PathBuf::from).collect();
    find_library(object, &dirs).ok_or_else(|| TraceError::ObjectNotFound(object.to_string()))
}

/// Search `dirs` for `lib<name>.so`, falling back to the first versioned
/// `lib<name>.so.*` found.
fn find_library(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let exact = format!("lib{name}.so");

    for dir in dirs {
        let candidate = dir.join(&exact);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let versioned_prefix = format!("lib{name}.so.");
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        let mut matches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&versioned_prefix))
            })
            .collect();
        matches.sort();
        if let Some(found) = matches.into_iter().next() {
            return Some(found);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_name_preferred_over_versioned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libc.so"), b"").unwrap();
        fs::write(dir.path().join("libc.so.6"), b"").unwrap();

        let found = find_library("c", &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("libc.so"));
    }

    #[test]
    fn test_versioned_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libc.so.6"), b"").unwrap();

        let found = find_library("c", &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("libc.so.6"));
    }

    #[test]
    fn test_missing_library_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_library("notalib", &[dir.path().to_path_buf()]).is_none());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libcustom.so");
        fs::write(&path, b"").unwrap();

        let resolved = resolve_object_path(&path.to_string_lossy()).unwrap();
        assert_eq!(resolved, path);

        let missing = dir.path().join("nope.so");
        assert!(resolve_object_path(&missing.to_string_lossy()).is_err());
    }
}
