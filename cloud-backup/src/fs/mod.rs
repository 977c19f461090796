//! Local file inspection: content digests and metadata snapshots.

pub mod checksum;
pub mod metadata;

pub use checksum::ChecksumStore;
pub use metadata::FileSnapshot;

use crate::utils::errors::Result;
use std::path::{Component, Path, PathBuf};

/// Absolute form of `path` with `.` and `..` folded away lexically, so every
/// spelling of the same location yields the same value.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_path_folds_dot_segments() {
        let dir = tempfile::tempdir().unwrap();
        let plain = absolute_path(&dir.path().join("a.log")).unwrap();

        assert_eq!(absolute_path(&dir.path().join("sub/../a.log")).unwrap(), plain);
        assert_eq!(absolute_path(&dir.path().join("./x/./../a.log")).unwrap(), plain);
        assert!(plain.is_absolute());
    }

    #[test]
    fn test_absolute_path_stops_at_root() {
        let root = absolute_path(Path::new("/../../a.log")).unwrap();
        assert_eq!(root, PathBuf::from("/a.log"));
    }
}
