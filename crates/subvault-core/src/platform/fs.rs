use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, VaultError};

/// Total size in bytes of all regular files below `path`.
pub fn directory_size(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        return Err(VaultError::Other(format!(
            "{} is not a directory",
            path.display()
        )));
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            VaultError::Other(format!(
                "failed to calculate size of {}: {e}",
                path.display()
            ))
        })?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Move every entry of `source` into `target`.
///
/// Entries are renamed when both directories share a filesystem. Across
/// filesystems each entry is copied and its source removed before the next
/// one starts, so at most one entry is duplicated at any time.
pub fn move_dir_contents(source: &Path, target: &Path) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        move_entry(&from, &to).map_err(|e| {
            VaultError::Other(format!(
                "failed to move {} to {}: {e}",
                from.display(),
                to.display()
            ))
        })?;
    }
    Ok(())
}

fn move_entry(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(from = %from.display(), to = %to.display(), "cross-device move, copying");
            copy_recursive(from, to)?;
            remove_path(from)
        }
        Err(e) => Err(e),
    }
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(from)?;
        return std::os::unix::fs::symlink(link, to);
    }
    if !meta.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }

    fs::create_dir(to)?;
    fs::set_permissions(to, meta.permissions())?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Remove a directory tree, logging instead of failing.
pub fn remove_dir_best_effort(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "removed directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), vec![0u8; 50]).unwrap();
        assert_eq!(directory_size(dir.path()).unwrap(), 150);
    }

    #[test]
    fn directory_size_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(directory_size(&file).is_err());
    }

    #[test]
    fn move_dir_contents_empties_source() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("table.csv"), b"1,2,3").unwrap();
        fs::create_dir(src.path().join("scheme")).unwrap();
        fs::write(src.path().join("scheme/pb"), b"schema").unwrap();

        move_dir_contents(src.path(), dst.path()).unwrap();

        assert_eq!(fs::read_dir(src.path()).unwrap().count(), 0);
        assert_eq!(fs::read(dst.path().join("table.csv")).unwrap(), b"1,2,3");
        assert_eq!(fs::read(dst.path().join("scheme/pb")).unwrap(), b"schema");
    }

    #[test]
    fn copy_recursive_preserves_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("d/e")).unwrap();
        fs::write(src.path().join("d/e/f"), b"deep").unwrap();

        copy_recursive(&src.path().join("d"), &dst.path().join("d")).unwrap();
        remove_path(&src.path().join("d")).unwrap();

        assert_eq!(fs::read(dst.path().join("d/e/f")).unwrap(), b"deep");
        assert!(!src.path().join("d").exists());
    }

    #[test]
    fn remove_missing_dir_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        remove_dir_best_effort(&dir.path().join("nope"));
    }
}
