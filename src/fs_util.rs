//! Filesystem helpers shared by stat, backup, and merge.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Total size in bytes of all files under `path`, recursively.
pub(crate) fn dir_size(path: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += metadata.len();
        }
    }
    Ok(size)
}

/// Free disk space in bytes on the filesystem holding `path`.
pub(crate) fn available_disk_size(path: &Path) -> Result<u64> {
    Ok(fs4::available_space(path)?)
}

/// Copies every file under `src` into `dst`, skipping entries whose file
/// name is listed in `exclude`. `dst` is created if missing.
pub(crate) fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|skip| name.as_os_str() == *skip) {
            continue;
        }
        let target = dst.join(&name);
        if entry.metadata()?.is_dir() {
            copy_dir(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_size_sums_all_files() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("b"), vec![0u8; 28]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c"), vec![0u8; 14]).unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 142);
    }

    #[test]
    fn available_disk_size_is_nonzero() {
        let dir = tempfile::TempDir::with_prefix("barreldb").unwrap();
        assert!(available_disk_size(dir.path()).unwrap() > 0);
    }

    #[test]
    fn copy_dir_honors_exclusions() {
        let src = tempfile::TempDir::with_prefix("barreldb").unwrap();
        let dst = tempfile::TempDir::with_prefix("barreldb").unwrap();
        fs::write(src.path().join("000000000.data"), b"records").unwrap();
        fs::write(src.path().join("flock"), b"").unwrap();

        copy_dir(src.path(), dst.path(), &["flock"]).unwrap();
        assert!(dst.path().join("000000000.data").exists());
        assert!(!dst.path().join("flock").exists());
        assert_eq!(fs::read(dst.path().join("000000000.data")).unwrap(), b"records");
    }
}
