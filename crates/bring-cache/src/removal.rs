use std::io;
use std::ops::AddAssign;
use std::path::Path;

use tracing::debug;

/// Summary of what a removal operation deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Removal {
    pub num_files: u64,
    pub num_dirs: u64,
    pub total_bytes: u64,
}

impl AddAssign for Removal {
    fn add_assign(&mut self, rhs: Self) {
        self.num_files += rhs.num_files;
        self.num_dirs += rhs.num_dirs;
        self.total_bytes += rhs.total_bytes;
    }
}

/// Remove `path` (file or directory tree), tolerating a missing path and
/// tallying what was removed.
pub fn rm_rf(path: impl AsRef<Path>) -> io::Result<Removal> {
    let path = path.as_ref();
    let mut summary = Removal::default();

    let metadata = match fs_err::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(summary),
        Err(err) => return Err(err),
    };

    debug!("Removing {}", path.display());

    if metadata.is_dir() {
        for entry in walkdir::WalkDir::new(path).contents_first(true) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_dir() {
                summary.num_dirs += 1;
                fs_err::remove_dir(entry.path())?;
            } else {
                summary.num_files += 1;
                summary.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or_default();
                fs_err::remove_file(entry.path())?;
            }
        }
    } else {
        summary.num_files += 1;
        summary.total_bytes += metadata.len();
        fs_err::remove_file(path)?;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rm_rf_missing_path_is_a_noop() {
        let summary = rm_rf("/no/such/path").unwrap();
        assert_eq!(summary.num_files, 0);
        assert_eq!(summary.num_dirs, 0);
    }

    #[test]
    fn rm_rf_counts_files_and_dirs() {
        let dir = assert_fs::TempDir::new().unwrap();
        fs_err::create_dir_all(dir.path().join("a/b")).unwrap();
        fs_err::write(dir.path().join("a/b/file.txt"), b"hello").unwrap();

        let summary = rm_rf(dir.path()).unwrap();
        assert_eq!(summary.num_files, 1);
        assert_eq!(summary.num_dirs, 3); // root, a, a/b
        assert_eq!(summary.total_bytes, 5);
        assert!(!dir.path().exists());
    }
}
