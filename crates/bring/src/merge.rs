//! Target folder merge (C9): deposit a materialized package folder into a
//! user-chosen target directory, tracked via a sidecar so a later `update`
//! merge knows which files this tool put there.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Name of the tracking sidecar written at the root of every merge target:
/// a single human-inspectable JSON file, matching this crate's other
/// on-disk JSON artifacts (`version.json`).
pub const TRACKING_FILE_NAME: &str = ".bring-tracking.json";

/// How to resolve a conflict between an existing target-side file and an
/// incoming one from the source folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Later-wins: the incoming file always overwrites.
    #[default]
    Default,
    /// Overwrite unconditionally, regardless of tracking.
    Force,
    /// Overwrite only files this tool previously wrote, tracked in the
    /// sidecar; anything else is left alone.
    Update,
}

/// Whether files are relocated into the target by rename or by copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    #[default]
    Move,
    Copy,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot merge {relative_path:?} into target: a conflicting file already exists and the {strategy:?} strategy forbids overwrite")]
pub struct MergeConflictError {
    pub relative_path: PathBuf,
    pub strategy: MergeStrategy,
}

/// Per-file provenance recorded in the target's tracking sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedFile {
    pub package: String,
    pub version_id: String,
    pub transform_hash: String,
    pub installed_at: chrono::DateTime<chrono::Utc>,
}

/// The tracking sidecar: relative path (as it appears under the target
/// root) → the provenance of whoever last wrote it through this tool.
pub type Tracking = IndexMap<String, TrackedFile>;

fn tracking_path(target: &Path) -> PathBuf {
    target.join(TRACKING_FILE_NAME)
}

fn load_tracking(target: &Path) -> Result<Tracking, Error> {
    let path = tracking_path(target);
    if !path.exists() {
        return Ok(Tracking::new());
    }
    let bytes = fs_err::read(&path)?;
    serde_json::from_slice(&bytes).map_err(|err| Error::Descriptor(format!("corrupt tracking sidecar: {err}")))
}

fn save_tracking(target: &Path, tracking: &Tracking) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(tracking).map_err(|err| Error::Descriptor(err.to_string()))?;
    fs_err::write(tracking_path(target), bytes)?;
    Ok(())
}

/// Merge `source` (a package's materialized output) into `target`,
/// recording provenance for each file merged in and returning the updated
/// tracking sidecar.
pub fn merge_into_target(
    source: &Path,
    target: &Path,
    strategy: MergeStrategy,
    method: MergeMethod,
    package: &str,
    version_id: &str,
    transform_hash: &str,
    installed_at: chrono::DateTime<chrono::Utc>,
) -> Result<Tracking, Error> {
    fs_err::create_dir_all(target)?;
    let mut tracking = load_tracking(target)?;

    for entry in walkdir::WalkDir::new(source).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked entry is under source")
            .to_path_buf();
        let relative_key = relative.to_string_lossy().replace('\\', "/");
        let dest = target.join(&relative);

        if dest.exists() {
            let allowed = match strategy {
                MergeStrategy::Force => true,
                MergeStrategy::Default => true,
                MergeStrategy::Update => tracking.contains_key(&relative_key),
            };
            if !allowed {
                return Err(Error::MergeConflict(MergeConflictError { relative_path: relative, strategy }));
            }
        }

        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent)?;
        }

        match method {
            MergeMethod::Move => match fs_err::rename(entry.path(), &dest) {
                Ok(()) => {}
                Err(_) => {
                    fs_err::copy(entry.path(), &dest)?;
                }
            },
            MergeMethod::Copy => {
                fs_err::copy(entry.path(), &dest)?;
            }
        }

        tracking.insert(
            relative_key,
            TrackedFile {
                package: package.to_string(),
                version_id: version_id.to_string(),
                transform_hash: transform_hash.to_string(),
                installed_at,
            },
        );
    }

    save_tracking(target, &tracking)?;

    if method == MergeMethod::Move {
        let _ = fs_err::remove_dir_all(source);
    }

    Ok(tracking)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc)
    }

    #[test]
    fn fresh_target_gets_every_source_file_tracked() {
        let source = assert_fs::TempDir::new().unwrap();
        fs_err::write(source.path().join("a.txt"), b"a").unwrap();
        let target = assert_fs::TempDir::new().unwrap();

        let tracking = merge_into_target(
            source.path(),
            target.path(),
            MergeStrategy::Default,
            MergeMethod::Copy,
            "pkg",
            "version-id",
            "transform-hash",
            now(),
        )
        .unwrap();

        assert!(target.path().join("a.txt").exists());
        assert!(tracking.contains_key("a.txt"));
        assert!(tracking_path(target.path()).exists());
    }

    #[test]
    fn update_strategy_refuses_to_overwrite_untracked_file() {
        let source = assert_fs::TempDir::new().unwrap();
        fs_err::write(source.path().join("a.txt"), b"new").unwrap();
        let target = assert_fs::TempDir::new().unwrap();
        fs_err::write(target.path().join("a.txt"), b"user-owned").unwrap();

        let result = merge_into_target(
            source.path(),
            target.path(),
            MergeStrategy::Update,
            MergeMethod::Copy,
            "pkg",
            "version-id",
            "transform-hash",
            now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn update_strategy_overwrites_a_previously_tracked_file() {
        let source = assert_fs::TempDir::new().unwrap();
        fs_err::write(source.path().join("a.txt"), b"v1").unwrap();
        let target = assert_fs::TempDir::new().unwrap();

        merge_into_target(
            source.path(),
            target.path(),
            MergeStrategy::Default,
            MergeMethod::Copy,
            "pkg",
            "v1",
            "hash",
            now(),
        )
        .unwrap();

        let source2 = assert_fs::TempDir::new().unwrap();
        fs_err::write(source2.path().join("a.txt"), b"v2").unwrap();

        let tracking = merge_into_target(
            source2.path(),
            target.path(),
            MergeStrategy::Update,
            MergeMethod::Copy,
            "pkg",
            "v2",
            "hash",
            now(),
        )
        .unwrap();

        assert_eq!(fs_err::read(target.path().join("a.txt")).unwrap(), b"v2");
        assert_eq!(tracking["a.txt"].version_id, "v2");
    }

    #[test]
    fn force_strategy_overwrites_regardless_of_tracking() {
        let source = assert_fs::TempDir::new().unwrap();
        fs_err::write(source.path().join("a.txt"), b"new").unwrap();
        let target = assert_fs::TempDir::new().unwrap();
        fs_err::write(target.path().join("a.txt"), b"user-owned").unwrap();

        let tracking = merge_into_target(
            source.path(),
            target.path(),
            MergeStrategy::Force,
            MergeMethod::Copy,
            "pkg",
            "version-id",
            "transform-hash",
            now(),
        )
        .unwrap();

        assert_eq!(fs_err::read(target.path().join("a.txt")).unwrap(), b"new");
        assert!(tracking.contains_key("a.txt"));
    }
}
