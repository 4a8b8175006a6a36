//! Deterministic filesystem paths for every cached artifact `bring`
//! produces, and the atomic-write discipline that keeps them safe under
//! concurrent access.
//!
//! This is component C1 from the design: downloads, git mirrors, version
//! metadata, materialized version folders, transformed package folders,
//! and per-run scratch space all live under one [`CacheRoots`], each in
//! its own [`CacheBucket`].

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod removal;
mod timestamp;

pub use removal::{rm_rf, Removal};
pub use timestamp::Timestamp;

/// The base directories `bring` caches artifacts under.
///
/// Constructed once by the caller and threaded through every constructor
/// that needs to touch disk — there is no process-global cache root.
#[derive(Debug, Clone)]
pub struct CacheRoots {
    root: PathBuf,
}

impl CacheRoots {
    /// Use `root` as the cache root, creating it (and its hygiene markers)
    /// if it doesn't exist yet.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs_err::create_dir_all(&root)?;

        match fs_err::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(root.join(".gitignore"))
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(b"*\n")?;
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }

        Ok(Self { root })
    }

    /// A cache root scoped to a fresh temporary directory. Useful for
    /// tests and for the caller's `--no-cache` mode.
    pub fn temp() -> io::Result<(Self, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let roots = Self::new(dir.path())?;
        Ok((roots, dir))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory for a specific bucket.
    pub fn bucket(&self, bucket: CacheBucket) -> PathBuf {
        self.root.join(bucket.as_str())
    }

    /// A named subdirectory ("shard") within a bucket.
    pub fn shard(&self, bucket: CacheBucket, dir: impl AsRef<Path>) -> CacheShard {
        CacheShard(self.bucket(bucket).join(dir.as_ref()))
    }

    /// A single entry (file) within a bucket, optionally nested under a
    /// subdirectory.
    pub fn entry(
        &self,
        bucket: CacheBucket,
        dir: impl AsRef<Path>,
        file: impl AsRef<Path>,
    ) -> CacheEntry {
        CacheEntry::new(self.bucket(bucket).join(dir), file)
    }
}

/// The distinct kinds of data `bring` caches, each in its own top-level
/// subdirectory of the cache root so that a `CacheBucket` can be cleared
/// independently and bucket-format upgrades don't collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheBucket {
    /// Content-addressed HTTP response bodies, keyed by a hash of the
    /// source URL. See `bring-http`.
    Downloads,
    /// One long-lived mirror clone per remote git URL, keyed by a hash of
    /// the URL. See `bring-git`.
    GitCheckouts,
    /// Serialized `(versions, arg_schema)` tuples, one file per
    /// `unique_source_id`, namespaced by source type. See `bring-source`.
    PkgMetadata,
    /// Fully materialized version folders, namespaced by source type and
    /// keyed by `PkgVersion::id`. Read-only after publication.
    PkgVersions,
    /// Transform-applied package folders, keyed by source type,
    /// `PkgVersion::id`, and `transform_hash`.
    Packages,
    /// Ephemeral per-pipeline-run scratch space, deleted at process exit
    /// unless `DEBUG` is set.
    Workspace,
    /// Per-run output holders, staged here before the final target-folder
    /// merge.
    Results,
}

impl CacheBucket {
    fn as_str(self) -> &'static str {
        match self {
            Self::Downloads => "downloads",
            Self::GitCheckouts => "git_checkouts",
            Self::PkgMetadata => "pkg_metadata",
            Self::PkgVersions => "pkg_versions",
            Self::Packages => "packages",
            Self::Workspace => "workspace",
            Self::Results => "results",
        }
    }

    pub fn iter() -> impl Iterator<Item = CacheBucket> {
        [
            Self::Downloads,
            Self::GitCheckouts,
            Self::PkgMetadata,
            Self::PkgVersions,
            Self::Packages,
            Self::Workspace,
            Self::Results,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for CacheBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subdirectory within a bucket — a git checkout directory, a version
/// folder's base, a source's metadata directory.
#[derive(Debug, Clone)]
pub struct CacheShard(PathBuf);

impl CacheShard {
    pub fn entry(&self, file: impl AsRef<Path>) -> CacheEntry {
        CacheEntry::new(&self.0, file)
    }

    #[must_use]
    pub fn shard(&self, dir: impl AsRef<Path>) -> Self {
        Self(self.0.join(dir.as_ref()))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for CacheShard {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::ops::Deref for CacheShard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A single cache entry — a file that may or may not exist yet.
#[derive(Debug, Clone)]
pub struct CacheEntry(PathBuf);

impl CacheEntry {
    pub fn new(dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> Self {
        Self(dir.into().join(file))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn dir(&self) -> &Path {
        self.0.parent().expect("cache entry has no parent")
    }

    #[must_use]
    pub fn with_file(&self, file: impl AsRef<Path>) -> Self {
        Self(self.dir().join(file))
    }

    /// Whether this entry is fresh, stale, or missing relative to
    /// `max_age`.
    ///
    /// A zero-length file is treated as missing and deleted outright —
    /// it can only be the result of a process being killed mid-write,
    /// since all writes to cache entries go through [`write_atomic`].
    pub fn freshness(&self, max_age: Duration) -> io::Result<Freshness> {
        let metadata = match fs_err::metadata(&self.0) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Freshness::Missing),
            Err(err) => return Err(err),
        };

        if metadata.len() == 0 {
            fs_err::remove_file(&self.0)?;
            return Ok(Freshness::Missing);
        }

        if Timestamp::from_metadata(&metadata).elapsed() > max_age {
            Ok(Freshness::Stale)
        } else {
            Ok(Freshness::Fresh)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

impl Freshness {
    pub const fn is_fresh(self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Write `bytes` to `entry` atomically: stage to a temp sibling, then
/// rename into place. If another writer wins the race, this call's temp
/// file is discarded rather than erroring — metadata cache contents are
/// idempotent, so either writer's bytes are an acceptable outcome.
pub async fn write_atomic(entry: &CacheEntry, bytes: &[u8]) -> io::Result<()> {
    fs_err::create_dir_all(entry.dir())?;
    let temp = bring_fs::temp_sibling(entry.path());
    tokio::fs::write(&temp, bytes).await?;
    bring_fs::persist(&temp, entry.path()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_paths_are_distinct_and_deterministic() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let a = roots.bucket(CacheBucket::Downloads);
        let b = roots.bucket(CacheBucket::GitCheckouts);
        assert_ne!(a, b);
        assert_eq!(a, roots.bucket(CacheBucket::Downloads));
    }

    #[test]
    fn shard_and_entry_compose_under_bucket() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let shard = roots.shard(CacheBucket::PkgVersions, "git_repo/abc123");
        let entry = shard.entry("version.json");
        assert!(entry
            .path()
            .starts_with(roots.bucket(CacheBucket::PkgVersions)));
        assert!(entry.path().ends_with("version.json"));
    }

    #[test]
    fn freshness_missing_for_absent_entry() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let entry = roots.entry(CacheBucket::PkgMetadata, "git_repo", "abc123");
        assert_eq!(
            entry.freshness(Duration::from_secs(3600)).unwrap(),
            Freshness::Missing
        );
    }

    #[tokio::test]
    async fn freshness_zero_length_is_deleted_and_missing() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let entry = roots.entry(CacheBucket::PkgMetadata, "git_repo", "abc123");
        fs_err::create_dir_all(entry.dir()).unwrap();
        fs_err::write(entry.path(), b"").unwrap();

        assert_eq!(
            entry.freshness(Duration::from_secs(3600)).unwrap(),
            Freshness::Missing
        );
        assert!(!entry.path().exists());
    }

    #[tokio::test]
    async fn freshness_fresh_just_after_write() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let entry = roots.entry(CacheBucket::PkgMetadata, "git_repo", "abc123");
        write_atomic(&entry, b"payload").await.unwrap();

        assert_eq!(
            entry.freshness(Duration::from_secs(3600)).unwrap(),
            Freshness::Fresh
        );
    }

    #[tokio::test]
    async fn freshness_stale_beyond_max_age() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let entry = roots.entry(CacheBucket::PkgMetadata, "git_repo", "abc123");
        write_atomic(&entry, b"payload").await.unwrap();

        assert_eq!(
            entry.freshness(Duration::from_secs(0)).unwrap(),
            Freshness::Stale
        );
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_temp_file_behind() {
        let (roots, _dir) = CacheRoots::temp().unwrap();
        let entry = roots.entry(CacheBucket::PkgMetadata, "git_repo", "abc123");
        write_atomic(&entry, b"payload").await.unwrap();

        let siblings: Vec<_> = fs_err::read_dir(entry.dir())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(siblings.len(), 1);
    }
}
