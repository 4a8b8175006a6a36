//! Version metadata cache (C7): one file per `unique_source_id`, holding a
//! serialized `(versions, arg_schema)` tuple with TTL-based freshness.

use std::time::Duration;

use bring_cache::{CacheBucket, CacheRoots, Freshness};

use crate::VersionSet;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to decode cached version metadata: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode version metadata for caching: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Default staleness window for cached version sets.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

pub struct VersionMetadataCache {
    roots: CacheRoots,
}

impl VersionMetadataCache {
    #[must_use]
    pub fn new(roots: CacheRoots) -> Self {
        Self { roots }
    }

    /// Read a cached `(versions, arg_schema)` tuple for `source_id`, if one
    /// exists and is not older than `max_age`. A zero-length file is
    /// treated as missing (and deleted) by [`bring_cache::CacheEntry::freshness`].
    pub async fn read(
        &self,
        source_type: &str,
        source_id: &str,
        max_age: Duration,
    ) -> Result<Option<VersionSet>, CacheError> {
        let entry = self.roots.entry(CacheBucket::PkgMetadata, source_type, source_id);

        match entry.freshness(max_age)? {
            Freshness::Missing | Freshness::Stale => Ok(None),
            Freshness::Fresh => {
                let bytes = tokio::fs::read(entry.path()).await?;
                let decoded: VersionSet = rmp_serde::from_slice(&bytes)?;
                Ok(Some(decoded))
            }
        }
    }

    /// Write `versions` for `source_id`, atomically. No write lock is
    /// held: redundant concurrent writes are idempotent, so whichever
    /// writer wins the final rename is an acceptable outcome.
    pub async fn write(&self, source_type: &str, source_id: &str, versions: &VersionSet) -> Result<(), CacheError> {
        let entry = self.roots.entry(CacheBucket::PkgMetadata, source_type, source_id);
        let bytes = rmp_serde::to_vec(versions)?;
        bring_cache::write_atomic(&entry, &bytes).await?;
        Ok(())
    }
}
