//! Version sources: typed plugins that turn a `PkgSource` descriptor into a
//! set of installable [`PkgVersion`]s, backed by a TTL'd on-disk cache.
//!
//! A [`VersionSource`] only implements discovery (`retrieve_versions`); the
//! non-overridable cache-then-fetch, alias-resolving-match, and
//! materialize-to-disk behaviors are free functions over `&dyn
//! VersionSource` so the trait itself stays object-safe (`Box<dyn
//! VersionSource>`), mirroring the `StepExecutor`/`Pipeline` split in
//! `bring-pipeline`.

use std::sync::Arc;

pub mod cache;
pub mod sources;
pub mod version;

pub use cache::VersionMetadataCache;
pub use version::PkgVersion;

use async_trait::async_trait;

/// Shared handles every version source and the free functions around it
/// need: where to cache things, and how to run a materialization pipeline.
#[derive(Clone)]
pub struct SourceContext {
    pub roots: bring_cache::CacheRoots,
    pub downloader: Arc<bring_http::Downloader>,
    pub git: Arc<bring_git::GitMirrors>,
    pub metadata_cache: Arc<VersionMetadataCache>,
}

impl SourceContext {
    #[must_use]
    pub fn new(roots: bring_cache::CacheRoots) -> Self {
        let downloader = Arc::new(bring_http::Downloader::new(roots.clone()));
        let git = Arc::new(bring_git::GitMirrors::new(roots.clone()));
        let metadata_cache = Arc::new(VersionMetadataCache::new(roots.clone()));
        Self {
            roots,
            downloader,
            git,
            metadata_cache,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("argument validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Git(#[from] bring_git::GitError),
    #[error(transparent)]
    Pipeline(#[from] bring_pipeline::PipelineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cache(#[from] cache::CacheError),
    #[error("no version matches the given input")]
    NoMatchingVersion,
    #[error("input matches more than one version equally well")]
    AmbiguousMatch,
    #[error(transparent)]
    RateLimited(#[from] RateLimitedError),
}

/// Surfaced when an API-backed source's request is rejected due to quota
/// exhaustion (github/gitlab REST rate limiting).
#[derive(Debug, thiserror::Error)]
#[error("rate limit exceeded: {remaining}/{limit} remaining, resets at {reset}{hint}")]
pub struct RateLimitedError {
    pub limit: u64,
    pub remaining: u64,
    pub reset: chrono::DateTime<chrono::Utc>,
    hint: String,
}

impl RateLimitedError {
    #[must_use]
    pub fn new(limit: u64, remaining: u64, reset: chrono::DateTime<chrono::Utc>, has_credentials: bool) -> Self {
        let hint = if has_credentials {
            String::new()
        } else {
            " (set authenticated credentials for a higher quota)".to_string()
        };
        Self {
            limit,
            remaining,
            reset,
            hint,
        }
    }
}

/// A typed plugin that discovers a source's available versions.
///
/// Implementors only need to provide identity and discovery; matching,
/// caching, and materialization are handled uniformly by the free
/// functions in this module so every source behaves the same way from a
/// caller's perspective.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// The `type` discriminator this source was constructed from.
    fn source_type(&self) -> &'static str;

    /// Stable string identifying this exact, validated source — used as
    /// the on-disk metadata cache key. Plugins may derive this from a
    /// canonical hash of their arguments, or override it with something
    /// more legible (e.g. a sanitized repo URL).
    fn unique_source_id(&self) -> String;

    /// Discover this source's versions. May hit the network. Must be
    /// idempotent: calling it twice in a row should produce the same
    /// (or a superset-compatible) result.
    async fn retrieve_versions(&self, ctx: &SourceContext) -> Result<VersionSet, SourceError>;
}

/// The cached `(versions, arg_schema)` pair a `VersionSource` produces.
pub type VersionSet = (Vec<PkgVersion>, serde_json::Value);

/// Consult the metadata cache first; on a miss, call `retrieve_versions`
/// and write the cache.
pub async fn get_versions(
    source: &dyn VersionSource,
    ctx: &SourceContext,
    max_age: std::time::Duration,
) -> Result<VersionSet, SourceError> {
    let source_id = source.unique_source_id();

    if let Some(cached) = ctx
        .metadata_cache
        .read(source.source_type(), &source_id, max_age)
        .await?
    {
        return Ok(cached);
    }

    let fresh = source.retrieve_versions(ctx).await?;
    ctx.metadata_cache
        .write(source.source_type(), &source_id, &fresh)
        .await?;
    Ok(fresh)
}

/// Select the version whose `id_vars` best matches `input`, after
/// resolving any alias in `input` (e.g. `version=latest`) through the
/// version set's `arg_schema`-adjacent alias maps recorded on each
/// version. Matching is scored by count of equal `id_vars` entries; a tie
/// for the best score is an error, as is no match at all.
pub fn find_matching_version<'v>(
    versions: &'v [PkgVersion],
    input: &indexmap::IndexMap<String, String>,
) -> Result<&'v PkgVersion, SourceError> {
    let resolved = resolve_aliases(versions, input);

    let mut best_score = 0usize;
    let mut best: Vec<&PkgVersion> = Vec::new();

    for version in versions {
        let score = resolved
            .iter()
            .filter(|(key, value)| version.id_vars.get(*key) == Some(*value))
            .count();
        if score == 0 {
            continue;
        }
        match score.cmp(&best_score) {
            std::cmp::Ordering::Greater => {
                best_score = score;
                best = vec![version];
            }
            std::cmp::Ordering::Equal => best.push(version),
            std::cmp::Ordering::Less => {}
        }
    }

    match best.len() {
        0 => Err(SourceError::NoMatchingVersion),
        1 => Ok(best[0]),
        _ => Err(SourceError::AmbiguousMatch),
    }
}

fn resolve_aliases<'a>(
    versions: &[PkgVersion],
    input: &'a indexmap::IndexMap<String, String>,
) -> indexmap::IndexMap<&'a str, &'a str> {
    let mut resolved: indexmap::IndexMap<&str, &str> = indexmap::IndexMap::new();
    for (key, value) in input {
        let mut concrete: Option<&str> = None;
        for version in versions {
            let Some(alias_map) = version.aliases.get(key) else {
                continue;
            };
            let Some(target) = alias_map.get(value) else {
                continue;
            };
            match concrete {
                None => concrete = Some(target.as_str()),
                Some(first) if first != target.as_str() => {
                    tracing::warn!(
                        %key,
                        %value,
                        first_match = first,
                        conflicting_match = target.as_str(),
                        "conflicting alias across sibling versions; first match wins"
                    );
                }
                Some(_) => {}
            }
        }
        resolved.insert(key.as_str(), concrete.unwrap_or(value.as_str()));
    }
    resolved
}

/// Ensure `version`'s folder exists on disk, running its `steps` as a
/// pipeline if it doesn't, then return either the canonical path
/// (`read_only`) or a disposable copy of it.
pub async fn materialize_version(
    ctx: &SourceContext,
    source_type: &str,
    version: &PkgVersion,
    read_only: bool,
) -> Result<std::path::PathBuf, SourceError> {
    let shard = ctx
        .roots
        .shard(bring_cache::CacheBucket::PkgVersions, format!("{source_type}/{}", version.id));
    let canonical = shard.path().join("data");

    if !canonical.exists() {
        let working_dir = ctx
            .roots
            .bucket(bring_cache::CacheBucket::Workspace)
            .join("pipelines")
            .join(format!("{}_{}", version.id, nanoid::nanoid!(8)));
        let pipeline = bring_pipeline::Pipeline::new(
            working_dir,
            ctx.downloader.clone(),
            ctx.git.clone(),
            version.steps.iter().cloned().map(bring_pipeline::StepConfig::build).collect(),
        );
        let result = pipeline.run(bring_pipeline::StepIo::new()).await?;
        let folder = result
            .get("folder_path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SourceError::Validation("pipeline produced no folder_path".to_string()))?;

        fs_err::create_dir_all(shard.path())?;
        bring_fs::persist(std::path::Path::new(folder), &canonical).await?;

        let metadata_path = shard.path().join("version.json");
        let metadata = serde_json::to_vec_pretty(version)
            .map_err(|err| SourceError::Validation(err.to_string()))?;
        fs_err::write(metadata_path, metadata)?;
    }

    if read_only {
        return Ok(canonical);
    }

    let disposable = ctx
        .roots
        .bucket(bring_cache::CacheBucket::Results)
        .join(format!("{}-{}", version.id, nanoid::nanoid!(8)));
    bring_fs::copy_dir_all(&canonical, &disposable)?;
    Ok(disposable)
}
