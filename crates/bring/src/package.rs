//! [`Package`] (C8): a source descriptor plus a post-fetch transform list,
//! resolved and installed as one unit.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use bring_pipeline::{Pipeline, StepConfig, StepIo};
use bring_source::SourceContext;

use crate::content;
use crate::source::PkgSource;
use crate::transform;
use crate::{Credentials, Error};

/// Free-text/metadata carried alongside a package descriptor. None of it
/// affects resolution or installation; it exists for callers that surface
/// packages in a catalog.
#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    pub short_help: Option<String>,
    pub long_help: Option<String>,
    pub tags: Vec<String>,
    pub labels: IndexMap<String, String>,
}

/// Owns a validated source descriptor and the normalized transform list
/// (content spec folded in as its trailing step), and orchestrates
/// resolve → fetch → transform → install for callers.
pub struct Package {
    source_type: &'static str,
    source: Box<dyn bring_source::VersionSource>,
    vars: IndexMap<String, String>,
    aliases: IndexMap<String, IndexMap<String, String>>,
    pub info: PackageInfo,
    transform: Vec<StepConfig>,
    transform_hash: String,
}

impl Package {
    /// Build a package from its descriptor parts. `transform_input` and
    /// `content_input` each accept a bare string/single map/sequence
    /// (transform) or bare filename/shorthand map/list (content) — see
    /// [`crate::transform`] and [`crate::content`].
    pub fn new(
        pkg: &PkgSource,
        credentials: &Credentials,
        vars: IndexMap<String, String>,
        aliases: IndexMap<String, IndexMap<String, String>>,
        info: PackageInfo,
        transform_input: &Value,
        content_input: &Value,
    ) -> Result<Self, Error> {
        let source = pkg.build(credentials)?;
        let source_type = pkg.source_type();

        let mut transform = transform::normalize_transform(transform_input)?;
        let content = content::normalize_content(content_input)?;
        if !content.is_empty() {
            transform.push(StepConfig::FolderContent { content_spec: Some(content) });
        }

        let transform_hash =
            bring_hash::stable_hash_of(&transform).map_err(|err| Error::Descriptor(err.to_string()))?;

        Ok(Self { source_type, source, vars, aliases, info, transform, transform_hash })
    }

    #[must_use]
    pub fn source_type(&self) -> &'static str {
        self.source_type
    }

    #[must_use]
    pub fn transform_hash(&self) -> &str {
        &self.transform_hash
    }

    /// Merge the package's default `vars` under the caller's `input`
    /// (caller-supplied values win), leaving alias resolution itself to
    /// `bring_source::find_matching_version`.
    fn resolve_input(&self, input: &IndexMap<String, String>) -> IndexMap<String, String> {
        let mut merged = self.vars.clone();
        merged.extend(input.iter().map(|(key, value)| (key.clone(), value.clone())));
        merged
    }

    /// Resolve `input` to a concrete version and ensure its
    /// transform-applied package folder exists, running the fetch +
    /// transform pipeline only on a cache miss. Idempotent: a second call
    /// with the same input is a path-existence check and nothing else.
    pub async fn install(&self, ctx: &SourceContext, input: &IndexMap<String, String>) -> Result<PathBuf, Error> {
        let merged_input = self.resolve_input(input);

        let (versions, _arg_schema) =
            bring_source::get_versions(self.source.as_ref(), ctx, bring_source::cache::DEFAULT_MAX_AGE).await?;
        let version = bring_source::find_matching_version(&versions, &merged_input)?;

        let package_shard = ctx.roots.shard(
            bring_cache::CacheBucket::Packages,
            format!("{}/{}/{}", self.source_type, version.id, self.transform_hash),
        );
        let package_data = package_shard.path().join("package_data");
        if package_data.exists() {
            return Ok(package_data);
        }

        let version_folder = bring_source::materialize_version(ctx, self.source_type, version, false).await?;
        let _cleanup = DisposableGuard(version_folder.clone());

        let working_dir = ctx
            .roots
            .bucket(bring_cache::CacheBucket::Workspace)
            .join("pipelines")
            .join(format!("{}_{}", self.transform_hash, nanoid::nanoid!(8)));
        let pipeline = Pipeline::new(
            working_dir,
            ctx.downloader.clone(),
            ctx.git.clone(),
            self.transform.iter().cloned().map(StepConfig::build).collect(),
        );

        let mut initial = StepIo::new();
        initial.insert("folder_path".to_string(), Value::String(version_folder.display().to_string()));
        let result = pipeline.run(initial).await?;
        let folder = result
            .get("folder_path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Descriptor("transform pipeline produced no folder_path".to_string()))?;

        fs_err::create_dir_all(package_shard.path())?;
        bring_fs::persist(Path::new(folder), &package_data).await?;

        Ok(package_data)
    }
}

/// Best-effort removal of a disposable version-folder copy once its
/// install is done with it. A transform step that actually consumes the
/// folder already moves it out from under this path, making the removal a
/// no-op; this only matters when the transform list never touches
/// `folder_path` at all (e.g. an empty transform).
struct DisposableGuard(PathBuf);

impl Drop for DisposableGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
