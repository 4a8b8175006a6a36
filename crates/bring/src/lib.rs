//! `bring`: resolves package versions from heterogeneous upstream sources,
//! fetches and transforms them through a typed pipeline, and merges the
//! result into a target directory, with caching at every stage.
//!
//! This crate is the facade over the subsystem crates (`bring-cache`,
//! `bring-git`, `bring-http`, `bring-pipeline`, `bring-source`): C8
//! ([`Package`]) and C9 ([`merge`]).

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

pub mod content;
pub mod merge;
pub mod package;
pub mod source;
pub mod transform;

pub use merge::{MergeConflictError, MergeMethod, MergeStrategy};
pub use package::{Package, PackageInfo};
pub use source::PkgSource;

/// Per-plugin credentials, populated by the caller from environment
/// variables (`GITHUB_ACCESS_TOKEN`, etc.) or any other configuration
/// source — this crate never reads `std::env` itself except where
/// `bring-pipeline` reads `DEBUG`, keeping global mutable state out.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub github_username: Option<String>,
    pub github_token: Option<String>,
    pub gitlab_username: Option<String>,
    pub gitlab_token: Option<String>,
}

/// The on-disk or in-memory shape of a package descriptor. Deserializing
/// one of these and calling [`Package::new`] with its parts is the usual
/// entry point.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageDescriptor {
    pub pkg: PkgSource,
    #[serde(default)]
    pub vars: IndexMap<String, String>,
    #[serde(default)]
    pub aliases: IndexMap<String, IndexMap<String, String>>,
    #[serde(default)]
    pub info: DescriptorInfo,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
    #[serde(default)]
    pub transform: Value,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescriptorInfo {
    #[serde(default)]
    pub short_help: Option<String>,
    #[serde(default)]
    pub long_help: Option<String>,
}

impl PackageDescriptor {
    /// Build the `Package` this descriptor describes.
    pub fn into_package(self, credentials: &Credentials) -> Result<Package, Error> {
        let info = PackageInfo {
            short_help: self.info.short_help,
            long_help: self.info.long_help,
            tags: self.tags,
            labels: self.labels,
        };
        Package::new(&self.pkg, credentials, self.vars, self.aliases, info, &self.transform, &self.content)
    }
}

/// Errors surfaced by this crate's facade. Subsystem errors are folded in
/// with `#[from]`, following the same aggregation pattern each subsystem
/// crate uses for its own dependencies.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A package descriptor (source args, transform list, or content
    /// spec) failed validation.
    #[error("package descriptor failed validation: {0}")]
    Descriptor(String),
    #[error(transparent)]
    Source(#[from] bring_source::SourceError),
    #[error(transparent)]
    Pipeline(#[from] bring_pipeline::PipelineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    MergeConflict(#[from] MergeConflictError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_with_empty_transform_and_content_builds_a_package() {
        let descriptor: PackageDescriptor = serde_json::from_value(serde_json::json!({
            "pkg": {"type": "git_repo", "url": "https://example.test/proj.git"},
            "transform": [],
        }))
        .unwrap();
        let package = descriptor.into_package(&Credentials::default()).unwrap();
        assert_eq!(package.source_type(), "git_repo");
    }

    #[test]
    fn content_spec_is_folded_into_the_transform_list() {
        let descriptor: PackageDescriptor = serde_json::from_value(serde_json::json!({
            "pkg": {"type": "template_url", "url_template": "https://example.test/tool-${version}.tar.gz"},
            "content": [{"from": "bin/tool", "path": "tool", "mode": "755"}],
        }))
        .unwrap();
        let with_content = descriptor.clone().into_package(&Credentials::default()).unwrap();

        let without_content: PackageDescriptor = serde_json::from_value(serde_json::json!({
            "pkg": {"type": "template_url", "url_template": "https://example.test/tool-${version}.tar.gz"},
        }))
        .unwrap();
        let without_content = without_content.into_package(&Credentials::default()).unwrap();

        assert_ne!(with_content.transform_hash(), without_content.transform_hash());
    }
}
