//! Versions derived from a single git repository's tags and branches.

use async_trait::async_trait;
use indexmap::IndexMap;

use bring_pipeline::StepConfig;

use crate::{PkgVersion, SourceContext, SourceError, VersionSet, VersionSource};

pub struct GitRepoSource {
    pub url: String,
    pub use_commits_as_versions: bool,
}

impl GitRepoSource {
    #[must_use]
    pub fn new(url: impl Into<String>, use_commits_as_versions: bool) -> Self {
        Self {
            url: url.into(),
            use_commits_as_versions,
        }
    }

    fn steps(&self) -> Vec<StepConfig> {
        vec![StepConfig::GitClone {
            url: self.url.clone(),
            version: "${version}".to_string(),
        }]
    }
}

#[async_trait]
impl VersionSource for GitRepoSource {
    fn source_type(&self) -> &'static str {
        "git_repo"
    }

    fn unique_source_id(&self) -> String {
        bring_hash::stable_hash(&serde_json::Value::String(self.url.clone()))
    }

    async fn retrieve_versions(&self, ctx: &SourceContext) -> Result<VersionSet, SourceError> {
        let mirror_path = ctx.git.ensure_cloned(&self.url, true).await?;
        let info = ctx.git.repo_info(&mirror_path).await?;
        let now = chrono::Utc::now();

        let mut versions = Vec::new();
        let mut latest: Option<String> = None;

        for (tag, commit_sha) in &info.tags {
            let Some(commit) = info.commits.get(commit_sha) else {
                tracing::warn!(tag, commit_sha, "ignoring tag: commit not found in repo info");
                continue;
            };
            let is_latest = latest.is_none();
            if is_latest {
                latest = Some(tag.clone());
            }
            versions.push(build_version(
                self.steps(),
                tag.clone(),
                commit.author_timestamp,
                now,
                is_latest,
            )?);
        }

        if let Some(master_commit_sha) = info.branches.get("master") {
            if let Some(commit) = info.commits.get(master_commit_sha) {
                let is_latest = latest.is_none();
                if is_latest {
                    latest = Some("master".to_string());
                }
                versions.push(build_version(
                    self.steps(),
                    "master".to_string(),
                    commit.author_timestamp,
                    now,
                    is_latest,
                )?);
            } else {
                tracing::warn!("ignoring branch 'master': commit not found in repo info");
            }
        }

        for (branch, commit_sha) in &info.branches {
            if branch == "master" {
                continue;
            }
            let Some(commit) = info.commits.get(commit_sha) else {
                tracing::warn!(branch, commit_sha, "ignoring branch: commit not found in repo info");
                continue;
            };
            versions.push(build_version(
                self.steps(),
                branch.clone(),
                commit.author_timestamp,
                now,
                false,
            )?);
        }

        if self.use_commits_as_versions {
            for (commit_sha, commit) in &info.commits {
                versions.push(build_version(
                    self.steps(),
                    commit_sha.clone(),
                    commit.author_timestamp,
                    now,
                    false,
                )?);
            }
        }

        let mut arg_schema = serde_json::json!({"version": {"type": "string"}});
        if let Some(latest) = &latest {
            arg_schema["version"]["default"] = serde_json::Value::String(latest.clone());
        }

        Ok((versions, arg_schema))
    }
}

fn build_version(
    steps: Vec<StepConfig>,
    version: String,
    author_timestamp: i64,
    metadata_timestamp: chrono::DateTime<chrono::Utc>,
    is_latest: bool,
) -> Result<PkgVersion, SourceError> {
    let release_date = chrono::DateTime::from_timestamp(author_timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    let mut metadata = serde_json::Map::new();
    metadata.insert("release_date".to_string(), serde_json::Value::String(release_date));

    let mut aliases = IndexMap::new();
    if is_latest {
        aliases.insert(
            "version".to_string(),
            IndexMap::from([("latest".to_string(), version.clone())]),
        );
    }

    PkgVersion::new(
        IndexMap::from([("version".to_string(), version)]),
        steps,
        aliases,
        metadata,
        metadata_timestamp,
    )
    .map_err(|err| SourceError::Validation(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_source_id_is_stable_for_the_same_url() {
        let a = GitRepoSource::new("https://example.com/repo.git", false);
        let b = GitRepoSource::new("https://example.com/repo.git", false);
        assert_eq!(a.unique_source_id(), b.unique_source_id());
    }

    #[test]
    fn unique_source_id_differs_across_urls() {
        let a = GitRepoSource::new("https://example.com/a.git", false);
        let b = GitRepoSource::new("https://example.com/b.git", false);
        assert_ne!(a.unique_source_id(), b.unique_source_id());
    }
}
