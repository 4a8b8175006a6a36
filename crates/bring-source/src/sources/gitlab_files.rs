//! Versions that each download a fixed set of files straight from
//! GitLab's raw-content endpoint, without cloning the repository.

use async_trait::async_trait;
use indexmap::IndexMap;

use bring_pipeline::StepConfig;

use crate::{PkgVersion, SourceContext, SourceError, VersionSet, VersionSource};

pub struct GitlabFilesSource {
    pub user_name: String,
    pub repo_name: String,
    pub files: Vec<String>,
    pub tag_filter: Option<regex::Regex>,
    pub template_values: IndexMap<String, Vec<String>>,
    pub gitlab_username: Option<String>,
    pub gitlab_token: Option<String>,
}

#[async_trait]
impl VersionSource for GitlabFilesSource {
    fn source_type(&self) -> &'static str {
        "gitlab_files"
    }

    fn unique_source_id(&self) -> String {
        let mut files = self.files.clone();
        files.sort();
        let key = serde_json::json!({"user": self.user_name, "repo": self.repo_name, "files": files});
        format!(
            "{}_{}_{}",
            self.user_name,
            self.repo_name,
            bring_hash::stable_hash(&key)
        )
    }

    async fn retrieve_versions(&self, _ctx: &SourceContext) -> Result<VersionSet, SourceError> {
        let project_id: String =
            url::form_urlencoded::byte_serialize(format!("{}/{}", self.user_name, self.repo_name).as_bytes())
                .collect();
        let tags = list_gitlab_refs(&project_id, "tags", self.gitlab_token.as_deref()).await?;
        let branches = list_gitlab_refs(&project_id, "branches", self.gitlab_token.as_deref()).await?;

        let tag_names: Vec<String> = tags
            .into_iter()
            .filter(|name| {
                self.tag_filter
                    .as_ref()
                    .map_or(true, |pattern| pattern.is_match(name))
            })
            .collect();

        let mut versions = Vec::new();
        let mut latest: Option<String> = None;
        let now = chrono::Utc::now();

        for tag in &tag_names {
            let is_latest = latest.is_none();
            if is_latest {
                latest = Some(tag.clone());
            }
            versions.extend(self.versions_for_ref(tag, is_latest, now)?);
        }

        if branches.iter().any(|b| b == "master") {
            let is_latest = latest.is_none();
            if is_latest {
                latest = Some("master".to_string());
            }
            versions.extend(self.versions_for_ref("master", is_latest, now)?);
        }
        for branch in &branches {
            if branch == "master" {
                continue;
            }
            let is_latest = latest.is_none();
            if is_latest {
                latest = Some(branch.clone());
            }
            versions.extend(self.versions_for_ref(branch, is_latest, now)?);
        }

        let mut arg_schema = serde_json::json!({"version": {"type": "string"}});
        if let Some(latest) = &latest {
            arg_schema["version"]["default"] = serde_json::Value::String(latest.clone());
        }
        Ok((versions, arg_schema))
    }
}

impl GitlabFilesSource {
    fn versions_for_ref(
        &self,
        git_ref: &str,
        is_latest: bool,
        metadata_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<PkgVersion>, SourceError> {
        if self.template_values.is_empty() {
            return Ok(vec![self.build_version(git_ref, &IndexMap::new(), is_latest, metadata_timestamp)?]);
        }

        let keys: Vec<&String> = self.template_values.keys().collect();
        let value_lists: Vec<&Vec<String>> = self.template_values.values().collect();

        let mut combos: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
        for (key, values) in keys.iter().zip(value_lists.iter()) {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values.iter() {
                    let mut extended = combo.clone();
                    extended.insert((*key).clone(), value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos
            .into_iter()
            .map(|vars| self.build_version(git_ref, &vars, is_latest, metadata_timestamp))
            .collect()
    }

    fn build_version(
        &self,
        git_ref: &str,
        extra_vars: &IndexMap<String, String>,
        is_latest: bool,
        metadata_timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<PkgVersion, SourceError> {
        let urls = self
            .files
            .iter()
            .map(|file| {
                let mut target = file.clone();
                for (key, value) in extra_vars {
                    target = target.replace(&format!("${{{key}}}"), value);
                }
                bring_pipeline::steps::download_multiple::UrlTarget {
                    url: format!(
                        "https://gitlab.com/{}/{}/-/raw/{git_ref}/{}",
                        self.user_name, self.repo_name, target
                    ),
                    target,
                }
            })
            .collect();

        let mut id_vars = extra_vars.clone();
        id_vars.insert("version".to_string(), git_ref.to_string());

        let mut aliases = IndexMap::new();
        if is_latest {
            aliases.insert(
                "version".to_string(),
                IndexMap::from([("latest".to_string(), git_ref.to_string())]),
            );
        }

        PkgVersion::new(
            id_vars,
            vec![StepConfig::DownloadMultipleFiles { urls }],
            aliases,
            serde_json::Map::new(),
            metadata_timestamp,
        )
        .map_err(|err| SourceError::Validation(err.to_string()))
    }
}

#[derive(serde::Deserialize)]
struct GitlabRefEntry {
    name: String,
}

async fn list_gitlab_refs(project_id: &str, kind: &str, token: Option<&str>) -> Result<Vec<String>, SourceError> {
    let url = format!("https://gitlab.com/api/v4/projects/{project_id}/repository/{kind}");
    let client = reqwest::Client::new();
    let mut request = client.get(&url);
    let has_credentials = token.is_some();
    if let Some(token) = token {
        request = request.header("PRIVATE-TOKEN", token);
    }
    let response = request.send().await?;
    super::ensure_not_rate_limited(
        &response,
        "ratelimit-limit",
        "ratelimit-remaining",
        "ratelimit-reset",
        has_credentials,
    )?;
    let entries: Vec<GitlabRefEntry> = response.error_for_status()?.json().await?;
    Ok(entries.into_iter().map(|entry| entry.name).collect())
}
