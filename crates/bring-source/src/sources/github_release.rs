//! Versions derived from GitHub release assets: each asset whose download
//! URL matches one of `url_regexes` becomes a version, with the regex's
//! named capture groups as `id_vars`.

use async_trait::async_trait;
use indexmap::IndexMap;

use bring_pipeline::StepConfig;

use crate::{PkgVersion, SourceContext, SourceError, VersionSet, VersionSource};

const DEFAULT_URL_REGEX: &str =
    r"https://github\.com/.*/releases/download/v(?P<version>.*)/.*-v.*-(?P<arch>[^-]*)-(?P<os>[^.]*)\..*$";

pub struct GithubReleaseSource {
    pub user_name: String,
    pub repo_name: String,
    pub url_regexes: Vec<regex::Regex>,
    pub github_username: Option<String>,
    pub github_token: Option<String>,
}

impl GithubReleaseSource {
    /// Build a source using the default asset-naming convention's regex
    /// when the caller hasn't supplied one.
    pub fn new(
        user_name: impl Into<String>,
        repo_name: impl Into<String>,
        url_regexes: Vec<regex::Regex>,
        github_username: Option<String>,
        github_token: Option<String>,
    ) -> Self {
        let url_regexes = if url_regexes.is_empty() {
            vec![regex::Regex::new(DEFAULT_URL_REGEX).expect("default regex is valid")]
        } else {
            url_regexes
        };
        Self {
            user_name: user_name.into(),
            repo_name: repo_name.into(),
            url_regexes,
            github_username,
            github_token,
        }
    }
}

#[derive(serde::Deserialize)]
struct Release {
    name: String,
    prerelease: bool,
    created_at: String,
    assets: Vec<Asset>,
}

#[derive(serde::Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
    content_type: String,
    size: u64,
}

#[async_trait]
impl VersionSource for GithubReleaseSource {
    fn source_type(&self) -> &'static str {
        "github_release"
    }

    fn unique_source_id(&self) -> String {
        format!("{}_{}", self.user_name, self.repo_name)
    }

    async fn retrieve_versions(&self, _ctx: &SourceContext) -> Result<VersionSet, SourceError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/releases",
            self.user_name, self.repo_name
        );

        let client = reqwest::Client::new();
        let mut request = client.get(&url).header("Accept", "application/vnd.github.v3+json");
        let has_credentials = self.github_username.is_some() && self.github_token.is_some();
        if let (Some(username), Some(token)) = (&self.github_username, &self.github_token) {
            request = request.basic_auth(username, Some(token));
        }

        let response = request.send().await?;
        super::ensure_not_rate_limited(
            &response,
            "x-ratelimit-limit",
            "x-ratelimit-remaining",
            "x-ratelimit-reset",
            has_credentials,
        )?;
        let response = response.error_for_status()?;
        tracing::info!(
            remaining = super::header_as_u64(&response, "x-ratelimit-remaining"),
            "github rate limit after releases request"
        );

        let releases: Vec<Release> = response.json().await?;

        let mut versions = Vec::new();
        let mut aliases: IndexMap<String, IndexMap<String, String>> = IndexMap::new();

        for release in &releases {
            for asset in &release.assets {
                let Some(captures) = self
                    .url_regexes
                    .iter()
                    .find_map(|regex| regex.captures(&asset.browser_download_url))
                else {
                    continue;
                };

                let mut id_vars = IndexMap::new();
                for name in self.url_regexes_capture_names() {
                    if let Some(value) = captures.name(name) {
                        id_vars.insert(name.to_string(), value.as_str().to_string());
                    }
                }

                if let Some(version) = id_vars.get("version").cloned() {
                    let version_aliases = aliases.entry("version".to_string()).or_default();
                    if !release.prerelease {
                        version_aliases.entry("stable".to_string()).or_insert_with(|| version.clone());
                        version_aliases.entry("latest".to_string()).or_insert_with(|| version.clone());
                    } else {
                        version_aliases
                            .entry("pre-release".to_string())
                            .or_insert_with(|| version.clone());
                    }
                }

                let mut metadata = serde_json::Map::new();
                metadata.insert(
                    "orig_version_name".to_string(),
                    serde_json::Value::String(release.name.clone()),
                );
                metadata.insert("prerelease".to_string(), serde_json::Value::Bool(release.prerelease));
                metadata.insert("asset_name".to_string(), serde_json::Value::String(asset.name.clone()));
                metadata.insert(
                    "content_type".to_string(),
                    serde_json::Value::String(asset.content_type.clone()),
                );
                metadata.insert("size".to_string(), serde_json::Value::Number(asset.size.into()));
                metadata.insert(
                    "release_date".to_string(),
                    serde_json::Value::String(release.created_at.clone()),
                );

                let metadata_timestamp = chrono::DateTime::parse_from_rfc3339(&release.created_at)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now());

                let version = PkgVersion::new(
                    id_vars,
                    vec![StepConfig::Download {
                        url: asset.browser_download_url.clone(),
                        target_file_name: asset.name.clone(),
                        retries: None,
                    }],
                    IndexMap::new(),
                    metadata,
                    metadata_timestamp,
                )
                .map_err(|err| SourceError::Validation(err.to_string()))?;
                versions.push(version);
            }
        }

        for version in &mut versions {
            if let Some(version_aliases) = aliases.get("version") {
                version.aliases.insert("version".to_string(), version_aliases.clone());
            }
        }

        Ok((versions, serde_json::json!({})))
    }
}

impl GithubReleaseSource {
    fn url_regexes_capture_names(&self) -> Vec<&str> {
        self.url_regexes
            .iter()
            .flat_map(|regex| regex.capture_names().flatten())
            .collect()
    }
}
