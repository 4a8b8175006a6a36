//! `PkgSource`: the closed set of version-source descriptor shapes a
//! package may be built from, each selecting and configuring one of
//! `bring-source`'s `VersionSource` plugins.

use indexmap::IndexMap;
use serde::Deserialize;

use bring_source::sources::{
    git_repo::GitRepoSource, github_files::GithubFilesSource, github_release::GithubReleaseSource,
    gitlab_files::GitlabFilesSource, template_url::TemplateUrlSource,
};
use bring_source::VersionSource;

use crate::{Credentials, Error};

/// The source descriptor, as it appears under a package descriptor's
/// `pkg` key. `type` selects the variant at deserialize time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PkgSource {
    GitRepo {
        url: String,
        #[serde(default)]
        use_commits_as_versions: bool,
    },
    GithubFiles {
        user_name: String,
        repo_name: String,
        files: Vec<String>,
        #[serde(default)]
        tag_filter: Option<String>,
        #[serde(default)]
        template_values: IndexMap<String, Vec<String>>,
    },
    GitlabFiles {
        user_name: String,
        repo_name: String,
        files: Vec<String>,
        #[serde(default)]
        tag_filter: Option<String>,
        #[serde(default)]
        template_values: IndexMap<String, Vec<String>>,
    },
    TemplateUrl {
        url_template: String,
        #[serde(default)]
        template_values: IndexMap<String, Vec<String>>,
    },
    GithubRelease {
        user_name: String,
        repo_name: String,
        #[serde(default)]
        url_regexes: Vec<String>,
    },
}

impl PkgSource {
    #[must_use]
    pub fn source_type(&self) -> &'static str {
        match self {
            Self::GitRepo { .. } => "git_repo",
            Self::GithubFiles { .. } => "github_files",
            Self::GitlabFiles { .. } => "gitlab_files",
            Self::TemplateUrl { .. } => "template_url",
            Self::GithubRelease { .. } => "github_release",
        }
    }

    /// Validate this descriptor's arguments (compiling any regex fields)
    /// and build the concrete plugin it selects, wiring in caller-supplied
    /// credentials where the plugin accepts them.
    pub fn build(&self, credentials: &Credentials) -> Result<Box<dyn VersionSource>, Error> {
        match self {
            Self::GitRepo { url, use_commits_as_versions } => {
                Ok(Box::new(GitRepoSource::new(url.clone(), *use_commits_as_versions)))
            }
            Self::GithubFiles {
                user_name,
                repo_name,
                files,
                tag_filter,
                template_values,
            } => {
                let tag_filter = tag_filter.as_deref().map(compile_regex).transpose()?;
                Ok(Box::new(GithubFilesSource {
                    user_name: user_name.clone(),
                    repo_name: repo_name.clone(),
                    files: files.clone(),
                    tag_filter,
                    template_values: template_values.clone(),
                    github_username: credentials.github_username.clone(),
                    github_token: credentials.github_token.clone(),
                }))
            }
            Self::GitlabFiles {
                user_name,
                repo_name,
                files,
                tag_filter,
                template_values,
            } => {
                let tag_filter = tag_filter.as_deref().map(compile_regex).transpose()?;
                Ok(Box::new(GitlabFilesSource {
                    user_name: user_name.clone(),
                    repo_name: repo_name.clone(),
                    files: files.clone(),
                    tag_filter,
                    template_values: template_values.clone(),
                    gitlab_username: credentials.gitlab_username.clone(),
                    gitlab_token: credentials.gitlab_token.clone(),
                }))
            }
            Self::TemplateUrl { url_template, template_values } => Ok(Box::new(TemplateUrlSource {
                url_template: url_template.clone(),
                template_values: template_values.clone(),
            })),
            Self::GithubRelease { user_name, repo_name, url_regexes } => {
                let compiled = url_regexes
                    .iter()
                    .map(|pattern| compile_regex(pattern))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Box::new(GithubReleaseSource::new(
                    user_name.clone(),
                    repo_name.clone(),
                    compiled,
                    credentials.github_username.clone(),
                    credentials.github_token.clone(),
                )))
            }
        }
    }
}

fn compile_regex(pattern: &str) -> Result<regex::Regex, Error> {
    regex::Regex::new(pattern).map_err(|err| Error::Descriptor(format!("invalid regex {pattern:?}: {err}")))
}
