//! The finite set of pipeline step kinds, and the `Pipeline` that chains
//! them.
//!
//! A step is anything implementing [`StepExecutor`]: it declares what it
//! needs from the previous step's output and what it hands the next one.
//! The runtime-typed result passed between steps is a JSON object
//! ([`StepIo`]) rather than a fixed struct, since the set of keys in play
//! (`folder_path`, `file_path`, `folder_paths`, ...) genuinely varies by
//! step kind. The set of step kinds itself is closed and statically known,
//! not an open plugin registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod pipeline;
pub mod steps;

pub use pipeline::{Pipeline, PipelineError, PipelineStepError};

/// The bag of values threaded between steps and returned as a pipeline's
/// final result.
pub type StepIo = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Download,
    DownloadMultipleFiles,
    GitClone,
    Extract,
    FileFilter,
    Rename,
    SetMode,
    FolderContent,
    MergeFolders,
}

impl StepKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::DownloadMultipleFiles => "download_multiple_files",
            Self::GitClone => "git_clone",
            Self::Extract => "extract",
            Self::FileFilter => "file_filter",
            Self::Rename => "rename",
            Self::SetMode => "set_mode",
            Self::FolderContent => "folder_content",
            Self::MergeFolders => "merge_folders",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step descriptor, as it appears in a `PkgVersion`'s `steps` list or a
/// package's `transform` list, after template placeholder substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    Download {
        url: String,
        target_file_name: String,
        #[serde(default)]
        retries: Option<u32>,
    },
    DownloadMultipleFiles {
        urls: Vec<steps::download_multiple::UrlTarget>,
    },
    GitClone {
        url: String,
        version: String,
    },
    Extract {
        #[serde(default)]
        remove_root: Option<bool>,
    },
    FileFilter {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    Rename {
        rename: indexmap::IndexMap<String, String>,
    },
    SetMode {
        #[serde(default)]
        set_executable: Option<bool>,
        #[serde(default)]
        set_readable: Option<bool>,
    },
    FolderContent {
        #[serde(default)]
        content_spec: Option<indexmap::IndexMap<String, steps::folder_content::ContentItem>>,
    },
    MergeFolders {
        #[serde(default)]
        merge_strategy: Option<String>,
    },
}

impl StepConfig {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Download { .. } => StepKind::Download,
            Self::DownloadMultipleFiles { .. } => StepKind::DownloadMultipleFiles,
            Self::GitClone { .. } => StepKind::GitClone,
            Self::Extract { .. } => StepKind::Extract,
            Self::FileFilter { .. } => StepKind::FileFilter,
            Self::Rename { .. } => StepKind::Rename,
            Self::SetMode { .. } => StepKind::SetMode,
            Self::FolderContent { .. } => StepKind::FolderContent,
            Self::MergeFolders { .. } => StepKind::MergeFolders,
        }
    }

    /// Build the concrete executor for this step.
    pub fn build(self) -> Box<dyn StepExecutor> {
        match self {
            Self::Download {
                url,
                target_file_name,
                retries,
            } => Box::new(steps::download::Download {
                url,
                target_file_name,
                retries,
            }),
            Self::DownloadMultipleFiles { urls } => {
                Box::new(steps::download_multiple::DownloadMultipleFiles { urls })
            }
            Self::GitClone { url, version } => Box::new(steps::git_clone::GitClone { url, version }),
            Self::Extract { remove_root } => Box::new(steps::extract::Extract { remove_root }),
            Self::FileFilter { include, exclude } => {
                Box::new(steps::file_filter::FileFilter { include, exclude })
            }
            Self::Rename { rename } => Box::new(steps::rename::Rename { rename }),
            Self::SetMode {
                set_executable,
                set_readable,
            } => Box::new(steps::set_mode::SetMode {
                set_executable,
                set_readable,
            }),
            Self::FolderContent { content_spec } => {
                Box::new(steps::folder_content::FolderContent { content_spec })
            }
            Self::MergeFolders { merge_strategy } => {
                Box::new(steps::merge_folders::MergeFolders { merge_strategy })
            }
        }
    }
}

/// Resources a step needs while it runs, and the per-step scratch
/// directory its output must live under.
pub struct StepContext {
    pub step_dir: PathBuf,
    pub downloader: Arc<bring_http::Downloader>,
    pub git: Arc<bring_git::GitMirrors>,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("missing required field {0:?}")]
    MissingField(&'static str),
    #[error("field {field:?} has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    Download(#[from] bring_http::DownloadError),
    #[error(transparent)]
    Git(#[from] bring_git::GitError),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("{} has {1} root entries after extraction, expected exactly one directory", .0.display())]
    ArchiveStructure(PathBuf, usize),
    #[error("invalid glob pattern: {0}")]
    Pattern(String),
    #[error("content spec references missing source {0:?}")]
    ContentSpec(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) fn get_str<'a>(input: &'a StepIo, field: &'static str) -> Result<&'a str, StepError> {
    input
        .get(field)
        .ok_or(StepError::MissingField(field))?
        .as_str()
        .ok_or(StepError::WrongType {
            field,
            expected: "string",
        })
}

pub(crate) fn get_path_array(input: &StepIo, field: &'static str) -> Result<Vec<PathBuf>, StepError> {
    let array = input
        .get(field)
        .ok_or(StepError::MissingField(field))?
        .as_array()
        .ok_or(StepError::WrongType {
            field,
            expected: "array",
        })?;
    array
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(PathBuf::from)
                .ok_or(StepError::WrongType {
                    field,
                    expected: "array of strings",
                })
        })
        .collect()
}

pub(crate) fn path_value(path: &Path) -> Value {
    Value::String(path.display().to_string())
}

/// Rename `src` into `dest` (a fresh path), falling back to a recursive
/// copy-then-remove when they're on different filesystems.
pub(crate) fn move_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs_err::create_dir_all(parent)?;
    }
    match fs_err::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            bring_fs::copy_dir_all(src, dest)?;
            fs_err::remove_dir_all(src)?;
            Ok(())
        }
    }
}
