use std::path::PathBuf;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{get_str, path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub from: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Without a `content_spec`, copy `folder_path` through unchanged. With
/// one, treat it as an allowlist: each target path is populated from its
/// `from` source path (relative to `folder_path`), with `mode` applied as
/// octal unix permissions if given.
pub struct FolderContent {
    pub content_spec: Option<IndexMap<String, ContentItem>>,
}

#[async_trait]
impl StepExecutor for FolderContent {
    fn kind(&self) -> StepKind {
        StepKind::FolderContent
    }

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError> {
        let source = PathBuf::from(get_str(input, "folder_path")?);
        let dest = ctx.step_dir.clone();
        let spec = self.content_spec.clone();

        tokio::task::spawn_blocking(move || apply_content_spec(&source, &dest, spec.as_ref()))
            .await
            .expect("folder_content task panicked")?;

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}

fn apply_content_spec(
    source: &std::path::Path,
    dest: &std::path::Path,
    spec: Option<&IndexMap<String, ContentItem>>,
) -> Result<(), StepError> {
    let Some(spec) = spec.filter(|spec| !spec.is_empty()) else {
        bring_fs::copy_dir_all(source, dest)?;
        return Ok(());
    };

    fs_err::create_dir_all(dest)?;
    for (target, item) in spec {
        let from_path = source.join(&item.from);
        if !from_path.exists() {
            return Err(StepError::ContentSpec(item.from.clone()));
        }
        let target_path = dest.join(target);
        if let Some(parent) = target_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        if from_path.is_dir() {
            bring_fs::copy_dir_all(&from_path, &target_path)?;
        } else {
            fs_err::copy(&from_path, &target_path)?;
        }

        if let Some(mode) = &item.mode {
            apply_mode(&target_path, mode)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &std::path::Path, mode: &str) -> Result<(), StepError> {
    use std::os::unix::fs::PermissionsExt;
    let parsed = u32::from_str_radix(mode, 8)
        .map_err(|_| StepError::ContentSpec(format!("invalid mode {mode:?}")))?;
    fs_err::set_permissions(path, std::fs::Permissions::from_mode(parsed))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &std::path::Path, _mode: &str) -> Result<(), StepError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_spec_copies_the_whole_tree() {
        let source = assert_fs::TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("a/b")).unwrap();
        fs::write(source.path().join("a/b/file.txt"), "hi").unwrap();

        let dest = assert_fs::TempDir::new().unwrap();
        apply_content_spec(source.path(), dest.path(), None).unwrap();
        assert!(dest.path().join("a/b/file.txt").exists());
    }

    #[test]
    fn non_empty_spec_acts_as_an_allowlist_with_rename() {
        let source = assert_fs::TempDir::new().unwrap();
        fs::write(source.path().join("bin"), "binary").unwrap();
        fs::write(source.path().join("ignored.txt"), "skip me").unwrap();

        let mut spec = IndexMap::new();
        spec.insert(
            "bin/tool".to_string(),
            ContentItem {
                from: "bin".to_string(),
                mode: Some("755".to_string()),
            },
        );

        let dest = assert_fs::TempDir::new().unwrap();
        apply_content_spec(source.path(), dest.path(), Some(&spec)).unwrap();
        assert!(dest.path().join("bin/tool").exists());
        assert!(!dest.path().join("ignored.txt").exists());
    }

    #[test]
    fn missing_source_path_is_an_error() {
        let source = assert_fs::TempDir::new().unwrap();
        let mut spec = IndexMap::new();
        spec.insert(
            "out".to_string(),
            ContentItem {
                from: "missing".to_string(),
                mode: None,
            },
        );

        let dest = assert_fs::TempDir::new().unwrap();
        let err = apply_content_spec(source.path(), dest.path(), Some(&spec)).unwrap_err();
        assert!(matches!(err, StepError::ContentSpec(_)));
    }
}
