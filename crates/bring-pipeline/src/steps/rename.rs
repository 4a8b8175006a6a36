use std::path::PathBuf;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::{get_str, move_dir, path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Relocate `folder_path` into this step's own directory, then rename each
/// `rename` key (relative to the folder root) to its value.
pub struct Rename {
    pub rename: IndexMap<String, String>,
}

#[async_trait]
impl StepExecutor for Rename {
    fn kind(&self) -> StepKind {
        StepKind::Rename
    }

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError> {
        let source = PathBuf::from(get_str(input, "folder_path")?);
        move_dir(&source, &ctx.step_dir)?;

        for (from, to) in &self.rename {
            let from_path = ctx.step_dir.join(from);
            let to_path = ctx.step_dir.join(to);
            if let Some(parent) = to_path.parent() {
                fs_err::create_dir_all(parent)?;
            }
            fs_err::rename(&from_path, &to_path)?;
        }

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn renames_files_within_the_relocated_folder() {
        let roots = assert_fs::TempDir::new().unwrap();
        let source = roots.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("old_name.txt"), "hi").unwrap();

        let step_dir = roots.path().join("step");
        let mut rename = IndexMap::new();
        rename.insert("old_name.txt".to_string(), "new_name.txt".to_string());
        let step = Rename { rename };

        let (http_roots, _http_temp) = bring_cache::CacheRoots::temp().unwrap();
        let (git_roots, _git_temp) = bring_cache::CacheRoots::temp().unwrap();
        let downloader = std::sync::Arc::new(bring_http::Downloader::new(http_roots));
        let git = std::sync::Arc::new(bring_git::GitMirrors::new(git_roots));
        let ctx = StepContext {
            step_dir: step_dir.clone(),
            downloader,
            git,
        };

        let mut input = StepIo::new();
        input.insert(
            "folder_path".to_string(),
            serde_json::Value::String(source.display().to_string()),
        );

        step.execute(&ctx, &input).await.unwrap();
        assert!(step_dir.join("new_name.txt").exists());
        assert!(!step_dir.join("old_name.txt").exists());
    }
}
