use std::path::PathBuf;

use async_trait::async_trait;
use ignore::gitignore::GitignoreBuilder;

use crate::{get_str, path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Copy `folder_path` into a fresh folder, keeping only entries that match
/// `include` (or everything, if `include` is empty) and don't match
/// `exclude`.
pub struct FileFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[async_trait]
impl StepExecutor for FileFilter {
    fn kind(&self) -> StepKind {
        StepKind::FileFilter
    }

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError> {
        let source = PathBuf::from(get_str(input, "folder_path")?);
        let dest = ctx.step_dir.clone();
        let include = self.include.clone();
        let exclude = self.exclude.clone();

        tokio::task::spawn_blocking(move || filter_tree(&source, &dest, &include, &exclude))
            .await
            .expect("file_filter task panicked")?;

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}

fn build_matcher(root: &std::path::Path, patterns: &[String]) -> Result<ignore::gitignore::Gitignore, StepError> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        if let Some(err) = builder.add_line(None, pattern) {
            return Err(StepError::Pattern(err.to_string()));
        }
    }
    builder.build().map_err(|err| StepError::Pattern(err.to_string()))
}

fn filter_tree(
    source: &std::path::Path,
    dest: &std::path::Path,
    include: &[String],
    exclude: &[String],
) -> Result<(), StepError> {
    fs_err::create_dir_all(dest)?;
    let include_matcher = build_matcher(source, include)?;
    let exclude_matcher = build_matcher(source, exclude)?;

    for entry in walkdir::WalkDir::new(source).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(source).unwrap_or(path);

        let kept = (include.is_empty() || include_matcher.matched(relative, false).is_ignore())
            && !(!exclude.is_empty() && exclude_matcher.matched(relative, false).is_ignore());
        if !kept {
            continue;
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::copy(path, &target)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_source() -> assert_fs::TempDir {
        let dir = assert_fs::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("README.md"), "hi").unwrap();
        fs::write(dir.path().join("notes.txt"), "scratch").unwrap();
        dir
    }

    #[test]
    fn empty_include_and_exclude_keeps_everything() {
        let source = make_source();
        let dest = assert_fs::TempDir::new().unwrap();
        filter_tree(source.path(), dest.path(), &[], &[]).unwrap();
        assert!(dest.path().join("src/main.rs").exists());
        assert!(dest.path().join("README.md").exists());
        assert!(dest.path().join("notes.txt").exists());
    }

    #[test]
    fn include_pattern_acts_as_an_allowlist() {
        let source = make_source();
        let dest = assert_fs::TempDir::new().unwrap();
        filter_tree(source.path(), dest.path(), &["*.rs".to_string()], &[]).unwrap();
        assert!(dest.path().join("src/main.rs").exists());
        assert!(!dest.path().join("README.md").exists());
        assert!(!dest.path().join("notes.txt").exists());
    }

    #[test]
    fn exclude_pattern_removes_matches_from_the_kept_set() {
        let source = make_source();
        let dest = assert_fs::TempDir::new().unwrap();
        filter_tree(source.path(), dest.path(), &[], &["*.txt".to_string()]).unwrap();
        assert!(dest.path().join("src/main.rs").exists());
        assert!(dest.path().join("README.md").exists());
        assert!(!dest.path().join("notes.txt").exists());
    }
}
