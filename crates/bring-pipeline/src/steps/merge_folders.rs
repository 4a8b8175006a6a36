use async_trait::async_trait;

use crate::{get_path_array, path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Merge `folder_paths` (in order, later entries winning on conflict) into
/// this step's own directory.
pub struct MergeFolders {
    pub merge_strategy: Option<String>,
}

#[async_trait]
impl StepExecutor for MergeFolders {
    fn kind(&self) -> StepKind {
        StepKind::MergeFolders
    }

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError> {
        let folders = get_path_array(input, "folder_paths")?;
        let copy = self.merge_strategy.as_deref() == Some("copy");

        fs_err::create_dir_all(&ctx.step_dir)?;
        for folder in &folders {
            if copy {
                bring_fs::copy_dir_all(folder, &ctx.step_dir)?;
            } else {
                merge_move(folder, &ctx.step_dir)?;
            }
        }

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}

/// Move `src`'s contents into `dest`, overwriting files already there
/// (later sources win) rather than failing outright like a plain rename.
fn merge_move(src: &std::path::Path, dest: &std::path::Path) -> std::io::Result<()> {
    for entry in fs_err::read_dir(src)?.filter_map(Result::ok) {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            fs_err::create_dir_all(&to)?;
            merge_move(&from, &to)?;
            fs_err::remove_dir(&from).ok();
        } else {
            if to.exists() {
                fs_err::remove_file(&to)?;
            }
            move_dir_or_file(&from, &to)?;
        }
    }
    Ok(())
}

fn move_dir_or_file(src: &std::path::Path, dest: &std::path::Path) -> std::io::Result<()> {
    match fs_err::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs_err::copy(src, dest)?;
            fs_err::remove_file(src)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn later_folder_entries_win_on_conflict() {
        let first = assert_fs::TempDir::new().unwrap();
        fs::write(first.path().join("shared.txt"), "first").unwrap();
        fs::write(first.path().join("only_first.txt"), "first-only").unwrap();

        let second = assert_fs::TempDir::new().unwrap();
        fs::write(second.path().join("shared.txt"), "second").unwrap();

        let dest = assert_fs::TempDir::new().unwrap();
        merge_move(first.path(), dest.path()).unwrap();
        merge_move(second.path(), dest.path()).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("shared.txt")).unwrap(), "second");
        assert_eq!(
            fs::read_to_string(dest.path().join("only_first.txt")).unwrap(),
            "first-only"
        );
    }
}
