use std::path::PathBuf;

use async_trait::async_trait;

use crate::{get_str, move_dir, path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Relocate `folder_path` into this step's own directory, then apply the
/// requested permission bits to every regular file under it.
pub struct SetMode {
    pub set_executable: Option<bool>,
    pub set_readable: Option<bool>,
}

#[async_trait]
impl StepExecutor for SetMode {
    fn kind(&self) -> StepKind {
        StepKind::SetMode
    }

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError> {
        let source = PathBuf::from(get_str(input, "folder_path")?);
        move_dir(&source, &ctx.step_dir)?;

        let set_executable = self.set_executable;
        let set_readable = self.set_readable;
        let dest = ctx.step_dir.clone();
        tokio::task::spawn_blocking(move || apply_modes(&dest, set_executable, set_readable))
            .await
            .expect("set_mode task panicked")?;

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}

#[cfg(unix)]
fn apply_modes(root: &std::path::Path, set_executable: Option<bool>, set_readable: Option<bool>) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if set_executable.is_none() && set_readable.is_none() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let mut mode = fs_err::metadata(path)?.permissions().mode();

        if let Some(executable) = set_executable {
            mode = if executable { mode | 0o111 } else { mode & !0o111 };
        }
        if let Some(readable) = set_readable {
            mode = if readable { mode | 0o444 } else { mode & !0o444 };
        }

        fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_modes(_root: &std::path::Path, _set_executable: Option<bool>, _set_readable: Option<bool>) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn set_executable_true_adds_execute_bits() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, "#!/bin/sh").unwrap();
        fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

        apply_modes(dir.path(), Some(true), None).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn set_executable_false_clears_execute_bits() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.path().join("script.sh");
        fs::write(&file, "#!/bin/sh").unwrap();
        fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();

        apply_modes(dir.path(), Some(false), None).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);
    }
}
