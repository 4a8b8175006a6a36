use async_trait::async_trait;

use crate::{path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Clone `url`'s mirror (fetching it on first use) and materialize
/// `version` into a fresh folder named after the repository.
pub struct GitClone {
    pub url: String,
    pub version: String,
}

#[async_trait]
impl StepExecutor for GitClone {
    fn kind(&self) -> StepKind {
        StepKind::GitClone
    }

    async fn execute(&self, ctx: &StepContext, _input: &StepIo) -> Result<StepIo, StepError> {
        let mirror_path = ctx.git.ensure_cloned(&self.url, false).await?;

        let target_folder = ctx.step_dir.join(repo_name(&self.url));
        ctx.git
            .materialize_ref(&mirror_path, &target_folder, &self.version)
            .await?;

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&target_folder));
        Ok(out)
    }
}

fn repo_name(url: &str) -> String {
    let base = url.rsplit('/').next().unwrap_or(url);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_strips_dot_git_suffix() {
        assert_eq!(repo_name("https://example.com/org/tool.git"), "tool");
        assert_eq!(repo_name("https://example.com/org/tool"), "tool");
    }
}
