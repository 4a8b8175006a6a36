use async_trait::async_trait;

use crate::{path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Fetch `url` through the content-addressed download cache, then copy it
/// into this step's workspace under `target_file_name`.
pub struct Download {
    pub url: String,
    pub target_file_name: String,
    pub retries: Option<u32>,
}

#[async_trait]
impl StepExecutor for Download {
    fn kind(&self) -> StepKind {
        StepKind::Download
    }

    async fn execute(&self, ctx: &StepContext, _input: &StepIo) -> Result<StepIo, StepError> {
        let cached = ctx.downloader.fetch(&self.url, self.retries).await?;

        let target_path = ctx.step_dir.join(&self.target_file_name);
        if let Some(parent) = target_path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::copy(&cached, &target_path)?;

        let mut out = StepIo::new();
        out.insert("file_path".to_string(), path_value(&target_path));
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}
