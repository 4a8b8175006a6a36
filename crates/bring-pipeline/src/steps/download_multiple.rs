use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTarget {
    pub url: String,
    pub target: String,
}

/// Download every `urls` entry in parallel into a single fresh folder,
/// preserving each entry's declared `target` sub-path.
pub struct DownloadMultipleFiles {
    pub urls: Vec<UrlTarget>,
}

#[async_trait]
impl StepExecutor for DownloadMultipleFiles {
    fn kind(&self) -> StepKind {
        StepKind::DownloadMultipleFiles
    }

    async fn execute(&self, ctx: &StepContext, _input: &StepIo) -> Result<StepIo, StepError> {
        let downloads = self.urls.iter().map(|item| {
            let downloader = ctx.downloader.clone();
            let step_dir = ctx.step_dir.clone();
            let url = item.url.clone();
            let target = item.target.clone();
            async move {
                let cached = downloader.fetch(&url, None).await?;
                let target_path = step_dir.join(&target);
                if let Some(parent) = target_path.parent() {
                    fs_err::create_dir_all(parent)?;
                }
                fs_err::copy(&cached, &target_path)?;
                Ok::<(), StepError>(())
            }
        });
        futures::future::try_join_all(downloads).await?;

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&ctx.step_dir));
        Ok(out)
    }
}
