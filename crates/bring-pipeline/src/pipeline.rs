use std::path::PathBuf;
use std::sync::Arc;

use crate::{StepContext, StepError, StepExecutor, StepIo, StepKind};

#[derive(Debug, thiserror::Error)]
#[error("step {index} ({kind}) failed: {source}")]
pub struct PipelineStepError {
    pub index: usize,
    pub kind: StepKind,
    #[source]
    pub source: StepError,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Step(#[from] PipelineStepError),
    #[error("failed to prepare pipeline working directory: {0}")]
    Setup(#[from] std::io::Error),
}

/// An ordered list of step executors sharing one working directory.
///
/// Steps run strictly sequentially: step N+1 sees exactly step N's
/// output and nothing else. A failing step stops the pipeline immediately
/// with [`PipelineStepError`] naming its index and kind.
///
/// The working directory is removed when the `Pipeline` is dropped,
/// unless the `DEBUG` environment variable is set to `true` — the one
/// environment variable this crate family reads directly, per its
/// ambient-config design.
pub struct Pipeline {
    working_dir: PathBuf,
    steps: Vec<Box<dyn StepExecutor>>,
    downloader: Arc<bring_http::Downloader>,
    git: Arc<bring_git::GitMirrors>,
}

impl Pipeline {
    pub fn new(
        working_dir: PathBuf,
        downloader: Arc<bring_http::Downloader>,
        git: Arc<bring_git::GitMirrors>,
        steps: Vec<Box<dyn StepExecutor>>,
    ) -> Self {
        Self {
            working_dir,
            steps,
            downloader,
            git,
        }
    }

    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    /// Run every step in order, threading each one's output into the
    /// next, and return the last step's output.
    pub async fn run(&self, initial_input: StepIo) -> Result<StepIo, PipelineError> {
        fs_err::create_dir_all(&self.working_dir)?;

        let mut current = initial_input;
        for (index, step) in self.steps.iter().enumerate() {
            let step_dir = self
                .working_dir
                .join(format!("{}_{}", step.kind(), nanoid::nanoid!(8)));
            fs_err::create_dir_all(&step_dir)?;

            let ctx = StepContext {
                step_dir,
                downloader: self.downloader.clone(),
                git: self.git.clone(),
            };

            current = step
                .execute(&ctx, &current)
                .await
                .map_err(|source| PipelineStepError {
                    index,
                    kind: step.kind(),
                    source,
                })?;
        }

        Ok(current)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if std::env::var("DEBUG").as_deref() == Ok("true") {
            return;
        }
        let _ = std::fs::remove_dir_all(&self.working_dir);
    }
}
