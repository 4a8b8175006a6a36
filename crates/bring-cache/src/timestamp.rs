use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time, truncated to whole seconds.
///
/// Filesystem mtimes don't carry sub-second precision reliably across
/// platforms, so comparisons are done at second granularity to avoid
/// spurious staleness on filesystems that round differently than
/// [`SystemTime::now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The current time.
    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        )
    }

    /// The modification time recorded in `metadata`.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        Self(modified.duration_since(UNIX_EPOCH).unwrap_or_default())
    }

    /// The modification time of the file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let metadata = fs_err::metadata(path.as_ref())?;
        Ok(Self::from_metadata(&metadata))
    }

    /// How long ago this timestamp was, relative to now.
    pub fn elapsed(&self) -> Duration {
        Self::now().0.saturating_sub(self.0)
    }
}
