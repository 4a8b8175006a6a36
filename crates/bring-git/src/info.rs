use indexmap::IndexMap;

/// Tags, branches and commit metadata for a mirror, as of the moment it
/// was inspected.
#[derive(Debug, Clone, Default)]
pub struct RepoInfo {
    /// Tag name -> commit sha it points at (annotated tags are peeled).
    pub tags: IndexMap<String, String>,
    /// Branch name -> commit sha.
    pub branches: IndexMap<String, String>,
    /// Commit sha -> author metadata, for every commit reachable from any
    /// ref.
    pub commits: IndexMap<String, CommitInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct CommitInfo {
    /// Seconds since the Unix epoch, in the author's local time.
    pub author_timestamp: i64,
    /// The author's UTC offset, in minutes.
    pub author_offset_minutes: i32,
}
