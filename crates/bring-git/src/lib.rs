//! Git mirror management: one long-lived bare mirror clone per remote URL,
//! refreshed on demand, with working copies materialized out of it for a
//! specific ref.
//!
//! `git2` does all the actual repository work; this crate wraps it with
//! the cache's content-addressed layout and the temp-sibling-then-rename
//! discipline from `bring-fs`, so cloning is safe under concurrent callers
//! both within a process (via `KeyedLocks`) and across processes (via
//! atomic rename).

use std::path::{Path, PathBuf};

use bring_cache::{CacheBucket, CacheRoots};
use bring_fs::KeyedLocks;

mod info;

pub use info::{CommitInfo, RepoInfo};

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git operation on {url} failed: {source}")]
    Git {
        url: String,
        #[source]
        source: git2::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no ref named {ref_name:?} found in {url}")]
    InvalidRef { url: String, ref_name: String },
    #[error("target path already exists: {}", .0.display())]
    TargetExists(PathBuf),
}

/// A manager for bare git mirrors, one per remote URL, rooted under a
/// [`CacheRoots`]'s [`CacheBucket::GitCheckouts`] bucket.
pub struct GitMirrors {
    roots: CacheRoots,
    locks: KeyedLocks<String>,
}

impl GitMirrors {
    pub fn new(roots: CacheRoots) -> Self {
        Self {
            roots,
            locks: KeyedLocks::new(),
        }
    }

    fn mirror_path(&self, url: &str) -> PathBuf {
        let digest = bring_hash::stable_hash(&serde_json::Value::String(url.to_string()));
        self.roots
            .shard(CacheBucket::GitCheckouts, digest)
            .path()
            .to_path_buf()
    }

    /// Ensure a bare mirror of `url` exists locally, cloning it on first
    /// use and fetching updates into it when `update` is set. Returns the
    /// mirror's path.
    ///
    /// Concurrent calls for the same URL serialize on an in-process lock;
    /// concurrent calls from different processes race on the clone and
    /// the loser discards its temp directory, same as every other cache
    /// write in this crate family.
    pub async fn ensure_cloned(&self, url: &str, update: bool) -> Result<PathBuf, GitError> {
        let path = self.mirror_path(url);
        let _guard = self.locks.lock(url.to_string()).await;

        if path.exists() {
            if update {
                tracing::debug!(url, path = %path.display(), "fetching git mirror");
                let target = path.clone();
                let url = url.to_string();
                tokio::task::spawn_blocking(move || fetch_mirror(&target, &url))
                    .await
                    .expect("fetch_mirror task panicked")?;
            }
            return Ok(path);
        }

        tracing::debug!(url, path = %path.display(), "cloning git mirror");
        let parent = path.parent().expect("mirror path has a parent");
        fs_err::create_dir_all(parent)?;
        let temp = bring_fs::temp_sibling(&path);

        let clone_url = url.to_string();
        let clone_dest = temp.clone();
        tokio::task::spawn_blocking(move || clone_bare(&clone_url, &clone_dest))
            .await
            .expect("clone_bare task panicked")?;

        bring_fs::persist(&temp, &path).await?;
        Ok(path)
    }

    /// Check out `git_ref` (a branch, tag, or commit sha) from `mirror_path`
    /// into a fresh working tree at `target_path`.
    ///
    /// `target_path` must not already exist.
    pub async fn materialize_ref(
        &self,
        mirror_path: &Path,
        target_path: &Path,
        git_ref: &str,
    ) -> Result<(), GitError> {
        if target_path.exists() {
            return Err(GitError::TargetExists(target_path.to_path_buf()));
        }

        let mirror_path = mirror_path.to_path_buf();
        let target_path = target_path.to_path_buf();
        let git_ref = git_ref.to_string();
        tokio::task::spawn_blocking(move || checkout_ref(&mirror_path, &target_path, &git_ref))
            .await
            .expect("checkout_ref task panicked")
    }

    /// Inspect `mirror_path`'s tags, branches, and commit history.
    pub async fn repo_info(&self, mirror_path: &Path) -> Result<RepoInfo, GitError> {
        let mirror_path = mirror_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_repo_info(&mirror_path))
            .await
            .expect("read_repo_info task panicked")
    }
}

fn clone_bare(url: &str, dest: &Path) -> Result<(), GitError> {
    git2::build::RepoBuilder::new()
        .bare(true)
        .clone(url, dest)
        .map_err(|source| GitError::Git {
            url: url.to_string(),
            source,
        })?;
    Ok(())
}

fn fetch_mirror(path: &Path, url: &str) -> Result<(), GitError> {
    let repo = git2::Repository::open(path).map_err(|source| GitError::Git {
        url: url.to_string(),
        source,
    })?;
    let mut remote = repo.find_remote("origin").map_err(|source| GitError::Git {
        url: url.to_string(),
        source,
    })?;
    remote
        .fetch(&["+refs/*:refs/*"], None, None)
        .map_err(|source| GitError::Git {
            url: url.to_string(),
            source,
        })?;
    Ok(())
}

fn checkout_ref(mirror_path: &Path, target_path: &Path, git_ref: &str) -> Result<(), GitError> {
    let label = mirror_path.display().to_string();
    let parent = target_path.parent().expect("target path has a parent");
    fs_err::create_dir_all(parent)?;
    let temp = bring_fs::temp_sibling(target_path);

    let source_url = mirror_path.to_string_lossy().into_owned();
    let repo = git2::build::RepoBuilder::new()
        .clone(&source_url, &temp)
        .map_err(|source| GitError::Git {
            url: label.clone(),
            source,
        })?;

    let oid = resolve_ref(&repo, git_ref).ok_or_else(|| GitError::InvalidRef {
        url: label.clone(),
        ref_name: git_ref.to_string(),
    })?;

    repo.set_head_detached(oid).map_err(|source| GitError::Git {
        url: label.clone(),
        source,
    })?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))
        .map_err(|source| GitError::Git {
            url: label.clone(),
            source,
        })?;
    drop(repo);

    if target_path.exists() {
        let _ = fs_err::remove_dir_all(&temp);
        return Err(GitError::TargetExists(target_path.to_path_buf()));
    }
    fs_err::rename(&temp, target_path)?;
    Ok(())
}

/// Resolve `git_ref` against a repo's tags, local branches, remote
/// branches, and finally raw revspecs (a commit sha, `HEAD`, `HEAD~1`...),
/// in that order: tags take precedence over branches over arbitrary refs.
fn resolve_ref(repo: &git2::Repository, git_ref: &str) -> Option<git2::Oid> {
    for candidate in [
        format!("refs/tags/{git_ref}"),
        format!("refs/heads/{git_ref}"),
        format!("refs/remotes/origin/{git_ref}"),
    ] {
        if let Ok(reference) = repo.find_reference(&candidate) {
            if let Ok(obj) = reference.peel(git2::ObjectType::Commit) {
                return Some(obj.id());
            }
        }
    }

    repo.revparse_single(git_ref)
        .ok()
        .and_then(|obj| obj.peel_to_commit().ok())
        .map(|commit| commit.id())
}

fn read_repo_info(mirror_path: &Path) -> Result<RepoInfo, GitError> {
    let label = mirror_path.display().to_string();
    let repo = git2::Repository::open(mirror_path).map_err(|source| GitError::Git {
        url: label.clone(),
        source,
    })?;

    let mut info = RepoInfo::default();

    for reference in repo.references().map_err(|source| GitError::Git {
        url: label.clone(),
        source,
    })? {
        let reference = reference.map_err(|source| GitError::Git {
            url: label.clone(),
            source,
        })?;
        let Some(name) = reference.name() else {
            continue;
        };

        if let Some(tag_name) = name.strip_prefix("refs/tags/") {
            if let Ok(obj) = reference.peel(git2::ObjectType::Commit) {
                info.tags.insert(tag_name.to_string(), obj.id().to_string());
            }
        } else if let Some(branch_name) = name.strip_prefix("refs/heads/") {
            if let Some(oid) = reference.target() {
                info.branches.insert(branch_name.to_string(), oid.to_string());
            }
        }
    }
    info.branches.sort_unstable_keys();

    let mut revwalk = repo.revwalk().map_err(|source| GitError::Git {
        url: label.clone(),
        source,
    })?;
    revwalk.push_glob("refs/*").map_err(|source| GitError::Git {
        url: label.clone(),
        source,
    })?;

    for oid in revwalk {
        let oid = oid.map_err(|source| GitError::Git {
            url: label.clone(),
            source,
        })?;
        let commit = repo.find_commit(oid).map_err(|source| GitError::Git {
            url: label.clone(),
            source,
        })?;
        let author = commit.author();
        let when = author.when();
        info.commits.insert(
            oid.to_string(),
            CommitInfo {
                author_timestamp: when.seconds(),
                author_offset_minutes: when.offset_minutes(),
            },
        );
    }

    let commits = &info.commits;
    let mut tags: Vec<(String, String)> = info.tags.into_iter().collect();
    tags.sort_by(|(_, a_sha), (_, b_sha)| {
        let a_ts = commits.get(a_sha).map_or(i64::MIN, |c| c.author_timestamp);
        let b_ts = commits.get(b_sha).map_or(i64::MIN, |c| c.author_timestamp);
        b_ts.cmp(&a_ts)
    });
    info.tags = tags.into_iter().collect();

    Ok(info)
}
