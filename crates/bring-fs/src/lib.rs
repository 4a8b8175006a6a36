//! Small filesystem primitives shared by every `bring` crate.
//!
//! None of this is specific to any one cache bucket or step executor; it's
//! the atomic-rename and temp-sibling discipline that the whole crate's
//! caching story is built on (see `bring-cache`'s module docs for the
//! invariant this upholds).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Iterate over the immediate subdirectories of `path`.
///
/// Returns an empty iterator (rather than an error) if `path` doesn't exist,
/// since "nothing cached yet" and "cache bucket not populated" are the same
/// thing to callers.
pub fn directories(path: impl AsRef<Path>) -> impl Iterator<Item = PathBuf> {
    fs_err::read_dir(path.as_ref())
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
        .map(|entry| entry.path())
}

/// A path suffixed with a random, filesystem-safe token.
///
/// Used to create a temp sibling of a final destination: write/clone into
/// this path, then [`persist`] it into place. Two racing writers each get
/// their own temp sibling, so there's never a collision before the final
/// rename.
pub fn temp_sibling(dest: impl AsRef<Path>) -> PathBuf {
    let dest = dest.as_ref();
    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{file_name}_{}", nanoid::nanoid!(8)))
}

/// Rename `temp` into `dest`, discarding `temp` if `dest` already exists.
///
/// This is the core "loser discards its temp" discipline described
/// throughout the cache design: whichever of N racing processes renames
/// first wins, and the rest silently clean up. Returns `Ok(true)` if this
/// call won the race, `Ok(false)` if another writer got there first.
pub async fn persist(temp: impl AsRef<Path>, dest: impl AsRef<Path>) -> io::Result<bool> {
    let temp = temp.as_ref();
    let dest = dest.as_ref();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match rename_with_retry(temp, dest).await {
        Ok(()) => Ok(true),
        Err(err) if dest.exists() => {
            tracing::debug!(
                temp = %temp.display(),
                dest = %dest.display(),
                "lost persist race, discarding temp: {err}"
            );
            remove_all(temp).await;
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Rename with a handful of retries.
///
/// Windows antivirus scanners and network filesystems can hold a brief
/// exclusive lock right after a file is created; a blind `fs::rename` can
/// lose to that. Retry a few times with a short backoff.
pub async fn rename_with_retry(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    let from = from.as_ref();
    let to = to.as_ref();

    let mut attempt = 0;
    loop {
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(_) if attempt < 4 => {
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(25 * attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Remove a path (file or directory tree), ignoring a missing path.
pub async fn remove_all(path: impl AsRef<Path>) {
    let path = path.as_ref().to_path_buf();
    let _ = tokio::task::spawn_blocking(move || {
        if path.is_dir() {
            let _ = fs_err::remove_dir_all(&path);
        } else {
            let _ = fs_err::remove_file(&path);
        }
    })
    .await;
}

/// Recursively copy `src` into `dst`, creating `dst` if necessary.
///
/// Used to produce disposable copies of read-only cache entries (a
/// materialized version folder, say) for callers that need to mutate the
/// result without corrupting the canonical copy.
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    fs_err::create_dir_all(dst)?;
    for entry in fs_err::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(entry.path(), target)?;
        } else if file_type.is_symlink() {
            let link = fs_err::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, target)?;
            #[cfg(not(unix))]
            fs_err::copy(entry.path(), target).map(|_| ())?;
        } else {
            fs_err::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Per-key async mutexes, so concurrent operations on the same logical
/// resource (a git remote URL, a download URL) serialize within one
/// process without blocking unrelated keys.
///
/// This is an optimization, not a correctness requirement: the on-disk
/// temp-and-rename discipline is what actually makes concurrent access
/// safe, including across processes. `KeyedLocks` just avoids wasted
/// network/disk work when two tasks in the same process race for the
/// same key.
#[derive(Debug, Default)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, creating it on first use.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().unwrap();
            locks.entry(key).or_default().clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_skips_files() {
        let dir = assert_fs::TempDir::new().unwrap();
        fs_err::create_dir(dir.path().join("a")).unwrap();
        fs_err::create_dir(dir.path().join("b")).unwrap();
        fs_err::write(dir.path().join("file.txt"), b"hi").unwrap();

        let mut found: Vec<_> = directories(dir.path())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        found.sort();
        assert_eq!(found, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn directories_on_missing_path_is_empty() {
        let found: Vec<_> = directories("/no/such/path/at/all").collect();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn persist_renames_into_place() {
        let dir = assert_fs::TempDir::new().unwrap();
        let temp = dir.path().join("staged");
        let dest = dir.path().join("final");
        fs_err::write(&temp, b"payload").unwrap();

        let won = persist(&temp, &dest).await.unwrap();
        assert!(won);
        assert!(!temp.exists());
        assert_eq!(fs_err::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn persist_loses_race_discards_temp() {
        let dir = assert_fs::TempDir::new().unwrap();
        let temp = dir.path().join("staged");
        let dest = dir.path().join("final");
        fs_err::write(&temp, b"loser").unwrap();
        fs_err::write(&dest, b"winner").unwrap();

        let won = persist(&temp, &dest).await.unwrap();
        assert!(!won);
        assert!(!temp.exists());
        assert_eq!(fs_err::read(&dest).unwrap(), b"winner");
    }

    #[tokio::test]
    async fn keyed_locks_serialize_same_key() {
        let locks: KeyedLocks<String> = KeyedLocks::new();
        let _g1 = locks.lock("a".to_string()).await;
        // Different key acquires without blocking.
        let _g2 = locks.lock("b".to_string()).await;
    }

    #[test]
    fn copy_dir_all_copies_nested_tree() {
        let src = assert_fs::TempDir::new().unwrap();
        fs_err::create_dir_all(src.path().join("nested")).unwrap();
        fs_err::write(src.path().join("top.txt"), b"top").unwrap();
        fs_err::write(src.path().join("nested/inner.txt"), b"inner").unwrap();

        let dst = assert_fs::TempDir::new().unwrap();
        copy_dir_all(src.path(), dst.path().join("copy")).unwrap();

        assert_eq!(
            fs_err::read(dst.path().join("copy/top.txt")).unwrap(),
            b"top"
        );
        assert_eq!(
            fs_err::read(dst.path().join("copy/nested/inner.txt")).unwrap(),
            b"inner"
        );
    }
}
