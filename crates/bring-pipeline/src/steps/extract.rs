use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{get_str, path_value, StepContext, StepError, StepExecutor, StepIo, StepKind};

/// Unpack `file_path`'s archive. If exactly one root entry results and
/// it's a directory, that directory becomes the step's output; otherwise
/// the unpack directory itself is. `remove_root` overrides the
/// auto-detection either way.
pub struct Extract {
    pub remove_root: Option<bool>,
}

#[async_trait]
impl StepExecutor for Extract {
    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    async fn execute(&self, ctx: &StepContext, input: &StepIo) -> Result<StepIo, StepError> {
        let file_path = PathBuf::from(get_str(input, "file_path")?);
        let dest = ctx.step_dir.clone();
        let remove_root = self.remove_root;

        let result_dir = tokio::task::spawn_blocking(move || extract_archive(&file_path, &dest, remove_root))
            .await
            .expect("extract task panicked")?;

        let mut out = StepIo::new();
        out.insert("folder_path".to_string(), path_value(&result_dir));
        Ok(out)
    }
}

fn extract_archive(file_path: &Path, dest: &Path, remove_root: Option<bool>) -> Result<PathBuf, StepError> {
    fs_err::create_dir_all(dest)?;
    let lowercase = file_path.to_string_lossy().to_lowercase();

    if lowercase.ends_with(".tar.gz") || lowercase.ends_with(".tgz") {
        let file = fs_err::File::open(file_path)?;
        let decoder = flate2::read::GzDecoder::new(file);
        tar::Archive::new(decoder).unpack(dest)?;
    } else if lowercase.ends_with(".tar") {
        let file = fs_err::File::open(file_path)?;
        tar::Archive::new(file).unpack(dest)?;
    } else if lowercase.ends_with(".zip") {
        let file = fs_err::File::open(file_path)?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|err| StepError::Archive(err.to_string()))?;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|err| StepError::Archive(err.to_string()))?;
            let Some(relative) = entry.enclosed_name() else {
                continue;
            };
            let out_path = dest.join(relative);
            if entry.is_dir() {
                fs_err::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    fs_err::create_dir_all(parent)?;
                }
                let mut out_file = fs_err::File::create(&out_path)?;
                std::io::copy(&mut entry, &mut out_file)?;
            }
        }
    } else {
        return Err(StepError::Archive(format!(
            "unsupported archive extension: {}",
            file_path.display()
        )));
    }

    let entries: Vec<_> = fs_err::read_dir(dest)?.filter_map(Result::ok).collect();
    let single_root_dir =
        entries.len() == 1 && entries[0].file_type().is_ok_and(|file_type| file_type.is_dir());

    match remove_root {
        Some(true) => {
            if !single_root_dir {
                return Err(StepError::ArchiveStructure(dest.to_path_buf(), entries.len()));
            }
            Ok(entries[0].path())
        }
        Some(false) => Ok(dest.to_path_buf()),
        None => Ok(if single_root_dir {
            entries[0].path()
        } else {
            dest.to_path_buf()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tar_gz(dest: &Path, entries: &[(&str, &[u8])]) {
        let file = fs_err::File::create(dest).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn single_directory_root_is_unwrapped_by_default() {
        let dir = assert_fs::TempDir::new().unwrap();
        let archive_path = dir.path().join("pkg.tar.gz");
        write_tar_gz(
            &archive_path,
            &[("pkg-1.0/README.md", b"hi"), ("pkg-1.0/bin/tool", b"bin")],
        );

        let dest = dir.path().join("out");
        let result = extract_archive(&archive_path, &dest, None).unwrap();
        assert_eq!(result, dest.join("pkg-1.0"));
        assert!(result.join("README.md").exists());
    }

    #[test]
    fn multiple_root_entries_keep_the_unpack_dir() {
        let dir = assert_fs::TempDir::new().unwrap();
        let archive_path = dir.path().join("multi.tar.gz");
        write_tar_gz(&archive_path, &[("a.txt", b"a"), ("b.txt", b"b")]);

        let dest = dir.path().join("out");
        let result = extract_archive(&archive_path, &dest, None).unwrap();
        assert_eq!(result, dest);
    }

    #[test]
    fn remove_root_true_fails_when_root_is_not_a_single_dir() {
        let dir = assert_fs::TempDir::new().unwrap();
        let archive_path = dir.path().join("multi.tar.gz");
        write_tar_gz(&archive_path, &[("a.txt", b"a"), ("b.txt", b"b")]);

        let dest = dir.path().join("out");
        let err = extract_archive(&archive_path, &dest, Some(true)).unwrap_err();
        assert!(matches!(err, StepError::ArchiveStructure(_, 2)));
    }

    #[test]
    fn remove_root_false_keeps_unpack_dir_even_for_single_entry() {
        let dir = assert_fs::TempDir::new().unwrap();
        let archive_path = dir.path().join("pkg.tar.gz");
        write_tar_gz(&archive_path, &[("pkg-1.0/README.md", b"hi")]);

        let dest = dir.path().join("out");
        let result = extract_archive(&archive_path, &dest, Some(false)).unwrap();
        assert_eq!(result, dest);
    }
}
