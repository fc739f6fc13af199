use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::partition::Partition;

/// Locates partition artifacts (`<name>.<index>`) next to the destination
/// file (`<name>`) inside one output directory.
#[derive(Debug, Clone)]
pub struct PartStore {
    dir: PathBuf,
    filename: String,
}

impl PartStore {
    pub fn new(dir: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            filename: filename.into(),
        }
    }

    pub fn dest_path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.{}", self.filename, index))
    }

    pub fn ensure_dir(&self) -> CoreResult<()> {
        if self.dir.as_os_str().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|err| {
            CoreError::Filesystem(format!("create {}: {}", self.dir.display(), err))
        })
    }

    /// Current length of the artifact, zero when it does not exist yet.
    pub fn existing_len(&self, index: usize) -> CoreResult<u64> {
        file_len(&self.part_path(index))
    }

    pub fn dest_len(&self) -> CoreResult<Option<u64>> {
        let path = self.dest_path();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Err(CoreError::Filesystem(format!(
                "{} exists and is not a regular file",
                path.display()
            ))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CoreError::Filesystem(format!("stat {}: {}", path.display(), err))),
        }
    }

    pub fn open_append(&self, index: usize) -> CoreResult<File> {
        let path = self.part_path(index);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| CoreError::Filesystem(format!("open {}: {}", path.display(), err)))
    }

    pub fn open_part(&self, index: usize) -> CoreResult<File> {
        let path = self.part_path(index);
        File::open(&path)
            .map_err(|err| CoreError::Filesystem(format!("open {}: {}", path.display(), err)))
    }

    pub fn truncate(&self, index: usize, len: u64) -> CoreResult<()> {
        let path = self.part_path(index);
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|err| CoreError::Filesystem(format!("open {}: {}", path.display(), err)))?;
        file.set_len(len)
            .map_err(|err| CoreError::Filesystem(format!("truncate {}: {}", path.display(), err)))
    }

    /// Bytes already on disk for each partition, capped at the partition length.
    pub fn scan(&self, partitions: &[Partition]) -> CoreResult<Vec<u64>> {
        partitions
            .iter()
            .map(|part| {
                let len = self.existing_len(part.index)?;
                if len > 0 {
                    debug!(partition = part.index, bytes = len, expected = part.len(), "found artifact");
                }
                Ok(len.min(part.len()))
            })
            .collect()
    }

    pub fn remove_parts(&self, count: usize) -> CoreResult<()> {
        for index in 0..count {
            let path = self.part_path(index);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(CoreError::Filesystem(format!(
                        "remove {}: {}",
                        path.display(),
                        err
                    )))
                }
            }
        }
        Ok(())
    }
}

fn file_len(path: &Path) -> CoreResult<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
        Err(err) => Err(CoreError::Filesystem(format!("stat {}: {}", path.display(), err))),
    }
}
