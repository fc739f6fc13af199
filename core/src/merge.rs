use std::fs::File;
use std::io::{self, BufWriter};

use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::partition::Partition;
use crate::store::PartStore;

/// Concatenates the artifacts of `partitions` in index order into the
/// destination file and checks the result against `total_size`.
///
/// Artifacts are deleted only when the sizes agree; on any error they stay
/// on disk so the next run can pick them up.
pub fn merge_parts(store: &PartStore, partitions: &[Partition], total_size: u64) -> CoreResult<u64> {
    let dest = store.dest_path();
    let file = File::create(&dest)
        .map_err(|err| CoreError::Filesystem(format!("create {}: {}", dest.display(), err)))?;
    let mut writer = BufWriter::new(file);

    let mut ordered: Vec<&Partition> = partitions.iter().collect();
    ordered.sort_by_key(|part| part.index);

    let mut total = 0u64;
    for part in ordered {
        let mut source = store.open_part(part.index)?;
        let copied = io::copy(&mut source, &mut writer).map_err(|err| {
            CoreError::Filesystem(format!(
                "merge {}: {}",
                store.part_path(part.index).display(),
                err
            ))
        })?;
        total += copied;
    }

    let file = writer
        .into_inner()
        .map_err(|err| CoreError::Filesystem(format!("flush {}: {}", dest.display(), err.error())))?;
    file.sync_all()
        .map_err(|err| CoreError::Filesystem(format!("sync {}: {}", dest.display(), err)))?;

    if total != total_size {
        return Err(CoreError::IncompleteFile {
            expected: total_size,
            actual: total,
        });
    }

    store.remove_parts(partitions.len())?;
    info!(path = %dest.display(), bytes = total, parts = partitions.len(), "merged partitions");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::plan_partitions;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn merges_in_index_order_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let store = PartStore::new(dir.path(), "out.bin");
        let parts = plan_partitions(10, 4);
        // Written out of order on purpose.
        for (index, bytes) in [(3, "9"), (1, "345"), (0, "012"), (2, "678")] {
            fs::write(store.part_path(index), bytes).unwrap();
        }

        let mut shuffled = parts.clone();
        shuffled.reverse();
        assert_eq!(merge_parts(&store, &shuffled, 10).unwrap(), 10);
        assert_eq!(fs::read(store.dest_path()).unwrap(), b"0123456789");
        for part in &parts {
            assert!(!store.part_path(part.index).exists());
        }
    }

    #[test]
    fn size_mismatch_keeps_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = PartStore::new(dir.path(), "out.bin");
        let parts = plan_partitions(10, 2);
        fs::write(store.part_path(0), b"01234").unwrap();
        fs::write(store.part_path(1), b"567").unwrap();

        let err = merge_parts(&store, &parts, 10).unwrap_err();
        assert!(matches!(err, CoreError::IncompleteFile { expected: 10, actual: 8 }));
        assert!(store.part_path(0).exists());
        assert!(store.part_path(1).exists());
    }

    #[test]
    fn missing_artifact_is_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let store = PartStore::new(dir.path(), "out.bin");
        let parts = plan_partitions(10, 2);
        fs::write(store.part_path(0), b"01234").unwrap();

        let err = merge_parts(&store, &parts, 10).unwrap_err();
        assert!(matches!(err, CoreError::Filesystem(_)));
        assert!(store.part_path(0).exists());
    }

    #[test]
    fn empty_plan_produces_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = PartStore::new(dir.path(), "empty.bin");
        assert_eq!(merge_parts(&store, &[], 0).unwrap(), 0);
        assert_eq!(fs::metadata(store.dest_path()).unwrap().len(), 0);
    }
}
