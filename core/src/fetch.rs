use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::cancel::StopSignal;
use crate::error::{CoreError, CoreResult};
use crate::net::{check_status, DownloadRequest, Transport};
use crate::partition::Partition;
use crate::progress::ProgressTracker;
use crate::store::PartStore;

const PARTIAL_CONTENT: u16 = 206;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    /// The artifact was already complete; no request was made.
    AlreadyComplete,
    Fetched { resumed_from: u64, bytes: u64 },
}

/// Everything one fetch needs. Cheap to clone so each partition worker can
/// own a copy and outlive the call that spawned it.
#[derive(Clone)]
pub struct Fetcher {
    pub transport: Arc<dyn Transport>,
    pub url: Url,
    pub progress: Arc<ProgressTracker>,
    pub stop: Arc<StopSignal>,
    pub chunk_size: usize,
}

impl Fetcher {
    /// Downloads one partition into its artifact, resuming from whatever is
    /// already on disk.
    pub fn fetch_partition(&self, store: &PartStore, part: &Partition) -> CoreResult<PartOutcome> {
        let expected = part.len();
        let mut existing = store.existing_len(part.index)?;
        if existing == expected {
            debug!(partition = part.index, bytes = expected, "partition already complete");
            return Ok(PartOutcome::AlreadyComplete);
        }
        if existing > expected {
            warn!(
                partition = part.index,
                bytes = existing,
                expected,
                "artifact longer than its partition, starting over"
            );
            store.truncate(part.index, 0)?;
            existing = 0;
        }

        self.stop.check()?;
        let from = part.start + existing;
        debug!(partition = part.index, from, to = part.end, resumed = existing, "fetching partition");
        let req = DownloadRequest::new(self.url.clone()).with_range(from, part.end);
        let resp = self.transport.get(&req)?;
        check_status(resp.status_code)?;
        if resp.status_code != PARTIAL_CONTENT {
            return Err(CoreError::RangeNotHonored(resp.status_code));
        }

        let mut file = store.open_append(part.index)?;
        let copied = self.copy_body(resp.body, &mut file, Some(expected - existing))?;
        drop(file);

        let actual = store.existing_len(part.index)?;
        if copied.overflow > 0 || actual != expected {
            return Err(CoreError::PartLengthMismatch {
                index: part.index,
                expected,
                actual: actual + copied.overflow,
            });
        }
        Ok(PartOutcome::Fetched {
            resumed_from: existing,
            bytes: copied.written,
        })
    }

    /// Streams the whole resource into `dest`, truncating anything already
    /// there. Returns the number of bytes written.
    pub fn fetch_single_stream(&self, dest: &Path, total_size: Option<u64>) -> CoreResult<u64> {
        self.stop.check()?;
        let resp = self.transport.get(&DownloadRequest::new(self.url.clone()))?;
        check_status(resp.status_code)?;

        let mut file = File::create(dest)
            .map_err(|err| CoreError::Filesystem(format!("create {}: {}", dest.display(), err)))?;
        let copied = self.copy_body(resp.body, &mut file, None)?;
        file.sync_all()
            .map_err(|err| CoreError::Filesystem(format!("sync {}: {}", dest.display(), err)))?;

        if let Some(expected) = total_size {
            if copied.written != expected {
                return Err(CoreError::IncompleteFile {
                    expected,
                    actual: copied.written,
                });
            }
        }
        Ok(copied.written)
    }

    fn copy_body(
        &self,
        mut body: Box<dyn Read + Send>,
        out: &mut File,
        limit: Option<u64>,
    ) -> CoreResult<Copied> {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut copied = Copied::default();
        loop {
            self.stop.check()?;
            let read = body
                .read(&mut buffer)
                .map_err(|err| CoreError::Network(err.to_string()))?;
            if read == 0 {
                break;
            }
            // A read can block for a long time; nothing lands on disk once
            // the run has been stopped in the meantime.
            self.stop.check()?;
            let mut chunk = &buffer[..read];
            if let Some(limit) = limit {
                let room = limit - copied.written;
                if read as u64 > room {
                    copied.overflow = read as u64 - room;
                    chunk = &buffer[..room as usize];
                }
            }
            out.write_all(chunk)
                .map_err(|err| CoreError::Filesystem(err.to_string()))?;
            copied.written += chunk.len() as u64;
            self.progress.add_bytes(chunk.len() as u64);
            if copied.overflow > 0 {
                break;
            }
        }
        out.flush()
            .map_err(|err| CoreError::Filesystem(err.to_string()))?;
        Ok(copied)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Copied {
    written: u64,
    overflow: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::plan_partitions;
    use crate::progress::NoProgress;
    use crate::tests::MemoryOrigin;
    use std::fs;
    use tempfile::TempDir;

    const BODY: &[u8] = b"0123456789";

    struct Harness {
        origin: Arc<MemoryOrigin>,
        progress: Arc<ProgressTracker>,
        stop: Arc<StopSignal>,
        url: Url,
        dir: TempDir,
    }

    impl Harness {
        fn new(origin: MemoryOrigin) -> Self {
            Self {
                origin: Arc::new(origin),
                progress: Arc::new(ProgressTracker::new(Arc::new(NoProgress))),
                stop: Arc::new(StopSignal::new(None)),
                url: Url::parse("http://origin.test/file.bin").unwrap(),
                dir: TempDir::new().unwrap(),
            }
        }

        fn fetcher(&self) -> Fetcher {
            Fetcher {
                transport: self.origin.clone(),
                url: self.url.clone(),
                progress: self.progress.clone(),
                stop: self.stop.clone(),
                chunk_size: 4,
            }
        }

        fn store(&self) -> PartStore {
            PartStore::new(self.dir.path(), "file.bin")
        }
    }

    #[test]
    fn fetches_partition_into_artifact() {
        let h = Harness::new(MemoryOrigin::new(BODY));
        let part = plan_partitions(10, 4)[1];
        let outcome = h.fetcher().fetch_partition(&h.store(), &part).unwrap();
        assert_eq!(outcome, PartOutcome::Fetched { resumed_from: 0, bytes: 3 });
        assert_eq!(fs::read(h.store().part_path(1)).unwrap(), b"345");
        assert_eq!(h.origin.ranges(), vec![Some((3, 5))]);
        assert_eq!(h.progress.downloaded(), 3);
    }

    #[test]
    fn resumes_from_partial_artifact() {
        let h = Harness::new(MemoryOrigin::new(BODY));
        let part = Partition::new(0, 0, 9);
        fs::write(h.store().part_path(0), b"0123").unwrap();

        let outcome = h.fetcher().fetch_partition(&h.store(), &part).unwrap();
        assert_eq!(outcome, PartOutcome::Fetched { resumed_from: 4, bytes: 6 });
        assert_eq!(h.origin.ranges(), vec![Some((4, 9))]);
        assert_eq!(fs::read(h.store().part_path(0)).unwrap(), BODY);
    }

    #[test]
    fn complete_artifact_issues_no_request() {
        let h = Harness::new(MemoryOrigin::new(BODY));
        let part = plan_partitions(10, 4)[3];
        fs::write(h.store().part_path(3), b"9").unwrap();

        let outcome = h.fetcher().fetch_partition(&h.store(), &part).unwrap();
        assert_eq!(outcome, PartOutcome::AlreadyComplete);
        assert_eq!(h.origin.request_count(), 0);
    }

    #[test]
    fn oversized_artifact_is_refetched() {
        let h = Harness::new(MemoryOrigin::new(BODY));
        let part = plan_partitions(10, 4)[0];
        fs::write(h.store().part_path(0), b"garbage!").unwrap();

        h.fetcher().fetch_partition(&h.store(), &part).unwrap();
        assert_eq!(fs::read(h.store().part_path(0)).unwrap(), b"012");
        assert_eq!(h.origin.ranges(), vec![Some((0, 2))]);
    }

    #[test]
    fn short_body_is_length_mismatch() {
        let h = Harness::new(MemoryOrigin::new(BODY).truncate_bodies_to(2));
        let part = plan_partitions(10, 2)[0];
        let err = h.fetcher().fetch_partition(&h.store(), &part).unwrap_err();
        assert!(matches!(
            err,
            CoreError::PartLengthMismatch { index: 0, expected: 5, actual: 2 }
        ));
        assert_eq!(fs::read(h.store().part_path(0)).unwrap(), b"01");
    }

    #[test]
    fn ignored_range_is_rejected() {
        let h = Harness::new(MemoryOrigin::new(BODY).ignore_ranges());
        let part = plan_partitions(10, 2)[1];
        let err = h.fetcher().fetch_partition(&h.store(), &part).unwrap_err();
        assert!(matches!(err, CoreError::RangeNotHonored(200)));
        assert!(!h.store().part_path(1).exists());
    }

    #[test]
    fn error_status_is_server_error() {
        let h = Harness::new(MemoryOrigin::new(BODY).fail_range_starting_at(5, 503));
        let part = plan_partitions(10, 2)[1];
        let err = h.fetcher().fetch_partition(&h.store(), &part).unwrap_err();
        assert!(matches!(err, CoreError::ServerError(503)));
    }

    #[test]
    fn stopped_signal_prevents_request() {
        let h = Harness::new(MemoryOrigin::new(BODY));
        h.stop.fail();
        let part = plan_partitions(10, 2)[0];
        let err = h.fetcher().fetch_partition(&h.store(), &part).unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(h.origin.request_count(), 0);
    }

    #[test]
    fn single_stream_writes_whole_body() {
        let h = Harness::new(MemoryOrigin::new(BODY));
        let dest = h.dir.path().join("file.bin");
        fs::write(&dest, b"stale content that is longer").unwrap();

        let written = h.fetcher().fetch_single_stream(&dest, Some(10)).unwrap();
        assert_eq!(written, 10);
        assert_eq!(fs::read(&dest).unwrap(), BODY);
        assert_eq!(h.origin.ranges(), vec![None]);
    }

    #[test]
    fn single_stream_detects_short_body() {
        let h = Harness::new(MemoryOrigin::new(BODY).truncate_bodies_to(7));
        let dest = h.dir.path().join("file.bin");
        let err = h.fetcher().fetch_single_stream(&dest, Some(10)).unwrap_err();
        assert!(matches!(err, CoreError::IncompleteFile { expected: 10, actual: 7 }));
    }
}
