use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cancel::StopSignal;
use crate::config::DownloadConfig;
use crate::error::{CoreError, CoreResult};
use crate::fetch::{Fetcher, PartOutcome};
use crate::merge::merge_parts;
use crate::net::{ReqwestTransport, Transport};
use crate::partition::{plan_partitions, Partition};
use crate::probe::{probe, ResourceDescriptor};
use crate::progress::{NoProgress, ProgressSink, ProgressTracker};
use crate::store::PartStore;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Probed,
    SingleStream,
    Partitioned,
    Merging,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "init",
            RunState::Probed => "probed",
            RunState::SingleStream => "single_stream",
            RunState::Partitioned => "partitioned",
            RunState::Merging => "merging",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Init, Probed) => true,
            // Probed -> Done is the "destination already complete" shortcut.
            (Probed, SingleStream | Partitioned | Done) => true,
            (SingleStream, Done) => true,
            (Partitioned, Merging) => true,
            (Merging, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    Partitioned,
    SingleStream,
    /// The destination already had the probed size; nothing was transferred.
    AlreadyPresent,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub mode: FetchMode,
    pub partitions: usize,
    /// Bytes found in artifacts from an earlier run and not fetched again.
    pub resumed_bytes: u64,
}

#[derive(Debug)]
pub enum RunResult {
    Completed(RunReport),
    Failed {
        cause: CoreError,
        completed_partitions: Vec<usize>,
    },
}

impl RunResult {
    pub fn into_result(self) -> CoreResult<RunReport> {
        match self {
            RunResult::Completed(report) => Ok(report),
            RunResult::Failed { cause, .. } => Err(cause),
        }
    }
}

pub struct Downloader {
    config: DownloadConfig,
    transport: Arc<dyn Transport>,
    progress: Arc<dyn ProgressSink>,
    state: Mutex<RunState>,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> CoreResult<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self {
            config,
            transport: Arc::new(transport),
            progress: Arc::new(NoProgress),
            state: Mutex::new(RunState::Init),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(RunState::Failed)
    }

    /// Probes, fetches and assembles the resource. Each call is a fresh run
    /// that picks up any artifacts an earlier failed run left behind.
    pub fn run(&self) -> RunResult {
        if let Ok(mut state) = self.state.lock() {
            *state = RunState::Init;
        }
        let stop = Arc::new(StopSignal::new(self.config.deadline()));
        let tracker = Arc::new(ProgressTracker::new(Arc::clone(&self.progress)));
        let mut completed_partitions = Vec::new();

        let outcome = self.execute(&stop, &tracker, &mut completed_partitions);
        tracker.finish();

        completed_partitions.sort_unstable();
        match outcome {
            Ok(report) => {
                info!(
                    path = %report.path.display(),
                    bytes = report.bytes_written,
                    mode = ?report.mode,
                    "download complete"
                );
                RunResult::Completed(report)
            }
            Err(cause) => {
                let cause = match cause {
                    CoreError::Network(_) if stop.deadline_passed() => CoreError::DeadlineExceeded,
                    other => other,
                };
                if let Err(err) = self.advance(RunState::Failed) {
                    warn!(error = %err, "could not record failed run state");
                }
                error!(error = %cause, completed = completed_partitions.len(), "download failed");
                RunResult::Failed {
                    cause,
                    completed_partitions,
                }
            }
        }
    }

    fn advance(&self, next: RunState) -> CoreResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoreError::InvalidState("state lock poisoned".to_string()))?;
        let current = *state;
        if !current.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "cannot move from {} to {}",
                current, next
            )));
        }
        debug!(from = %current, to = %next, "run state");
        *state = next;
        Ok(())
    }

    fn execute(
        &self,
        stop: &Arc<StopSignal>,
        tracker: &Arc<ProgressTracker>,
        completed: &mut Vec<usize>,
    ) -> CoreResult<RunReport> {
        let descriptor = probe(self.transport.as_ref(), self.config.url())?;
        self.advance(RunState::Probed)?;

        let filename = self
            .config
            .output_filename()
            .unwrap_or(descriptor.suggested_filename.as_str())
            .to_string();
        let store = PartStore::new(self.config.output_dir(), filename);
        store.ensure_dir()?;

        if let (Some(total), Some(existing)) = (descriptor.total_size, store.dest_len()?) {
            if total == existing {
                info!(path = %store.dest_path().display(), bytes = total, "file already exists");
                self.advance(RunState::Done)?;
                return Ok(RunReport {
                    path: store.dest_path(),
                    bytes_written: 0,
                    mode: FetchMode::AlreadyPresent,
                    partitions: 0,
                    resumed_bytes: 0,
                });
            }
        }

        let fetcher = Fetcher {
            transport: Arc::clone(&self.transport),
            url: self.config.url().clone(),
            progress: Arc::clone(tracker),
            stop: Arc::clone(stop),
            chunk_size: self.config.chunk_size(),
        };

        match descriptor.total_size {
            Some(total) if descriptor.can_partition() => {
                self.advance(RunState::Partitioned)?;
                self.run_partitioned(&fetcher, &store, total, completed)
            }
            _ => {
                self.advance(RunState::SingleStream)?;
                self.run_single_stream(&fetcher, &store, &descriptor)
            }
        }
    }

    fn run_single_stream(
        &self,
        fetcher: &Fetcher,
        store: &PartStore,
        descriptor: &ResourceDescriptor,
    ) -> CoreResult<RunReport> {
        info!(url = %descriptor.url, "falling back to a single stream");
        fetcher.progress.start(descriptor.total_size, 0);
        let dest = store.dest_path();
        let written = fetcher.fetch_single_stream(&dest, descriptor.total_size)?;
        self.advance(RunState::Done)?;
        Ok(RunReport {
            path: dest,
            bytes_written: written,
            mode: FetchMode::SingleStream,
            partitions: 0,
            resumed_bytes: 0,
        })
    }

    fn run_partitioned(
        &self,
        fetcher: &Fetcher,
        store: &PartStore,
        total: u64,
        completed: &mut Vec<usize>,
    ) -> CoreResult<RunReport> {
        let plan = plan_partitions(total, self.config.workers());
        debug!(total, workers = self.config.workers(), partitions = plan.len(), "planned partitions");

        let resumed_bytes: u64 = store.scan(&plan)?.iter().sum();
        if resumed_bytes > 0 {
            info!(bytes = resumed_bytes, "resuming from existing partition artifacts");
        }
        fetcher.progress.start(Some(total), resumed_bytes);

        fetch_all(fetcher, store, &plan, completed)?;

        self.advance(RunState::Merging)?;
        let written = merge_parts(store, &plan, total)?;
        self.advance(RunState::Done)?;
        Ok(RunReport {
            path: store.dest_path(),
            bytes_written: written,
            mode: FetchMode::Partitioned,
            partitions: plan.len(),
            resumed_bytes,
        })
    }
}

/// Runs one worker thread per partition and collects their outcomes in
/// completion order. The first failure trips the shared stop signal and is
/// returned at once; workers still blocked in a read are left behind to
/// notice the signal on their own and nobody waits for their cancellation.
fn fetch_all(
    fetcher: &Fetcher,
    store: &PartStore,
    plan: &[Partition],
    completed: &mut Vec<usize>,
) -> CoreResult<()> {
    let (tx, rx) = mpsc::channel();
    for part in plan {
        let fetcher = fetcher.clone();
        let store = store.clone();
        let part = *part;
        let tx = tx.clone();
        thread::spawn(move || {
            let outcome = fetcher.fetch_partition(&store, &part);
            let _ = tx.send((part.index, outcome));
        });
    }
    drop(tx);

    let mut reported = 0;
    for (index, outcome) in rx {
        reported += 1;
        match outcome {
            Ok(outcome) => {
                if let PartOutcome::Fetched { resumed_from, bytes } = outcome {
                    debug!(partition = index, resumed_from, bytes, "partition fetched");
                }
                completed.push(index);
            }
            Err(err) if err.is_cancellation() => {
                debug!(partition = index, error = %err, "partition stopped");
                return Err(err);
            }
            Err(err) => {
                fetcher.stop.fail();
                warn!(
                    partition = index,
                    error = %err,
                    "partition failed, canceling remaining partitions"
                );
                return Err(err);
            }
        }
    }

    if reported != plan.len() {
        return Err(CoreError::InvalidState(format!(
            "{} of {} partition workers exited without reporting",
            plan.len() - reported,
            plan.len()
        )));
    }
    Ok(())
}
