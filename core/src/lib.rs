pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod net;
pub mod partition;
pub mod probe;
pub mod progress;
pub mod store;


pub use crate::config::{DownloadConfig, DownloadOptions};
pub use crate::engine::{Downloader, FetchMode, RunReport, RunResult, RunState};
pub use crate::error::{CoreError, CoreResult};
pub use crate::probe::ResourceDescriptor;
pub use crate::progress::ProgressSink;
