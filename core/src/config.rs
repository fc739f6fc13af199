use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use url::Url;

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest a single request or body read may block before it errors out.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Caller-facing knobs. Everything is optional; validation happens once in
/// [`DownloadConfig::from_options`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub output_filename: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub deadline: Option<Duration>,
    pub chunk_size: Option<usize>,
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    url: Url,
    output_filename: Option<String>,
    output_dir: PathBuf,
    workers: usize,
    proxy: Option<Url>,
    user_agent: String,
    connect_timeout: Duration,
    deadline: Option<Duration>,
    chunk_size: usize,
}

impl DownloadConfig {
    pub fn new(url: &str) -> CoreResult<Self> {
        Self::from_options(url, DownloadOptions::default())
    }

    pub fn from_options(url: &str, options: DownloadOptions) -> CoreResult<Self> {
        let url = parse_resource_url(url)?;

        let workers = match options.workers {
            Some(0) => {
                return Err(CoreError::InvalidConfig(
                    "worker count must be at least 1".to_string(),
                ))
            }
            Some(value) => value,
            None => default_workers(),
        };

        let output_filename = match options.output_filename {
            Some(name) => Some(validate_filename(name)?),
            None => None,
        };

        let proxy = match options.proxy.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(value) => Some(Url::parse(value).map_err(|err| {
                CoreError::InvalidConfig(format!("invalid proxy url {}: {}", value, err))
            })?),
        };

        let chunk_size = options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(CoreError::InvalidConfig(
                "chunk size must be at least 1 byte".to_string(),
            ));
        }

        Ok(Self {
            url,
            output_filename,
            output_dir: options.output_dir.unwrap_or_else(|| PathBuf::from(".")),
            workers,
            proxy,
            user_agent: options
                .user_agent
                .unwrap_or_else(|| format!("splitfetch/{}", env!("CARGO_PKG_VERSION"))),
            connect_timeout: options.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            deadline: options.deadline,
            chunk_size,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn output_filename(&self) -> Option<&str> {
        self.output_filename.as_deref()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Per-operation timeout for the HTTP client. Never unbounded, and never
    /// longer than the run deadline.
    pub fn read_timeout(&self) -> Duration {
        self.deadline
            .map_or(DEFAULT_READ_TIMEOUT, |deadline| deadline.min(DEFAULT_READ_TIMEOUT))
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

pub fn parse_resource_url(value: &str) -> CoreResult<Url> {
    let value = value.trim();
    let url = Url::parse(value).map_err(|err| CoreError::InvalidUrl(format!("{}: {}", value, err)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                value, other
            )))
        }
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(CoreError::InvalidUrl(format!("{}: missing host", value)));
    }
    Ok(url)
}

fn validate_filename(name: String) -> CoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(CoreError::InvalidConfig(format!(
            "invalid output filename {:?}",
            name
        )));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(CoreError::InvalidConfig(format!(
            "output filename {:?} must not contain a path separator",
            name
        )));
    }
    Ok(trimmed.to_string())
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_and_non_http_urls() {
        assert!(matches!(
            DownloadConfig::new("not a url"),
            Err(CoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            DownloadConfig::new("/file.zip"),
            Err(CoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            DownloadConfig::new("ftp://example.com/file.zip"),
            Err(CoreError::InvalidUrl(_))
        ));
    }

    #[test]
    fn applies_defaults() {
        let config = DownloadConfig::new("https://example.com/file.zip").unwrap();
        assert!(config.workers() >= 1);
        assert_eq!(config.output_dir(), Path::new("."));
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert!(config.user_agent().starts_with("splitfetch/"));
        assert!(config.proxy().is_none());
        assert!(config.output_filename().is_none());
    }

    #[test]
    fn read_timeout_is_always_bounded() {
        let open_ended = DownloadConfig::new("https://example.com/file.zip").unwrap();
        assert_eq!(open_ended.read_timeout(), DEFAULT_READ_TIMEOUT);

        let options = DownloadOptions {
            deadline: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let short = DownloadConfig::from_options("https://example.com/file.zip", options).unwrap();
        assert_eq!(short.read_timeout(), Duration::from_secs(5));

        let options = DownloadOptions {
            deadline: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let long = DownloadConfig::from_options("https://example.com/file.zip", options).unwrap();
        assert_eq!(long.read_timeout(), DEFAULT_READ_TIMEOUT);
    }

    #[test]
    fn rejects_zero_workers() {
        let options = DownloadOptions {
            workers: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            DownloadConfig::from_options("http://example.com/a", options),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_filename_with_separator() {
        let options = DownloadOptions {
            output_filename: Some("../escape.bin".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DownloadConfig::from_options("http://example.com/a", options),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_proxy_means_direct() {
        let options = DownloadOptions {
            proxy: Some("  ".to_string()),
            ..Default::default()
        };
        let config = DownloadConfig::from_options("http://example.com/a", options).unwrap();
        assert!(config.proxy().is_none());
    }

    #[test]
    fn rejects_malformed_proxy() {
        let options = DownloadOptions {
            proxy: Some("::nope".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DownloadConfig::from_options("http://example.com/a", options),
            Err(CoreError::InvalidConfig(_))
        ));
    }
}
