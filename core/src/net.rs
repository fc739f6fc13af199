use std::fmt;
use std::io::Read;

use reqwest::blocking::Client;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, RANGE,
};
use tracing::warn;
use url::Url;

use crate::config::DownloadConfig;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: Url,
    /// Inclusive byte range sent as `Range: bytes=<from>-<to>`.
    pub range: Option<(u64, u64)>,
}

impl DownloadRequest {
    pub fn new(url: Url) -> Self {
        Self { url, range: None }
    }

    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn range_header(&self) -> Option<String> {
        self.range
            .map(|(start, end)| format!("bytes={}-{}", start, end))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadResponse {
    pub status_code: u16,
    pub content_length: Option<u64>,
    pub accept_ranges: Option<String>,
    pub content_disposition: Option<String>,
}

pub struct BodyResponse {
    pub status_code: u16,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for BodyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyResponse")
            .field("status_code", &self.status_code)
            .finish_non_exhaustive()
    }
}

/// Every request the engine makes goes through one of these.
pub trait Transport: Send + Sync {
    fn head(&self, req: &DownloadRequest) -> CoreResult<HeadResponse>;
    fn get(&self, req: &DownloadRequest) -> CoreResult<BodyResponse>;
}

pub fn is_success(status_code: u16) -> bool {
    (200..=299).contains(&status_code)
}

pub fn check_status(status_code: u16) -> CoreResult<()> {
    if is_success(status_code) {
        Ok(())
    } else {
        Err(CoreError::ServerError(status_code))
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &DownloadConfig) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent())
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout());
        if let Some(proxy_url) = config.proxy() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|err| CoreError::InvalidConfig(err.to_string()))?;
            // Intercepting proxies usually re-sign TLS with their own CA.
            warn!(
                proxy = %proxy_url,
                "routing through proxy with TLS certificate verification disabled"
            );
            builder = builder.proxy(proxy).danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|err| CoreError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    fn request_headers(&self, req: &DownloadRequest) -> CoreResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(value) = req.range_header() {
            headers.insert(
                RANGE,
                HeaderValue::from_str(&value).map_err(|err| CoreError::Network(err.to_string()))?,
            );
        }
        Ok(headers)
    }
}

impl Transport for ReqwestTransport {
    fn head(&self, req: &DownloadRequest) -> CoreResult<HeadResponse> {
        let resp = self
            .client
            .head(req.url.clone())
            .headers(self.request_headers(req)?)
            .send()
            .map_err(|err| CoreError::Network(err.to_string()))?;
        let headers = resp.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let accept_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let content_disposition = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        Ok(HeadResponse {
            status_code: resp.status().as_u16(),
            content_length,
            accept_ranges,
            content_disposition,
        })
    }

    fn get(&self, req: &DownloadRequest) -> CoreResult<BodyResponse> {
        let resp = self
            .client
            .get(req.url.clone())
            .headers(self.request_headers(req)?)
            .send()
            .map_err(|err| CoreError::Network(err.to_string()))?;
        Ok(BodyResponse {
            status_code: resp.status().as_u16(),
            body: Box::new(resp),
        })
    }
}
