use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::net::{is_success, DownloadRequest, HeadResponse, Transport};

pub const RANGE_UNIT: &str = "bytes";
pub const FALLBACK_FILENAME: &str = "download.bin";

/// What the metadata request told us about the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub url: Url,
    /// `None` when the origin sent no usable `Content-Length`.
    pub total_size: Option<u64>,
    pub supports_ranges: bool,
    pub suggested_filename: String,
}

impl ResourceDescriptor {
    /// Partitioned fetching needs both byte ranges and a known length.
    pub fn can_partition(&self) -> bool {
        self.supports_ranges && self.total_size.is_some()
    }
}

pub fn probe(transport: &dyn Transport, url: &Url) -> CoreResult<ResourceDescriptor> {
    let req = DownloadRequest::new(url.clone());
    let resp = transport
        .head(&req)
        .map_err(|err| CoreError::ProbeFailure(err.to_string()))?;
    if !is_success(resp.status_code) {
        return Err(CoreError::ProbeFailure(format!(
            "{} responded with status {}",
            url, resp.status_code
        )));
    }
    let descriptor = describe(url, &resp);
    info!(
        url = %descriptor.url,
        total_size = ?descriptor.total_size,
        supports_ranges = descriptor.supports_ranges,
        filename = %descriptor.suggested_filename,
        "probed resource"
    );
    Ok(descriptor)
}

fn describe(url: &Url, resp: &HeadResponse) -> ResourceDescriptor {
    let supports_ranges = resp.accept_ranges.as_deref() == Some(RANGE_UNIT);
    if !supports_ranges {
        debug!(accept_ranges = ?resp.accept_ranges, "origin does not advertise byte ranges");
    }
    let suggested_filename = filename_from_content_disposition(resp.content_disposition.as_deref())
        .or_else(|| filename_from_url(url))
        .map(|name| sanitize_filename(&name))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
    ResourceDescriptor {
        url: url.clone(),
        total_size: resp.content_length,
        supports_ranges,
        suggested_filename,
    }
}

/// Prefers the RFC 5987 `filename*` parameter over plain `filename`.
pub fn filename_from_content_disposition(value: Option<&str>) -> Option<String> {
    let value = value?;
    let mut extended = None;
    let mut plain = None;

    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.split_once("''").map(|(_, rest)| rest).unwrap_or(raw);
                let decoded = percent_decode(encoded);
                if !decoded.is_empty() {
                    extended = Some(decoded);
                }
            }
            "filename" if !raw.is_empty() => plain = Some(raw.to_string()),
            _ => {}
        }
    }

    extended.or(plain)
}

pub fn filename_from_url(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    if name.is_empty() {
        None
    } else {
        Some(percent_decode(name))
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[index + 1]), hex_value(bytes[index + 2])) {
                out.push((hi << 4) | lo);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Strips anything that could escape the output directory or upset a shell.
pub fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let trimmed = mapped.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}
