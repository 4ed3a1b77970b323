//! HTTP transport backed by reqwest

use super::{RangeRequest, Segment, Transport};
use crate::error::DownloadError;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_RANGE, ETAG, IF_MATCH, RANGE};
use reqwest::{Client, Response, StatusCode};
use resumio_types::DownloadSettings;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Fetches ranges of a single URL
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    url: Url,
}

impl ReqwestTransport {
    /// Create a transport for `url` with a client configured from `settings`
    pub fn new(url: &str, settings: &DownloadSettings) -> Result<Self, DownloadError> {
        let url = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;

        let mut builder = Client::builder();
        if let Some(secs) = settings.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(user_agent) = &settings.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            url,
        })
    }

    /// Create a transport that reuses an existing client
    pub fn with_client(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: &RangeRequest) -> Result<Segment, DownloadError> {
        let range_header = request.range.to_header().ok_or_else(|| {
            DownloadError::InvalidRange(format!("empty range at byte {}", request.range.start))
        })?;

        debug!(
            "Requesting {} range: {} (if-match: {:?})",
            self.url, range_header, request.if_match
        );

        let mut builder = self.client.get(self.url.clone()).header(RANGE, range_header);
        if let Some(version) = &request.if_match {
            builder = builder.header(IF_MATCH, version.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let version = header_str(&response, ETAG).map(str::to_string);

        if status == StatusCode::PRECONDITION_FAILED {
            return Err(DownloadError::VersionMismatch {
                expected: request.if_match.clone().unwrap_or_default(),
                actual: version,
            });
        }

        if !status.is_success() {
            return Err(DownloadError::ServerError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        // A 200 to a narrowed range would replay the object from byte 0
        if status != StatusCode::PARTIAL_CONTENT && !request.range.is_whole_object() {
            return Err(DownloadError::ResumeNotSupported);
        }

        let total_size = if status == StatusCode::PARTIAL_CONTENT {
            let content_range = header_str(&response, CONTENT_RANGE);
            // Bytes from anywhere else would be spliced in at the cursor
            if let Some(start) = content_range.and_then(parse_content_range_start) {
                if start != request.range.start {
                    warn!(
                        "Requested {} from byte {} but the server answered from byte {}",
                        self.url, request.range.start, start
                    );
                    return Err(DownloadError::ResumeNotSupported);
                }
            }
            content_range.and_then(parse_content_range_total)
        } else {
            header_str(&response, CONTENT_LENGTH).and_then(|len| len.parse().ok())
        };

        debug!(
            "Response {} with version {:?}, total size {:?}",
            status, version, total_size
        );

        let body = response
            .bytes_stream()
            .map_err(|e| DownloadError::Interrupted(std::io::Error::other(e)))
            .boxed();

        Ok(Segment::new(version, body).with_total_size(total_size))
    }
}

fn header_str(response: &Response, name: HeaderName) -> Option<&str> {
    response.headers().get(name)?.to_str().ok()
}

/// Total object size from a `Content-Range` value like `bytes 0-99/12345`
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let total = value.trim().strip_prefix("bytes")?.rsplit('/').next()?;
    if total == "*" {
        return None;
    }
    total.trim().parse().ok()
}

/// First byte position from a `Content-Range` value like `bytes 300-999/1000`
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-99/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 300-999/1000"), Some(1000));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("bytes */1000"), Some(1000));
        assert_eq!(parse_content_range_total("items 0-1/2"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_parse_content_range_start() {
        assert_eq!(parse_content_range_start("bytes 300-999/1000"), Some(300));
        assert_eq!(parse_content_range_start("bytes 0-99/*"), Some(0));
        assert_eq!(parse_content_range_start("bytes */1000"), None);
        assert_eq!(parse_content_range_start("items 0-1/2"), None);
    }

    #[test]
    fn test_invalid_url() {
        let err = ReqwestTransport::new("not a url", &DownloadSettings::default()).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
    }
}
