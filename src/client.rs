use std::io::Read;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::error::QlError;

/// Which remote service a request is addressed to; selects the error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Metadata,
    Image,
}

impl Resource {
    fn transport_error(self, message: String) -> QlError {
        match self {
            Resource::Metadata => QlError::MetadataFetchFailed(message),
            Resource::Image => QlError::ImageFetchFailed(message),
        }
    }

    fn status_error(self, status: u16, message: String) -> QlError {
        match self {
            Resource::Metadata => QlError::MetadataStatus { status, message },
            Resource::Image => QlError::ImageStatus { status, message },
        }
    }
}

/// A successful response whose body has not been read yet.
pub struct RemoteResponse {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl RemoteResponse {
    pub fn from_reader<R: Read + Send + 'static>(body: R) -> Self {
        Self {
            content_type: None,
            content_encoding: None,
            content_length: None,
            body: Box::new(body),
        }
    }

    pub fn is_gzip_flagged(&self) -> bool {
        let encoding = self
            .content_encoding
            .as_deref()
            .map(|value| value.to_ascii_lowercase().contains("gzip"))
            .unwrap_or(false);
        let content_type = self
            .content_type
            .as_deref()
            .map(|value| value.to_ascii_lowercase().contains("gzip"))
            .unwrap_or(false);
        encoding || content_type
    }
}

/// Streaming GET against the metadata service or the file server.
pub trait ArchiveClient: Send + Sync {
    fn get(&self, url: &str, resource: Resource) -> Result<RemoteResponse, QlError>;
}

#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
    max_retries: usize,
}

impl ArchiveHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, QlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("subaru-ql/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| QlError::MetadataFetchFailed(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|err| QlError::MetadataFetchFailed(err.to_string()))?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    fn send_with_retries(
        &self,
        url: &str,
        resource: Resource,
    ) -> Result<reqwest::blocking::Response, QlError> {
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        debug!(url, status, attempt, "retrying request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        debug!(url, attempt, error = %err, "retrying request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(resource.transport_error(err.to_string()));
                }
            }
        }
    }
}

impl ArchiveClient for ArchiveHttpClient {
    fn get(&self, url: &str, resource: Resource) -> Result<RemoteResponse, QlError> {
        let response = self.send_with_retries(url, resource)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(resource.status_error(status, message));
        }
        let headers = response.headers();
        let content_type = header_string(headers, CONTENT_TYPE.as_str());
        let content_encoding = header_string(headers, CONTENT_ENCODING.as_str());
        let content_length =
            header_string(headers, CONTENT_LENGTH.as_str()).and_then(|value| value.parse().ok());
        Ok(RemoteResponse {
            content_type,
            content_encoding,
            content_length,
            body: Box::new(response),
        })
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
