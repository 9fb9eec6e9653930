//! Blocking HTTP plumbing shared by the web-facing collaborators.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;

use kitchenline_pipeline::ServiceError;
use kitchenline_pipeline::menu_import::{FetchedBinary, PageFetcher};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const USER_AGENT: &str = "kitchenline-importer/0.1 (+menu import)";

/// Bodies larger than this are refused.
pub const MAX_BODY_BYTES: u64 = 25 * 1024 * 1024;

/// A blocking client built on first use.
///
/// The blocking client owns a small runtime of its own, so it is created on
/// the worker thread that first needs it rather than wherever the
/// collaborator was constructed.
#[derive(Debug)]
pub struct LazyClient {
    timeout: Duration,
    cell: OnceLock<Client>,
}

impl LazyClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<&Client, ServiceError> {
        if let Some(client) = self.cell.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::unavailable(format!("cannot build HTTP client: {e}")))?;
        // A racing thread may have won; either client is fine.
        let _ = self.cell.set(client);
        self.cell
            .get()
            .ok_or_else(|| ServiceError::unavailable("HTTP client not initialized"))
    }
}

impl Default for LazyClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Classify a non-success HTTP status.
pub fn status_error(status: StatusCode, url: &str) -> ServiceError {
    let message = format!("HTTP {} from {url}", status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ServiceError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceError::timeout(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => ServiceError::not_found(message),
        s if s.is_server_error() => ServiceError::unavailable(message),
        _ => ServiceError::rejected(message),
    }
}

/// Classify a transport-level failure.
pub fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ServiceError::unavailable(err.to_string())
    } else if err.is_decode() || err.is_body() {
        ServiceError::invalid_response(err.to_string())
    } else {
        ServiceError::unavailable(err.to_string())
    }
}

/// Turn a response into an error unless it is 2xx and not oversized.
pub fn check_response(response: Response, url: &str) -> Result<Response, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, url));
    }
    if response.content_length().is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(ServiceError::rejected(format!(
            "{url} is larger than {MAX_BODY_BYTES} bytes"
        )));
    }
    Ok(response)
}

/// Web page and image fetcher.
#[derive(Debug, Default)]
pub struct HttpPageFetcher {
    client: LazyClient,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: LazyClient::new(timeout),
        }
    }

    fn get(&self, url: &str) -> Result<Response, ServiceError> {
        let response = self
            .client
            .get()?
            .get(url)
            .send()
            .map_err(transport_error)?;
        check_response(response, url)
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, ServiceError> {
        self.get(url)?.text().map_err(transport_error)
    }

    fn fetch_bytes(&self, url: &str) -> Result<FetchedBinary, ServiceError> {
        let response = self.get(url)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response.bytes().map_err(transport_error)?;
        Ok(FetchedBinary {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitchenline_pipeline::ServiceErrorKind;

    #[test]
    fn statuses_map_to_service_error_kinds() {
        let kind = |s: StatusCode| status_error(s, "https://gf.example").kind;
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), ServiceErrorKind::RateLimited);
        assert_eq!(kind(StatusCode::SERVICE_UNAVAILABLE), ServiceErrorKind::Unavailable);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), ServiceErrorKind::Unavailable);
        assert_eq!(kind(StatusCode::GATEWAY_TIMEOUT), ServiceErrorKind::Timeout);
        assert_eq!(kind(StatusCode::NOT_FOUND), ServiceErrorKind::NotFound);
        assert_eq!(kind(StatusCode::GONE), ServiceErrorKind::NotFound);
        assert_eq!(kind(StatusCode::FORBIDDEN), ServiceErrorKind::Rejected);
    }

    #[test]
    fn status_message_names_the_url() {
        let err = status_error(StatusCode::NOT_FOUND, "https://gf.example/menu");
        assert_eq!(err.message, "HTTP 404 from https://gf.example/menu");
    }
}
