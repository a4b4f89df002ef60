use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::CarbotaxError;
use crate::rate_limit::Throttle;
use crate::retry::RetryPolicy;
use crate::tracker::ServerErrorTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get(String),
    PostForm {
        url: String,
        fields: Vec<(String, String)>,
    },
}

impl Request {
    pub fn url(&self) -> &str {
        match self {
            Request::Get(url) => url,
            Request::PostForm { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

pub trait Transport: Send + Sync {
    /// Sends one request. Transport failures map to `Timeout` or `Http`;
    /// any received response, whatever its status, is `Ok`.
    fn send(&self, request: &Request) -> Result<HttpResponse, CarbotaxError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, CarbotaxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("carbotax/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CarbotaxError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, */*"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| CarbotaxError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> Result<HttpResponse, CarbotaxError> {
        let builder = match request {
            Request::Get(url) => self.client.get(url),
            Request::PostForm { url, fields } => self.client.post(url).form(fields),
        };
        let response = builder.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(map_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> CarbotaxError {
    if err.is_timeout() {
        CarbotaxError::Timeout(err.to_string())
    } else {
        CarbotaxError::Http(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    RateLimited,
    ServerError,
    NotFound,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        429 => StatusClass::RateLimited,
        500..=599 => StatusClass::ServerError,
        _ => StatusClass::NotFound,
    }
}

/// `fetch_json` is `Ok(None)` for answers without data (not found, rate
/// limited, unparseable body).
pub struct Gateway<T: Transport> {
    transport: T,
    throttle: Box<dyn Throttle>,
    retry: RetryPolicy,
    tracker: ServerErrorTracker,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> Gateway<T> {
    pub fn new(
        transport: T,
        throttle: Box<dyn Throttle>,
        retry: RetryPolicy,
        tracker: ServerErrorTracker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            throttle,
            retry,
            tracker,
            clock,
        }
    }

    pub fn throttle(&self) -> &dyn Throttle {
        self.throttle.as_ref()
    }

    pub fn tracker(&self) -> &ServerErrorTracker {
        &self.tracker
    }

    pub fn fetch_json(&mut self, request: &Request) -> Result<Option<Value>, CarbotaxError> {
        let Self {
            transport,
            throttle,
            retry,
            tracker,
            clock,
        } = self;
        let clock: &dyn Clock = &**clock;
        let url = request.url();

        // `Interrupted` is not transient, so it also ends the retry loop.
        let outcome = retry.execute_with(
            clock,
            || {
                clock.check_interrupt()?;
                throttle.wait();
                clock.check_interrupt()?;
                let response = transport.send(request).inspect_err(|_| throttle.on_error())?;
                match classify_status(response.status) {
                    StatusClass::Success => Ok(Some(response.body)),
                    StatusClass::RateLimited => {
                        warn!(url, "rate limited by remote service");
                        throttle.on_error();
                        Ok(None)
                    }
                    StatusClass::ServerError => {
                        tracker.record_error();
                        throttle.on_error();
                        clock.check_interrupt()?;
                        Err(CarbotaxError::Status {
                            status: response.status,
                            message: truncate(&response.body, 200),
                        })
                    }
                    StatusClass::NotFound => {
                        debug!(url, status = response.status, "no data returned");
                        Ok(None)
                    }
                }
            },
            CarbotaxError::is_transient,
            |err: &CarbotaxError, attempt, delay| {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "retrying request"
                );
            },
        )?;

        let Some(body) = outcome else {
            return Ok(None);
        };
        throttle.on_success();
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(url, %err, "response body is not valid JSON");
                Ok(None)
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(429), StatusClass::RateLimited);
        assert_eq!(classify_status(500), StatusClass::ServerError);
        assert_eq!(classify_status(503), StatusClass::ServerError);
        assert_eq!(classify_status(404), StatusClass::NotFound);
        assert_eq!(classify_status(400), StatusClass::NotFound);
    }
}
