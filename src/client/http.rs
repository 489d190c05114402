//! reqwest-backed queue server client

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ClientError, classify};
use super::models::{DocumentReport, Task};
use super::retry::{CircuitBreaker, RetryPolicy, TransientFailure, is_transient_status};
use super::stream::FileStream;
use super::QueueClient;
use crate::config::{ClientConfig, RetryConfig, WorkerIdentity};

const GET_TASK_PATH: &str = "/gettask.ashx";
const GET_DATA_PATH: &str = "/getdata.ashx";
const DONE_TASK_PATH: &str = "/donetask.ashx";
const CANCEL_TASK_PATH: &str = "/canceltask.ashx";

const MIN_PRIORITY: &str = "0";
const MAX_PRIORITY: &str = "99";
const TASK_TYPE: &str = "image";

/// Queue server client over HTTP
pub struct HttpQueueClient {
    http: Client,
    base: Url,
    identity: WorkerIdentity,
    demo: bool,
    delay_fallback: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl HttpQueueClient {
    /// Create a new client
    pub fn new(
        config: &ClientConfig,
        retry: &RetryConfig,
        identity: WorkerIdentity,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_address)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", config.base_address, e)))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));

        let http = Client::builder()
            .connect_timeout(config.connect_timeout.as_duration())
            .timeout(config.request_timeout.as_duration())
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base,
            identity,
            demo: config.demo,
            delay_fallback: config.delay_fallback.as_duration(),
            retry: RetryPolicy::from_config(retry),
            breaker: CircuitBreaker::from_config(retry),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ClientError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", path, e)))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    pub fn acquire_url(&self) -> Result<Url, ClientError> {
        let mut params = vec![
            ("apikey", self.identity.api_key.as_str()),
            ("server", self.identity.server.as_str()),
            ("minPriority", MIN_PRIORITY),
            ("maxPriority", MAX_PRIORITY),
            ("type", TASK_TYPE),
        ];
        if self.demo {
            params.push(("demo", "1"));
        }
        self.endpoint(GET_TASK_PATH, &params)
    }

    pub fn fetch_url(&self, task_id: &str) -> Result<Url, ClientError> {
        self.endpoint(
            GET_DATA_PATH,
            &[
                ("apikey", self.identity.api_key.as_str()),
                ("server", self.identity.server.as_str()),
                ("taskId", task_id),
            ],
        )
    }

    pub fn report_url(&self, task_id: &str) -> Result<Url, ClientError> {
        self.endpoint(
            DONE_TASK_PATH,
            &[
                ("apikey", self.identity.api_key.as_str()),
                ("server", self.identity.server.as_str()),
                ("taskId", task_id),
                ("method", "done"),
            ],
        )
    }

    pub fn cancel_url(&self, task_id: &str) -> Result<Url, ClientError> {
        self.endpoint(
            CANCEL_TASK_PATH,
            &[
                ("apikey", self.identity.api_key.as_str()),
                ("taskid", task_id),
            ],
        )
    }

    /// Send a request, retrying transient failures
    ///
    /// Returns the first non-transient response, whatever its status.
    async fn send<F>(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        gate: Gate,
        build: F,
    ) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let target = redact(url);
        let mut retries = 0;

        loop {
            if gate == Gate::Breaker {
                if let Err(retry_in) = self.breaker.check() {
                    warn!(url = %target, retry_in_secs = retry_in.as_secs(), "Circuit breaker open, request refused");
                    return Err(ClientError::CircuitOpen { retry_in });
                }
            }

            debug!(url = %target, attempt = retries + 1, "Sending request");

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                result = build().send() => result,
            };

            let failure = match attempt {
                Ok(response) if is_transient_status(response.status()) => {
                    let status = response.status().as_u16();
                    let body = match read_body(cancel, response).await {
                        Err(ClientError::Cancelled) => return Err(self.cancelled()),
                        body => body.unwrap_or_default(),
                    };
                    TransientFailure::ServerError { status, body }
                }
                Ok(response) => {
                    self.breaker.record_success();
                    debug!(url = %target, status = response.status().as_u16(), "Response received");
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => TransientFailure::Timeout,
                Err(e) => TransientFailure::Network(e.to_string()),
            };

            self.breaker.record_failure();

            if !self.retry.should_retry(retries) {
                warn!(url = %target, attempts = retries + 1, error = %failure, "Request failed after retries");
                return Err(ClientError::RetriesExhausted {
                    attempts: retries + 1,
                    last_error: failure.to_string(),
                });
            }

            retries += 1;
            let delay = self.retry.delay_for(&failure);
            warn!(
                url = %target,
                attempt = retries,
                delay_secs = delay.as_secs(),
                error = %failure,
                "Request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// An attempt was dropped mid-flight; a half-open trial it held is void
    fn cancelled(&self) -> ClientError {
        self.breaker.release_trial();
        ClientError::Cancelled
    }

    /// Turn a non-success response into a classified error
    async fn reject(&self, cancel: &CancellationToken, response: Response) -> ClientError {
        let status = response.status();
        let body = match read_body(cancel, response).await {
            Ok(body) => body,
            Err(ClientError::Cancelled) => return ClientError::Cancelled,
            Err(_) => String::new(),
        };
        debug!(status = status.as_u16(), body = %body, "Request rejected");
        classify(status, &body, self.delay_fallback)
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn acquire_task(&self, cancel: &CancellationToken) -> Result<Task, ClientError> {
        let url = self.acquire_url()?;
        let response = self
            .send(cancel, &url, Gate::Breaker, || self.http.get(url.clone()))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(self.reject(cancel, response).await);
        }

        let body = read_body(cancel, response).await?;
        debug!(body = %body, "Task response");

        Task::from_body(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn fetch_file(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
    ) -> Result<FileStream, ClientError> {
        let url = self.fetch_url(task_id)?;
        let response = self
            .send(cancel, &url, Gate::Breaker, || self.http.get(url.clone()))
            .await?;

        if response.status() != StatusCode::OK {
            return Err(self.reject(cancel, response).await);
        }

        Ok(FileStream::from_response(response))
    }

    async fn report_result(
        &self,
        cancel: &CancellationToken,
        task_id: &str,
        mut report: DocumentReport,
    ) -> Result<(), ClientError> {
        if !report.stamp_server(&self.identity.server) {
            tracing::error!(task_id, "Report has no page result");
            return Err(ClientError::Contract(
                "document report must contain at least one page result".to_string(),
            ));
        }

        let body = serde_json::to_vec(&report).map_err(|e| ClientError::Encode(e.to_string()))?;
        let body = Bytes::from(body);
        let url = self.report_url(task_id)?;

        let response = self
            .send(cancel, &url, Gate::Breaker, || {
                self.http
                    .post(url.clone())
                    .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                    .body(body.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(self.reject(cancel, response).await);
        }

        // Accepted once the status is in; the reply text is informational
        let reply = read_body(cancel, response).await.unwrap_or_default();
        debug!(task_id, reply = %reply, "Report accepted");
        Ok(())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), ClientError> {
        // Must run to completion even during shutdown or with the breaker open
        let never = CancellationToken::new();
        let url = self.cancel_url(task_id)?;
        let response = self
            .send(&never, &url, Gate::Bypass, || self.http.get(url.clone()))
            .await?;

        if !response.status().is_success() {
            return Err(self.reject(&never, response).await);
        }

        debug!(task_id, "Cancel notice accepted");
        Ok(())
    }
}

/// Whether an open circuit breaker may refuse a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Breaker,
    Bypass,
}

/// Response body as text, abandoned as soon as `cancel` fires
async fn read_body(cancel: &CancellationToken, response: Response) -> Result<String, ClientError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        text = response.text() => text.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Network(format!("failed to read body: {}", e))
            }
        }),
    }
}

/// URL for logs with the API key masked
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "apikey" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
