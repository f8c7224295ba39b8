//! Resilient request executor
//!
//! Every outbound call goes through [`RequestExecutor::execute`]:
//! - a correlation id echoed in `x-correlation-id` and `x-request-id`
//! - a bearer token, supplied or pulled from the session
//! - a hard timeout per attempt
//! - bounded retries with exponential backoff that defer to `Retry-After`

mod body;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

pub use body::ResponseBody;

use crate::config::{AccessConfig, ExecutorConfig};
use crate::failsafe::{RateLimiter, RetryPolicy, is_retryable_status, parse_retry_after};
use crate::{Error, Result};

/// Correlation header
pub const CORRELATION_HEADER: &str = "x-correlation-id";
/// Request id header, carries the same value
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Source of bearer tokens for outbound calls
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String>;
}

/// Per-call options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// Caller headers; these win over generated ones
    pub headers: HeaderMap,
    /// JSON body
    pub body: Option<Value>,
    /// Per-attempt timeout; executor default when unset
    pub timeout: Option<Duration>,
    /// Retry policy; executor default when unset
    pub retry: Option<RetryPolicy>,
    /// Token to send instead of asking the provider
    pub bearer_token: Option<String>,
    /// Correlation id; generated when unset
    pub correlation_id: Option<String>,
    /// A user-confirmed mutation, never retried
    pub confirmed_mutation: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    /// Options for a method with no body
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            retry: None,
            bearer_token: None,
            correlation_id: None,
            confirmed_mutation: false,
        }
    }

    /// GET
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// POST with a JSON body
    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).with_body(body)
    }

    /// Set the JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add or replace a header
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Override the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Send this token instead of asking the provider
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Use a fixed correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Mark as a confirmed mutation
    #[must_use]
    pub fn confirmed_mutation(mut self) -> Self {
        self.confirmed_mutation = true;
        self
    }
}

/// Successful response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Response status
    pub status: u16,
    /// Correlation id sent with every attempt
    pub correlation_id: String,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Classified body
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Body as JSON
    pub fn into_json(self) -> Value {
        self.body.into_json()
    }
}

/// One attempt's outcome, before classification
struct AttemptResponse {
    status: StatusCode,
    retry_after: Option<Duration>,
    text: String,
}

/// Resilient HTTP executor
pub struct RequestExecutor {
    client: Client,
    tokens: Option<Arc<dyn TokenProvider>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    config: ExecutorConfig,
}

impl RequestExecutor {
    /// Create an executor with its own HTTP client
    pub fn new(config: &AccessConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("construction-mcp/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.executor.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    /// Create an executor over an existing client
    pub fn with_client(client: Client, config: &AccessConfig) -> Self {
        Self {
            client,
            tokens: None,
            limiter: RateLimiter::new(&config.rate_limit),
            retry: RetryPolicy::new(&config.retry),
            config: config.executor.clone(),
        }
    }

    /// Pull bearer tokens from this provider when a call supplies none
    #[must_use]
    pub fn with_token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Default retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn policy_for(&self, options: &RequestOptions) -> RetryPolicy {
        let policy = options.retry.unwrap_or(self.retry);
        if options.confirmed_mutation {
            RetryPolicy {
                max_retries: 0,
                ..policy
            }
        } else {
            policy
        }
    }

    async fn bearer_for(&self, options: &RequestOptions) -> Result<Option<String>> {
        if let Some(token) = &options.bearer_token {
            return Ok(Some(token.clone()));
        }
        match &self.tokens {
            Some(provider) => provider.access_token().await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a request with timeouts and bounded retries
    ///
    /// # Errors
    ///
    /// `Transport` once timeouts or network failures exhaust the retry
    /// budget, `Http` for a non-2xx status that is not retryable or whose
    /// retries ran out. Token errors from the provider pass through.
    pub async fn execute(&self, url: &str, options: RequestOptions) -> Result<ApiResponse> {
        let target = Url::parse(url)
            .map_err(|e| Error::InvalidArgument(format!("Invalid URL '{url}': {e}")))?;
        let correlation_id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let policy = self.policy_for(&options);
        let timeout = options.timeout.unwrap_or_else(|| self.config.timeout());
        let bearer = self.bearer_for(&options).await?;
        let headers = build_headers(&correlation_id, bearer.as_deref(), &options.headers)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let retries_used = attempt - 1;
            let can_retry = retries_used < policy.max_retries;

            self.limiter.acquire().await;

            let mut request = self
                .client
                .request(options.method.clone(), target.clone())
                .headers(headers.clone());
            if let Some(body) = &options.body {
                request = request.json(body);
            }

            debug!(
                method = %options.method,
                url = %target,
                attempt,
                correlation_id = %correlation_id,
                "Sending request"
            );

            match send_once(request, timeout).await {
                Ok(response) if response.status.is_success() => {
                    return Ok(ApiResponse {
                        status: response.status.as_u16(),
                        correlation_id,
                        attempts: attempt,
                        body: ResponseBody::from_text(response.status, response.text),
                    });
                }
                Ok(response) => {
                    let status = response.status.as_u16();
                    if can_retry && is_retryable_status(status) {
                        let delay = policy.delay_for(retries_used, response.retry_after);
                        warn!(
                            status,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            retry_after = response.retry_after.is_some(),
                            correlation_id = %correlation_id,
                            "Retryable status, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(Error::Http {
                        status,
                        method: options.method.to_string(),
                        url: target.to_string(),
                        body: body::truncate_body(&response.text, self.config.max_error_body_chars),
                        attempts: attempt,
                        correlation_id,
                    });
                }
                Err(message) => {
                    if can_retry {
                        let delay = policy.delay_for(retries_used, None);
                        warn!(
                            error = %message,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            correlation_id = %correlation_id,
                            "Transport failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(Error::Transport {
                        message,
                        attempts: attempt,
                        correlation_id,
                    });
                }
            }
        }
    }

    /// GET a URL and return its body as JSON
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        self.execute(url, RequestOptions::get())
            .await
            .map(ApiResponse::into_json)
    }

    /// POST a GraphQL document and return its `data`
    ///
    /// A non-empty `errors` array fails the call even when `data` is present.
    pub async fn graphql(&self, url: &str, query: &str, variables: Value) -> Result<Value> {
        let response = self
            .execute(
                url,
                RequestOptions::post(json!({ "query": query, "variables": variables })),
            )
            .await?;
        let correlation_id = response.correlation_id.clone();
        let mut document = response.into_json();

        if let Some(errors) = document
            .get("errors")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty())
        {
            let messages = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| e.to_string(), str::to_string)
                })
                .collect();
            return Err(Error::GraphQl {
                messages,
                correlation_id,
            });
        }

        Ok(document
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

/// Send one attempt and read its body, all under `timeout`
async fn send_once(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> std::result::Result<AttemptResponse, String> {
    let attempt = async {
        let response = request.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let text = response.text().await?;
        Ok::<_, reqwest::Error>(AttemptResponse {
            status,
            retry_after,
            text,
        })
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("request timed out after {}ms", timeout.as_millis())),
    }
}

fn build_headers(
    correlation_id: &str,
    bearer: Option<&str>,
    overrides: &HeaderMap,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let id = HeaderValue::from_str(correlation_id)
        .map_err(|_| Error::InvalidArgument("Correlation id is not a valid header value".to_string()))?;
    headers.insert(HeaderName::from_static(CORRELATION_HEADER), id.clone());
    headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), id);

    if let Some(token) = bearer {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::InvalidArgument("Access token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    headers.extend(overrides.clone());
    Ok(headers)
}
