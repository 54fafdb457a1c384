use std::sync::Arc;

use reqwest::{Client, Method};
use serde_json::{json, Value};
use thiserror::Error;

use crate::breaker::{BreakerConfig, BreakerObserver, CircuitBreaker, CircuitState};

pub const DEFAULT_FALLBACK_MESSAGE: &str = "Sorry, out of service right now";

/// Why a wrapped call did not produce a live response.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{method} {url} returned {status}")]
    Status {
        method: Method,
        url: String,
        status: u16,
    },
}

/// Response of a [`ServiceClient`] call.
///
/// A `Fallback` means the collaborator may or may not have processed the
/// request; the breaker was open, the call timed out, or it failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResponse {
    Live(Value),
    Fallback(Value),
}

impl ServiceResponse {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ServiceResponse::Fallback(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            ServiceResponse::Live(v) | ServiceResponse::Fallback(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ServiceResponse::Live(v) | ServiceResponse::Fallback(v) => v,
        }
    }
}

/// JSON client for one collaborator service, behind a [`CircuitBreaker`].
///
/// Transport errors, timeouts and non-2xx statuses all count as breaker
/// failures and yield the configured fallback.
#[derive(Clone)]
pub struct ServiceClient {
    base_url: Arc<str>,
    http: Client,
    breaker: CircuitBreaker,
    bearer_token: Option<Arc<str>>,
    fallback: Value,
}

impl ServiceClient {
    pub fn new(base_url: impl Into<String>, config: BreakerConfig) -> Self {
        let base_url: String = base_url.into();
        Self {
            breaker: CircuitBreaker::new(base_url.clone(), config),
            base_url: Arc::from(base_url.trim_end_matches('/')),
            http: Client::new(),
            bearer_token: None,
            fallback: json!({ "message": DEFAULT_FALLBACK_MESSAGE }),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(Arc::from(token.into()));
        self
    }

    /// Value returned whenever the live call is skipped or fails.
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BreakerObserver>) -> Self {
        self.breaker = self.breaker.with_observer(observer);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Call `resource` relative to the base URL.
    pub async fn call(&self, method: Method, resource: &str, body: Option<&Value>) -> ServiceResponse {
        let url = format!("{}/{}", self.base_url, resource.trim_start_matches('/'));
        self.breaker
            .fire_or_else(
                || self.send(method, url, body),
                |_| ServiceResponse::Fallback(self.fallback.clone()),
            )
            .await
    }

    pub async fn get(&self, resource: &str) -> ServiceResponse {
        self.call(Method::GET, resource, None).await
    }

    pub async fn post(&self, resource: &str, body: &Value) -> ServiceResponse {
        self.call(Method::POST, resource, Some(body)).await
    }

    pub async fn put(&self, resource: &str, body: &Value) -> ServiceResponse {
        self.call(Method::PUT, resource, Some(body)).await
    }

    pub async fn delete(&self, resource: &str) -> ServiceResponse {
        self.call(Method::DELETE, resource, None).await
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<&Value>,
    ) -> Result<ServiceResponse, CallError> {
        let mut request = self.http.request(method.clone(), &url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Status {
                method,
                url,
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            // Non-JSON bodies are passed through as text.
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(ServiceResponse::Live(value))
    }
}
