//! Model inference over HTTP
//!
//! Posts the feature vector as JSON and expects `{"is_anomaly": bool, "score": f64}`.

use super::ports::ModelInferenceClient;
use astra_common::{Features, InferenceError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    features: &'a Features,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    is_anomaly: bool,
    score: f64,
}

/// HTTP client for a remote anomaly model
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Map a transport error onto the retry taxonomy
fn classify_error(err: &reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Transient(format!("request timed out: {}", err))
    } else if err.is_connect() {
        InferenceError::Transient(format!("connection failed: {}", err))
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else if err.is_decode() {
        InferenceError::Validation(format!("undecodable response: {}", err))
    } else {
        InferenceError::Transient(format!("request failed: {}", err))
    }
}

/// 5xx, 408 and 429 may succeed on retry; other 4xx will not
fn classify_status(status: StatusCode) -> InferenceError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        InferenceError::Transient(format!("model returned {}", status))
    } else {
        InferenceError::Permanent(format!("model returned {}", status))
    }
}

#[async_trait]
impl ModelInferenceClient for HttpInferenceClient {
    async fn infer(&self, features: &Features) -> Result<(bool, f64), InferenceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&InferenceRequest { features })
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(endpoint = %self.endpoint, status = %status, "model request rejected");
            return Err(classify_status(status));
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Validation(format!("invalid model response: {}", e)))?;

        if !body.score.is_finite() {
            return Err(InferenceError::Validation(format!(
                "model score is not finite: {}",
                body.score
            )));
        }

        Ok((body.is_anomaly, body.score))
    }
}

/// Stand-in when no model endpoint is configured; detection runs on the heuristic
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledInferenceClient;

#[async_trait]
impl ModelInferenceClient for DisabledInferenceClient {
    async fn infer(&self, _features: &Features) -> Result<(bool, f64), InferenceError> {
        Err(InferenceError::Permanent(
            "no model endpoint configured".to_string(),
        ))
    }
}
