//! Remote diagnosis submission
//!
//! The diagnosis service scores a finished take. `HttpDiagnosisClient` posts
//! the encoded recording as JSON and reads back the score summary.

use crate::error::SessionError;
use crate::models::{DiagnosisResult, EncodedPayload, SessionIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;

const USER_AGENT: &str = concat!("vocascan/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Scores a recorded session
#[async_trait]
pub trait DiagnosisService: Send + Sync {
    /// Submit the payload; it is consumed by this call
    async fn submit(&self, payload: EncodedPayload) -> Result<DiagnosisResult, SessionError>;
}

/// Request body sent to the diagnosis endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosisRequest<'a> {
    audio: &'a str,
    mime_type: &'a str,
    sample_rate: u32,
    duration_seconds: f64,
    captured_at: DateTime<Utc>,
    user_id: &'a str,
    session_id: &'a str,
}

/// Diagnosis service reached over HTTP
pub struct HttpDiagnosisClient {
    http_client: reqwest::Client,
    endpoint: String,
    identity: SessionIdentity,
}

impl HttpDiagnosisClient {
    pub fn new(endpoint: impl Into<String>, identity: SessionIdentity) -> Result<Self, SessionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            identity,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DiagnosisService for HttpDiagnosisClient {
    async fn submit(&self, payload: EncodedPayload) -> Result<DiagnosisResult, SessionError> {
        let body = build_request(&payload, &self.identity);
        debug!(
            "Submitting {:.1}s take to {} for user {}",
            payload.duration_seconds, self.endpoint, self.identity.user_id
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::SubmissionFailure(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!("Diagnosis service returned {}: {}", status, detail);
            return Err(SessionError::SubmissionFailure(format!(
                "Service responded with {}",
                status
            )));
        }

        let result: DiagnosisResult = response
            .json()
            .await
            .map_err(|e| SessionError::SubmissionFailure(format!("Malformed response: {}", e)))?;

        info!(
            "Diagnosis received: score {}, pitch {:.1}Hz, stability {:.0}%",
            result.score,
            result.pitch,
            result.stability * 100.0
        );
        Ok(result)
    }
}

fn build_request<'a>(payload: &'a EncodedPayload, identity: &'a SessionIdentity) -> DiagnosisRequest<'a> {
    DiagnosisRequest {
        audio: &payload.data,
        mime_type: &payload.mime_type,
        sample_rate: payload.sample_rate,
        duration_seconds: payload.duration_seconds,
        captured_at: payload.captured_at,
        user_id: &identity.user_id,
        session_id: &identity.session_id,
    }
}
