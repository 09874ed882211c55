//! Session creation and deletion against the interview service.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Candidate portfolio submitted with a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Portfolio {
    None,
    Text(String),
    Pdf { file_name: String, bytes: Vec<u8> },
}

impl Portfolio {
    /// Read a PDF portfolio from disk.
    pub fn from_pdf(path: &Path) -> SessionResult<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "portfolio.pdf".to_string());
        Ok(Portfolio::Pdf { file_name, bytes })
    }
}

#[derive(Debug, Clone)]
pub struct InterviewRequest {
    pub role: String,
    pub role_description: String,
    pub portfolio: Portfolio,
}

/// A session the service has accepted.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    /// Interviewer greeting audio, already decoded.
    pub greeting: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StartInterviewResponse {
    session_id: String,
    audio_base64: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Session lifecycle endpoints.
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
    async fn create(&self, request: &InterviewRequest) -> SessionResult<CreatedSession>;

    /// Reclaim a session that will not be used. Deleting an unknown session is not an error.
    async fn delete(&self, session_id: &str) -> SessionResult<()>;
}

pub fn decode_greeting(audio_base64: &str) -> SessionResult<Vec<u8>> {
    STANDARD
        .decode(audio_base64.trim())
        .map_err(|e| SessionError::Protocol(format!("greeting audio is not valid base64: {}", e)))
}

/// HTTP client for `POST /start-interview` and `DELETE /delete_session/{id}`.
#[derive(Debug, Clone)]
pub struct SessionLifecycleClient {
    base_url: String,
    client: reqwest::Client,
}

impl SessionLifecycleClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SessionResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn start_url(&self) -> String {
        format!("{}/start-interview", self.base_url)
    }

    pub fn delete_url(&self, session_id: &str) -> String {
        format!("{}/delete_session/{}", self.base_url, session_id)
    }

    async fn service_error(res: reqwest::Response) -> SessionError {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.detail)
            .unwrap_or(body);
        SessionError::Service { status, detail }
    }
}

#[async_trait]
impl SessionLifecycle for SessionLifecycleClient {
    async fn create(&self, request: &InterviewRequest) -> SessionResult<CreatedSession> {
        let mut form = Form::new()
            .text("role", request.role.clone())
            .text("role_description", request.role_description.clone());
        form = match &request.portfolio {
            Portfolio::None => form,
            Portfolio::Text(text) => form.text("portfolio_text", text.clone()),
            Portfolio::Pdf { file_name, bytes } => form.part(
                "portfolio_file",
                Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str("application/pdf")?,
            ),
        };

        info!("📨 Creating interview session for role '{}'", request.role);
        let res = self.client.post(self.start_url()).multipart(form).send().await?;
        if !res.status().is_success() {
            return Err(Self::service_error(res).await);
        }
        let body: StartInterviewResponse = res.json().await?;
        let greeting = decode_greeting(&body.audio_base64)?;
        info!(
            "✅ Session {} created ({} bytes of greeting audio)",
            body.session_id,
            greeting.len()
        );
        Ok(CreatedSession {
            session_id: body.session_id,
            greeting,
            created_at: Utc::now(),
        })
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let res = self.client.delete(self.delete_url(session_id)).send().await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("session {} already gone", session_id);
            return Ok(());
        }
        if !res.status().is_success() {
            let err = Self::service_error(res).await;
            warn!("delete of session {} failed: {}", session_id, err);
            return Err(err);
        }
        info!("🗑️ Session {} deleted", session_id);
        Ok(())
    }
}
