use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use data_model::{ClientId, SessionState};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{pipe::PipeError, sessions::RegistryError};

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayApiError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl RelayApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for RelayApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, Json(self)).into_response()
    }
}

impl From<serde_json::Error> for RelayApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_request(&e.to_string())
    }
}

impl From<RegistryError> for RelayApiError {
    fn from(e: RegistryError) -> Self {
        let status_code = match &e {
            // The session has ended whichever side noticed first.
            RegistryError::Pipe {
                source: PipeError::Closed | PipeError::ReaderGone,
                ..
            } => StatusCode::CONFLICT,
            RegistryError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::Configuration { .. } |
            RegistryError::Pipe { .. } |
            RegistryError::PartialDrain { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status_code, &e.to_string())
    }
}

/// Fields of an ingest body the relay reads. The rest of the body is opaque.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub client_id: ClientId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub client_id: ClientId,
    pub accepted_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub client_id: ClientId,
    #[serde(flatten)]
    pub state: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<SessionInfo>,
}
