use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

/// Identifier grouping every chunk that belongs to one client's upload
/// stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ClientId(i64);

impl ClientId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ClientId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal status of a session's upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Succeeded {
        url: String,
        size_bytes: u64,
        sha256_hash: String,
    },
    Failed {
        reason: String,
    },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Succeeded { .. })
    }
}

/// Lifecycle of a client session.
///
/// `Pending` and `Active` accept writes. `Draining` starts when the pipe is
/// closed during shutdown and lasts until the upload task records its
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(tag = "state", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Pending,
    Active,
    Draining,
    Done(UploadOutcome),
}

impl SessionState {
    pub fn accepts_writes(&self) -> bool {
        matches!(self, SessionState::Pending | SessionState::Active)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SessionState::Done(_))
    }

    pub fn outcome(&self) -> Option<&UploadOutcome> {
        match self {
            SessionState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_serde() {
        let id: ClientId = serde_json::from_str("42").unwrap();
        assert_eq!(id, ClientId::new(42));
        assert_eq!(serde_json::to_string(&ClientId::new(-7)).unwrap(), "-7");
        assert_eq!(ClientId::new(-7).to_string(), "-7");
    }

    #[test]
    fn test_session_state_serialization() {
        let state = SessionState::Done(UploadOutcome::Failed {
            reason: "boom".to_string(),
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "done");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");

        let json = serde_json::to_value(SessionState::Pending).unwrap();
        assert_eq!(json["state"], "pending");
    }

    #[test]
    fn test_session_state_transitions() {
        assert!(SessionState::Pending.accepts_writes());
        assert!(SessionState::Active.accepts_writes());
        assert!(!SessionState::Draining.accepts_writes());

        let done = SessionState::Done(UploadOutcome::Succeeded {
            url: "s3://bucket/chat/2024-01-01/1".to_string(),
            size_bytes: 10,
            sha256_hash: "abc".to_string(),
        });
        assert!(done.is_done());
        assert!(!done.accepts_writes());
        assert!(done.outcome().unwrap().is_success());
        assert_eq!(done.to_string(), "done");
    }
}
