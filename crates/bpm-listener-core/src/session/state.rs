//! Observable session state

use serde::Serialize;

/// What the session is doing; exactly one holds at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Listening,
    Detected,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Detected => "detected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot published to callers
///
/// `bpm` is present only when detected and `error` only on failure; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    status: SessionStatus,
    bpm: Option<u32>,
    error: Option<String>,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            bpm: None,
            error: None,
        }
    }

    pub fn listening() -> Self {
        Self {
            status: SessionStatus::Listening,
            bpm: None,
            error: None,
        }
    }

    pub fn detected(bpm: u32) -> Self {
        Self {
            status: SessionStatus::Detected,
            bpm: Some(bpm),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Error,
            bpm: None,
            error: Some(message.into()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn bpm(&self) -> Option<u32> {
        self.bpm
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_idle(&self) -> bool {
        self.status == SessionStatus::Idle
    }

    pub fn is_listening(&self) -> bool {
        self.status == SessionStatus::Listening
    }

    /// Detected or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Detected | SessionStatus::Error)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}
