//! Classified error events and the bounded recent-error ring

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Default number of recent errors kept
pub const DEFAULT_ERROR_CAPACITY: usize = 10;

/// Key identifier recorded when no key was attached to the request
pub const NO_KEY_ID: &str = "none";

/// Resource identifier recorded when the path names no model
pub const UNKNOWN_MODEL: &str = "Unknown";

/// Pipeline stage that observed the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    /// Request rejected before it reached the upstream
    Director,
    /// Network exchange failed (DNS, connect, TLS, timeout)
    Transport,
    /// Upstream answered with a non-2xx status
    Response,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Director => write!(f, "director"),
            Self::Transport => write!(f, "transport"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorKind {
    /// The proxy refused to forward the request
    Proxy,
    /// No response was received
    Transport,
    /// A response with this status code was received
    Status { code: u16 },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => write!(f, "ProxyError"),
            Self::Transport => write!(f, "TransportError"),
            Self::Status { code } => write!(f, "HTTP {}", code),
        }
    }
}

/// One classified failure observed while forwarding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub stage: ErrorStage,
    /// Best-effort model name taken from the request path
    pub model: String,
    /// Display id of the key that was attached, or [`NO_KEY_ID`]
    pub key_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEvent {
    fn new(
        stage: ErrorStage,
        kind: ErrorKind,
        path: &str,
        key_id: Option<&str>,
        message: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            stage,
            model: extract_model(path),
            key_id: key_id.unwrap_or(NO_KEY_ID).to_string(),
            kind,
            message,
        }
    }

    /// Request refused before forwarding
    pub fn director(path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorStage::Director, ErrorKind::Proxy, path, None, message.into())
    }

    /// Network-level failure
    pub fn transport(path: &str, key_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorStage::Transport,
            ErrorKind::Transport,
            path,
            key_id,
            message.into(),
        )
    }

    /// Non-2xx upstream status
    pub fn status(path: &str, key_id: Option<&str>, status: StatusCode) -> Self {
        let message = status.canonical_reason().unwrap_or("Unknown Status");
        Self::new(
            ErrorStage::Response,
            ErrorKind::Status {
                code: status.as_u16(),
            },
            path,
            key_id,
            message.to_string(),
        )
    }
}

/// Extract the model name from paths like `/v1beta/models/gemini-pro:generateContent`
pub fn extract_model(path: &str) -> String {
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        if segment == "models" {
            if let Some(next) = segments.next() {
                let model = next.split(':').next().unwrap_or(next);
                if !model.is_empty() {
                    return model.to_string();
                }
            }
            break;
        }
    }
    UNKNOWN_MODEL.to_string()
}

/// Newest-first list of error events, truncated to a fixed capacity
#[derive(Debug, Clone)]
pub struct ErrorRing {
    events: VecDeque<ErrorEvent>,
    capacity: usize,
}

impl Default for ErrorRing {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CAPACITY)
    }
}

impl ErrorRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Prepend an event, dropping whatever falls beyond capacity
    pub fn push(&mut self, event: ErrorEvent) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.events.truncate(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Element-wise copy, newest first
    pub fn to_vec(&self) -> Vec<ErrorEvent> {
        self.events.iter().cloned().collect()
    }
}
