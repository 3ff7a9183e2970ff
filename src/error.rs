use serde::Serialize;
use std::fmt;
use thiserror::Error;

/**
 * A failed call to the poll service, as the transport reports it
 */
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("no network connection")]
    Offline,
    #[error("request timed out")]
    Timeout,
    #[error("server responded with status {status}")]
    Status {
        status: u16,
        /**
         * Human readable reason from the response body, if there was one
         */
        message: Option<String>,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("response is missing `{0}`")]
    MissingField(String),
}

impl Failure {
    pub fn status(status: u16, message: &str) -> Self {
        Failure::Status {
            status,
            message: Some(message.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollErrorKind {
    Network,
    Validation,
    Conflict,
    NotFound,
    Unauthorized,
    Unknown,
}

impl fmt::Display for PollErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollErrorKind::Network => "network",
            PollErrorKind::Validation => "validation",
            PollErrorKind::Conflict => "conflict",
            PollErrorKind::NotFound => "notFound",
            PollErrorKind::Unauthorized => "unauthorized",
            PollErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/**
 * A classified poll failure, ready to be shown to the user
 */
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("{kind} error: {message}")]
pub struct PollError {
    kind: PollErrorKind,
    message: String,
    status: Option<u16>,
}

impl PollError {
    pub fn new(kind: PollErrorKind, message: impl Into<String>) -> Self {
        PollError {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(PollErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(PollErrorKind::NotFound, message)
    }

    pub fn kind(&self) -> PollErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /**
     * Worth offering the user another try. Nothing is retried automatically, a second
     * attempt could count the vote twice.
     */
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, PollErrorKind::Network | PollErrorKind::Unknown)
    }

    /**
     * The local view is probably out of date and should be fetched again
     */
    pub fn suggests_refresh(&self) -> bool {
        self.kind == PollErrorKind::Conflict
    }

    /**
     * Repeating the same request cannot succeed until something else changes
     */
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            PollErrorKind::Validation | PollErrorKind::Unauthorized
        )
    }
}

/**
 * Map a transport failure onto the poll error taxonomy.
 *
 * Never fails: anything unrecognised becomes `Unknown`.
 */
pub fn classify(failure: &Failure) -> PollError {
    match failure {
        Failure::Offline => PollError::new(
            PollErrorKind::Network,
            "You appear to be offline. Check your connection and try again.",
        ),
        Failure::Timeout => PollError::new(
            PollErrorKind::Network,
            "The server took too long to answer. Try again.",
        ),
        Failure::Status { status, message } => {
            let (kind, fallback) = match status {
                408 => (
                    PollErrorKind::Network,
                    "The server took too long to answer. Try again.",
                ),
                400 => (PollErrorKind::Validation, "The server rejected this vote."),
                401 | 403 => (
                    PollErrorKind::Unauthorized,
                    "You are not allowed to do this. Try signing in again.",
                ),
                404 => (PollErrorKind::NotFound, "This poll no longer exists."),
                409 => (
                    PollErrorKind::Conflict,
                    "The poll changed in the meantime. Refresh to see the latest results.",
                ),
                _ => (
                    PollErrorKind::Unknown,
                    "Something went wrong on the server.",
                ),
            };
            let message = message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(fallback);
            PollError::new(kind, message).with_status(*status)
        }
        Failure::Malformed(_) | Failure::MissingField(_) => PollError::new(
            PollErrorKind::Unknown,
            "The server sent a response that could not be understood.",
        ),
    }
}
