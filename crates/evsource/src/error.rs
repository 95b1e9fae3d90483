// Error type — unified error for the entire library.

use serde::{Deserialize, Serialize};

/// Discriminator covering every failure class the connection engine can
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The transport collaborator failed to execute the request or the
    /// response body broke mid-stream.
    Transport,
    /// The configured response validator rejected the response.
    Validator,
    /// The stream ended after a complete line (clean EOF).
    Eof,
    /// The stream ended mid-line, leaving a partial field behind.
    UnexpectedEof,
    /// A retry needs to resend a streaming request body but no body
    /// provider was configured.
    NoBodyReplay,
    /// The configured body provider failed to produce a fresh body.
    BodyReplay,
    /// The cancellation token fired.
    Canceled,
    /// `Connection::connect` was called a second time.
    AlreadyConnected,
}

/// The single error type for the entire library.
///
/// `retryable` mirrors the retry policy: only transport failures and the
/// two EOF classes are retried. Everything else terminates the connection
/// immediately.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Transport failure with the underlying cause attached.
    pub fn transport(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
            retryable: true,
            source: Some(Box::new(source)),
        }
    }

    /// Validator rejection. Never retried.
    pub fn validator(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validator,
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// Clean end of stream.
    pub fn eof() -> Self {
        Self {
            kind: ErrorKind::Eof,
            message: "event stream ended".into(),
            retryable: true,
            source: None,
        }
    }

    /// The stream ended mid-block, before a terminating line ending.
    pub fn unexpected_eof() -> Self {
        Self {
            kind: ErrorKind::UnexpectedEof,
            message: "event stream ended unexpectedly".into(),
            retryable: true,
            source: None,
        }
    }

    /// A retry required a fresh request body and none could be produced.
    pub fn no_body_replay() -> Self {
        Self {
            kind: ErrorKind::NoBodyReplay,
            message: "request body cannot be replayed; configure a body provider".into(),
            retryable: false,
            source: None,
        }
    }

    /// The body provider itself failed.
    pub fn body_replay(source: Error) -> Self {
        Self {
            kind: ErrorKind::BodyReplay,
            message: format!("body provider failed: {}", source.message),
            retryable: false,
            source: Some(Box::new(source)),
        }
    }

    /// The connection was canceled through its cancellation token.
    pub fn canceled() -> Self {
        Self {
            kind: ErrorKind::Canceled,
            message: "connection canceled".into(),
            retryable: false,
            source: None,
        }
    }

    /// `connect` is single-use.
    pub fn already_connected() -> Self {
        Self {
            kind: ErrorKind::AlreadyConnected,
            message: "connect was already called on this connection".into(),
            retryable: false,
            source: None,
        }
    }

    /// Whether this is the distinguished unexpected-EOF sentinel.
    pub fn is_unexpected_eof(&self) -> bool {
        self.kind == ErrorKind::UnexpectedEof
    }

    /// Whether this is the distinguished missing-body-replay sentinel.
    pub fn is_no_body_replay(&self) -> bool {
        self.kind == ErrorKind::NoBodyReplay
    }

    /// Whether the connection was canceled rather than failed.
    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
