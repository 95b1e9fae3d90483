// Client and ClientBuilder — connection settings, inherited by value.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffConfig;
use crate::connection::{Connection, ConnectionSettings};
use crate::error::Error;
use crate::transport::{DefaultTransport, Transport};
use crate::validator::{default_validator, ResponseValidator};

/// Observer invoked with `(error, delay)` before each backoff wait.
/// Panics from it are swallowed.
pub type OnRetryCallback = Arc<dyn Fn(&Error, Duration) + Send + Sync>;

/// Configuration shared by every connection the client creates.
///
/// A [`Connection`] copies the settings at construction time; changing the
/// client afterwards does not affect existing connections.
pub struct Client {
    transport: Option<Arc<dyn Transport>>,
    response_validator: ResponseValidator,
    on_retry: Option<OnRetryCallback>,
    max_retries: i32,
    default_reconnection_time: Duration,
    backoff: BackoffConfig,
    cancellation: CancellationToken,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    response_validator: ResponseValidator,
    on_retry: Option<OnRetryCallback>,
    max_retries: i32,
    default_reconnection_time: Duration,
    backoff: BackoffConfig,
    cancellation: CancellationToken,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            response_validator: default_validator(),
            on_retry: None,
            max_retries: 0,
            default_reconnection_time: Duration::from_secs(3),
            backoff: BackoffConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Use a custom transport instead of the default `reqwest`-backed one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shorthand for wrapping an existing [`reqwest::Client`].
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.transport = Some(Arc::new(DefaultTransport::new(client)));
        self
    }

    /// Replace the response validator. See
    /// [`noop_validator`](crate::validator::noop_validator) for endpoints
    /// that speak the wire format without the headers.
    pub fn response_validator(mut self, validator: ResponseValidator) -> Self {
        self.response_validator = validator;
        self
    }

    /// Observe retries: called with the triggering error and the chosen
    /// delay before each wait.
    pub fn on_retry(mut self, callback: impl Fn(&Error, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Retry budget after the initial attempt: negative means unbounded,
    /// 0 (the default) never retries, N > 0 allows up to N retries. The
    /// budget refills on every successfully validated connection.
    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Reconnection delay used until the server suggests one through a
    /// `retry:` field (default: 3s).
    pub fn default_reconnection_time(mut self, time: Duration) -> Self {
        self.default_reconnection_time = time;
        self
    }

    /// Growth factor for the wait between consecutive failed attempts.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    /// Upper bound for the undelayed backoff interval.
    pub fn backoff_max_interval(mut self, max_interval: Duration) -> Self {
        self.backoff.max_interval = max_interval;
        self
    }

    /// Jitter band applied to every wait: `interval × (1 ± factor)`.
    pub fn backoff_randomization_factor(mut self, factor: f64) -> Self {
        self.backoff.randomization_factor = factor;
        self
    }

    /// Give up retrying once this much time has passed since the current
    /// run of failures began. Disabled by default.
    pub fn backoff_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.backoff.max_elapsed = Some(max_elapsed);
        self
    }

    /// Parent cancellation token. Every connection gets a child token, so
    /// canceling this one terminates all of the client's connections.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn build(self) -> Client {
        Client {
            transport: self.transport,
            response_validator: self.response_validator,
            on_retry: self.on_retry,
            max_retries: self.max_retries,
            default_reconnection_time: self.default_reconnection_time,
            backoff: self.backoff,
            cancellation: self.cancellation,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Client {
    fn default() -> Self {
        ClientBuilder::new().build()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Bind `request` to a new [`Connection`] carrying this client's
    /// settings. The request's method, URL, headers, and body become the
    /// template replayed on every attempt. When no transport was
    /// configured, a default `reqwest` client is used.
    pub fn new_connection(&self, request: reqwest::Request) -> Connection {
        let transport = self
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultTransport::default()));
        Connection::new(
            ConnectionSettings {
                transport,
                validator: Arc::clone(&self.response_validator),
                on_retry: self.on_retry.clone(),
                max_retries: self.max_retries,
                default_reconnection_time: self.default_reconnection_time,
                backoff: self.backoff.clone(),
                token: self.cancellation.child_token(),
            },
            request,
        )
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("max_retries", &self.max_retries)
            .field(
                "default_reconnection_time",
                &self.default_reconnection_time,
            )
            .field("backoff", &self.backoff)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "..."))
            .finish_non_exhaustive()
    }
}
