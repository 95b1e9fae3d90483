// Transport — the narrow interface between the connection engine and HTTP.

use std::future::Future;
use std::pin::Pin;

use crate::error::Error;

/// Boxed future alias used across the library's object-safe traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes one prepared request and hands back the response.
///
/// The connection engine owns everything else: header injection, body
/// replay, validation, parsing, and retries. Implementations only need to
/// perform the round trip — which makes scripted transports trivial to
/// write in tests.
pub trait Transport: Send + Sync {
    fn round_trip(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, Error>>;
}

/// The default transport, backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    client: reqwest::Client,
}

impl DefaultTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for DefaultTransport {
    fn round_trip(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, Error>> {
        Box::pin(async move {
            self.client
                .execute(request)
                .await
                .map_err(|e| Error::transport("request failed", e))
        })
    }
}
