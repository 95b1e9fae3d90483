// Connection — binds a request template to subscribers and drives the
// retry controller: prepare request → round trip → validate → read loop →
// classify → back off → repeat, until a terminal outcome.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url, Version};
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::OnRetryCallback;
use crate::error::Error;
use crate::event::{Event, EventBuilder};
use crate::parser::FieldParser;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::transport::Transport;
use crate::validator::ResponseValidator;

fn last_event_id_header() -> HeaderName {
    HeaderName::from_static("last-event-id")
}

/// Produces a fresh request body for a retry when the original body was a
/// one-shot stream. The equivalent of `http.Request.GetBody`.
pub type BodyProvider = Arc<dyn Fn() -> Result<reqwest::Body, Error> + Send + Sync>;

/// The request, deconstructed so every attempt can be rebuilt from it.
#[derive(Debug)]
struct RequestTemplate {
    method: Method,
    url: Url,
    headers: HeaderMap,
    version: Version,
    timeout: Option<Duration>,
    body: BodyTemplate,
}

#[derive(Debug)]
enum BodyTemplate {
    None,
    /// Buffered bodies replay for free on every attempt.
    Replayable(Bytes),
    /// Streaming bodies are consumed by the first attempt; retries need a
    /// [`BodyProvider`].
    Streaming(Mutex<Option<reqwest::Body>>),
}

impl RequestTemplate {
    fn from_request(mut request: reqwest::Request) -> Self {
        let body = match request.body_mut().take() {
            None => BodyTemplate::None,
            Some(body) => match body.as_bytes() {
                Some(bytes) => BodyTemplate::Replayable(Bytes::copy_from_slice(bytes)),
                None => BodyTemplate::Streaming(Mutex::new(Some(body))),
            },
        };
        Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            version: request.version(),
            timeout: request.timeout().copied(),
            body,
        }
    }
}

pub(crate) struct ConnectionSettings {
    pub transport: Arc<dyn Transport>,
    pub validator: ResponseValidator,
    pub on_retry: Option<OnRetryCallback>,
    pub max_retries: i32,
    pub default_reconnection_time: Duration,
    pub backoff: BackoffConfig,
    pub token: CancellationToken,
}

/// One logical connection to an event stream.
///
/// Subscribers can be added and removed from any thread, before or during
/// [`connect`](Self::connect); only subscriptions present when an event is
/// dispatched receive it. `connect` drives the whole lifecycle on the
/// calling task and is callable exactly once.
pub struct Connection {
    transport: Arc<dyn Transport>,
    validator: ResponseValidator,
    on_retry: Option<OnRetryCallback>,
    max_retries: i32,
    default_reconnection_time: Duration,
    backoff: BackoffConfig,
    token: CancellationToken,
    template: RequestTemplate,
    body_provider: Option<BodyProvider>,
    registry: SubscriptionRegistry,
    connected: AtomicBool,
}

enum AttemptOutcome {
    /// Terminal; propagate immediately.
    Fatal(Error),
    /// Candidate for a retry. `streamed` is true when the response passed
    /// validation, which resets the retry budget and the backoff schedule.
    Retriable { error: Error, streamed: bool },
}

enum ReadOutcome {
    CleanEof,
    UnexpectedEof,
    Transport(Error),
    Canceled,
}

impl Connection {
    pub(crate) fn new(settings: ConnectionSettings, request: reqwest::Request) -> Self {
        Self {
            transport: settings.transport,
            validator: settings.validator,
            on_retry: settings.on_retry,
            max_retries: settings.max_retries,
            default_reconnection_time: settings.default_reconnection_time,
            backoff: settings.backoff,
            token: settings.token,
            template: RequestTemplate::from_request(request),
            body_provider: None,
            registry: SubscriptionRegistry::new(),
            connected: AtomicBool::new(false),
        }
    }

    /// Supply fresh request bodies for retries. Without this, a retry of a
    /// request whose body was a one-shot stream fails with
    /// [`ErrorKind::NoBodyReplay`](crate::ErrorKind::NoBodyReplay).
    pub fn with_body_provider(
        mut self,
        provider: impl Fn() -> Result<reqwest::Body, Error> + Send + Sync + 'static,
    ) -> Self {
        self.body_provider = Some(Arc::new(provider));
        self
    }

    /// The token governing this connection. Cancel it to terminate
    /// `connect` from another task; the cancellation is observed at the
    /// next round trip, body chunk, or backoff tick.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Subscribe to events with the given type.
    pub fn subscribe_event(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.registry.subscribe(event_type.into(), Arc::new(callback))
    }

    /// Subscribe to unnamed events (those without an `event:` field).
    pub fn subscribe_messages(
        &self,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.registry.subscribe(String::new(), Arc::new(callback))
    }

    /// Subscribe to every event regardless of type. Wildcard subscribers
    /// see each event before the type-keyed ones do.
    pub fn subscribe_to_all(
        &self,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.registry.subscribe_all(Arc::new(callback))
    }

    /// Open the stream and dispatch events until a terminal outcome.
    ///
    /// Returns the final error: the last transport error once retries are
    /// exhausted, `Eof`/`UnexpectedEof` when the server keeps closing the
    /// stream, the validator's rejection, or `Canceled`. Calling `connect`
    /// a second time fails with `AlreadyConnected`.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(Error::already_connected());
        }
        let result = self.run().await;
        self.registry.close();
        result
    }

    async fn run(&self) -> Result<(), Error> {
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut builder = EventBuilder::new();
        let mut retries_made: i32 = 0;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let request = self.build_request(attempt, builder.last_event_id())?;
            tracing::debug!(attempt, url = %self.template.url, "opening event stream");

            let (error, streamed) = match self
                .attempt_once(request, &mut builder, &mut backoff)
                .await
            {
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::Retriable { error, streamed } => (error, streamed),
            };

            // Cancellation supersedes whatever the attempt reported.
            if self.token.is_cancelled() {
                return Err(Error::canceled());
            }
            if streamed {
                retries_made = 0;
            }
            let out_of_retries = self.max_retries == 0
                || (self.max_retries > 0 && retries_made >= self.max_retries);
            if out_of_retries || backoff.give_up() {
                return Err(error);
            }
            retries_made += 1;

            let base = builder
                .reconnection_time()
                .unwrap_or(self.default_reconnection_time);
            let delay = backoff.next_delay(base);
            tracing::debug!(?delay, error = %error, "event stream interrupted; retrying");
            if let Some(on_retry) = &self.on_retry {
                if catch_unwind(AssertUnwindSafe(|| on_retry(&error, delay))).is_err() {
                    tracing::warn!("retry observer panicked");
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(Error::canceled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt_once(
        &self,
        request: reqwest::Request,
        builder: &mut EventBuilder,
        backoff: &mut Backoff,
    ) -> AttemptOutcome {
        let response = tokio::select! {
            _ = self.token.cancelled() => return AttemptOutcome::Fatal(Error::canceled()),
            result = self.transport.round_trip(request) => match result {
                Ok(response) => response,
                Err(error) => {
                    if self.token.is_cancelled() {
                        return AttemptOutcome::Fatal(Error::canceled());
                    }
                    return AttemptOutcome::Retriable { error, streamed: false };
                }
            },
        };

        if let Err(error) = (self.validator)(&response) {
            return AttemptOutcome::Fatal(error);
        }
        tracing::debug!(status = %response.status(), "event stream connected");
        backoff.reset();
        builder.reset_scratch();

        match self.read_stream(response, builder).await {
            ReadOutcome::Canceled => AttemptOutcome::Fatal(Error::canceled()),
            ReadOutcome::CleanEof => AttemptOutcome::Retriable {
                error: Error::eof(),
                streamed: true,
            },
            ReadOutcome::UnexpectedEof => AttemptOutcome::Retriable {
                error: Error::unexpected_eof(),
                streamed: true,
            },
            ReadOutcome::Transport(error) => AttemptOutcome::Retriable {
                error,
                streamed: true,
            },
        }
    }

    async fn read_stream(
        &self,
        response: reqwest::Response,
        builder: &mut EventBuilder,
    ) -> ReadOutcome {
        let mut parser = FieldParser::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = self.token.cancelled() => return ReadOutcome::Canceled,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for field in parser.feed(&bytes) {
                        if let Some(event) = builder.apply(field) {
                            self.registry.dispatch(&event);
                        }
                    }
                }
                Some(Err(error)) => {
                    if self.token.is_cancelled() {
                        return ReadOutcome::Canceled;
                    }
                    return ReadOutcome::Transport(Error::transport(
                        "event stream read failed",
                        error,
                    ));
                }
                None => {
                    // The distinction matters: a body that ends on a line
                    // boundary is a server that closed the stream on
                    // purpose, so the in-flight block is still dispatched.
                    // A cut mid-line discards the partial block.
                    return if parser.ended_clean() {
                        if let Some(event) = builder.flush_dirty() {
                            self.registry.dispatch(&event);
                        }
                        ReadOutcome::CleanEof
                    } else {
                        ReadOutcome::UnexpectedEof
                    };
                }
            }
        }
    }

    fn build_request(&self, attempt: u32, last_event_id: &str) -> Result<reqwest::Request, Error> {
        let mut request =
            reqwest::Request::new(self.template.method.clone(), self.template.url.clone());
        *request.version_mut() = self.template.version;
        *request.headers_mut() = self.template.headers.clone();
        *request.timeout_mut() = self.template.timeout;

        if attempt > 1 {
            let headers = request.headers_mut();
            headers.remove(last_event_id_header());
            if !last_event_id.is_empty() {
                match HeaderValue::from_str(last_event_id) {
                    Ok(value) => {
                        headers.insert(last_event_id_header(), value);
                    }
                    Err(_) => {
                        tracing::warn!("last event ID is not a valid header value; omitted");
                    }
                }
            }
        }

        *request.body_mut() = self.attempt_body(attempt)?;
        Ok(request)
    }

    fn attempt_body(&self, attempt: u32) -> Result<Option<reqwest::Body>, Error> {
        match &self.template.body {
            BodyTemplate::None => Ok(None),
            BodyTemplate::Replayable(bytes)
                if attempt == 1 || self.body_provider.is_none() =>
            {
                Ok(Some(reqwest::Body::from(bytes.clone())))
            }
            BodyTemplate::Streaming(slot) if attempt == 1 => {
                Ok(slot.lock().expect("body slot poisoned").take())
            }
            _ => match &self.body_provider {
                Some(provider) => provider().map(Some).map_err(Error::body_replay),
                None => Err(Error::no_body_replay()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::error::ErrorKind;

    fn get(url: &str) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url.parse().unwrap())
    }

    fn streaming_body() -> reqwest::Body {
        reqwest::Body::wrap_stream(futures::stream::once(async {
            Ok::<_, std::io::Error>(Bytes::from_static(b"payload"))
        }))
    }

    #[test]
    fn first_attempt_keeps_template_headers() {
        let mut request = get("http://example.com/events");
        request
            .headers_mut()
            .insert(last_event_id_header(), HeaderValue::from_static("caller-set"));
        let connection = Client::default().new_connection(request);

        let built = connection.build_request(1, "99").unwrap();
        assert_eq!(
            built.headers().get(last_event_id_header()).unwrap(),
            "caller-set"
        );
    }

    #[test]
    fn retries_inject_current_last_event_id() {
        let mut request = get("http://example.com/events");
        request
            .headers_mut()
            .insert(last_event_id_header(), HeaderValue::from_static("caller-set"));
        let connection = Client::default().new_connection(request);

        let built = connection.build_request(2, "42").unwrap();
        assert_eq!(built.headers().get(last_event_id_header()).unwrap(), "42");

        // An empty ID removes the header entirely.
        let built = connection.build_request(2, "").unwrap();
        assert!(built.headers().get(last_event_id_header()).is_none());
    }

    #[test]
    fn buffered_bodies_replay_on_every_attempt() {
        let mut request = get("http://example.com/events");
        *request.body_mut() = Some(reqwest::Body::from("payload"));
        let connection = Client::default().new_connection(request);

        for attempt in [1, 2, 3] {
            let body = connection.attempt_body(attempt).unwrap().unwrap();
            assert_eq!(body.as_bytes(), Some(&b"payload"[..]));
        }
    }

    #[test]
    fn streaming_body_without_provider_fails_on_retry() {
        let mut request = get("http://example.com/events");
        *request.body_mut() = Some(streaming_body());
        let connection = Client::default().new_connection(request);

        assert!(connection.attempt_body(1).unwrap().is_some());
        let err = connection.attempt_body(2).unwrap_err();
        assert!(err.is_no_body_replay());
    }

    #[test]
    fn provider_supplies_retry_bodies() {
        let mut request = get("http://example.com/events");
        *request.body_mut() = Some(streaming_body());
        let connection = Client::default()
            .new_connection(request)
            .with_body_provider(|| Ok(reqwest::Body::from("fresh")));

        let body = connection.attempt_body(2).unwrap().unwrap();
        assert_eq!(body.as_bytes(), Some(&b"fresh"[..]));
    }

    #[test]
    fn provider_error_is_not_retryable() {
        let mut request = get("http://example.com/events");
        *request.body_mut() = Some(streaming_body());
        let connection = Client::default()
            .new_connection(request)
            .with_body_provider(|| Err(Error::validator("cannot reopen")));

        let err = connection.attempt_body(2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BodyReplay);
        assert!(!err.retryable);
    }

    #[test]
    fn request_without_body_stays_bodyless() {
        let connection = Client::default().new_connection(get("http://example.com/events"));
        assert!(connection.attempt_body(1).unwrap().is_none());
        assert!(connection.attempt_body(5).unwrap().is_none());
    }
}
