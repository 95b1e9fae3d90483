// MockTransport — scripted transport for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};

use crate::error::Error;
use crate::transport::{BoxFuture, Transport};

/// What a [`MockTransport`] remembers about each round trip.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    /// Header value as text, or `""` when absent — convenient for
    /// asserting on `Last-Event-Id` sequences.
    pub fn header(&self, name: &str) -> String {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string()
    }
}

type ScriptedResponse = Box<dyn FnOnce() -> Result<reqwest::Response, Error> + Send>;
type ResponderFn =
    Box<dyn Fn(usize, &RecordedRequest) -> Result<reqwest::Response, Error> + Send + Sync>;

/// A [`Transport`] that replays a scripted FIFO of responses and errors,
/// recording every request it sees. The stand-in for a real HTTP stack in
/// retry, cancellation, and resumption tests.
#[derive(Default)]
pub struct MockTransport {
    queue: Mutex<Vec<ScriptedResponse>>,
    fallback: Option<ResponderFn>,
    recorded: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every round trip with `responder`, called with the 0-based
    /// call index and the recorded request. Scripted queue entries, if
    /// any, are consumed first.
    pub fn from_fn(
        responder: impl Fn(usize, &RecordedRequest) -> Result<reqwest::Response, Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            fallback: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    /// Queue a successful event-stream response with the given body.
    pub fn with_stream(self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.with_response(move || Ok(event_stream_response(body)))
    }

    /// Queue a transport failure.
    pub fn with_error(self, error: Error) -> Self {
        self.with_response(move || Err(error))
    }

    /// Queue an arbitrary response factory.
    pub fn with_response(
        self,
        factory: impl FnOnce() -> Result<reqwest::Response, Error> + Send + 'static,
    ) -> Self {
        self.queue.lock().unwrap().push(Box::new(factory));
        self
    }

    /// How many round trips have been executed.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in order.
    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn round_trip(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, Error>> {
        let recorded = RecordedRequest {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
        };
        self.recorded.lock().unwrap().push(recorded.clone());
        let index = self.calls.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };
        let result = match next {
            Some(factory) => factory(),
            None => match &self.fallback {
                Some(responder) => responder(index, &recorded),
                None => Err(Error::transport(
                    "no scripted response left",
                    std::io::Error::new(std::io::ErrorKind::Other, "mock transport exhausted"),
                )),
            },
        };
        Box::pin(async move { result })
    }
}

/// A `200 text/event-stream` response with the given body.
pub fn event_stream_response(body: impl Into<reqwest::Body>) -> reqwest::Response {
    let response = http::Response::builder()
        .status(200)
        .header("content-type", "text/event-stream")
        .body(body.into())
        .expect("static response parts are valid");
    reqwest::Response::from(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn scripted_queue_is_fifo() {
        let transport = MockTransport::new()
            .with_stream("data: first\n\n")
            .with_error(Error::eof());
        let request = reqwest::Request::new(
            Method::GET,
            "http://example.com/events".parse().unwrap(),
        );

        let first = transport
            .round_trip(request.try_clone().unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), 200);
        let second = transport.round_trip(request).await;
        assert!(second.is_err());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn records_headers_per_call() {
        let transport = Arc::new(MockTransport::from_fn(|index, _| {
            Ok(event_stream_response(format!("id: {index}\n\n")))
        }));
        let mut request = reqwest::Request::new(
            Method::GET,
            "http://example.com/events".parse().unwrap(),
        );
        request
            .headers_mut()
            .insert("last-event-id", "7".parse().unwrap());

        transport.round_trip(request).await.unwrap();
        let recorded = transport.recorded_requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].header("last-event-id"), "7");
        assert_eq!(recorded[0].header("missing"), "");
    }
}
