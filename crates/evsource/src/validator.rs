// Response validators — decide whether a response is an event stream.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;

use crate::error::Error;

/// Inspects the response head before streaming begins. A rejection is
/// surfaced from `connect` verbatim and is never retried.
pub type ResponseValidator = Arc<dyn Fn(&reqwest::Response) -> Result<(), Error> + Send + Sync>;

/// The validator used unless configured otherwise: the status must be in
/// [200, 300) and the `Content-Type` essence must be `text/event-stream`
/// (parameters such as `charset` are allowed).
pub fn default_validator() -> ResponseValidator {
    Arc::new(|response| {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::validator(format!(
                "unexpected response status {status}"
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let essence = content_type.split(';').next().unwrap_or("").trim();
        if !essence.eq_ignore_ascii_case("text/event-stream") {
            return Err(Error::validator(format!(
                "unexpected content type {content_type:?}, expected text/event-stream"
            )));
        }
        Ok(())
    })
}

/// Accepts every response. For endpoints that speak the wire format but
/// not the headers.
pub fn noop_validator() -> ResponseValidator {
    Arc::new(|_| Ok(()))
}
