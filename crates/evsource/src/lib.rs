// evsource — Server-Sent Events client: incremental wire parser, typed
// subscriptions, and a reconnecting connection engine over a pluggable
// HTTP transport.

pub mod backoff;
pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod parser;
pub mod registry;
pub mod testing;
pub mod transport;
pub mod validator;

// --- Curated re-exports ---
// The intentional public surface; internals stay behind their modules.
pub use backoff::BackoffConfig;
pub use client::{Client, ClientBuilder, OnRetryCallback};
pub use connection::{BodyProvider, Connection};
pub use error::{Error, ErrorKind};
pub use event::{Event, EventBuilder};
pub use parser::{Field, FieldParser};
pub use registry::{EventCallback, SubscriptionHandle};
pub use transport::{BoxFuture, DefaultTransport, Transport};
pub use validator::{default_validator, noop_validator, ResponseValidator};
