// Subscribe to an event stream and print everything that arrives.
//
// Usage: cargo run --example subscribe -- http://localhost:8080/events

use std::time::Duration;

use evsource::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/events".into());

    let client = Client::builder()
        .max_retries(-1)
        .default_reconnection_time(Duration::from_secs(2))
        .on_retry(|error, delay| eprintln!("reconnecting in {delay:?} after: {error}"))
        .build();

    let connection = client.new_connection(reqwest::Request::new(
        reqwest::Method::GET,
        url.parse()?,
    ));
    connection.subscribe_to_all(|event| {
        let label = if event.event_type.is_empty() {
            "message"
        } else {
            event.event_type.as_str()
        };
        println!("[{label}] {}", event.data);
    });

    connection.connect().await?;
    Ok(())
}
