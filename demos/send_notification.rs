//! Notification Sending Example
//!
//! This example demonstrates how to:
//! - Load client parameters from JSON, as a wiring layer would
//! - Send an HTML notification
//! - Inspect the client metrics afterwards
//!
//! Run against a local test server, e.g. `SMTP_PARAMS=params.json`.

use notify_smtp::{EmailClient, EmailParams, SmtpError};

const DEFAULT_PARAMS: &str = r#"{
    "from": "alerts@example.com",
    "to": ["oncall@example.com", "team@example.com"],
    "content_type": "text/html",
    "host": "localhost",
    "port": 2525,
    "tls": false,
    "timeout": "5s"
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let raw = match std::env::var("SMTP_PARAMS") {
        Ok(path) => std::fs::read_to_string(path)?,
        Err(_) => DEFAULT_PARAMS.to_string(),
    };
    let params: EmailParams = serde_json::from_str(&raw)?;

    println!("Sending notification...");
    println!("  From: {}", params.from);
    println!("  To: {}", params.to_header());
    println!("  Server: {} (tls: {})", params.address(), params.tls);

    let client = EmailClient::new(params);
    let result: Result<(), SmtpError> = client
        .send(
            "Build failed",
            "<h1>Build #42 failed</h1>\n<p>See the CI logs for details.</p>\n",
        )
        .await;

    match &result {
        Ok(()) => println!("Notification sent successfully!"),
        Err(e) => eprintln!("Failed to send notification: {} ({})", e, e.kind()),
    }

    let snapshot = client.metrics().snapshot();
    println!(
        "  Sent: {}, failed: {}, sessions released: {}",
        snapshot.emails_sent,
        snapshot.emails_failed,
        snapshot.sessions_released()
    );

    result.map_err(Into::into)
}
