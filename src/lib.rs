//! # Notification SMTP Client
//!
//! Sends notification emails over SMTP with:
//! - Quoted-printable message composition with fixed header order
//! - Plain or single-part HTML bodies
//! - Implicit TLS (rustls by default, native-tls behind a feature)
//! - PLAIN, LOGIN and CRAM-MD5 authentication
//! - A send path that always closes the session it opened
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notify_smtp::{EmailClient, EmailParams};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = EmailParams::builder()
//!         .from("alerts@example.com")
//!         .to("oncall@example.com")
//!         .content_type("text/html")
//!         .host("smtp.example.com")
//!         .port(465)
//!         .tls(true)
//!         .credentials("alerts@example.com", "password")
//!         .timeout(Duration::from_secs(10))
//!         .build();
//!
//!     let client = EmailClient::new(params);
//!     client.send("Disk almost full", "<p>/var is at 95%</p>").await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Message composition
pub mod mime;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AuthMethod, Credentials};
pub use client::EmailClient;
pub use config::{EmailParams, EmailParamsBuilder};
pub use errors::{SmtpError, SmtpErrorKind, SmtpResult};
pub use mime::MessageBuilder;
pub use mocks::MockTransport;
pub use observability::{MetricsSnapshot, SmtpMetrics};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use transport::{BodyWriter, EmailTransport, TcpTransport};

