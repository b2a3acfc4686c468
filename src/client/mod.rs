//! Notification email client.
//!
//! [`EmailClient::send`] builds the message, acquires a transport, runs the
//! SMTP transaction and releases the session with exactly one of
//! [`EmailTransport::finish`] or [`EmailTransport::abort`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::EmailParams;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::MessageBuilder;
use crate::observability::{SendStage, SmtpMetrics, Timer};
use crate::transport::{EmailTransport, TcpTransport};

/// Sends notification emails with fixed parameters.
pub struct EmailClient {
    /// Parameters, read-only after construction.
    params: EmailParams,
    /// Transport injected for the next send only.
    transport: Mutex<Option<Box<dyn EmailTransport>>>,
    /// Metrics collector.
    metrics: Arc<SmtpMetrics>,
}

impl fmt::Debug for EmailClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailClient")
            .field("params", &self.params)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl EmailClient {
    /// Creates a client that dials a fresh session for every send.
    pub fn new(params: EmailParams) -> Self {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            host = %params.host,
            port = params.port,
            tls = params.tls,
            auth = params.has_auth(),
            content_type = ?params.content_type,
            "Created email client"
        );

        Self {
            params,
            transport: Mutex::new(None),
            metrics: Arc::new(SmtpMetrics::new()),
        }
    }

    /// Creates a client whose first send runs over `transport`.
    ///
    /// The transport serves that one send; later sends dial fresh.
    pub fn with_transport(params: EmailParams, transport: impl EmailTransport + 'static) -> Self {
        let client = Self::new(params);
        *client.lock_transport() = Some(Box::new(transport));
        client
    }

    /// Returns the parameters the client was created with.
    pub fn params(&self) -> &EmailParams {
        &self.params
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<SmtpMetrics> {
        &self.metrics
    }

    /// Sends one email with the given subject and body.
    ///
    /// Returns the first error hit. Once a session was opened it is closed
    /// before this returns, with QUIT on success and without on failure.
    pub async fn send(&self, subject: &str, body: &str) -> SmtpResult<()> {
        let timer = Timer::start("email_send");
        let result = self.send_inner(subject, body).await;

        match &result {
            Ok(()) => {
                self.metrics.record_send_success();

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    from = %self.params.from,
                    recipients = self.params.to.len(),
                    "Email sent"
                );
            }
            Err(_) => self.metrics.record_send_failure(),
        }

        timer.stop();
        result
    }

    async fn send_inner(&self, subject: &str, body: &str) -> SmtpResult<()> {
        let message = MessageBuilder::new(&self.params).build(subject, body)?;

        if self.params.to.is_empty() {
            let injected = self.lock_transport().take();
            if let Some(mut transport) = injected {
                let _ = transport.abort().await;
                self.metrics.record_session_end(false);
            }
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidRecipientAddress,
                "no recipients configured",
            ));
        }

        let mut transport = self.acquire_transport().await?;

        match self.transact(transport.as_mut(), &message).await {
            Ok(()) => {
                let finished = transport.finish().await;
                self.metrics.record_session_end(true);

                #[cfg(feature = "tracing")]
                if finished.is_err() {
                    tracing::debug!(stage = %SendStage::Finish, "SMTP session did not close cleanly");
                }

                finished
            }
            Err((stage, err)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(stage = %stage, "Aborting SMTP session");
                #[cfg(not(feature = "tracing"))]
                let _ = stage;

                // The transaction error is the one reported.
                let _ = transport.abort().await;
                self.metrics.record_session_end(false);
                Err(err)
            }
        }
    }

    /// Takes the injected transport, or dials a new session.
    async fn acquire_transport(&self) -> SmtpResult<Box<dyn EmailTransport>> {
        let injected = self.lock_transport().take();
        if let Some(transport) = injected {
            return Ok(transport);
        }

        match TcpTransport::connect(&self.params).await {
            Ok(transport) => {
                self.metrics.record_connection_attempt(true);
                Ok(Box::new(transport))
            }
            Err(err) => {
                self.metrics.record_connection_attempt(false);

                #[cfg(feature = "tracing")]
                tracing::debug!(stage = %SendStage::Connect, host = %self.params.host, "Connection failed");

                Err(err)
            }
        }
    }

    /// Runs the transaction up to an accepted message.
    async fn transact(
        &self,
        transport: &mut dyn EmailTransport,
        message: &str,
    ) -> Result<(), (SendStage, SmtpError)> {
        if let Some(credentials) = self.params.credentials() {
            let authenticated = transport.authenticate(&credentials).await;
            self.metrics.record_auth_attempt(authenticated.is_ok());
            authenticated.map_err(|e| (SendStage::Authenticate, e))?;
        }

        transport
            .declare_sender(&self.params.from)
            .await
            .map_err(|e| (SendStage::Envelope, e))?;

        for recipient in &self.params.to {
            transport
                .declare_recipient(recipient)
                .await
                .map_err(|e| (SendStage::Envelope, e))?;
        }

        let mut writer = transport
            .open_body_writer()
            .await
            .map_err(|e| (SendStage::Body, SmtpError::body_writer("can't make email writer", e)))?;

        writer
            .write(message.as_bytes())
            .await
            .map_err(|e| (SendStage::Body, SmtpError::body_writer("can't write email body", e)))?;

        writer
            .close()
            .await
            .map_err(|e| (SendStage::Body, SmtpError::body_writer("can't close email writer", e)))
    }

    fn lock_transport(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn EmailTransport>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
