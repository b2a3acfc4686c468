//! Mock implementations for testing.
//!
//! [`MockTransport`] records every call a send makes and can be told to fail
//! at any step. Clones share their recordings, so a test keeps one clone for
//! inspection and hands the other to the client.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::auth::Credentials;
use crate::config::EmailParams;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::transport::{BodyWriter, EmailTransport};

/// A step of the transport capability, for call logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    /// `authenticate`.
    Authenticate,
    /// `declare_sender`.
    DeclareSender,
    /// `declare_recipient`.
    DeclareRecipient,
    /// `open_body_writer`.
    OpenBodyWriter,
    /// `BodyWriter::write`.
    Write,
    /// `BodyWriter::close`.
    Close,
    /// `finish`.
    Finish,
    /// `abort`.
    Abort,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockStep>,
    failures: HashSet<MockStep>,
    auth_username: Option<String>,
    sender: Option<String>,
    recipients: Vec<String>,
    body: Vec<u8>,
    body_closed: bool,
}

/// Mock SMTP transport for testing.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `step` fail with `"failed"`.
    pub fn failing_on(self, step: MockStep) -> Self {
        self.lock().failures.insert(step);
        self
    }

    /// Returns the steps called so far, in order.
    pub fn calls(&self) -> Vec<MockStep> {
        self.lock().calls.clone()
    }

    /// Returns how many times `step` was called.
    pub fn call_count(&self, step: MockStep) -> usize {
        self.lock().calls.iter().filter(|s| **s == step).count()
    }

    /// Returns the username of a successful authentication.
    pub fn auth_username(&self) -> Option<String> {
        self.lock().auth_username.clone()
    }

    /// Returns the accepted envelope sender.
    pub fn sender(&self) -> Option<String> {
        self.lock().sender.clone()
    }

    /// Returns the accepted envelope recipients.
    pub fn recipients(&self) -> Vec<String> {
        self.lock().recipients.clone()
    }

    /// Returns the body bytes written so far.
    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    /// Returns the body as text.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.lock().body).into_owned()
    }

    /// Returns true once a body writer was closed successfully.
    pub fn body_closed(&self) -> bool {
        self.lock().body_closed
    }

    /// Returns true if the session ended with `finish`.
    pub fn finished(&self) -> bool {
        self.call_count(MockStep::Finish) > 0
    }

    /// Returns true if the session ended with `abort`.
    pub fn aborted(&self) -> bool {
        self.call_count(MockStep::Abort) > 0
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logs the call and returns the injected failure, if any.
    fn enter(&self, step: MockStep) -> SmtpResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(step);
        if state.failures.contains(&step) {
            return Err(SmtpError::new(SmtpErrorKind::Unknown, "failed"));
        }
        Ok(state)
    }
}

#[async_trait]
impl EmailTransport for MockTransport {
    async fn authenticate(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        let mut state = self.enter(MockStep::Authenticate)?;
        state.auth_username = Some(credentials.username.clone());
        Ok(())
    }

    async fn declare_sender(&mut self, address: &str) -> SmtpResult<()> {
        let mut state = self.enter(MockStep::DeclareSender)?;
        state.sender = Some(address.to_string());
        Ok(())
    }

    async fn declare_recipient(&mut self, address: &str) -> SmtpResult<()> {
        let mut state = self.enter(MockStep::DeclareRecipient)?;
        state.recipients.push(address.to_string());
        Ok(())
    }

    async fn open_body_writer<'a>(&'a mut self) -> SmtpResult<Box<dyn BodyWriter + 'a>> {
        drop(self.enter(MockStep::OpenBodyWriter)?);
        Ok(Box::new(MockBodyWriter {
            transport: self.clone(),
        }))
    }

    async fn finish(&mut self) -> SmtpResult<()> {
        drop(self.enter(MockStep::Finish)?);
        Ok(())
    }

    async fn abort(&mut self) -> SmtpResult<()> {
        drop(self.enter(MockStep::Abort)?);
        Ok(())
    }
}

/// Body writer of a [`MockTransport`].
#[derive(Debug)]
pub struct MockBodyWriter {
    transport: MockTransport,
}

#[async_trait]
impl BodyWriter for MockBodyWriter {
    async fn write(&mut self, data: &[u8]) -> SmtpResult<()> {
        let mut state = self.transport.enter(MockStep::Write)?;
        state.body.extend_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> SmtpResult<()> {
        let mut state = self.transport.enter(MockStep::Close)?;
        state.body_closed = true;
        Ok(())
    }
}

/// Creates parameters pointing at an unroutable test server.
pub fn test_params() -> EmailParams {
    EmailParams::builder()
        .from("from@example.com")
        .to("to@example.com")
        .host("127.0.0.2")
        .port(25)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_records_calls() {
        let mock = MockTransport::new();
        let mut transport = mock.clone();

        transport
            .authenticate(&Credentials::plain("user", "passwd"))
            .await
            .unwrap();
        transport.declare_sender("from@example.com").await.unwrap();
        transport.declare_recipient("to@example.com").await.unwrap();
        {
            let mut writer = transport.open_body_writer().await.unwrap();
            writer.write(b"hello").await.unwrap();
            writer.close().await.unwrap();
        }
        transport.finish().await.unwrap();

        assert_eq!(mock.auth_username().as_deref(), Some("user"));
        assert_eq!(mock.sender().as_deref(), Some("from@example.com"));
        assert_eq!(mock.recipients(), vec!["to@example.com"]);
        assert_eq!(mock.body_text(), "hello");
        assert!(mock.body_closed());
        assert!(mock.finished());
        assert!(!mock.aborted());
        assert_eq!(mock.calls().len(), 7);
    }

    #[tokio::test]
    async fn test_mock_transport_failure() {
        let mock = MockTransport::new().failing_on(MockStep::DeclareRecipient);
        let mut transport = mock.clone();

        let err = transport.declare_recipient("to@example.com").await.unwrap_err();
        assert_eq!(err.to_string(), "failed");
        assert!(mock.recipients().is_empty());
        assert_eq!(mock.call_count(MockStep::DeclareRecipient), 1);
    }

    #[test]
    fn test_test_params() {
        let params = test_params();
        assert_eq!(params.from, "from@example.com");
        assert_eq!(params.to.len(), 1);
    }
}
