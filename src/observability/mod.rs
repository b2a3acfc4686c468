//! Observability for notification sends.
//!
//! Counters are lock-free and shared by every send of a client. Logging goes
//! through `tracing` when the `tracing` feature is enabled.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stage of a send, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendStage {
    /// Opening the session.
    Connect,
    /// AUTH exchange.
    Authenticate,
    /// MAIL FROM / RCPT TO.
    Envelope,
    /// DATA and the body.
    Body,
    /// QUIT.
    Finish,
}

impl SendStage {
    /// Returns the stage name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            SendStage::Connect => "connect",
            SendStage::Authenticate => "authenticate",
            SendStage::Envelope => "envelope",
            SendStage::Body => "body",
            SendStage::Finish => "finish",
        }
    }
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SMTP metrics collector.
#[derive(Debug, Default)]
pub struct SmtpMetrics {
    /// Total emails sent successfully.
    pub emails_sent: AtomicU64,
    /// Total emails failed.
    pub emails_failed: AtomicU64,
    /// Total connection attempts.
    pub connection_attempts: AtomicU64,
    /// Successful connections.
    pub connections_successful: AtomicU64,
    /// Failed connections.
    pub connections_failed: AtomicU64,
    /// Total authentication attempts.
    pub auth_attempts: AtomicU64,
    /// Successful authentications.
    pub auth_successful: AtomicU64,
    /// Failed authentications.
    pub auth_failed: AtomicU64,
    /// Sessions ended with QUIT.
    pub sessions_finished: AtomicU64,
    /// Sessions torn down without QUIT.
    pub sessions_aborted: AtomicU64,
}

impl SmtpMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful email send.
    pub fn record_send_success(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed email send.
    pub fn record_send_failure(&self) {
        self.emails_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection attempt.
    pub fn record_connection_attempt(&self, success: bool) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.connections_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an authentication attempt.
    pub fn record_auth_attempt(&self, success: bool) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.auth_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.auth_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records how a session ended.
    pub fn record_session_end(&self, finished: bool) {
        if finished {
            self.sessions_finished.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            emails_failed: self.emails_failed.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_successful: self.connections_successful.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_successful: self.auth_successful.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            sessions_finished: self.sessions_finished.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total emails sent successfully.
    pub emails_sent: u64,
    /// Total emails failed.
    pub emails_failed: u64,
    /// Total connection attempts.
    pub connection_attempts: u64,
    /// Successful connections.
    pub connections_successful: u64,
    /// Failed connections.
    pub connections_failed: u64,
    /// Total authentication attempts.
    pub auth_attempts: u64,
    /// Successful authentications.
    pub auth_successful: u64,
    /// Failed authentications.
    pub auth_failed: u64,
    /// Sessions ended with QUIT.
    pub sessions_finished: u64,
    /// Sessions torn down without QUIT.
    pub sessions_aborted: u64,
}

impl MetricsSnapshot {
    /// Returns the number of sessions that were opened and released.
    pub fn sessions_released(&self) -> u64 {
        self.sessions_finished + self.sessions_aborted
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    #[cfg(feature = "tracing")]
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer. `name` labels the log event.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            #[cfg(feature = "tracing")]
            name,
        }
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );

        elapsed
    }
}
