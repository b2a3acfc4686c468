//! Delivery parameters for the notification client.
//!
//! [`EmailParams`] is everything a send needs: the envelope, the optional
//! content type, the SMTP endpoint, TLS, credentials and the dial timeout.
//! It is read-only once handed to a client.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use crate::auth::Credentials;

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Bound on establishing a session when [`EmailParams::timeout`] is zero.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on each command exchange once the session is open.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Client identity announced in EHLO/HELO.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// Parameters of an email client.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailParams {
    /// Sender address.
    pub from: String,
    /// Recipient addresses, in delivery order.
    #[serde(default)]
    pub to: Vec<String>,
    /// MIME content type of the body, e.g. `text/html`.
    #[serde(default)]
    pub content_type: Option<String>,
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Wrap the connection in TLS before the SMTP greeting.
    #[serde(default)]
    pub tls: bool,
    /// Authentication username.
    #[serde(default)]
    pub smtp_username: Option<String>,
    /// Authentication password (serialization skipped for security).
    #[serde(default, skip_serializing)]
    pub smtp_password: Option<SecretString>,
    /// Dial timeout; zero selects [`DEFAULT_CONNECT_TIMEOUT`].
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for EmailParams {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: Vec::new(),
            content_type: None,
            host: String::new(),
            port: DEFAULT_PORT,
            tls: false,
            smtp_username: None,
            smtp_password: None,
            timeout: Duration::ZERO,
        }
    }
}

impl EmailParams {
    /// Creates a new parameters builder.
    pub fn builder() -> EmailParamsBuilder {
        EmailParamsBuilder::default()
    }

    /// Returns the full server address, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the bound applied while establishing a session.
    pub fn connect_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Returns true if both username and password are set and non-empty.
    pub fn has_auth(&self) -> bool {
        let username = self.smtp_username.as_deref().unwrap_or_default();
        let password = self
            .smtp_password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .unwrap_or_default();
        !username.is_empty() && !password.is_empty()
    }

    /// Returns the credentials to authenticate with, if configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if !self.has_auth() {
            return None;
        }
        match (&self.smtp_username, &self.smtp_password) {
            (Some(username), Some(password)) => Some(Credentials::plain(
                username.clone(),
                password.expose_secret().clone(),
            )),
            _ => None,
        }
    }

    /// Returns the recipients joined for the `To` header.
    pub fn to_header(&self) -> String {
        self.to.join(",")
    }
}

impl PartialEq for EmailParams {
    fn eq(&self, other: &Self) -> bool {
        let password = |p: &EmailParams| {
            p.smtp_password
                .as_ref()
                .map(|s| s.expose_secret().clone())
        };
        self.from == other.from
            && self.to == other.to
            && self.content_type == other.content_type
            && self.host == other.host
            && self.port == other.port
            && self.tls == other.tls
            && self.smtp_username == other.smtp_username
            && password(self) == password(other)
            && self.timeout == other.timeout
    }
}

impl Eq for EmailParams {}

impl fmt::Debug for EmailParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailParams")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("content_type", &self.content_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("smtp_username", &self.smtp_username)
            .field(
                "smtp_password",
                &self.smtp_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for [`EmailParams`].
///
/// Stores exactly what it is given on top of [`EmailParams::default`].
#[derive(Debug, Default)]
pub struct EmailParamsBuilder {
    params: EmailParams,
}

impl EmailParamsBuilder {
    /// Sets the sender address.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.params.from = from.into();
        self
    }

    /// Adds a recipient.
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.params.to.push(to.into());
        self
    }

    /// Replaces the recipient list.
    pub fn recipients<I, S>(mut self, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.to = to.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the body content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.params.content_type = Some(content_type.into());
        self
    }

    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.params.host = host.into();
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.params.port = port;
        self
    }

    /// Enables or disables implicit TLS.
    pub fn tls(mut self, tls: bool) -> Self {
        self.params.tls = tls;
        self
    }

    /// Sets plain credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.params.smtp_username = Some(username.into());
        self.params.smtp_password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the dial timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.params.timeout = timeout;
        self
    }

    /// Builds the parameters.
    pub fn build(self) -> EmailParams {
        self.params
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_params_builder() {
        let params = EmailParams::builder()
            .from("from@example.com")
            .to("to@example.com")
            .to("to2@example.com")
            .content_type("text/html")
            .host("smtp.example.com")
            .port(465)
            .tls(true)
            .credentials("user", "passwd")
            .timeout(Duration::from_millis(200))
            .build();

        assert_eq!(params.from, "from@example.com");
        assert_eq!(params.to, vec!["to@example.com", "to2@example.com"]);
        assert_eq!(params.content_type.as_deref(), Some("text/html"));
        assert_eq!(params.address(), "smtp.example.com:465");
        assert!(params.tls);
        assert!(params.has_auth());
        assert_eq!(params.connect_timeout(), Duration::from_millis(200));
        assert_eq!(params.to_header(), "to@example.com,to2@example.com");
    }

    #[test]
    fn test_params_defaults() {
        let params = EmailParams::builder().host("127.0.0.1").build();
        assert_eq!(params.port, DEFAULT_PORT);
        assert!(!params.tls);
        assert!(params.content_type.is_none());
        assert_eq!(params.timeout, Duration::ZERO);
        assert_eq!(params.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[rstest]
    #[case(None, None, false)]
    #[case(Some("user"), None, false)]
    #[case(None, Some("passwd"), false)]
    #[case(Some(""), Some("passwd"), false)]
    #[case(Some("user"), Some(""), false)]
    #[case(Some("user"), Some("passwd"), true)]
    fn test_has_auth(
        #[case] username: Option<&str>,
        #[case] password: Option<&str>,
        #[case] expected: bool,
    ) {
        let params = EmailParams {
            smtp_username: username.map(str::to_string),
            smtp_password: password.map(|p| SecretString::new(p.to_string())),
            ..Default::default()
        };
        assert_eq!(params.has_auth(), expected);
        assert_eq!(params.credentials().is_some(), expected);
    }

    #[rstest]
    #[case("smtp.example.com", "smtp.example.com:25")]
    #[case("127.0.0.1", "127.0.0.1:25")]
    #[case("::1", "[::1]:25")]
    #[case("2001:db8::25", "[2001:db8::25]:25")]
    #[case("[::1]", "[::1]:25")]
    fn test_address(#[case] host: &str, #[case] expected: &str) {
        let params = EmailParams::builder().host(host).port(25).build();
        assert_eq!(params.address(), expected);
    }

    #[test]
    fn test_params_debug_redacts_password() {
        let params = EmailParams::builder().credentials("user", "secret_password").build();
        let debug = format!("{:?}", params);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret_password"));
    }

    #[test]
    fn test_params_deserialize() {
        let params: EmailParams = serde_json::from_str(
            r#"{
                "from": "from@example.com",
                "to": ["to@example.com"],
                "content_type": "text/html",
                "host": "127.0.0.2",
                "tls": true,
                "smtp_username": "user",
                "smtp_password": "passwd",
                "timeout": "200ms"
            }"#,
        )
        .unwrap();

        assert_eq!(params.port, DEFAULT_PORT);
        assert_eq!(params.timeout, Duration::from_millis(200));
        assert!(params.has_auth());

        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("passwd"));
        assert!(json.contains("\"timeout\":\"200ms\""));
    }

    #[test]
    fn test_params_equality_includes_password() {
        let a = EmailParams::builder().host("h").credentials("u", "p1").build();
        let b = EmailParams::builder().host("h").credentials("u", "p2").build();
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }
}
