//! Transport layer for SMTP sessions.
//!
//! [`EmailTransport`] is the capability a send drives: authenticate, declare
//! the envelope, stream the body, then either finish or abort. [`TcpTransport`]
//! implements it over TCP with optional implicit TLS.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::auth::{AuthMethod, Authenticator, Credentials};
use crate::config::{EmailParams, DEFAULT_CLIENT_ID, DEFAULT_COMMAND_TIMEOUT};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{
    codes, DataEncoder, EsmtpCapabilities, SmtpCommand, SmtpResponse, TransactionState,
};

/// An open session with a mail server.
///
/// Callers end every session with exactly one of [`finish`](Self::finish) or
/// [`abort`](Self::abort).
#[async_trait]
pub trait EmailTransport: Send + Sync + fmt::Debug {
    /// Authenticates the session.
    async fn authenticate(&mut self, credentials: &Credentials) -> SmtpResult<()>;

    /// Declares the envelope sender (MAIL FROM).
    async fn declare_sender(&mut self, address: &str) -> SmtpResult<()>;

    /// Declares one envelope recipient (RCPT TO).
    async fn declare_recipient(&mut self, address: &str) -> SmtpResult<()>;

    /// Opens the message body (DATA).
    ///
    /// The message is accepted only once the returned writer is closed.
    async fn open_body_writer<'a>(&'a mut self) -> SmtpResult<Box<dyn BodyWriter + 'a>>;

    /// Ends the session gracefully (QUIT).
    async fn finish(&mut self) -> SmtpResult<()>;

    /// Tears the session down without QUIT.
    async fn abort(&mut self) -> SmtpResult<()>;
}

/// Sink for the message body of an open transaction.
#[async_trait]
pub trait BodyWriter: Send {
    /// Writes the next chunk of the message.
    async fn write(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Completes the message and waits for the server to accept it.
    async fn close(self: Box<Self>) -> SmtpResult<()>;
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream.
    stream: TransportStream,
    /// Bound on each command exchange.
    command_timeout: Duration,
    /// Transaction state.
    state: TransactionState,
    /// Server capabilities, known after EHLO/HELO.
    capabilities: Option<EsmtpCapabilities>,
    /// TLS enabled flag.
    tls_enabled: bool,
    /// Server host.
    host: String,
    /// Identity announced in EHLO/HELO.
    client_id: String,
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
    NativeTls(BufReader<tokio_native_tls::TlsStream<TcpStream>>),
    /// The socket has been released.
    Closed,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("state", &self.state)
            .finish()
    }
}

impl TcpTransport {
    /// Connects to the server described by `params`.
    ///
    /// Dialing, the TLS handshake and the greeting all share one bound,
    /// [`EmailParams::connect_timeout`].
    pub async fn connect(params: &EmailParams) -> SmtpResult<Self> {
        let address = params.address();
        let bound = params.connect_timeout();

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %address, tls = params.tls, "Connecting to SMTP server");

        timeout(bound, Self::establish(params, &address))
            .await
            .map_err(|_| {
                SmtpError::timeout(
                    SmtpErrorKind::ConnectTimeout,
                    format!("timed out connecting to {} after {:?}", address, bound),
                )
            })?
    }

    async fn establish(params: &EmailParams, address: &str) -> SmtpResult<Self> {
        let tcp = TcpStream::connect(address)
            .await
            .map_err(|e| Self::map_io_error(e, address))?;
        tcp.set_nodelay(true).ok();

        let stream = if params.tls {
            Self::wrap_tls(tcp, &params.host).await?
        } else {
            TransportStream::Plain(BufReader::new(tcp))
        };

        let mut transport = Self {
            stream,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            state: TransactionState::Connected,
            capabilities: None,
            tls_enabled: params.tls,
            host: params.host.clone(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
        };

        let greeting = transport.read_response().await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(greeting.to_error());
        }

        Ok(transport)
    }

    #[cfg(feature = "rustls-tls")]
    async fn wrap_tls(tcp: TcpStream, host: &str) -> SmtpResult<TransportStream> {
        use rustls::pki_types::ServerName;
        use std::sync::Arc;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", host)))?;

        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| SmtpError::tls(format!("TLS handshake with {} failed: {}", host, e)).with_cause(e))?;

        Ok(TransportStream::Tls(BufReader::new(tls)))
    }

    #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
    async fn wrap_tls(tcp: TcpStream, host: &str) -> SmtpResult<TransportStream> {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| SmtpError::tls(format!("TLS connector error: {}", e)))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let tls = connector
            .connect(host, tcp)
            .await
            .map_err(|e| SmtpError::tls(format!("TLS handshake with {} failed: {}", host, e)))?;

        Ok(TransportStream::NativeTls(BufReader::new(tls)))
    }

    #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
    async fn wrap_tls(_tcp: TcpStream, _host: &str) -> SmtpResult<TransportStream> {
        Err(SmtpError::configuration(
            "TLS requested but no TLS backend is enabled",
        ))
    }

    /// Returns the current session state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the capabilities learned from EHLO, if greeted yet.
    pub fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    /// Returns true if the session runs over TLS.
    pub fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    /// Maps IO errors to SMTP errors.
    fn map_io_error(error: io::Error, address: &str) -> SmtpError {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => SmtpError::new(
                SmtpErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            ),
            io::ErrorKind::TimedOut => SmtpError::timeout(
                SmtpErrorKind::ConnectTimeout,
                format!("Connect to {} timed out", address),
            ),
            io::ErrorKind::ConnectionReset => {
                SmtpError::new(SmtpErrorKind::ConnectionReset, "Connection reset by server")
            }
            io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable => SmtpError::new(
                SmtpErrorKind::NetworkUnreachable,
                format!("Cannot reach {}: {}", address, error),
            ),
            _ => SmtpError::connection(format!("Connection error to {}: {}", address, error))
                .with_cause(error),
        }
    }

    /// Reads lines until we have a complete response.
    async fn read_response_inner<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let result = timeout(timeout_duration, reader.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| SmtpError::protocol(format!("Read error: {}", e)))?;

            if result == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }

            let line = line.trim_end().to_string();

            // Continuation lines carry a hyphen after the code.
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> SmtpResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(|e| SmtpError::protocol(format!("Write error: {}", e)))?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Flush timed out"))?
            .map_err(|e| SmtpError::protocol(format!("Flush error: {}", e)))?;

        Ok(())
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        let bound = self.command_timeout;
        match &mut self.stream {
            TransportStream::Plain(stream) => Self::write_all(stream.get_mut(), data, bound).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => Self::write_all(stream.get_mut(), data, bound).await,
            #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
            TransportStream::NativeTls(stream) => {
                Self::write_all(stream.get_mut(), data, bound).await
            }
            TransportStream::Closed => Err(Self::closed_error()),
        }
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let bound = self.command_timeout;
        let response = match &mut self.stream {
            TransportStream::Plain(stream) => Self::read_response_inner(stream, bound).await?,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => Self::read_response_inner(stream, bound).await?,
            #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
            TransportStream::NativeTls(stream) => Self::read_response_inner(stream, bound).await?,
            TransportStream::Closed => return Err(Self::closed_error()),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.first_message(), "Received SMTP response");

        Ok(response)
    }

    /// Sends one line and reads the reply. Used for AUTH continuations,
    /// which are never logged.
    async fn send_line(&mut self, line: &str) -> SmtpResult<SmtpResponse> {
        self.send_data(format!("{}\r\n", line).as_bytes()).await?;
        self.read_response().await
    }

    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "Sending SMTP command");

        self.send_line(&command.to_smtp_string()).await
    }

    fn check_state(&self, allowed: bool, command: &str) -> SmtpResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(SmtpError::new(
                SmtpErrorKind::CommandSequenceError,
                format!("{} not allowed in state {:?}", command, self.state),
            ))
        }
    }

    /// Says hello once per session, falling back to HELO.
    async fn ensure_greeted(&mut self) -> SmtpResult<()> {
        if self.capabilities.is_some() {
            return Ok(());
        }

        let ehlo = self
            .send_command(&SmtpCommand::Ehlo(self.client_id.clone()))
            .await?;

        let capabilities = if ehlo.is_success() {
            EsmtpCapabilities::from_ehlo_response(&ehlo)
        } else {
            let helo = self
                .send_command(&SmtpCommand::Helo(self.client_id.clone()))
                .await?;
            if !helo.is_success() {
                return Err(helo.to_error());
            }
            EsmtpCapabilities::default()
        };

        self.capabilities = Some(capabilities);
        if self.state == TransactionState::Connected {
            self.state = TransactionState::Greeted;
        }
        Ok(())
    }

    /// AUTH PLAIN with the initial response inline.
    async fn auth_plain(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        let initial =
            Authenticator::plain_initial_response(&credentials.username, &credentials.password);
        let response = self
            .send_command(&SmtpCommand::Auth {
                mechanism: AuthMethod::Plain.mechanism_name().to_string(),
                initial_response: Some(initial),
            })
            .await?;

        Self::expect_auth_success(&response)
    }

    /// AUTH LOGIN: username and password on separate continuations.
    async fn auth_login(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        let response = self
            .send_command(&SmtpCommand::Auth {
                mechanism: AuthMethod::Login.mechanism_name().to_string(),
                initial_response: None,
            })
            .await?;
        Self::expect_continue(&response)?;

        let response = self
            .send_line(&Authenticator::login_username(&credentials.username))
            .await?;
        Self::expect_continue(&response)?;

        let response = self
            .send_line(&Authenticator::login_password(&credentials.password))
            .await?;
        Self::expect_auth_success(&response)
    }

    /// AUTH CRAM-MD5: answer the server challenge.
    async fn auth_cram_md5(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        let response = self
            .send_command(&SmtpCommand::Auth {
                mechanism: AuthMethod::CramMd5.mechanism_name().to_string(),
                initial_response: None,
            })
            .await?;
        Self::expect_continue(&response)?;

        let answer = Authenticator::cram_md5_response(
            response.first_message(),
            &credentials.username,
            &credentials.password,
        )?;
        let response = self.send_line(&answer).await?;
        Self::expect_auth_success(&response)
    }

    fn expect_continue(response: &SmtpResponse) -> SmtpResult<()> {
        if response.code == codes::AUTH_CONTINUE {
            Ok(())
        } else {
            Err(response.to_error())
        }
    }

    fn expect_auth_success(response: &SmtpResponse) -> SmtpResult<()> {
        if response.code == codes::AUTH_SUCCESS {
            Ok(())
        } else {
            Err(response.to_error())
        }
    }

    fn closed_error() -> SmtpError {
        SmtpError::new(SmtpErrorKind::ConnectionReset, "Connection closed")
    }

    /// Closes the write side within the command bound, then releases the socket.
    async fn shutdown(&mut self) -> SmtpResult<()> {
        let bound = self.command_timeout;
        let mut stream = std::mem::replace(&mut self.stream, TransportStream::Closed);
        self.state = TransactionState::Closed;

        let result = match &mut stream {
            TransportStream::Plain(stream) => timeout(bound, stream.get_mut().shutdown()).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => timeout(bound, stream.get_mut().shutdown()).await,
            #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
            TransportStream::NativeTls(stream) => timeout(bound, stream.get_mut().shutdown()).await,
            TransportStream::Closed => return Ok(()),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            // The peer hanging up first is not a failure here.
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Ok(Err(e)) => Err(SmtpError::new(
                SmtpErrorKind::ConnectionReset,
                format!("Shutdown error: {}", e),
            )),
            Err(_) => Err(SmtpError::timeout(
                SmtpErrorKind::WriteTimeout,
                "Shutdown timed out",
            )),
        }
    }
}

#[async_trait]
impl EmailTransport for TcpTransport {
    async fn authenticate(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        self.ensure_greeted().await?;
        self.check_state(self.state.can_authenticate(), "AUTH")?;

        let available = self
            .capabilities
            .as_ref()
            .map(|c| c.auth_methods())
            .unwrap_or_default();
        let method = Authenticator::select_best_method(&available, self.tls_enabled, &self.host)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %method, username = %credentials.username, "Authenticating");

        match method {
            AuthMethod::Plain => self.auth_plain(credentials).await?,
            AuthMethod::Login => self.auth_login(credentials).await?,
            AuthMethod::CramMd5 => self.auth_cram_md5(credentials).await?,
        }

        self.state = TransactionState::Authenticated;
        Ok(())
    }

    async fn declare_sender(&mut self, address: &str) -> SmtpResult<()> {
        self.ensure_greeted().await?;
        self.check_state(self.state.can_start_mail(), "MAIL FROM")?;

        let response = self
            .send_command(&SmtpCommand::MailFrom {
                address: address.to_string(),
            })
            .await?;
        if response.code != codes::OK {
            return Err(response.to_error());
        }

        self.state = TransactionState::InTransaction;
        Ok(())
    }

    async fn declare_recipient(&mut self, address: &str) -> SmtpResult<()> {
        self.check_state(self.state.can_add_recipient(), "RCPT TO")?;

        let response = self
            .send_command(&SmtpCommand::RcptTo {
                address: address.to_string(),
            })
            .await?;
        if !response.is_success() {
            return Err(response.to_error());
        }

        self.state = TransactionState::RecipientsAdded;
        Ok(())
    }

    async fn open_body_writer<'a>(&'a mut self) -> SmtpResult<Box<dyn BodyWriter + 'a>> {
        self.check_state(self.state.can_send_data(), "DATA")?;

        let response = self.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(response.to_error());
        }

        self.state = TransactionState::SendingData;
        Ok(Box::new(DataWriter {
            transport: self,
            encoder: DataEncoder::new(),
        }))
    }

    async fn finish(&mut self) -> SmtpResult<()> {
        if self.state == TransactionState::Closed {
            return Ok(());
        }

        let quit = self.send_command(&SmtpCommand::Quit).await;
        let closed = self.shutdown().await;

        // The message was accepted before QUIT.
        let response = quit?;
        if response.code != codes::SERVICE_CLOSING {
            #[cfg(feature = "tracing")]
            tracing::warn!(host = %self.host, code = response.code, "Unexpected reply to QUIT");
        }
        closed
    }

    async fn abort(&mut self) -> SmtpResult<()> {
        if self.state == TransactionState::Closed {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(host = %self.host, state = ?self.state, "Aborting SMTP session");

        // Dropping the stream closes the socket without waiting on the peer.
        self.stream = TransportStream::Closed;
        self.state = TransactionState::Closed;
        Ok(())
    }
}

/// Streams the DATA section of a [`TcpTransport`] session.
struct DataWriter<'a> {
    transport: &'a mut TcpTransport,
    encoder: DataEncoder,
}

#[async_trait]
impl BodyWriter for DataWriter<'_> {
    async fn write(&mut self, data: &[u8]) -> SmtpResult<()> {
        let framed = self.encoder.encode(data);
        self.transport.send_data(&framed).await
    }

    async fn close(self: Box<Self>) -> SmtpResult<()> {
        let DataWriter { transport, encoder } = *self;

        transport.send_data(&encoder.finish()).await?;
        let response = transport.read_response().await?;
        if response.code != codes::OK {
            return Err(response.to_error());
        }

        transport.state = TransactionState::Complete;
        Ok(())
    }
}
