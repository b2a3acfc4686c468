//! End-to-end sends against an in-process scripted SMTP server.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use notify_smtp::{EmailClient, EmailParams, SmtpErrorKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound for any single test; a hang fails instead of blocking CI.
const TEST_BOUND: Duration = Duration::from_secs(5);

/// Replies the scripted server sends, keyed by command.
#[derive(Clone)]
struct Replies {
    greeting: &'static str,
    ehlo: &'static str,
    auth: &'static [&'static str],
    mail: &'static str,
    rcpt: &'static str,
    data: &'static str,
    data_end: &'static str,
    quit: &'static str,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            greeting: "220 mock ESMTP ready\r\n",
            ehlo: "250-mock.example.com\r\n250-SIZE 10000\r\n250 AUTH PLAIN LOGIN\r\n",
            auth: &["235 2.7.0 Authentication successful\r\n"],
            mail: "250 2.1.0 OK\r\n",
            rcpt: "250 2.1.5 OK\r\n",
            data: "354 End data with <CR><LF>.<CR><LF>\r\n",
            data_end: "250 2.0.0 Queued\r\n",
            quit: "221 2.0.0 Bye\r\n",
        }
    }
}

/// What the server saw during one session.
#[derive(Debug, Default)]
struct Session {
    commands: Vec<String>,
    data: Vec<u8>,
}

impl Session {
    fn data_text(&self) -> String {
        String::from_utf8(self.data.clone()).unwrap()
    }
}

async fn serve_one(replies: Replies) -> (u16, JoinHandle<Session>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut session = Session::default();
        let mut auth_replies: VecDeque<&'static str> = VecDeque::new();

        reader.get_mut().write_all(replies.greeting.as_bytes()).await.unwrap();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let command = line.trim_end().to_string();
            let upper = command.to_uppercase();
            session.commands.push(command);

            let reply = if let Some(next) = auth_replies.pop_front() {
                next
            } else if upper.starts_with("EHLO") {
                replies.ehlo
            } else if upper.starts_with("AUTH") {
                auth_replies.extend(replies.auth.iter().copied());
                auth_replies.pop_front().unwrap_or("504 unsupported\r\n")
            } else if upper.starts_with("MAIL FROM") {
                replies.mail
            } else if upper.starts_with("RCPT TO") {
                replies.rcpt
            } else if upper == "DATA" {
                reader.get_mut().write_all(replies.data.as_bytes()).await.unwrap();
                if !replies.data.starts_with("354") {
                    continue;
                }
                loop {
                    let mut chunk = Vec::new();
                    if reader.read_until(b'\n', &mut chunk).await.unwrap_or(0) == 0 {
                        return session;
                    }
                    if chunk == b".\r\n" {
                        break;
                    }
                    session.data.extend_from_slice(&chunk);
                }
                replies.data_end
            } else if upper == "QUIT" {
                reader.get_mut().write_all(replies.quit.as_bytes()).await.unwrap();
                break;
            } else {
                "500 unrecognized\r\n"
            };

            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
        }

        session
    });

    (port, handle)
}

fn params(port: u16) -> EmailParams {
    EmailParams::builder()
        .from("from@example.com")
        .to("to@example.com")
        .host("127.0.0.1")
        .port(port)
        .timeout(Duration::from_secs(2))
        .build()
}

#[tokio::test]
async fn test_full_session_with_plain_auth() {
    let (port, server) = serve_one(Replies::default()).await;
    let mut params = params(port);
    params.to.push("to2@example.com".to_string());
    params.smtp_username = Some("user".to_string());
    params.smtp_password = Some(secrecy::SecretString::new("passwd".to_string()));
    let client = EmailClient::new(params);

    timeout(TEST_BOUND, client.send("hi", "hello\n.hidden line\nend"))
        .await
        .unwrap()
        .unwrap();

    let session = timeout(TEST_BOUND, server).await.unwrap().unwrap();
    assert_eq!(
        session.commands,
        vec![
            "EHLO localhost",
            "AUTH PLAIN AHVzZXIAcGFzc3dk",
            "MAIL FROM:<from@example.com>",
            "RCPT TO:<to@example.com>",
            "RCPT TO:<to2@example.com>",
            "DATA",
            "QUIT",
        ]
    );

    let data = session.data_text();
    assert!(
        data.starts_with("From: from@example.com\r\nTo: to@example.com,to2@example.com\r\nSubject: hi\r\n"),
        "{}",
        data
    );
    assert!(data.contains("\r\n\r\nhello\r\n..hidden line\r\nend\r\n"), "{}", data);
    assert!(!data.replace("\r\n", "").contains('\n'), "{}", data);

    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.emails_sent, 1);
    assert_eq!(snapshot.sessions_finished, 1);
}

#[tokio::test]
async fn test_cram_md5_preferred_when_offered() {
    let (port, server) = serve_one(Replies {
        ehlo: "250-mock.example.com\r\n250 AUTH PLAIN CRAM-MD5\r\n",
        auth: &[
            "334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n",
            "235 ok\r\n",
        ],
        ..Replies::default()
    })
    .await;
    let params = EmailParams {
        smtp_username: Some("tim".to_string()),
        smtp_password: Some(secrecy::SecretString::new("tanstaaftanstaaf".to_string())),
        ..params(port)
    };
    let client = EmailClient::new(params);

    timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap();

    let session = timeout(TEST_BOUND, server).await.unwrap().unwrap();
    assert_eq!(session.commands[1], "AUTH CRAM-MD5");
    assert_eq!(session.commands[2], "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
    assert_eq!(session.commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_server_without_auth_aborts_before_envelope() {
    let (port, server) = serve_one(Replies {
        ehlo: "250 mock.example.com\r\n",
        ..Replies::default()
    })
    .await;
    let client = EmailClient::new(EmailParams {
        smtp_username: Some("user".to_string()),
        smtp_password: Some(secrecy::SecretString::new("passwd".to_string())),
        ..params(port)
    });

    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);

    let session = timeout(TEST_BOUND, server).await.unwrap().unwrap();
    assert_eq!(session.commands, vec!["EHLO localhost"]);
}

#[tokio::test]
async fn test_rejected_recipient_aborts_without_quit() {
    let (port, server) = serve_one(Replies {
        rcpt: "550 5.1.1 User unknown\r\n",
        ..Replies::default()
    })
    .await;
    let mut params = params(port);
    params.to.push("never@example.com".to_string());
    let client = EmailClient::new(params);

    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), SmtpErrorKind::InvalidRecipientAddress);
    assert_eq!(err.smtp_code(), Some(550));

    let session = timeout(TEST_BOUND, server).await.unwrap().unwrap();
    assert_eq!(
        session.commands,
        vec!["EHLO localhost", "MAIL FROM:<from@example.com>", "RCPT TO:<to@example.com>"]
    );
    assert_eq!(client.metrics().snapshot().sessions_aborted, 1);
}

#[tokio::test]
async fn test_rejected_data_is_writer_error() {
    let (port, server) = serve_one(Replies {
        data: "554 5.3.4 no thanks\r\n",
        ..Replies::default()
    })
    .await;
    let client = EmailClient::new(params(port));

    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), SmtpErrorKind::BodyWriter);
    assert!(err.to_string().starts_with("can't make email writer: no thanks"), "{}", err);

    let session = timeout(TEST_BOUND, server).await.unwrap().unwrap();
    assert!(!session.commands.iter().any(|c| c == "QUIT"));
}

#[tokio::test]
async fn test_rejected_message_is_close_error() {
    let (port, server) = serve_one(Replies {
        data_end: "552 5.3.4 too big\r\n",
        ..Replies::default()
    })
    .await;
    let client = EmailClient::new(params(port));

    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), SmtpErrorKind::BodyWriter);
    assert!(err.to_string().starts_with("can't close email writer: too big"), "{}", err);

    let session = timeout(TEST_BOUND, server).await.unwrap().unwrap();
    assert!(!session.commands.iter().any(|c| c == "QUIT"));
    assert!(session.data_text().contains("Subject: hi\r\n"));
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = EmailClient::new(params(port));
    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();

    assert_eq!(err.kind(), SmtpErrorKind::ConnectionRefused);
    let snapshot = client.metrics().snapshot();
    assert_eq!(snapshot.connections_failed, 1);
    assert_eq!(snapshot.sessions_released(), 0);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    // Accepted by the kernel backlog, but no greeting ever arrives.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let bound = Duration::from_millis(200);
    let mut params = params(port);
    params.timeout = bound;
    let client = EmailClient::new(params);

    let started = Instant::now();
    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.kind(), SmtpErrorKind::ConnectTimeout);
    // The configured bound is honored, not the command or default connect timeout.
    assert!(elapsed >= bound, "{:?}", elapsed);
    assert!(elapsed < bound + Duration::from_secs(1), "{:?}", elapsed);

    drop(listener);
}

#[cfg(feature = "rustls-tls")]
#[tokio::test]
async fn test_tls_against_plaintext_server_fails() {
    let (port, _server) = serve_one(Replies::default()).await;
    let mut params = params(port);
    params.tls = true;
    let client = EmailClient::new(params);

    let err = timeout(TEST_BOUND, client.send("hi", "body")).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), SmtpErrorKind::TlsHandshakeFailed);
}
