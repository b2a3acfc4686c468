//! Message composition.
//!
//! Builds the text handed to the server after DATA: a fixed header block,
//! a blank line, and the body. The body is always quoted-printable encoded,
//! whatever the content type, with its line endings normalized to CRLF.

use chrono::{DateTime, Local};

use crate::config::EmailParams;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Value of the `Content-Transfer-Encoding` header.
pub const TRANSFER_ENCODING: &str = "quoted-printable";

/// Builds notification messages for a set of [`EmailParams`].
#[derive(Debug, Clone, Copy)]
pub struct MessageBuilder<'a> {
    params: &'a EmailParams,
}

impl<'a> MessageBuilder<'a> {
    /// Creates a builder over the given parameters.
    pub fn new(params: &'a EmailParams) -> Self {
        Self { params }
    }

    /// Builds the message dated now.
    pub fn build(&self, subject: &str, body: &str) -> SmtpResult<String> {
        self.build_at(subject, body, Local::now())
    }

    /// Builds the message with an explicit `Date`.
    pub fn build_at(&self, subject: &str, body: &str, date: DateTime<Local>) -> SmtpResult<String> {
        let mut message = String::new();

        Self::write_header(&mut message, "From", &self.params.from);
        Self::write_header(&mut message, "To", &self.params.to_header());
        Self::write_header(&mut message, "Subject", subject);
        Self::write_header(&mut message, "Content-Transfer-Encoding", TRANSFER_ENCODING);
        if let Some(content_type) = &self.params.content_type {
            Self::write_header(&mut message, "MIME-version", "1.0");
            Self::write_header(
                &mut message,
                "Content-Type",
                &format!("{}; charset=\"UTF-8\"", content_type),
            );
        }
        Self::write_header(&mut message, "Date", &Self::format_date(&date));

        message.push('\n');
        message.push_str(&encode_quoted_printable(body)?);
        Ok(message)
    }

    fn write_header(output: &mut String, name: &str, value: &str) {
        output.push_str(name);
        output.push_str(": ");
        output.push_str(value);
        output.push('\n');
    }

    /// RFC 1123 with a numeric zone.
    fn format_date(date: &DateTime<Local>) -> String {
        date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }
}

/// Rewrites every line ending (`\r\n`, `\n`, lone `\r`) as CRLF.
pub fn normalize_line_endings(text: &str) -> String {
    let mut output = String::with_capacity(text.len() + text.len() / 16);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                output.push_str("\r\n");
            }
            '\n' => output.push_str("\r\n"),
            _ => output.push(c),
        }
    }

    output
}

/// Quoted-printable encodes `text` after normalizing its line endings.
pub fn encode_quoted_printable(text: &str) -> SmtpResult<String> {
    let encoded = quoted_printable::encode(normalize_line_endings(text).as_bytes());
    String::from_utf8(encoded).map_err(|e| {
        SmtpError::message_error(SmtpErrorKind::EncodingFailed, "quoted-printable output is not UTF-8")
            .with_cause(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(content_type: Option<&str>) -> EmailParams {
        EmailParams {
            from: "from@example.com".to_string(),
            to: vec!["to@example.com".to_string()],
            content_type: content_type.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_plain_message() {
        let params = params(None);
        let msg = MessageBuilder::new(&params)
            .build("subj", "this is a test\n12345\n")
            .unwrap();

        assert!(msg.contains("From: from@example.com\nTo: to@example.com\nSubject: subj\n"), "{}", msg);
        assert!(msg.contains("this is a test\r\n12345"), "{}", msg);
        assert!(msg.contains("Date: "), "{}", msg);
        assert!(msg.contains("Content-Transfer-Encoding: quoted-printable"), "{}", msg);
        assert!(!msg.contains("MIME-version"), "{}", msg);
        assert!(!msg.contains("Content-Type"), "{}", msg);
    }

    #[test]
    fn test_build_message_with_mime() {
        let params = params(Some("text/html"));
        let msg = MessageBuilder::new(&params)
            .build("subj", "this is a test\n12345\n")
            .unwrap();

        assert!(
            msg.contains(
                "From: from@example.com\nTo: to@example.com\nSubject: subj\n\
                 Content-Transfer-Encoding: quoted-printable\nMIME-version: 1.0\n\
                 Content-Type: text/html; charset=\"UTF-8\""
            ),
            "{}",
            msg
        );
        assert!(msg.contains("\n\nthis is a test\r\n12345"), "{}", msg);
        assert!(msg.contains("Date: "), "{}", msg);
        assert_eq!(msg.matches("\n\n").count(), 1, "{}", msg);
    }

    #[test]
    fn test_build_is_exact_for_fixed_date() {
        let mut params = params(None);
        params.to.push("to2@example.com".to_string());
        let date = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let msg = MessageBuilder::new(&params).build_at("hi", "body", date).unwrap();

        let expected = format!(
            "From: from@example.com\nTo: to@example.com,to2@example.com\nSubject: hi\n\
             Content-Transfer-Encoding: quoted-printable\nDate: {}\n\nbody",
            date.format("%a, %d %b %Y %H:%M:%S %z")
        );
        assert_eq!(msg, expected);
        assert!(msg.contains("Date: Tue, 05 Mar 2024 07:08:09 "), "{}", msg);
    }

    #[test]
    fn test_body_is_quoted_printable() {
        let params = params(Some("text/html"));
        let msg = MessageBuilder::new(&params)
            .build("subj", "<p style=\"a=b\">héllo</p>")
            .unwrap();
        let body = msg.split("\n\n").nth(1).unwrap();

        assert!(body.contains("a=3Db"), "{}", body);
        assert!(body.contains("h=C3=A9llo"), "{}", body);
        assert!(body.is_ascii());
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\nb\r\nc\rd"), "a\r\nb\r\nc\r\nd");
        assert_eq!(normalize_line_endings("\r\n\r\n"), "\r\n\r\n");
        assert_eq!(normalize_line_endings("plain"), "plain");
    }

    #[test]
    fn test_encode_quoted_printable_line_endings() {
        let encoded = encode_quoted_printable("line one\nline two\r\nline three\r").unwrap();
        assert!(encoded.starts_with("line one\r\nline two\r\nline three"), "{}", encoded);
        assert!(!encoded.contains("=0A"), "{}", encoded);
        assert!(!encoded.contains("=0D"), "{}", encoded);
    }
}
