//! Wire format of the daemon's admin socket.
//!
//! # Framing
//! ```text
//! SSS LLLLLLLL\n      status (3 digits) and body length in bytes
//! <L bytes of body>\n
//! ```
//!
//! Status `107` opens the challenge handshake; its first body line is the
//! challenge token. Structured command output (`-j`) is JSON, except that
//! `vcl.list -j` on some daemon versions terminates the array with a
//! dangling `",\n\n]"`, which is repaired before decoding.

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::admin::error::{AdminError, AdminResult};

/// Command succeeded.
pub const STATUS_OK: u16 = 200;

/// Unsolicited authentication challenge.
pub const STATUS_AUTH: u16 = 107;

/// Largest body the client accepts before declaring the stream corrupt.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

const HELP_SUFFIX: &str = "Type 'help' for more info.";
const MALFORMED_LIST_TAIL: &str = ",\n\n]";

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// The body decoded as JSON (possibly after the list repair).
    Json(Value),
    /// Anything else, trimmed.
    Text(String),
}

/// A single response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: ResponseBody,
}

impl Response {
    /// Build a response from a status and its raw body text.
    pub fn from_parts(status: u16, raw_body: &str) -> Self {
        Self {
            status,
            body: parse_body(status, raw_body),
        }
    }

    /// Parse a complete frame held in memory (`"200 44\n<body>"`).
    ///
    /// The declared length is not enforced; everything after the header line
    /// is the body.
    pub fn parse(frame: &str) -> AdminResult<Self> {
        let (header, body) = frame.split_once('\n').unwrap_or((frame, ""));
        let status = parse_status(header.split_whitespace().next().unwrap_or_default())?;
        Ok(Self::from_parts(status, body))
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// JSON body, if the body decoded as JSON.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    /// Body rendered as text.
    pub fn text(&self) -> String {
        match &self.body {
            ResponseBody::Json(value) => value.to_string(),
            ResponseBody::Text(text) => text.clone(),
        }
    }

    /// Turn a non-200 response into a [`AdminError::Command`].
    pub fn into_result(self) -> AdminResult<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        Err(AdminError::Command {
            status: self.status,
            message: clean_error_message(&self.text()),
        })
    }
}

/// Parsed `SSS LLLLLLLL` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub status: u16,
    pub len: usize,
}

fn parse_status(token: &str) -> AdminResult<u16> {
    if token.len() != 3 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AdminError::Protocol(format!("invalid status code {token:?}")));
    }
    token
        .parse()
        .map_err(|_| AdminError::Protocol(format!("invalid status code {token:?}")))
}

/// Parse a frame header line.
pub fn parse_header(line: &str) -> AdminResult<FrameHeader> {
    let mut parts = line.split_whitespace();
    let status = parse_status(parts.next().unwrap_or_default())?;
    let len = parts
        .next()
        .ok_or_else(|| AdminError::Protocol(format!("missing body length in {line:?}")))?
        .parse::<usize>()
        .map_err(|e| AdminError::Protocol(format!("invalid body length in {line:?}: {e}")))?;
    if len > MAX_BODY_LEN {
        return Err(AdminError::Protocol(format!(
            "body length {len} exceeds limit of {MAX_BODY_LEN} bytes"
        )));
    }
    Ok(FrameHeader { status, len })
}

/// Read one length-delimited frame, returning its status and raw body.
pub async fn read_frame<R>(reader: &mut R) -> AdminResult<(u16, String)>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(AdminError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "admin socket closed by peer",
        )));
    }
    let header = parse_header(line.trim_end())?;

    // Body plus its terminating newline.
    let mut body = vec![0u8; header.len + 1];
    reader.read_exact(&mut body).await?;
    if body.pop() != Some(b'\n') {
        return Err(AdminError::Protocol(
            "response body is not newline terminated".into(),
        ));
    }

    Ok((header.status, String::from_utf8_lossy(&body).into_owned()))
}

/// Decode a body: JSON first, then the list repair for `200`, then raw text.
pub fn parse_body(status: u16, raw: &str) -> ResponseBody {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return ResponseBody::Json(value);
    }

    if status == STATUS_OK {
        if let Some(head) = trimmed.strip_suffix(MALFORMED_LIST_TAIL) {
            if let Ok(value) = serde_json::from_str(&format!("{head}]")) {
                return ResponseBody::Json(value);
            }
        }
    }

    ResponseBody::Text(trimmed.to_string())
}

/// First line of a `107` body.
pub fn challenge_token(body: &str) -> AdminResult<&str> {
    let token = body.lines().next().unwrap_or_default().trim();
    if token.is_empty() {
        return Err(AdminError::Protocol("authentication challenge is empty".into()));
    }
    Ok(token)
}

/// `hex(sha256(challenge + "\n" + secret + challenge + "\n"))`
pub fn sign_challenge(challenge: &str, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b"\n");
    hasher.update(secret);
    hasher.update(challenge.as_bytes());
    hasher.update(b"\n");
    hex::encode(hasher.finalize())
}

/// Strip the daemon's trailing help hint from an error body.
pub fn clean_error_message(body: &str) -> String {
    let trimmed = body.trim();
    trimmed
        .strip_suffix(HELP_SUFFIX)
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repairs_malformed_vcl_list() {
        let response =
            Response::parse("200 44\n[ 2, [\"vcl.list\",\"-j\"], 1629933022.312,\n\n]").unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.json(),
            Some(&json!([2, ["vcl.list", "-j"], 1629933022.312]))
        );
    }

    #[test]
    fn repair_only_applies_to_success() {
        let body = parse_body(300, "[ 2, [\"vcl.list\"],\n\n]");
        assert_eq!(body, ResponseBody::Text("[ 2, [\"vcl.list\"],\n\n]".into()));
    }

    #[test]
    fn unrepairable_body_stays_text() {
        assert_eq!(
            parse_body(200, "  VCL compiled.\n"),
            ResponseBody::Text("VCL compiled.".into())
        );
        assert_eq!(
            parse_body(200, "[1, 2,\n\n"),
            ResponseBody::Text("[1, 2,".into())
        );
    }

    #[test]
    fn signs_challenge() {
        let expected = hex::encode(Sha256::digest(b"deadbeef\ns3cretdeadbeef\n"));
        assert_eq!(sign_challenge("deadbeef", b"s3cret"), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn challenge_is_first_line() {
        let body = "ixslvvxrgkjptxmcgnnsdxsvdmvfympg\n\nAuthentication required.\n";
        assert_eq!(
            challenge_token(body).unwrap(),
            "ixslvvxrgkjptxmcgnnsdxsvdmvfympg"
        );
        assert!(challenge_token("\n").is_err());
    }

    #[test]
    fn header_validation() {
        assert_eq!(
            parse_header("200 13      ").unwrap(),
            FrameHeader { status: 200, len: 13 }
        );
        assert!(parse_header("20 13").is_err());
        assert!(parse_header("200").is_err());
        assert!(parse_header("abc 1").is_err());
        assert!(parse_header(&format!("200 {}", MAX_BODY_LEN + 1)).is_err());
    }

    #[test]
    fn error_message_drops_help_hint() {
        assert_eq!(
            clean_error_message("Unknown request.\nType 'help' for more info.\n"),
            "Unknown request."
        );
        assert_eq!(clean_error_message("No VCL named foo"), "No VCL named foo");
    }

    #[test]
    fn non_ok_response_becomes_command_error() {
        let err = Response::from_parts(101, "Unknown request.\nType 'help' for more info.")
            .into_result()
            .unwrap_err();
        match err {
            AdminError::Command { status, message } => {
                assert_eq!(status, 101);
                assert_eq!(message, "Unknown request.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn reads_length_delimited_frames() {
        let challenge = "challenge-token\n\nAuthentication required.\n";
        let wire = format!(
            "107 {:<8}\n{}\n200 {:<8}\n{}\n",
            challenge.len(),
            challenge,
            2,
            "ok"
        );
        let mut reader = tokio::io::BufReader::new(wire.as_bytes());
        let (status, body) = read_frame(&mut reader).await.unwrap();
        assert_eq!(status, 107);
        assert_eq!(challenge_token(&body).unwrap(), "challenge-token");
        let (status, body) = read_frame(&mut reader).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "ok");
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(AdminError::Transport(_))
        ));
    }
}
