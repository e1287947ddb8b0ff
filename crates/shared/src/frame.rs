//! STOMP 1.2 text framing.
//!
//! A frame is `COMMAND\n(header:value\n)*\nbody\0`. A lone EOL between frames is a
//! heartbeat. One transport message may carry any number of frames.

use crate::error::NotifyError;

/// What peers exchange on an idle connection.
pub const HEARTBEAT_EOL: &str = "\n";

/// STOMP frame commands understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, NotifyError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => {
                return Err(NotifyError::protocol(format!(
                    "unknown frame command {other:?}"
                )))
            }
        })
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body with its content headers.
    #[must_use]
    pub fn json_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        let len = self.body.len().to_string();
        self.header("content-type", "application/json")
            .header("content-length", len)
    }

    /// First value for `name`. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.get("destination")
    }

    /// Serialize to wire text, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse every frame in a transport message. Heartbeat-only input yields an empty vec.
    ///
    /// Strict: the first malformed frame fails the whole message. Readers of untrusted
    /// input use [`Frame::decode_each`] instead.
    pub fn decode_all(text: &str) -> Result<Vec<Frame>, NotifyError> {
        let (frames, errors) = Self::decode_each(text);
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(frames),
        }
    }

    /// Parse every frame in a transport message, skipping malformed ones.
    ///
    /// A frame that fails to decode is dropped up to the next NUL and decoding resumes
    /// after it, so one bad frame never costs its neighbours.
    pub fn decode_each(text: &str) -> (Vec<Frame>, Vec<NotifyError>) {
        let bytes = text.as_bytes();
        let mut frames = Vec::new();
        let mut errors = Vec::new();
        let mut pos = 0;
        loop {
            while pos < bytes.len() && matches!(bytes[pos], b'\n' | b'\r') {
                pos += 1;
            }
            if pos >= bytes.len() {
                return (frames, errors);
            }
            match decode_one(text, pos) {
                Ok((frame, next)) => {
                    frames.push(frame);
                    pos = next;
                }
                Err(err) => {
                    errors.push(err);
                    pos = match text[pos..].find('\0') {
                        Some(nul) => pos + nul + 1,
                        None => bytes.len(),
                    };
                }
            }
        }
    }
}

fn next_line(text: &str, from: usize) -> Result<(&str, usize), NotifyError> {
    let rest = &text[from..];
    let end = rest
        .find('\n')
        .ok_or_else(|| NotifyError::protocol("truncated frame header"))?;
    let line = rest[..end].strip_suffix('\r').unwrap_or(&rest[..end]);
    Ok((line, from + end + 1))
}

fn decode_one(text: &str, start: usize) -> Result<(Frame, usize), NotifyError> {
    let (command_line, mut pos) = next_line(text, start)?;
    let command = Command::parse(command_line)?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = next_line(text, pos)?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| NotifyError::protocol(format!("header without colon: {line:?}")))?;
        if unescape {
            headers.push((unescape_header(k)?, unescape_header(v)?));
        } else {
            headers.push((k.to_string(), v.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| NotifyError::protocol(format!("bad content-length {v:?}")))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => match pos.checked_add(len).filter(|&end| end < text.len()) {
            Some(end) if text.as_bytes()[end] == 0 => end,
            Some(_) => {
                return Err(NotifyError::protocol(
                    "body does not end with NUL at content-length",
                ))
            }
            None => {
                return Err(NotifyError::protocol(format!(
                    "content-length {len} runs past the end of the message"
                )))
            }
        },
        None => {
            pos + text[pos..]
                .find('\0')
                .ok_or_else(|| NotifyError::protocol("frame body missing NUL terminator"))?
        }
    };
    let body = text
        .get(pos..body_end)
        .ok_or_else(|| NotifyError::protocol("content-length splits a UTF-8 character"))?
        .to_string();

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    ))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(NotifyError::protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
