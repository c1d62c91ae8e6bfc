//! JSON-lines chat relay over TCP
//!
//! The relay (a small bridge to the streaming platform) writes one object
//! per line:
//!
//! ```json
//! {"sender_id": "1234", "tier": "follower", "level": 7, "text": "a"}
//! ```
//!
//! `tier` is `viewer`, `follower` or `super_user`; `sender_id` may be a
//! string or a number. Lines that do not parse are skipped.

use crate::collaborators::{ChatConnector, ChatError, ChatPoll, ChatSession};
use crate::types::{ChatEvent, PrivilegeTier};
use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

const READ_CHUNK: usize = 4096;
/// A relay line longer than this is garbage; the buffer is reset
const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SenderId {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
enum WireTier {
    #[default]
    Viewer,
    Follower,
    SuperUser,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    sender_id: SenderId,
    #[serde(default)]
    tier: WireTier,
    #[serde(default)]
    level: u32,
    text: String,
}

impl From<WireMessage> for ChatEvent {
    fn from(msg: WireMessage) -> Self {
        let sender_id = match msg.sender_id {
            SenderId::Text(id) => id,
            SenderId::Number(id) => id.to_string(),
        };
        let tier = match msg.tier {
            WireTier::Viewer => PrivilegeTier::Viewer,
            WireTier::Follower => PrivilegeTier::Follower { level: msg.level },
            WireTier::SuperUser => PrivilegeTier::SuperUser,
        };
        ChatEvent::new(sender_id, tier, msg.text)
    }
}

/// Parse one relay line; `None` for anything that is not a chat message
pub fn parse_line(line: &str) -> Option<ChatEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str::<WireMessage>(line).ok().map(ChatEvent::from)
}

/// Connects to the relay at `addr`
#[derive(Debug, Clone)]
pub struct TcpChatConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpChatConnector {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

impl ChatConnector for TcpChatConnector {
    fn connect(&self) -> Result<Box<dyn ChatSession>, ChatError> {
        let addrs = self
            .addr
            .to_socket_addrs()
            .map_err(|e| ChatError::Connect(format!("{}: {}", self.addr, e)))?;

        let mut last_error = format!("{}: no addresses", self.addr);
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(Box::new(TcpChatSession::new(stream))),
                Err(e) => last_error = format!("{}: {}", addr, e),
            }
        }
        Err(ChatError::Connect(last_error))
    }
}

/// One relay connection with a partial-line buffer
pub struct TcpChatSession {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TcpChatSession {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Next complete line already buffered, skipping unparseable ones
    fn buffered_event(&mut self) -> Option<ChatEvent> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            match parse_line(&text) {
                Some(event) => return Some(event),
                None => debug!("Skipping unparseable chat line"),
            }
        }
        None
    }
}

impl ChatSession for TcpChatSession {
    fn next_event(&mut self, timeout: Duration) -> ChatPoll {
        if let Some(event) = self.buffered_event() {
            return ChatPoll::Event(event);
        }

        // A zero read timeout means "block forever" to the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        if let Err(e) = self.stream.set_read_timeout(Some(timeout)) {
            return ChatPoll::Disconnected(e.to_string());
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => ChatPoll::Disconnected("relay closed the connection".to_string()),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                if self.buffer.len() > MAX_LINE && !self.buffer.contains(&b'\n') {
                    self.buffer.clear();
                }
                match self.buffered_event() {
                    Some(event) => ChatPoll::Event(event),
                    None => ChatPoll::Timeout,
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                ChatPoll::Timeout
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => ChatPoll::Timeout,
            Err(e) => ChatPoll::Disconnected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_parse_line_tiers() {
        let event = parse_line(r#"{"sender_id": 77, "tier": "follower", "level": 4, "text": "b"}"#)
            .unwrap();
        assert_eq!(event.sender_id, "77");
        assert_eq!(event.tier, PrivilegeTier::Follower { level: 4 });

        let event = parse_line(r#"{"sender_id": "x", "tier": "super_user", "text": "a"}"#).unwrap();
        assert_eq!(event.tier, PrivilegeTier::SuperUser);

        let event = parse_line(r#"{"sender_id": "y", "text": "hello"}"#).unwrap();
        assert_eq!(event.tier, PrivilegeTier::Viewer);
    }

    #[test]
    fn test_parse_line_drops_malformed() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not json").is_none());
        assert!(parse_line(r#"{"text": "a"}"#).is_none());
        assert!(parse_line(r#"{"sender_id": "y", "tier": "admin", "text": "a"}"#).is_none());
    }

    #[test]
    fn test_session_reads_split_lines_and_detects_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"garbage\n{\"sender_id\": \"1\", \"te").unwrap();
            conn.flush().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            conn.write_all(b"xt\": \"a\"}\n").unwrap();
        });

        let connector = TcpChatConnector::new(addr.to_string(), Duration::from_secs(1));
        let mut session = connector.connect().unwrap();

        let mut events = Vec::new();
        let mut disconnected = false;
        for _ in 0..50 {
            match session.next_event(Duration::from_millis(100)) {
                ChatPoll::Event(event) => events.push(event),
                ChatPoll::Timeout => {}
                ChatPoll::Disconnected(_) => {
                    disconnected = true;
                    break;
                }
            }
        }
        relay.join().unwrap();

        assert_eq!(events, vec![ChatEvent::new("1", PrivilegeTier::Viewer, "a")]);
        assert!(disconnected);
    }
}
