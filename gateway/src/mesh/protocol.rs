//! UDP wire format: `<service>|HEARTBEAT|<json>` and `<service>|GOODBYE|<json>`.

use crate::mesh::types::MeshServerBroadcastData;
use std::fmt;

const SEPARATOR: char = '|';

/// Kind of a mesh datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Periodic "I am alive" status.
    Heartbeat,
    /// Sent once on shutdown.
    Goodbye,
}

impl MessageKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::Goodbye => "GOODBYE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMessage {
    /// Heartbeat or goodbye.
    pub kind: MessageKind,
    /// Status of the sender.
    pub status: MeshServerBroadcastData,
}

/// Why a datagram was dropped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The datagram belongs to another service.
    #[error("message for service '{0}' ignored")]
    NotForUs(String),
    /// Fewer than three `|`-separated fields, or not ASCII.
    #[error("malformed mesh message")]
    Malformed,
    /// Second field is neither HEARTBEAT nor GOODBYE.
    #[error("unknown mesh message kind '{0}'")]
    UnknownKind(String),
    /// The status payload did not deserialize.
    #[error("invalid mesh status json: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Decodes a datagram addressed to `service_name`.
///
/// # Errors
///
/// Returns a [`ProtocolError`] describing why the datagram is unusable.
pub fn decode(bytes: &[u8], service_name: &str) -> Result<MeshMessage, ProtocolError> {
    if !bytes.is_ascii() {
        return Err(ProtocolError::Malformed);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::Malformed)?;

    let mut parts = text.splitn(3, SEPARATOR);
    let (Some(service), Some(kind), Some(json)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::Malformed);
    };

    if service != service_name {
        return Err(ProtocolError::NotForUs(service.to_owned()));
    }

    let kind = match kind {
        "HEARTBEAT" => MessageKind::Heartbeat,
        "GOODBYE" => MessageKind::Goodbye,
        other => return Err(ProtocolError::UnknownKind(other.to_owned())),
    };

    let status = serde_json::from_str(json)?;
    Ok(MeshMessage { kind, status })
}

/// Encodes a datagram for `service_name`.
///
/// # Errors
///
/// Fails only if the status cannot be serialized.
pub fn encode(
    service_name: &str,
    kind: MessageKind,
    status: &MeshServerBroadcastData,
) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_string(status)?;
    // serde_json escapes non-ASCII only when asked; keep the datagram ASCII.
    let json = ascii_escape(&json);
    Ok(format!("{service_name}{SEPARATOR}{kind}{SEPARATOR}{json}").into_bytes())
}

fn ascii_escape(json: &str) -> String {
    if json.is_ascii() {
        return json.to_owned();
    }
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
