//! JSON text framing for the realtime channel.
//!
//! One message per WebSocket text frame; no length prefix.

use crate::error::{KioskError, KioskResult};
use crate::messages::{ClientMessage, ServerMessage};

/// Largest inbound frame accepted from a client (64 KiB).
pub const MAX_INBOUND_FRAME: usize = 64 * 1024;

/// Encode a server message as a JSON text frame.
pub fn encode(msg: &ServerMessage) -> KioskResult<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a client text frame.
pub fn decode(text: &str) -> KioskResult<ClientMessage> {
    if text.len() > MAX_INBOUND_FRAME {
        return Err(KioskError::Codec(format!(
            "frame too large: {} bytes (max {MAX_INBOUND_FRAME})",
            text.len()
        )));
    }
    Ok(serde_json::from_str(text)?)
}
