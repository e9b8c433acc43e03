//! Acknowledgement protocol.
//!
//! There is no framing: whatever arrives in a single read is one message,
//! and every message is answered with the same fixed text.

/// Response written back for every received message.
pub const ACK: &[u8] = b"Mensagem recebida pelo servidor";

/// Build the response for a received payload.
///
/// The payload content never affects the response.
pub fn acknowledge(_payload: &[u8]) -> &'static [u8] {
    ACK
}

/// Decode a payload as text for logging. Invalid UTF-8 is replaced.
pub fn display_text(payload: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(payload)
}
