//! Out-of-band rcon datagram format
//!
//! Requests are a single UDP datagram made of four `0xFF` bytes followed by the
//! ASCII text `rcon <password> <command>`. The server answers with one datagram
//! carrying the same marker, a `print` header line and the command output.

/// Prefix of every connectionless packet in both directions.
pub const OOB_MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

pub const DEFAULT_PORT: u16 = 27960;
pub const DEFAULT_COMMAND: &str = "status";

/// Size of the receive buffer for a reply datagram.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

const PRINT_HEADER: &str = "print\n";

/// Builds the request datagram for an rcon command.
pub fn encode_rcon_request(password: &str, command: &str) -> Vec<u8> {
    let body = format!("rcon {} {}", password, command);
    let mut data = Vec::with_capacity(OOB_MARKER.len() + body.len());
    data.extend_from_slice(&OOB_MARKER);
    data.extend_from_slice(body.as_bytes());
    data
}

/// Decodes a reply datagram into text.
///
/// Never fails: bytes that are not valid UTF-8 are replaced with U+FFFD.
pub fn decode_reply(data: &[u8]) -> String {
    let payload = data.strip_prefix(&OOB_MARKER[..]).unwrap_or(data);
    let text = String::from_utf8_lossy(payload);
    match text.strip_prefix(PRINT_HEADER) {
        Some(rest) => rest.to_string(),
        None => text.into_owned(),
    }
}
