//! Control message framing and transport endpoint.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Maximum control message size (64 KB)
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Well-known TCP port the daemon binds on all interfaces.
pub const DEFAULT_CONTROL_PORT: u16 = 5555;

/// Size of the little-endian length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// How long a client waits for the daemon's reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for IPC operations.
#[derive(Debug)]
pub enum IpcError {
    /// I/O error during read/write
    Io(std::io::Error),
    /// Message exceeds maximum size
    MessageTooLarge { size: usize, max: usize },
    /// JSON parsing failed
    ParseError(String),
    /// Connection closed
    ConnectionClosed,
    /// Peer did not answer within the read timeout
    TimedOut,
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::Io(e) => write!(f, "I/O error: {}", e),
            IpcError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            IpcError::ParseError(e) => write!(f, "Parse error: {}", e),
            IpcError::ConnectionClosed => write!(f, "Connection closed"),
            IpcError::TimedOut => write!(f, "Timed out waiting for peer"),
        }
    }
}

impl std::error::Error for IpcError {}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => IpcError::ConnectionClosed,
            // Read timeouts surface as WouldBlock on Unix and TimedOut on Windows
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => IpcError::TimedOut,
            _ => IpcError::Io(e),
        }
    }
}

/// Address the daemon listens on (all interfaces).
pub fn bind_address(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}

/// Address a local client connects to.
pub fn local_address(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

/// Read a length-prefixed message with size validation.
///
/// Message format:
/// ```text
/// ┌──────────────────┬─────────────────────────────────┐
/// │ Length (4 bytes) │ JSON Payload (variable length)  │
/// │ Little-endian    │ Max 65,536 bytes                │
/// └──────────────────┴─────────────────────────────────┘
/// ```
pub fn read_message<R: Read>(reader: &mut R) -> Result<Vec<u8>, IpcError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Validate size BEFORE allocating
    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    Ok(buf)
}

/// Split one length-prefixed message off the front of a partially received
/// buffer. Returns `Ok(None)` until the whole frame has arrived.
pub fn decode_message(buf: &[u8]) -> Result<Option<&[u8]>, IpcError> {
    let Some(len_buf) = buf.get(..FRAME_HEADER_LEN) else {
        return Ok(None);
    };
    let mut prefix = [0u8; FRAME_HEADER_LEN];
    prefix.copy_from_slice(len_buf);
    let len = u32::from_le_bytes(prefix) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(buf.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len))
}

/// Deserialize a JSON payload.
pub fn decode_json<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, IpcError> {
    serde_json::from_slice(data).map_err(|e| IpcError::ParseError(e.to_string()))
}

/// Write a length-prefixed message.
pub fn write_message<W: Write>(writer: &mut W, data: &[u8]) -> Result<(), IpcError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)?;
    writer.flush()?;

    Ok(())
}

/// Read and deserialize a JSON message.
pub fn read_json<R: Read, T: serde::de::DeserializeOwned>(reader: &mut R) -> Result<T, IpcError> {
    let data = read_message(reader)?;
    decode_json(&data)
}

/// Serialize and write a JSON message.
pub fn write_json<W: Write, T: serde::Serialize>(writer: &mut W, value: &T) -> Result<(), IpcError> {
    let data = serde_json::to_vec(value).map_err(|e| IpcError::ParseError(e.to_string()))?;
    write_message(writer, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_message_roundtrip() {
        let original = b"hello world";
        let mut buf = Vec::new();

        write_message(&mut buf, original).unwrap();

        let mut cursor = Cursor::new(buf);
        let read = read_message(&mut cursor).unwrap();

        assert_eq!(read, original);
    }

    #[test]
    fn test_message_too_large() {
        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();

        let result = write_message(&mut buf, &oversized);
        assert!(matches!(result, Err(IpcError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_oversized_length_prefix_rejected_before_read() {
        let mut buf = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");

        let result = read_message(&mut Cursor::new(buf));
        assert!(matches!(result, Err(IpcError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_truncated_stream_is_connection_closed() {
        let buf = 10u32.to_le_bytes().to_vec();
        let result = read_message(&mut Cursor::new(buf));
        assert!(matches!(result, Err(IpcError::ConnectionClosed)));
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"{\"exit\":true}").unwrap();

        assert_eq!(decode_message(&buf[..2]).unwrap(), None);
        assert_eq!(decode_message(&buf[..buf.len() - 1]).unwrap(), None);
        assert_eq!(decode_message(&buf).unwrap(), Some(&b"{\"exit\":true}"[..]));
    }

    #[test]
    fn test_decode_rejects_oversized_prefix() {
        let buf = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes();
        assert!(matches!(
            decode_message(&buf),
            Err(IpcError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_bind_address_is_all_interfaces() {
        assert_eq!(bind_address(5555).to_string(), "0.0.0.0:5555");
        assert_eq!(local_address(5555).to_string(), "127.0.0.1:5555");
    }
}
