//! Control client for a running picam daemon.
//!
//! Sends exactly one request per connection and waits a bounded time for
//! the reply.

use picam_common::ipc::{read_json, write_json, ControlMessage, IpcError, Reply};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::exit_codes::ExitCode;

/// Error type for client operations.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum ClientError {
    /// Daemon is not listening
    ConnectionFailed(String),
    /// Failed to send request
    SendFailed(String),
    /// Failed to receive or decode the reply
    ReceiveFailed(String),
    /// No reply within the timeout
    Timeout,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            ClientError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            ClientError::ReceiveFailed(msg) => write!(f, "Receive failed: {}", msg),
            ClientError::Timeout => write!(f, "Message receival not confirmed"),
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    /// Convert to an appropriate exit code.
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            ClientError::Timeout => ExitCode::ReplyTimeout,
            ClientError::ConnectionFailed(_)
            | ClientError::SendFailed(_)
            | ClientError::ReceiveFailed(_) => ExitCode::ServiceConnectionFailed,
        }
    }
}

/// Send one control message to the daemon at `addr` and wait for its reply.
pub fn send_request(
    addr: SocketAddr,
    msg: &ControlMessage,
    timeout: Duration,
) -> Result<Reply, ClientError> {
    let mut stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| ClientError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

    write_json(&mut stream, msg).map_err(|e| match e {
        IpcError::TimedOut => ClientError::Timeout,
        other => ClientError::SendFailed(other.to_string()),
    })?;

    read_json(&mut stream).map_err(|e| match e {
        IpcError::TimedOut => ClientError::Timeout,
        other => ClientError::ReceiveFailed(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_common::ipc::local_address;
    use std::net::TcpListener;

    fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind(local_address(0)).unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn reply_is_returned() {
        let (listener, addr) = listener();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let msg: ControlMessage = read_json(&mut stream).unwrap();
            write_json(&mut stream, &Reply::video_already_running()).unwrap();
            msg
        });

        let reply = send_request(addr, &ControlMessage::default(), Duration::from_secs(5)).unwrap();
        assert_eq!(reply.message, "Video already running");
        assert_eq!(server.join().unwrap(), ControlMessage::default());
    }

    #[test]
    fn silent_daemon_times_out() {
        let (listener, addr) = listener();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _: ControlMessage = read_json(&mut stream).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });

        let err = send_request(addr, &ControlMessage::exit(), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert_eq!(err.to_exit_code(), ExitCode::ReplyTimeout);
        assert_eq!(err.to_string(), "Message receival not confirmed");
        server.join().unwrap();
    }

    #[test]
    fn closed_port_is_connection_failure() {
        let (listener, addr) = listener();
        drop(listener);
        let err = send_request(addr, &ControlMessage::exit(), Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.to_exit_code(), ExitCode::ServiceConnectionFailed);
    }
}
