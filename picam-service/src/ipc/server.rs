//! TCP control endpoint.
//!
//! Strictly one request and one reply per connection. Both the listener and
//! the accepted stream are non-blocking so the daemon loop can poll between
//! frames: request bytes are buffered across polls until a whole frame has
//! arrived, and a client that stays silent is dropped after a deadline.

use picam_common::ipc::{
    bind_address, decode_json, decode_message, write_json, ControlMessage, IpcError, Reply,
    FRAME_HEADER_LEN, MAX_MESSAGE_SIZE,
};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long an accepted client gets to deliver its request
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);
const REPLY_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Request source for the daemon loop.
pub trait ControlChannel {
    /// Non-blocking check for the next valid request.
    fn poll_request(&mut self) -> Option<ControlMessage>;
    /// Answer the request returned by the last successful poll.
    fn reply(&mut self, reply: &Reply);
}

/// Accepted connection whose request is still arriving.
struct Incoming {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Vec<u8>,
    deadline: Instant,
}

/// Result of draining the bytes currently readable on a connection.
enum Progress {
    Waiting,
    Complete(ControlMessage),
    Failed(IpcError),
}

impl Incoming {
    fn new(stream: TcpStream, peer: SocketAddr, timeout: Duration) -> Self {
        Self {
            stream,
            peer,
            buf: Vec::new(),
            deadline: Instant::now() + timeout,
        }
    }

    fn progress(&mut self) -> Progress {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Progress::Failed(IpcError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    match decode_message(&self.buf) {
                        Ok(Some(payload)) => {
                            return match decode_json(payload) {
                                Ok(msg) => Progress::Complete(msg),
                                Err(e) => Progress::Failed(e),
                            };
                        }
                        Ok(None) => {}
                        Err(e) => return Progress::Failed(e),
                    }
                    if self.buf.len() > FRAME_HEADER_LEN + MAX_MESSAGE_SIZE {
                        return Progress::Failed(IpcError::MessageTooLarge {
                            size: self.buf.len(),
                            max: MAX_MESSAGE_SIZE,
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Progress::Failed(e.into()),
            }
        }

        if Instant::now() >= self.deadline {
            Progress::Failed(IpcError::TimedOut)
        } else {
            Progress::Waiting
        }
    }
}

pub struct ControlServer {
    listener: TcpListener,
    request_timeout: Duration,
    incoming: Option<Incoming>,
    pending: Option<(TcpStream, SocketAddr)>,
}

impl ControlServer {
    /// Bind the control port on all interfaces.
    pub fn bind(port: u16) -> std::io::Result<Self> {
        Self::bind_to(bind_address(port))
    }

    pub fn bind_to(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("Control server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            request_timeout: REQUEST_READ_TIMEOUT,
            incoming: None,
            pending: None,
        })
    }

    /// Override how long a client may take to deliver its request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Take the next queued connection, if any. At most one per poll.
    fn accept(&mut self) -> Option<Incoming> {
        let (stream, peer) = match self.listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
            Err(e) => {
                error!("Accept error: {}", e);
                return None;
            }
        };

        debug!("Client connected: {}", peer);
        if let Err(e) = stream.set_nonblocking(true) {
            error!("Failed to configure connection from {}: {}", peer, e);
            return None;
        }
        Some(Incoming::new(stream, peer, self.request_timeout))
    }

    fn respond(stream: &mut TcpStream, peer: SocketAddr, reply: &Reply) {
        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_write_timeout(Some(REPLY_WRITE_TIMEOUT)))
        {
            error!("Failed to configure connection from {}: {}", peer, e);
            return;
        }
        if let Err(e) = write_json(stream, reply) {
            error!("Error writing response to {}: {}", peer, e);
        }
    }
}

impl ControlChannel for ControlServer {
    fn poll_request(&mut self) -> Option<ControlMessage> {
        if self.pending.is_some() {
            warn!("Previous request was never answered, dropping it");
            self.pending = None;
        }

        let mut incoming = match self.incoming.take() {
            Some(incoming) => incoming,
            None => self.accept()?,
        };

        let request = match incoming.progress() {
            Progress::Waiting => {
                self.incoming = Some(incoming);
                return None;
            }
            Progress::Complete(request) => request,
            Progress::Failed(IpcError::ConnectionClosed) => {
                debug!("Client {} disconnected without a request", incoming.peer);
                return None;
            }
            Progress::Failed(IpcError::TimedOut) => {
                warn!("Client {} sent no request in time, dropping it", incoming.peer);
                return None;
            }
            Progress::Failed(e) => {
                error!("Error reading request from {}: {}", incoming.peer, e);
                let response = Reply::error(format!("Invalid request: {}", e));
                Self::respond(&mut incoming.stream, incoming.peer, &response);
                return None;
            }
        };

        // Validate request parameters
        if let Err(e) = request.validate() {
            warn!("Invalid request from {}: {}", incoming.peer, e);
            let response = Reply::error(format!("Invalid request: {}", e));
            Self::respond(&mut incoming.stream, incoming.peer, &response);
            return None;
        }

        self.pending = Some((incoming.stream, incoming.peer));
        Some(request)
    }

    fn reply(&mut self, reply: &Reply) {
        let Some((mut stream, peer)) = self.pending.take() else {
            debug!("No client waiting for reply: {}", reply);
            return;
        };
        Self::respond(&mut stream, peer, reply);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    pub struct MockChannel {
        pub requests: VecDeque<ControlMessage>,
        pub replies: Vec<Reply>,
        pub polls: usize,
    }

    impl ControlChannel for MockChannel {
        fn poll_request(&mut self) -> Option<ControlMessage> {
            self.polls += 1;
            self.requests.pop_front()
        }

        fn reply(&mut self, reply: &Reply) {
            self.replies.push(reply.clone());
        }
    }
}
