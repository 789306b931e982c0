//! Control protocol: TCP server and message handlers.

pub mod handlers;
pub mod server;

pub use handlers::HandlerOutcome;
pub use server::{ControlChannel, ControlServer};
