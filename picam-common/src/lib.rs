//! picam Common Library
//!
//! Shared control protocol, command-line arguments and helpers used by both the
//! `picam-service` daemon and the `picamctl` client.

pub mod args;
pub mod discovery;
pub mod ipc;
pub mod logging;
pub mod validation;

pub use args::ControlArgs;
