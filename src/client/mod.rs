//! Store client module
//!
//! Everything the migration core needs from a key-value store goes through
//! the `Store` trait: a command channel that can pipeline several commands
//! in one round trip. `Connection` implements it over TCP (or any async byte
//! stream); `crate::store::MemoryStore` implements it in-process.

mod command;
mod connection;

pub use command::Command;
pub use connection::Connection;

use crate::protocol::{RespError, RespValue};
use async_trait::async_trait;
use base64::Engine;
use std::borrow::Cow;
use std::fmt;

/// A command channel to a key-value store
///
/// Implementations own their connection exclusively; they are moved into
/// (or borrowed by) exactly one task at a time.
#[async_trait]
pub trait Store: Send {
    /// Send every command before reading any reply, then return the replies
    /// in the order the commands were given.
    ///
    /// Error replies (`-ERR ...`) are returned as `RespValue::Error`, not as
    /// `Err`: only transport and protocol failures are errors here.
    async fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<RespValue>, StoreError>;

    /// Send a single command and wait for its reply
    async fn query(&mut self, command: Command) -> Result<RespValue, StoreError> {
        let name = command.name_lossy();
        let mut replies = self.pipeline(std::slice::from_ref(&command)).await?;
        replies
            .pop()
            .ok_or_else(|| StoreError::UnexpectedReply(format!("no reply to {}", name)))
    }

    /// Release the underlying connection
    async fn shutdown(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Errors raised while talking to a store
#[derive(Debug)]
pub enum StoreError {
    /// Dial, read or write failure
    Io(std::io::Error),

    /// The peer sent bytes that are not valid RESP2
    Protocol(RespError),

    /// The peer closed the connection while replies were pending
    Closed,

    /// The store answered with an error reply
    Command(String),

    /// The reply does not have the shape the command calls for
    UnexpectedReply(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Protocol(e) => write!(f, "Protocol error: {}", e),
            StoreError::Closed => write!(f, "Connection closed by peer"),
            StoreError::Command(msg) => write!(f, "{}", msg),
            StoreError::UnexpectedReply(msg) => write!(f, "Unexpected reply: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<RespError> for StoreError {
    fn from(e: RespError) -> Self {
        StoreError::Protocol(e)
    }
}

/// Turn an error reply into `StoreError::Command`
pub fn check_reply(reply: RespValue) -> Result<RespValue, StoreError> {
    match reply {
        RespValue::Error(msg) => Err(StoreError::Command(msg)),
        other => Ok(other),
    }
}

/// Accept only `+OK`
pub fn expect_ok(reply: RespValue) -> Result<(), StoreError> {
    match check_reply(reply)? {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(StoreError::UnexpectedReply(format!("expected OK, got {}", other))),
    }
}

/// Render a binary key for log output
///
/// Printable UTF-8 is shown as is, anything else as base64.
pub fn display_key(key: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(key) {
        Ok(s) if !s.chars().any(char::is_control) => Cow::Borrowed(s),
        _ => Cow::Owned(format!(
            "base64:{}",
            base64::engine::general_purpose::STANDARD.encode(key)
        )),
    }
}
