//! Commands sent to a store

use bytes::Bytes;
use std::borrow::Cow;

/// A store command: the name followed by its arguments, all binary-safe
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    parts: Vec<Bytes>,
}

impl Command {
    /// Start a command with no arguments
    pub fn new(name: &'static str) -> Self {
        Command {
            parts: vec![Bytes::from_static(name.as_bytes())],
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.parts.push(arg.into());
        self
    }

    /// `SCAN cursor`
    ///
    /// No COUNT is given: the store picks the page size.
    pub fn scan(cursor: u64) -> Self {
        Command::new("SCAN").arg(cursor.to_string())
    }

    /// `DUMP key`
    pub fn dump(key: impl Into<Bytes>) -> Self {
        Command::new("DUMP").arg(key)
    }

    /// `RESTORE key ttl blob`, a ttl of 0 meaning no expiration
    pub fn restore(key: impl Into<Bytes>, ttl_ms: u64, blob: impl Into<Bytes>) -> Self {
        Command::new("RESTORE")
            .arg(key)
            .arg(ttl_ms.to_string())
            .arg(blob)
    }

    /// `AUTH password`
    pub fn auth(password: &str) -> Self {
        Command::new("AUTH").arg(password.to_string())
    }

    /// `SELECT db`
    pub fn select(db: u32) -> Self {
        Command::new("SELECT").arg(db.to_string())
    }

    pub fn ping() -> Self {
        Command::new("PING")
    }

    /// The command name
    pub fn name(&self) -> &[u8] {
        &self.parts[0]
    }

    /// The command name, for messages
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name())
    }

    /// Arguments, excluding the command name
    pub fn args(&self) -> &[Bytes] {
        &self.parts[1..]
    }

    /// Name and arguments, in wire order
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }
}
