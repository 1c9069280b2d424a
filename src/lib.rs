//! rump - copy the keyspace of one Redis-compatible store into another
//!
//! Keys are enumerated on the source with SCAN, serialized with DUMP and
//! replayed on the destination with RESTORE. Expiration is not carried over.
//!
//! - `protocol`: RESP2 codec
//! - `client`: the `Store` command channel and its TCP implementation
//! - `config`: connection URIs and migration settings
//! - `migrate`: exporter, importer and the bounded queue between them
//! - `store`: an in-process store speaking the same commands

pub mod protocol;
pub mod client;
pub mod config;
pub mod migrate;
pub mod store;

/// Re-export commonly used types
pub use protocol::{RespValue, RespError};
pub use client::{Command, Connection, Store, StoreError};
pub use config::{ConnectionConfig, MigrationConfig};
pub use migrate::{migrate, MigrateError, MigrationReport};
pub use store::MemoryStore;
