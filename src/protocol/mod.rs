//! RESP2 protocol implementation
//!
//! Parsing and encoding of the Redis Serialization Protocol (RESP2), shared by
//! the client connection and the in-process store. It depends on nothing else
//! in the crate.

mod types;
mod resp;

pub use types::{RespValue, RespError};
pub use resp::{RespParser, RespEncoder};
