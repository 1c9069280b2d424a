//! In-process store
//!
//! A small key-value store living in the same process, speaking the same
//! commands the migration uses (SCAN, DUMP, RESTORE and a few helpers). It
//! implements `crate::client::Store`, so a migration can run entirely in
//! memory: for dry runs and for exercising the pipeline without a server.

mod value;
mod payload;
mod memory;

pub use value::Value;
pub use payload::{decode_payload, encode_payload, PayloadError, PAYLOAD_VERSION};
pub use memory::{MemoryStore, DEFAULT_PAGE_SIZE};
