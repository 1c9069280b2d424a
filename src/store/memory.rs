//! In-memory store implementation

use super::payload::{decode_payload, encode_payload};
use super::value::Value;
use crate::client::{Command, Store, StoreError};
use crate::protocol::RespValue;
use async_trait::async_trait;
use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Type alias for our hash map with SipHasher
type StoreMap = HashMap<Bytes, Value, BuildHasherDefault<SipHasher13>>;

/// Keys returned per SCAN page unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// In-memory key-value store
///
/// Cloning gives another handle on the same keyspace, the way two clients
/// share one server. SCAN walks the keys in byte order and the cursor is the
/// number of keys already returned, so keys deleted during a scan can make
/// it skip others; the migration tolerates that the same way it tolerates
/// concurrent writes on a real source.
#[derive(Clone)]
pub struct MemoryStore {
    keyspace: Arc<Mutex<StoreMap>>,
    page_size: usize,
}

impl MemoryStore {
    /// Create an empty store with the default SCAN page size
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store returning at most `page_size` keys per SCAN
    pub fn with_page_size(page_size: usize) -> Self {
        MemoryStore {
            keyspace: Arc::new(Mutex::new(StoreMap::default())),
            page_size: page_size.max(1),
        }
    }

    fn keyspace(&self) -> MutexGuard<'_, StoreMap> {
        // Every critical section is a single map operation, poisoning is moot
        self.keyspace.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set a key-value pair, returns true if the key is new
    pub fn set(&self, key: impl Into<Bytes>, value: Value) -> bool {
        self.keyspace().insert(key.into(), value).is_none()
    }

    /// Get a copy of the value stored at `key`
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.keyspace().get(key).cloned()
    }

    /// Delete a key, returns true if the key existed
    pub fn delete(&self, key: &[u8]) -> bool {
        self.keyspace().remove(key).is_some()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keyspace().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, in byte order
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys: Vec<Bytes> = self.keyspace().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Execute one command and produce its reply
    pub fn execute(&self, command: &Command) -> RespValue {
        let name = command.name_lossy().to_uppercase();
        let args = command.args();

        debug!("Executing {} with {} args", name, args.len());

        let arity_ok = match name.as_str() {
            "PING" => args.len() <= 1,
            "DBSIZE" => args.is_empty(),
            "SELECT" | "SCAN" | "DUMP" => args.len() == 1,
            "EXISTS" | "DEL" => !args.is_empty(),
            "RESTORE" => args.len() == 3 || args.len() == 4,
            _ => {
                warn!("Unknown command: {}", name);
                return RespValue::error(format!("ERR unknown command '{}'", name));
            }
        };
        if !arity_ok {
            return RespValue::error(format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            ));
        }

        match name.as_str() {
            "PING" => match args.first() {
                Some(msg) => RespValue::BulkString(msg.clone()),
                None => RespValue::simple_string("PONG"),
            },
            "DBSIZE" => RespValue::integer(self.len() as i64),
            "SELECT" => self.select(&args[0]),
            "SCAN" => self.scan(&args[0]),
            "DUMP" => self.dump(&args[0]),
            "EXISTS" => {
                let keyspace = self.keyspace();
                let count = args.iter().filter(|k| keyspace.contains_key(*k)).count();
                RespValue::integer(count as i64)
            }
            "DEL" => {
                let mut keyspace = self.keyspace();
                let count = args.iter().filter(|k| keyspace.remove(*k).is_some()).count();
                RespValue::integer(count as i64)
            }
            _ => self.restore(args),
        }
    }

    fn select(&self, db: &Bytes) -> RespValue {
        match parse_u64(db) {
            Some(0) => RespValue::ok(),
            Some(_) => RespValue::error("ERR DB index is out of range"),
            None => RespValue::error("ERR value is not an integer or out of range"),
        }
    }

    /// SCAN cursor -> [next cursor, [keys...]]
    fn scan(&self, cursor: &Bytes) -> RespValue {
        let start = match parse_u64(cursor) {
            Some(c) => c as usize,
            None => return RespValue::error("ERR invalid cursor"),
        };

        let keys = self.keys();
        let end = start.saturating_add(self.page_size).min(keys.len());
        let page = if start < keys.len() { &keys[start..end] } else { &[][..] };
        let next = if end >= keys.len() { 0 } else { end };

        RespValue::array(vec![
            RespValue::bulk_string(next.to_string()),
            RespValue::array(page.iter().cloned().map(RespValue::BulkString).collect()),
        ])
    }

    fn dump(&self, key: &Bytes) -> RespValue {
        match self.keyspace().get(key) {
            Some(value) => RespValue::BulkString(encode_payload(value)),
            None => RespValue::Null,
        }
    }

    /// RESTORE key ttl payload [REPLACE]
    ///
    /// Keys here never expire, so the TTL is validated and otherwise ignored.
    fn restore(&self, args: &[Bytes]) -> RespValue {
        let replace = match args.get(3) {
            None => false,
            Some(flag) if flag.eq_ignore_ascii_case(b"REPLACE") => true,
            Some(_) => return RespValue::error("ERR syntax error"),
        };

        if parse_u64(&args[1]).is_none() {
            return RespValue::error("ERR Invalid TTL value, must be >= 0");
        }

        let value = match decode_payload(&args[2]) {
            Ok(value) => value,
            Err(e) => {
                debug!("Rejecting RESTORE payload: {}", e);
                return RespValue::error("ERR DUMP payload version or checksum are wrong");
            }
        };

        let mut keyspace = self.keyspace();
        if !replace && keyspace.contains_key(&args[0]) {
            return RespValue::error("BUSYKEY Target key name already exists.");
        }
        keyspace.insert(args[0].clone(), value);
        RespValue::ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<RespValue>, StoreError> {
        Ok(commands.iter().map(|cmd| self.execute(cmd)).collect())
    }
}

fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
