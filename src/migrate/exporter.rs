//! Exporter: walks the source keyspace and publishes one batch per scan page

use super::batch::{Batch, Cursor};
use super::progress::ProgressObserver;
use super::queue::BatchSender;
use super::MigrateError;
use crate::client::{check_reply, display_key, Command, Store, StoreError};
use crate::protocol::RespValue;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the exporter did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    /// Scan pages fetched (and batches published)
    pub pages: u64,

    /// Keys dumped into batches
    pub keys: u64,

    /// Keys returned by SCAN that were gone by the time of DUMP
    pub skipped: u64,
}

/// Source side of the migration
pub struct Exporter<S> {
    source: S,
    progress: Arc<dyn ProgressObserver>,
}

impl<S: Store> Exporter<S> {
    pub fn new(source: S, progress: Arc<dyn ProgressObserver>) -> Self {
        Exporter { source, progress }
    }

    /// Scan the whole keyspace, publishing every page, then close the queue
    ///
    /// On error the queue is dropped without being closed, so the importer
    /// learns the export did not complete. A page whose DUMPs failed is never
    /// published.
    pub async fn run(mut self, queue: BatchSender) -> Result<ExportStats, MigrateError> {
        let stats = self.export(&queue).await?;
        queue.close();

        info!(
            "Export finished: {} pages, {} keys, {} vanished before DUMP",
            stats.pages, stats.keys, stats.skipped
        );

        if let Err(e) = self.source.shutdown().await {
            warn!("Failed to close source connection: {}", e);
        }

        Ok(stats)
    }

    async fn export(&mut self, queue: &BatchSender) -> Result<ExportStats, MigrateError> {
        let mut stats = ExportStats::default();
        let mut cursor = Cursor::START;

        // The start cursor equals the completion cursor, so the end test only
        // ever looks at a cursor SCAN returned.
        loop {
            let (next, keys) = self.scan(cursor).await.map_err(MigrateError::Export)?;
            let batch = self
                .dump_page(stats.pages, keys, &mut stats)
                .await
                .map_err(MigrateError::Export)?;

            debug!(
                "Publishing page {} ({} keys, {} bytes), next cursor {}",
                batch.page(),
                batch.len(),
                batch.size_bytes(),
                next
            );

            let page = batch.page();
            let len = batch.len();
            queue.publish(batch).await.map_err(MigrateError::Queue)?;
            stats.pages += 1;
            stats.keys += len as u64;
            self.progress.page_exported(page, len);

            if next.is_complete() {
                return Ok(stats);
            }
            cursor = next;
        }
    }

    /// SCAN one page
    async fn scan(&mut self, cursor: Cursor) -> Result<(Cursor, Vec<Bytes>), StoreError> {
        let reply = check_reply(self.source.query(Command::scan(cursor.value())).await?)?;
        parse_scan_reply(reply)
    }

    /// DUMP every key of a page in one round trip
    async fn dump_page(
        &mut self,
        page: u64,
        keys: Vec<Bytes>,
        stats: &mut ExportStats,
    ) -> Result<Batch, StoreError> {
        let mut batch = Batch::with_capacity(page, keys.len());
        if keys.is_empty() {
            return Ok(batch);
        }

        let commands: Vec<Command> = keys.iter().map(|key| Command::dump(key.clone())).collect();
        let replies = self.source.pipeline(&commands).await?;
        if replies.len() != keys.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "{} replies to {} DUMP commands",
                replies.len(),
                keys.len()
            )));
        }

        for (key, reply) in keys.into_iter().zip(replies) {
            match reply {
                RespValue::BulkString(blob) => {
                    batch.insert(key, blob);
                }
                RespValue::Null => {
                    debug!("Key {} vanished before DUMP, skipping", display_key(&key));
                    stats.skipped += 1;
                }
                RespValue::Error(msg) => {
                    return Err(StoreError::Command(format!(
                        "DUMP {} failed: {}",
                        display_key(&key),
                        msg
                    )));
                }
                other => {
                    return Err(StoreError::UnexpectedReply(format!(
                        "DUMP {} returned {}",
                        display_key(&key),
                        other
                    )));
                }
            }
        }

        Ok(batch)
    }
}

/// Split a SCAN reply into the next cursor and the page of keys
fn parse_scan_reply(reply: RespValue) -> Result<(Cursor, Vec<Bytes>), StoreError> {
    let malformed = |what: &str| StoreError::UnexpectedReply(format!("SCAN reply: {}", what));

    let mut parts = match reply {
        RespValue::Array(parts) if parts.len() == 2 => parts,
        other => return Err(malformed(&other.to_string())),
    };
    let keys = parts.pop().unwrap_or(RespValue::Null);
    let cursor = parts.pop().unwrap_or(RespValue::Null);

    let cursor = match cursor {
        RespValue::BulkString(b) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| malformed("cursor is not a number"))?,
        RespValue::Integer(i) if i >= 0 => i as u64,
        _ => return Err(malformed("cursor is not a number")),
    };

    let keys = match keys {
        RespValue::Array(keys) => keys
            .into_iter()
            .map(|k| k.into_bulk_string().ok_or_else(|| malformed("key is not a bulk string")))
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(malformed("keys are not an array")),
    };

    Ok((Cursor::new(cursor), keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::progress::NoProgress;
    use crate::migrate::queue;
    use crate::store::{decode_payload, MemoryStore, Value};

    #[test]
    fn test_parse_scan_reply() {
        let reply = RespValue::array(vec![
            RespValue::bulk_string("17"),
            RespValue::array(vec![RespValue::bulk_string("a"), RespValue::bulk_string("b")]),
        ]);
        let (cursor, keys) = parse_scan_reply(reply).unwrap();
        assert_eq!(cursor, Cursor::new(17));
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[test]
    fn test_parse_scan_reply_rejects_garbage() {
        assert!(parse_scan_reply(RespValue::simple_string("OK")).is_err());
        assert!(parse_scan_reply(RespValue::array(vec![
            RespValue::bulk_string("x"),
            RespValue::array(vec![]),
        ]))
        .is_err());
    }

    #[tokio::test]
    async fn test_pages_then_close() {
        let source = MemoryStore::with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            source.set(key, Value::string(key.to_uppercase()));
        }

        let (tx, mut rx) = queue::bounded(10);
        let stats = Exporter::new(source.clone(), Arc::new(NoProgress))
            .run(tx)
            .await
            .unwrap();

        assert_eq!(stats, ExportStats { pages: 3, keys: 5, skipped: 0 });

        let mut pages = Vec::new();
        while let Some(batch) = rx.next_or_done().await.unwrap() {
            pages.push((batch.page(), batch.len()));
            for (key, blob) in batch {
                assert_eq!(Some(decode_payload(&blob).unwrap()), source.get(&key));
            }
        }
        assert_eq!(pages, vec![(0, 2), (1, 2), (2, 1)]);
    }

    #[tokio::test]
    async fn test_empty_source_publishes_one_empty_batch() {
        let (tx, mut rx) = queue::bounded(10);
        let stats = Exporter::new(MemoryStore::new(), Arc::new(NoProgress))
            .run(tx)
            .await
            .unwrap();

        assert_eq!(stats.pages, 1);
        let batch = rx.next_or_done().await.unwrap().unwrap();
        assert!(batch.is_empty());
        assert_eq!(rx.next_or_done().await, Ok(None));
    }
}
