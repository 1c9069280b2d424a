//! Importer: restores published batches on the destination, in order

use super::batch::Batch;
use super::progress::ProgressObserver;
use super::queue::BatchReceiver;
use super::MigrateError;
use crate::client::{display_key, Command, Store, StoreError};
use crate::protocol::RespValue;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// TTL passed to RESTORE: expiration is not carried over
const NO_EXPIRY: u64 = 0;

/// What the importer did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Batches consumed, empty ones included
    pub batches: u64,

    /// Keys restored
    pub keys: u64,
}

/// Destination side of the migration
pub struct Importer<D> {
    destination: D,
    progress: Arc<dyn ProgressObserver>,
}

impl<D: Store> Importer<D> {
    pub fn new(destination: D, progress: Arc<dyn ProgressObserver>) -> Self {
        Importer {
            destination,
            progress,
        }
    }

    /// Drain the queue until it is closed and empty
    ///
    /// Every batch is fully restored before the next one is taken.
    pub async fn run(mut self, queue: &mut BatchReceiver) -> Result<ImportStats, MigrateError> {
        let mut stats = ImportStats::default();

        while let Some(batch) = queue.next_or_done().await.map_err(MigrateError::Queue)? {
            let page = batch.page();
            let len = batch.len();

            self.restore(batch).await.map_err(MigrateError::Import)?;

            stats.batches += 1;
            stats.keys += len as u64;
            self.progress.batch_imported(page, len);
        }

        info!("Import finished: {} batches, {} keys", stats.batches, stats.keys);

        if let Err(e) = self.destination.shutdown().await {
            warn!("Failed to close destination connection: {}", e);
        }

        Ok(stats)
    }

    /// RESTORE every pair of a batch in one round trip
    async fn restore(&mut self, batch: Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            debug!("Page {} is empty, nothing to restore", batch.page());
            return Ok(());
        }

        debug!("Restoring page {} ({} keys)", batch.page(), batch.len());

        let commands: Vec<Command> = batch
            .into_iter()
            .map(|(key, blob)| Command::restore(key, NO_EXPIRY, blob))
            .collect();
        let replies = self.destination.pipeline(&commands).await?;
        if replies.len() != commands.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "{} replies to {} RESTORE commands",
                replies.len(),
                commands.len()
            )));
        }

        for (command, reply) in commands.iter().zip(replies) {
            let key = display_key(&command.args()[0]);
            match reply {
                RespValue::SimpleString(s) if s == "OK" => {}
                RespValue::Error(msg) => {
                    return Err(StoreError::Command(format!("RESTORE {} failed: {}", key, msg)));
                }
                other => {
                    return Err(StoreError::UnexpectedReply(format!(
                        "RESTORE {} returned {}",
                        key, other
                    )));
                }
            }
        }

        Ok(())
    }
}
