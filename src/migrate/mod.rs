//! Keyspace migration
//!
//! The exporter runs as its own task: it scans the source and publishes one
//! batch of (key, DUMP blob) pairs per page on a bounded queue. The importer
//! runs on the calling task and RESTOREs each batch on the destination, in
//! the order they were published. The queue is the only thing the two share;
//! its capacity bounds how far the exporter can run ahead.

mod batch;
mod exporter;
mod importer;
mod progress;
pub mod queue;

pub use batch::{Batch, Cursor};
pub use exporter::{ExportStats, Exporter};
pub use importer::{ImportStats, Importer};
pub use progress::{NoProgress, ProgressObserver, TerminalProgress};
pub use queue::{BatchReceiver, BatchSender, QueueError};

use crate::client::{Store, StoreError};
use crate::config::MigrationConfig;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

/// Summary of a completed migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Scan pages fetched from the source
    pub pages: u64,

    /// Batches restored on the destination
    pub batches: u64,

    /// Keys dumped from the source
    pub keys_exported: u64,

    /// Keys that disappeared between SCAN and DUMP
    pub keys_skipped: u64,

    /// Keys restored on the destination
    pub keys_restored: u64,

    /// Wall-clock duration
    pub elapsed_ms: u64,
}

/// Copy every key of `source` into `destination`
///
/// Any store error ends the migration; nothing is retried and keys already
/// restored stay on the destination. Both stores are shut down on success and
/// dropped on failure.
pub async fn migrate<S, D>(
    source: S,
    destination: D,
    config: &MigrationConfig,
    progress: Arc<dyn ProgressObserver>,
) -> Result<MigrationReport, MigrateError>
where
    S: Store + 'static,
    D: Store,
{
    if config.queue_capacity == 0 {
        return Err(MigrateError::InvalidConfig(
            "queue capacity must be at least 1".to_string(),
        ));
    }

    info!("Starting migration, queue capacity {} batches", config.queue_capacity);
    let started = Instant::now();

    let (tx, mut rx) = queue::bounded(config.queue_capacity);
    let export_task = tokio::spawn(Exporter::new(source, progress.clone()).run(tx));

    let import_result = Importer::new(destination, progress.clone()).run(&mut rx).await;
    drop(rx);

    let (exported, imported) = match import_result {
        Ok(imported) => (join_exporter(export_task).await?, imported),
        Err(MigrateError::Queue(QueueError::Abandoned)) => {
            // The exporter stopped early, its own error says why
            return Err(match join_exporter(export_task).await {
                Err(e) => e,
                Ok(_) => MigrateError::Queue(QueueError::Abandoned),
            });
        }
        Err(e) => {
            error!("Import failed, stopping export: {}", e);
            export_task.abort();
            return Err(e);
        }
    };

    let report = MigrationReport {
        pages: exported.pages,
        batches: imported.batches,
        keys_exported: exported.keys,
        keys_skipped: exported.skipped,
        keys_restored: imported.keys,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    info!(
        "Migration complete: {} keys in {} batches ({} ms)",
        report.keys_restored, report.batches, report.elapsed_ms
    );
    progress.finished(&report);

    Ok(report)
}

/// Wait for the exporter task and surface its outcome, panics included
async fn join_exporter(
    handle: JoinHandle<Result<ExportStats, MigrateError>>,
) -> Result<ExportStats, MigrateError> {
    handle.await.unwrap_or_else(|e| Err(MigrateError::from(e)))
}

/// Migration errors
#[derive(Debug)]
pub enum MigrateError {
    /// SCAN or DUMP failed on the source
    Export(StoreError),

    /// RESTORE failed on the destination
    Import(StoreError),

    /// The other side of the queue went away
    Queue(QueueError),

    /// The exporter task panicked or was cancelled
    ExporterPanicked(String),

    /// Unusable migration settings
    InvalidConfig(String),
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateError::Export(e) => write!(f, "export failed: {}", e),
            MigrateError::Import(e) => write!(f, "import failed: {}", e),
            MigrateError::Queue(e) => write!(f, "{}", e),
            MigrateError::ExporterPanicked(msg) => write!(f, "exporter task died: {}", msg),
            MigrateError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for MigrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrateError::Export(e) | MigrateError::Import(e) => Some(e),
            MigrateError::Queue(e) => Some(e),
            _ => None,
        }
    }
}

impl From<JoinError> for MigrateError {
    fn from(e: JoinError) -> Self {
        if !e.is_panic() {
            return MigrateError::ExporterPanicked(e.to_string());
        }

        let payload = e.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        MigrateError::ExporterPanicked(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Command;
    use crate::protocol::RespValue;
    use crate::store::{MemoryStore, Value};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Counts batches created by the exporter and taken up by the importer
    #[derive(Clone, Default)]
    struct InFlight {
        created: Arc<AtomicI64>,
        taken: Arc<AtomicI64>,
        max: Arc<AtomicI64>,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Side {
        Source,
        Destination,
    }

    /// MemoryStore wrapper that records commands and injects faults
    #[derive(Clone)]
    struct Instrumented {
        inner: MemoryStore,
        calls: Arc<Mutex<Vec<Vec<Command>>>>,
        fail_dump_of: Option<Bytes>,
        vanish_after_scan: Option<Bytes>,
        panic_on_scan: bool,
        delay: Duration,
        in_flight: Option<(InFlight, Side)>,
    }

    impl Instrumented {
        fn new(inner: MemoryStore) -> Self {
            Instrumented {
                inner,
                calls: Arc::default(),
                fail_dump_of: None,
                vanish_after_scan: None,
                panic_on_scan: false,
                delay: Duration::ZERO,
                in_flight: None,
            }
        }

        fn calls(&self) -> Vec<Vec<Command>> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, name: &[u8]) -> usize {
            self.calls()
                .iter()
                .flatten()
                .filter(|cmd| cmd.name() == name)
                .count()
        }
    }

    #[async_trait]
    impl Store for Instrumented {
        async fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<RespValue>, StoreError> {
            self.calls.lock().unwrap().push(commands.to_vec());

            if let Some((gauge, Side::Destination)) = &self.in_flight {
                gauge.taken.fetch_add(1, Ordering::SeqCst);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let mut replies = Vec::with_capacity(commands.len());
            for cmd in commands {
                if self.panic_on_scan && cmd.name() == b"SCAN" {
                    panic!("scan exploded");
                }
                if cmd.name() == b"DUMP" && self.fail_dump_of.as_ref() == Some(&cmd.args()[0]) {
                    replies.push(RespValue::error("ERR dump refused"));
                    continue;
                }
                replies.push(self.inner.execute(cmd));
                if cmd.name() == b"SCAN" {
                    if let Some(key) = &self.vanish_after_scan {
                        self.inner.delete(key);
                    }
                }
            }

            if let Some((gauge, Side::Source)) = &self.in_flight {
                if commands.first().map(|c| c.name() == b"DUMP").unwrap_or(false) {
                    let created = gauge.created.fetch_add(1, Ordering::SeqCst) + 1;
                    let pending = created - gauge.taken.load(Ordering::SeqCst);
                    gauge.max.fetch_max(pending, Ordering::SeqCst);
                }
            }

            Ok(replies)
        }
    }

    #[derive(Default)]
    struct Counting {
        pages: AtomicUsize,
        batches: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ProgressObserver for Counting {
        fn page_exported(&self, _page: u64, _keys: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn batch_imported(&self, _page: u64, _keys: usize) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }

        fn finished(&self, _report: &MigrationReport) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn seeded(page_size: usize, pairs: &[(&'static str, &'static str)]) -> MemoryStore {
        let store = MemoryStore::with_page_size(page_size);
        for (key, value) in pairs {
            store.set(*key, Value::string(*value));
        }
        store
    }

    fn restored_keys(calls: &[Vec<Command>]) -> Vec<Vec<Bytes>> {
        calls
            .iter()
            .map(|round| {
                let mut keys: Vec<Bytes> = round.iter().map(|c| c.args()[0].clone()).collect();
                keys.sort();
                keys
            })
            .collect()
    }

    async fn run(
        source: Instrumented,
        destination: Instrumented,
    ) -> Result<MigrationReport, MigrateError> {
        migrate(source, destination, &MigrationConfig::default(), Arc::new(NoProgress)).await
    }

    #[tokio::test]
    async fn test_copies_every_type() {
        let source = MemoryStore::with_page_size(3);
        source.set("str", Value::string("plain"));
        source.set("bin", Value::string(Bytes::from_static(b"\x00\xff\r\n")));
        source.set("list", Value::list(["x", "y", "x"]));
        source.set("set", Value::set(["m1", "m2"]));
        source.set("hash", Value::hash([("f1", "v1"), ("f2", "v2")]));
        for i in 0..20 {
            source.set(format!("n:{}", i), Value::string(i.to_string()));
        }
        let destination = MemoryStore::new();

        let report = migrate(
            source.clone(),
            destination.clone(),
            &MigrationConfig::default(),
            Arc::new(NoProgress),
        )
        .await
        .unwrap();

        assert_eq!(destination.keys(), source.keys());
        for key in source.keys() {
            assert_eq!(destination.get(&key), source.get(&key));
        }
        assert_eq!(report.keys_exported, 25);
        assert_eq!(report.keys_restored, 25);
        assert_eq!(report.pages, 9);
        assert_eq!(report.batches, 9);
    }

    #[tokio::test]
    async fn test_two_pages_in_order() {
        let source = Instrumented::new(seeded(1, &[("a", "v1"), ("b", "v2")]));
        let destination = Instrumented::new(MemoryStore::new());
        let progress = Arc::new(Counting::default());

        migrate(
            source.clone(),
            destination.clone(),
            &MigrationConfig::default(),
            progress.clone(),
        )
        .await
        .unwrap();

        let scans: Vec<Bytes> = source
            .calls()
            .iter()
            .flatten()
            .filter(|c| c.name() == b"SCAN")
            .map(|c| c.args()[0].clone())
            .collect();
        assert_eq!(scans, vec![Bytes::from("0"), Bytes::from("1")]);

        assert_eq!(
            restored_keys(&destination.calls()),
            vec![vec![Bytes::from("a")], vec![Bytes::from("b")]]
        );
        assert_eq!(destination.inner.get(b"a"), Some(Value::string("v1")));
        assert_eq!(destination.inner.get(b"b"), Some(Value::string("v2")));

        assert_eq!(progress.pages.load(Ordering::SeqCst), 2);
        assert_eq!(progress.batches.load(Ordering::SeqCst), 2);
        assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_page() {
        let source = Instrumented::new(seeded(10, &[("a", "1"), ("b", "2"), ("c", "3")]));
        let destination = Instrumented::new(MemoryStore::new());

        let report = run(source.clone(), destination.clone()).await.unwrap();

        assert_eq!(source.count(b"SCAN"), 1);
        assert_eq!(source.calls().len(), 2);
        assert_eq!(destination.calls().len(), 1);
        assert_eq!(report.pages, 1);
        assert_eq!(report.batches, 1);
        assert_eq!(destination.inner.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let source = Instrumented::new(MemoryStore::new());
        let destination = Instrumented::new(MemoryStore::new());

        let report = run(source.clone(), destination.clone()).await.unwrap();

        assert_eq!(source.count(b"SCAN"), 1);
        assert_eq!(source.count(b"DUMP"), 0);
        assert!(destination.calls().is_empty());
        assert_eq!(report.pages, 1);
        assert_eq!(report.batches, 1);
        assert_eq!(report.keys_restored, 0);
    }

    #[tokio::test]
    async fn test_dump_failure_on_second_page_is_fatal() {
        let mut source = Instrumented::new(seeded(1, &[("a", "v1"), ("b", "v2"), ("c", "v3")]));
        source.fail_dump_of = Some(Bytes::from("b"));
        let destination = Instrumented::new(MemoryStore::new());

        let err = run(source.clone(), destination.clone()).await.unwrap_err();

        assert!(matches!(
            err,
            MigrateError::Export(StoreError::Command(ref msg)) if msg.contains("dump refused")
        ));
        assert_eq!(source.count(b"SCAN"), 2);
        assert_eq!(destination.inner.keys(), vec![Bytes::from("a")]);
        assert_eq!(restored_keys(&destination.calls()), vec![vec![Bytes::from("a")]]);
    }

    #[tokio::test]
    async fn test_key_deleted_before_dump_is_skipped() {
        let mut source = Instrumented::new(seeded(10, &[("a", "v1"), ("b", "v2")]));
        source.vanish_after_scan = Some(Bytes::from("b"));
        let destination = MemoryStore::new();

        let report = migrate(
            source,
            destination.clone(),
            &MigrationConfig::default(),
            Arc::new(NoProgress),
        )
        .await
        .unwrap();

        assert_eq!(report.keys_skipped, 1);
        assert_eq!(report.keys_restored, 1);
        assert_eq!(destination.keys(), vec![Bytes::from("a")]);
    }

    #[tokio::test]
    async fn test_existing_destination_key_is_fatal() {
        let source = seeded(1, &[("a", "v1"), ("b", "v2"), ("c", "v3")]);
        let destination = seeded(10, &[("b", "taken")]);

        let config = MigrationConfig::default();
        let err = migrate(source, destination.clone(), &config, Arc::new(NoProgress))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MigrateError::Import(StoreError::Command(ref msg)) if msg.contains("BUSYKEY")
        ));
        assert_eq!(destination.get(b"b"), Some(Value::string("taken")));
        assert!(destination.get(b"c").is_none());
    }

    #[tokio::test]
    async fn test_backpressure_bounds_batches_in_flight() {
        let pairs: Vec<(&'static str, &'static str)> = vec![
            ("k00", "v"), ("k01", "v"), ("k02", "v"), ("k03", "v"), ("k04", "v"),
            ("k05", "v"), ("k06", "v"), ("k07", "v"), ("k08", "v"), ("k09", "v"),
            ("k10", "v"), ("k11", "v"), ("k12", "v"), ("k13", "v"), ("k14", "v"),
        ];
        let in_flight = InFlight::default();

        let mut source = Instrumented::new(seeded(1, &pairs));
        source.in_flight = Some((in_flight.clone(), Side::Source));
        let mut destination = Instrumented::new(MemoryStore::new());
        destination.in_flight = Some((in_flight.clone(), Side::Destination));
        destination.delay = Duration::from_millis(5);

        let config = MigrationConfig { queue_capacity: 2 };
        migrate(source, destination.clone(), &config, Arc::new(NoProgress))
            .await
            .unwrap();

        let max = in_flight.max.load(Ordering::SeqCst);
        assert!(max <= 3, "{} batches in flight with a queue of 2", max);
        assert!(max >= 2, "exporter never ran ahead ({})", max);
        assert_eq!(destination.inner.len(), 15);
    }

    #[tokio::test]
    async fn test_exporter_panic_is_reported() {
        let mut source = Instrumented::new(seeded(1, &[("a", "v1")]));
        source.panic_on_scan = true;

        let err = run(source, Instrumented::new(MemoryStore::new())).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::ExporterPanicked(ref msg) if msg.contains("scan exploded")
        ));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_rejected() {
        let config = MigrationConfig { queue_capacity: 0 };
        let err = migrate(MemoryStore::new(), MemoryStore::new(), &config, Arc::new(NoProgress))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidConfig(_)));
    }
}
