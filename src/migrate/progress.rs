//! Progress reporting

use super::MigrationReport;
use std::io::Write;

/// Receives one event per exported page and one per imported batch
///
/// Called from both the exporter task and the importer task.
pub trait ProgressObserver: Send + Sync {
    /// A scan page was dumped and its batch published
    fn page_exported(&self, _page: u64, _keys: usize) {}

    /// A batch was fully restored on the destination
    fn batch_imported(&self, _page: u64, _keys: usize) {}

    /// The migration completed successfully
    fn finished(&self, _report: &MigrationReport) {}
}

/// Prints `>` per exported page and `.` per imported batch on stdout
pub struct TerminalProgress;

impl TerminalProgress {
    fn mark(symbol: &[u8]) {
        let mut out = std::io::stdout().lock();
        // Progress output is best effort
        let _ = out.write_all(symbol);
        let _ = out.flush();
    }
}

impl ProgressObserver for TerminalProgress {
    fn page_exported(&self, _page: u64, _keys: usize) {
        Self::mark(b">");
    }

    fn batch_imported(&self, _page: u64, _keys: usize) {
        Self::mark(b".");
    }

    fn finished(&self, _report: &MigrationReport) {
        println!();
        println!("Sync done.");
    }
}

/// Reports nothing
pub struct NoProgress;

impl ProgressObserver for NoProgress {}
