//! Reassembly of out-of-order worker outputs into input order.
//!
//! Workers complete in arbitrary order, so every chunk result arrives
//! tagged with its sequence number. Two strategies re-sequence them:
//!
//! - [`OrderedMerger`] buffers out-of-order chunks in memory and drains
//!   them to the sink the moment the frontier (the lowest sequence number
//!   not yet emitted) becomes available.
//! - [`SpillMerger`] writes every chunk to its own temporary CSV artifact
//!   and concatenates the artifacts in sequence order once all workers
//!   have finished, trading memory for I/O on very large tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use tempfile::TempDir;

use crate::error::PipelineError;
use crate::io::RowSink;
use crate::table::Row;

/// Strategy-selecting wrapper used by the scheduler.
pub enum Merger {
    InMemory(OrderedMerger),
    Spill(SpillMerger),
}

impl Merger {
    /// Buffer out-of-order chunks in memory.
    pub fn in_memory() -> Self {
        Merger::InMemory(OrderedMerger::new())
    }

    /// Spill each chunk to a temporary file under `dir`.
    pub fn spill(dir: &Path) -> Result<Self, PipelineError> {
        Ok(Merger::Spill(SpillMerger::new(dir)?))
    }

    /// Accept one chunk's rows. Returns the number of rows emitted to the
    /// sink right away (always zero for the spill strategy).
    pub fn push(
        &mut self,
        seq: u64,
        rows: Vec<Row>,
        sink: &mut dyn RowSink,
    ) -> Result<u64, PipelineError> {
        match self {
            Merger::InMemory(m) => m.push(seq, rows, sink),
            Merger::Spill(m) => {
                m.push(seq, &rows)?;
                Ok(0)
            }
        }
    }

    /// Flush everything not yet emitted, verifying the sequence is
    /// gap-free. Returns the number of rows emitted here.
    pub fn finish(&mut self, sink: &mut dyn RowSink) -> Result<u64, PipelineError> {
        match self {
            Merger::InMemory(m) => m.finish(),
            Merger::Spill(m) => m.finish(sink),
        }
    }
}

/// In-memory frontier-drain merger.
pub struct OrderedMerger {
    /// Next sequence number to emit.
    next_seq: u64,

    /// Chunks that arrived ahead of the frontier, keyed by sequence.
    pending: BTreeMap<u64, Vec<Row>>,
}

impl OrderedMerger {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Accept chunk `seq`; emit it and any directly following pending
    /// chunks if the frontier is reached.
    pub fn push(
        &mut self,
        seq: u64,
        rows: Vec<Row>,
        sink: &mut dyn RowSink,
    ) -> Result<u64, PipelineError> {
        if seq < self.next_seq || self.pending.contains_key(&seq) {
            return Err(PipelineError::merge(format!(
                "duplicate chunk sequence number {seq}"
            )));
        }
        self.pending.insert(seq, rows);

        let mut emitted = 0;
        while let Some(rows) = self.pending.remove(&self.next_seq) {
            for row in &rows {
                sink.write_row(row)?;
            }
            emitted += rows.len() as u64;
            self.next_seq += 1;
        }
        Ok(emitted)
    }

    /// Verify no chunk is still missing. Everything emittable has already
    /// been written by `push`.
    pub fn finish(&mut self) -> Result<u64, PipelineError> {
        if let Some(&stuck) = self.pending.keys().next() {
            return Err(PipelineError::merge(format!(
                "chunk sequence gap: chunk {} never arrived, {} held back at {stuck}",
                self.next_seq,
                self.pending.len()
            )));
        }
        Ok(0)
    }
}

impl Default for OrderedMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable per-chunk artifact merger.
pub struct SpillMerger {
    /// Owns the artifact directory; removed on drop.
    dir: TempDir,

    /// Artifact path per sequence number.
    files: BTreeMap<u64, PathBuf>,
}

impl SpillMerger {
    /// Create a spill area under `parent`.
    pub fn new(parent: &Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix("tablemill-spill-")
            .tempdir_in(parent)?;
        Ok(Self {
            dir,
            files: BTreeMap::new(),
        })
    }

    /// Write chunk `seq` to its own artifact file.
    pub fn push(&mut self, seq: u64, rows: &[Row]) -> Result<(), PipelineError> {
        if self.files.contains_key(&seq) {
            return Err(PipelineError::merge(format!(
                "duplicate chunk sequence number {seq}"
            )));
        }
        let path = self.dir.path().join(format!("chunk-{seq:08}.csv"));
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        self.files.insert(seq, path);
        Ok(())
    }

    /// Concatenate all artifacts in ascending sequence order into the
    /// sink. Returns the number of rows emitted.
    pub fn finish(&mut self, sink: &mut dyn RowSink) -> Result<u64, PipelineError> {
        let files = std::mem::take(&mut self.files);
        let mut emitted = 0;
        for (expected, (seq, path)) in files.into_iter().enumerate() {
            if seq != expected as u64 {
                return Err(PipelineError::merge(format!(
                    "chunk sequence gap: expected chunk {expected}, found {seq}"
                )));
            }
            let reader = ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(&path)?;
            for record in reader.into_records() {
                let record = record?;
                let row: Row = record.iter().map(str::to_string).collect();
                sink.write_row(&row)?;
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySink;
    use crate::table::row;

    #[test]
    fn test_ordered_merger_in_order_arrival() {
        let mut merger = OrderedMerger::new();
        let mut sink = MemorySink::new();

        assert_eq!(merger.push(0, vec![row(["a"])], &mut sink).unwrap(), 1);
        assert_eq!(merger.push(1, vec![row(["b"])], &mut sink).unwrap(), 1);
        merger.finish().unwrap();

        assert_eq!(sink.rows(), &[row(["a"]), row(["b"])]);
    }

    #[test]
    fn test_ordered_merger_reorders_late_frontier() {
        let mut merger = OrderedMerger::new();
        let mut sink = MemorySink::new();

        // Chunks 1 and 2 arrive before chunk 0; nothing may be emitted.
        assert_eq!(merger.push(1, vec![row(["b"])], &mut sink).unwrap(), 0);
        assert_eq!(merger.push(2, vec![row(["c"])], &mut sink).unwrap(), 0);
        assert!(sink.rows().is_empty());

        // Chunk 0 releases the whole frontier at once.
        assert_eq!(merger.push(0, vec![row(["a"])], &mut sink).unwrap(), 3);
        merger.finish().unwrap();

        assert_eq!(sink.rows(), &[row(["a"]), row(["b"]), row(["c"])]);
    }

    #[test]
    fn test_ordered_merger_detects_gap() {
        let mut merger = OrderedMerger::new();
        let mut sink = MemorySink::new();

        merger.push(0, vec![row(["a"])], &mut sink).unwrap();
        merger.push(2, vec![row(["c"])], &mut sink).unwrap();

        assert!(matches!(merger.finish(), Err(PipelineError::Merge(_))));
    }

    #[test]
    fn test_ordered_merger_rejects_duplicate_seq() {
        let mut merger = OrderedMerger::new();
        let mut sink = MemorySink::new();

        merger.push(0, vec![row(["a"])], &mut sink).unwrap();
        assert!(merger.push(0, vec![row(["x"])], &mut sink).is_err());
    }

    #[test]
    fn test_spill_merger_round_trip_out_of_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut merger = SpillMerger::new(tmp.path()).unwrap();

        merger.push(2, &[row(["e", "f"])]).unwrap();
        merger.push(0, &[row(["a", "b"])]).unwrap();
        merger.push(1, &[row(["c", "d"])]).unwrap();

        let mut sink = MemorySink::new();
        let emitted = merger.finish(&mut sink).unwrap();

        assert_eq!(emitted, 3);
        assert_eq!(
            sink.rows(),
            &[row(["a", "b"]), row(["c", "d"]), row(["e", "f"])]
        );
    }

    #[test]
    fn test_spill_merger_detects_gap() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut merger = SpillMerger::new(tmp.path()).unwrap();

        merger.push(0, &[row(["a"])]).unwrap();
        merger.push(2, &[row(["c"])]).unwrap();

        let mut sink = MemorySink::new();
        assert!(matches!(
            merger.finish(&mut sink),
            Err(PipelineError::Merge(_))
        ));
    }

    #[test]
    fn test_spill_merger_handles_empty_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut merger = SpillMerger::new(tmp.path()).unwrap();

        merger.push(0, &[row(["a"])]).unwrap();
        merger.push(1, &[]).unwrap();
        merger.push(2, &[row(["b"])]).unwrap();

        let mut sink = MemorySink::new();
        assert_eq!(merger.finish(&mut sink).unwrap(), 2);
        assert_eq!(sink.rows(), &[row(["a"]), row(["b"])]);
    }

    #[test]
    fn test_spill_merger_cleans_up_artifacts() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let mut merger = SpillMerger::new(tmp.path()).unwrap();
            merger.push(0, &[row(["a"])]).unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
