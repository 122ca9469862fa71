//! Single-read suppliers and the batch hold/release protocol.
//!
//! A [`ReadSupplier`] hands out one read per pull, batch by batch. Each
//! batch's records share one frozen buffer; the supplier keeps a refcount
//! ledger so callers declare, via [`ReadSupplier::hold_batch`] and
//! [`ReadSupplier::release_batch`], which batches they still depend on.
//! Memory safety itself comes from the `Arc` inside every [`Read`]; the
//! ledger is the accounting contract that lets the supplier forget a batch
//! and that the matcher's release-ordering guarantees are written against.
//!
//! [`SamBatchReader`] is the production supplier: it tab-splits raw SAM
//! lines (full SAM/BAM decoding is upstream's business) and groups a fixed
//! number of records per batch.

use ahash::AHashMap;
use log::debug;
use std::io::{BufRead, Seek, SeekFrom};
use std::sync::Arc;

use crate::errors::{RemateError, Result};
use crate::read::{Batch, Read};

/// Records per batch unless configured otherwise.
pub const DEFAULT_RECORDS_PER_BATCH: usize = 10_000;

/// Upstream interface consumed by the pair matcher.
pub trait ReadSupplier {
    /// Pull the next single read, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// I/O or parse failures from the underlying stream.
    fn next_read(&mut self) -> Result<Option<Read>>;

    /// Declare a dependency on `batch`. Must precede retaining any of its
    /// reads beyond the current pull.
    fn hold_batch(&mut self, batch: Batch);

    /// Drop one dependency on `batch`. Returns whether this was the last
    /// reference. Releasing an unknown batch is harmless and returns false.
    fn release_batch(&mut self, batch: Batch) -> bool;

    /// Reposition the supplier to a byte range of its input.
    ///
    /// # Errors
    ///
    /// [`RemateError::ReinitUnsupported`] by default; suppliers over
    /// seekable inputs may override. Partitioned runs can instead construct
    /// the supplier on the right range up front.
    fn reinit(&mut self, _start: u64, _length: u64) -> Result<()> {
        Err(RemateError::ReinitUnsupported)
    }
}

/// One parsed record's field ranges within a batch buffer under construction.
struct PendingRecord {
    id: std::ops::Range<usize>,
    seq: std::ops::Range<usize>,
    qual: std::ops::Range<usize>,
    mate_unset: bool,
}

/// Batching supplier over raw SAM text.
///
/// Skips `@` header lines, parses QNAME, RNEXT, PNEXT, SEQ and QUAL by tab
/// splitting, and freezes every `records_per_batch` records into one
/// `Arc<[u8]>` buffer. Batches are numbered `(file_id, 1..)` so the
/// matcher's default placeholder batch never collides with live data.
pub struct SamBatchReader<R> {
    inner: R,
    records_per_batch: usize,
    file_id: u32,
    next_batch_id: u32,
    /// Remaining byte budget when reading a partition; `None` = unbounded.
    budget: Option<u64>,
    pending: std::collections::VecDeque<Read>,
    ledger: AHashMap<u64, usize>,
    line_no: u64,
    records_read: u64,
    batches_built: u64,
    eof: bool,
}

impl<R: BufRead> SamBatchReader<R> {
    /// Create a supplier over the whole stream with the default batch size.
    pub fn new(inner: R) -> Self {
        Self::with_batch_size(inner, DEFAULT_RECORDS_PER_BATCH)
    }

    /// Create a supplier with an explicit records-per-batch size.
    ///
    /// # Panics
    ///
    /// If `records_per_batch` is zero.
    pub fn with_batch_size(inner: R, records_per_batch: usize) -> Self {
        assert!(records_per_batch > 0, "records_per_batch must be positive");
        Self {
            inner,
            records_per_batch,
            file_id: 0,
            next_batch_id: 1,
            budget: None,
            pending: std::collections::VecDeque::new(),
            ledger: AHashMap::new(),
            line_no: 0,
            records_read: 0,
            batches_built: 0,
            eof: false,
        }
    }

    /// Tag batches with a file index, for multi-file processing.
    #[must_use]
    pub fn with_file_id(mut self, file_id: u32) -> Self {
        self.file_id = file_id;
        self
    }

    /// Reads handed out so far.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Batches frozen so far.
    #[must_use]
    pub fn batches_built(&self) -> u64 {
        self.batches_built
    }

    /// Outstanding holds on `batch`.
    #[must_use]
    pub fn holds(&self, batch: Batch) -> usize {
        self.ledger.get(&batch.as_key()).copied().unwrap_or(0)
    }

    /// Read one line into `line`, honoring the byte budget.
    ///
    /// Returns false at end of stream or when the budget is spent.
    fn next_line(&mut self, line: &mut Vec<u8>) -> Result<bool> {
        if matches!(self.budget, Some(0)) {
            return Ok(false);
        }
        line.clear();
        let n = self.inner.read_until(b'\n', line)?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        if let Some(budget) = self.budget.as_mut() {
            *budget = budget.saturating_sub(n as u64);
        }
        while line.last().is_some_and(|&b| b == b'\n' || b == b'\r') {
            line.pop();
        }
        Ok(true)
    }

    /// Parse one record line, pushing its bytes onto the batch buffer.
    fn parse_record(&self, buf: &mut Vec<u8>, line: &[u8]) -> Result<PendingRecord> {
        let mut fields: Vec<std::ops::Range<usize>> = Vec::with_capacity(12);
        let mut start = 0;
        for (i, &b) in line.iter().enumerate() {
            if b == b'\t' {
                fields.push(start..i);
                start = i + 1;
            }
        }
        fields.push(start..line.len());
        if fields.len() < 11 {
            return Err(RemateError::MalformedRecord {
                line: self.line_no,
                reason: format!("expected at least 11 fields, found {}", fields.len()),
            });
        }

        let pnext_bytes = &line[fields[7].clone()];
        let pnext: u64 = std::str::from_utf8(pnext_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RemateError::MalformedRecord {
                line: self.line_no,
                reason: "PNEXT is not a non-negative integer".to_string(),
            })?;
        let mate_unset = pnext == 0 || &line[fields[6].clone()] == b"*";

        let base = buf.len();
        buf.extend_from_slice(line);
        let within = |r: &std::ops::Range<usize>| base + r.start..base + r.end;
        Ok(PendingRecord {
            id: within(&fields[0]),
            seq: within(&fields[9]),
            qual: within(&fields[10]),
            mate_unset,
        })
    }

    /// Read and freeze the next batch, filling `pending`.
    ///
    /// Sets `eof` when the stream produced no further records.
    fn build_batch(&mut self) -> Result<()> {
        let mut buf: Vec<u8> = Vec::new();
        let mut records: Vec<PendingRecord> = Vec::with_capacity(self.records_per_batch);
        let mut line: Vec<u8> = Vec::new();

        while records.len() < self.records_per_batch {
            if !self.next_line(&mut line)? {
                self.eof = true;
                break;
            }
            if line.is_empty() || line[0] == b'@' {
                continue;
            }
            records.push(self.parse_record(&mut buf, &line)?);
        }
        if records.is_empty() {
            return Ok(());
        }

        let batch = Batch::new(self.file_id, self.next_batch_id);
        self.next_batch_id += 1;
        self.batches_built += 1;
        let frozen: Arc<[u8]> = Arc::from(buf);
        for rec in records {
            self.pending.push_back(Read::from_buffer(
                Arc::clone(&frozen),
                batch,
                rec.id,
                rec.seq,
                rec.qual,
                rec.mate_unset,
            ));
        }
        Ok(())
    }
}

impl<R: BufRead + Seek> SamBatchReader<R> {
    /// Create a supplier over one partition of a seekable input.
    ///
    /// Seeks to `start` and reads at most `length` bytes of records. When
    /// `start` is nonzero the remainder of the line it lands on belongs to
    /// the previous partition and is skipped.
    ///
    /// # Errors
    ///
    /// Seek or read failure on the underlying stream.
    pub fn with_partition(
        mut inner: R,
        start: u64,
        length: u64,
        records_per_batch: usize,
    ) -> Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        let mut skipped = 0u64;
        if start > 0 {
            let mut scraps = Vec::new();
            skipped = inner.read_until(b'\n', &mut scraps)? as u64;
        }
        let mut reader = Self::with_batch_size(inner, records_per_batch);
        reader.budget = Some(length.saturating_sub(skipped));
        Ok(reader)
    }
}

impl<R: BufRead> ReadSupplier for SamBatchReader<R> {
    fn next_read(&mut self) -> Result<Option<Read>> {
        loop {
            if let Some(read) = self.pending.pop_front() {
                self.records_read += 1;
                return Ok(Some(read));
            }
            if self.eof {
                return Ok(None);
            }
            self.build_batch()?;
            if self.pending.is_empty() && self.eof {
                return Ok(None);
            }
        }
    }

    fn hold_batch(&mut self, batch: Batch) {
        *self.ledger.entry(batch.as_key()).or_insert(0) += 1;
    }

    fn release_batch(&mut self, batch: Batch) -> bool {
        match self.ledger.get_mut(&batch.as_key()) {
            Some(refs) if *refs > 1 => {
                *refs -= 1;
                false
            }
            Some(_) => {
                self.ledger.remove(&batch.as_key());
                true
            }
            None => {
                debug!("release of unheld batch {batch}");
                false
            }
        }
    }
}
