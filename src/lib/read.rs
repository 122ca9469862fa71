//! Read and batch data structures.
//!
//! A [`Read`] is a lightweight view into the buffer backing one supplier
//! batch: an `Arc<[u8]>` plus byte ranges for the identifier, sequence and
//! quality fields. Cloning a `Read` clones the `Arc`, not the bytes, so the
//! matcher can move reads between its generation tables for free.
//!
//! A [`Batch`] tags which buffer-lifetime unit a read came from. The
//! supplier's hold/release ledger is keyed by it; the matcher must hold a
//! batch before retaining any of its reads past the current pull and release
//! it once no read from it is reachable from the matching window.
//!
//! Reads promoted to the overflow store are *detached* first
//! (`Read::to_detached`): the relevant fields are copied into a fresh
//! private buffer so that a few stray unmatched reads never pin a large
//! batch buffer in memory.

use std::ops::Range;
use std::sync::Arc;

/// Identifier for one buffer-lifetime unit from the upstream supplier.
///
/// `Batch::default()` is the placeholder the matcher tracks before the first
/// read arrives; real suppliers number batches from 1 so the placeholder can
/// never collide with live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Batch {
    /// Index of the input file the batch came from
    pub file_id: u32,
    /// Sequence number of the batch within its file
    pub batch_id: u32,
}

impl Batch {
    /// Create a batch tag.
    #[must_use]
    pub fn new(file_id: u32, batch_id: u32) -> Self {
        Self { file_id, batch_id }
    }

    /// Pack the tag into a single map key.
    #[must_use]
    pub fn as_key(self) -> u64 {
        (u64::from(self.file_id) << 32) | u64::from(self.batch_id)
    }
}

impl std::fmt::Display for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.batch_id)
    }
}

/// A single sequencing record viewed through its batch buffer.
#[derive(Debug, Clone)]
pub struct Read {
    buf: Arc<[u8]>,
    batch: Batch,
    id: Range<usize>,
    seq: Range<usize>,
    qual: Range<usize>,
    mate_unset: bool,
}

impl Read {
    /// Create a read viewing `buf` at the given field ranges.
    ///
    /// Used by suppliers after freezing a batch buffer. The ranges must lie
    /// within `buf`; accessors index with them directly.
    #[must_use]
    pub fn from_buffer(
        buf: Arc<[u8]>,
        batch: Batch,
        id: Range<usize>,
        seq: Range<usize>,
        qual: Range<usize>,
        mate_unset: bool,
    ) -> Self {
        Self { buf, batch, id, seq, qual, mate_unset }
    }

    /// Create a read owning a private buffer built from the given fields.
    ///
    /// Convenient for tests and scripted suppliers; also the building block
    /// for [`Read::to_detached`].
    #[must_use]
    pub fn from_parts(batch: Batch, id: &[u8], seq: &[u8], qual: &[u8], mate_unset: bool) -> Self {
        let mut buf = Vec::with_capacity(id.len() + seq.len() + qual.len());
        buf.extend_from_slice(id);
        buf.extend_from_slice(seq);
        buf.extend_from_slice(qual);
        let id_end = id.len();
        let seq_end = id_end + seq.len();
        let qual_end = seq_end + qual.len();
        Self {
            buf: Arc::from(buf),
            batch,
            id: 0..id_end,
            seq: id_end..seq_end,
            qual: seq_end..qual_end,
            mate_unset,
        }
    }

    /// The read identifier (QNAME), mate suffix included.
    #[must_use]
    pub fn id(&self) -> &[u8] {
        &self.buf[self.id.clone()]
    }

    /// The base sequence.
    #[must_use]
    pub fn seq(&self) -> &[u8] {
        &self.buf[self.seq.clone()]
    }

    /// The quality string, as it appeared in the input.
    #[must_use]
    pub fn qual(&self) -> &[u8] {
        &self.buf[self.qual.clone()]
    }

    /// The batch whose buffer backs this read.
    #[must_use]
    pub fn batch(&self) -> Batch {
        self.batch
    }

    /// Re-tag the read with a different batch.
    ///
    /// Used when an overflow match is attributed to the current output batch
    /// so that both halves of a pair carry one batch identity downstream.
    pub fn set_batch(&mut self, batch: Batch) {
        self.batch = batch;
    }

    /// Whether the record's own mate metadata was absent (RNEXT `*` or
    /// PNEXT 0). Quick-drop discards such reads without a match attempt.
    #[must_use]
    pub fn mate_unset(&self) -> bool {
        self.mate_unset
    }

    /// Deep-copy into a read with its own minimal buffer, independent of
    /// any batch buffer's lifetime.
    #[must_use]
    pub fn to_detached(&self) -> Self {
        Self::from_parts(self.batch, self.id(), self.seq(), self.qual(), self.mate_unset)
    }

    /// Whether this read shares a buffer with `other`.
    ///
    /// Test hook for asserting detachment.
    #[cfg(test)]
    pub(crate) fn shares_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf)
    }
}
