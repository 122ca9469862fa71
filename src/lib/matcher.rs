//! Streaming mate-pair matching over a tiered batch window.
//!
//! [`PairMatcher`] sits between a single-read supplier and a pair consumer.
//! Position-grouped SAM input delivers mates individually and possibly very
//! far apart, so the matcher runs a streaming join under a hard memory
//! bound: it never buffers the whole input, yet still finds mates separated
//! by an unbounded number of other reads.
//!
//! # Matching tiers
//!
//! Unmatched reads live in one of three tiers, probed in order per pull:
//!
//! 1. `current` — unmatched reads from the batch now being consumed,
//! 2. `previous` — unmatched leftovers from the batch before it,
//! 3. `overflow` — reads that survived two batch boundaries, each detached
//!    into its own private buffer.
//!
//! The first two tiers borrow their batch buffers, which is why the matcher
//! holds those batches with the supplier and releases a batch only once the
//! window has advanced past it. Promotion into overflow detaches the read
//! so the aged-out batch buffer can be released.
//!
//! # Overflow release
//!
//! An overflow match removes the owned record from the overflow map, hands
//! the consumer a cheap clone re-tagged with the current output batch, and
//! parks the record in a per-batch release list. When the consumer releases
//! that batch through [`PairMatcher::release_batch`] the list is dropped, so
//! steady overflow traffic cannot grow the store without bound.

use ahash::AHashMap;
use log::warn;

use crate::errors::Result;
use crate::keys::{KeyMaker, KeyValidator, MatchKey};
use crate::read::{Batch, Read};
use crate::supplier::ReadSupplier;

/// Pulls without a completed pair before warning about unsorted input.
const WATCHDOG_PULLS: u64 = 10_000;

/// A matched mate-pair.
///
/// `r1` is the read just pulled from the supplier; `r2` is the retained
/// match. For an overflow match `r2` is backed by its own private buffer and
/// re-tagged so both halves carry `r1`'s batch.
#[derive(Debug, Clone)]
pub struct ReadPair {
    /// The read whose arrival completed the pair
    pub r1: Read,
    /// The previously retained mate
    pub r2: Read,
}

/// Streaming pair matcher over a single-read supplier.
///
/// Single-threaded synchronous pull generator: every call to
/// [`PairMatcher::next_pair`] loops in-line on the calling thread until a
/// pair completes or the supplier is exhausted. Not safe for concurrent
/// pulls; run one matcher per input partition instead.
pub struct PairMatcher<S> {
    supplier: S,
    keys: KeyMaker,
    /// `batches[0]` is the current generation, `batches[1]` the previous.
    batches: [Batch; 2],
    /// Unmatched reads per generation, same indexing as `batches`.
    unmatched: [AHashMap<MatchKey, Read>; 2],
    /// Reads unmatched across two batch boundaries, detached copies.
    overflow: AHashMap<MatchKey, Read>,
    /// Output-batch key -> overflow records consumed for that batch.
    overflow_release: AHashMap<u64, Vec<Read>>,
    validator: Option<KeyValidator>,
    quick_drop: bool,
    reads_dropped: u64,
    overflow_matched: u64,
    finished: bool,
}

impl<S: ReadSupplier> PairMatcher<S> {
    /// Wrap a supplier with default configuration (no quick-drop, no key
    /// validation).
    #[must_use]
    pub fn new(supplier: S) -> Self {
        Self {
            supplier,
            keys: KeyMaker::new(),
            batches: [Batch::default(); 2],
            unmatched: [AHashMap::new(), AHashMap::new()],
            overflow: AHashMap::new(),
            overflow_release: AHashMap::new(),
            validator: None,
            quick_drop: false,
            reads_dropped: 0,
            overflow_matched: 0,
            finished: false,
        }
    }

    /// Discard reads whose own record carries no mate metadata instead of
    /// attempting to match them.
    #[must_use]
    pub fn with_quick_drop(mut self, enabled: bool) -> Self {
        self.quick_drop = enabled;
        self
    }

    /// Keep a key -> identifier side table and fail fatally on a hash
    /// collision between distinct identifiers.
    #[must_use]
    pub fn with_key_validation(mut self, enabled: bool) -> Self {
        self.validator = if enabled { Some(KeyValidator::new()) } else { None };
        self
    }

    /// Pull single reads until a mate-pair completes.
    ///
    /// Returns `Ok(None)` once the supplier is exhausted and end-of-stream
    /// bookkeeping has run. Never emits a partial pair.
    ///
    /// # Errors
    ///
    /// Supplier errors propagate; in validation mode a key collision is
    /// fatal ([`crate::RemateError::KeyCollision`]).
    pub fn next_pair(&mut self) -> Result<Option<ReadPair>> {
        if self.finished {
            return Ok(None);
        }
        let mut pulls_without_pair: u64 = 0;
        loop {
            pulls_without_pair += 1;
            if pulls_without_pair == WATCHDOG_PULLS {
                warn!(
                    "no matching read pairs in {WATCHDOG_PULLS} reads; input may be unsorted \
                     or use an unexpected read id format"
                );
            }

            let Some(read) = self.supplier.next_read()? else {
                return self.finish();
            };

            if self.quick_drop && read.mate_unset() {
                self.reads_dropped += 1;
                // dropped reads say nothing about sortedness
                pulls_without_pair -= 1;
                continue;
            }

            let key = self.keys.key(read.id());
            if let Some(validator) = self.validator.as_mut() {
                validator.check(key, read.id())?;
            }

            if read.batch() != self.batches[0] {
                self.roll_over(read.batch());
            }

            if let Some(mate) = self.unmatched[0].remove(&key) {
                return Ok(Some(ReadPair { r1: read, r2: mate }));
            }
            if let Some(mate) = self.unmatched[1].remove(&key) {
                return Ok(Some(ReadPair { r1: read, r2: mate }));
            }
            if let Some(owned) = self.overflow.remove(&key) {
                self.overflow_matched += 1;
                let mut mate = owned.clone();
                // both halves of the pair carry one batch identity downstream;
                // the owned record stays parked until that batch is released
                mate.set_batch(self.batches[0]);
                self.overflow_release.entry(self.batches[0].as_key()).or_default().push(owned);
                return Ok(Some(ReadPair { r1: read, r2: mate }));
            }

            self.unmatched[0].insert(key, read);
        }
    }

    /// Advance the window to `new_batch`.
    ///
    /// Order matters: the previous generation is detached into overflow
    /// before its backing batch is released, and the incoming batch is held
    /// before any of its reads can be retained.
    fn roll_over(&mut self, new_batch: Batch) {
        for (key, read) in self.unmatched[1].drain() {
            self.overflow.insert(key, read.to_detached());
        }
        self.unmatched.swap(0, 1);
        self.supplier.release_batch(self.batches[1]);
        self.batches[1] = self.batches[0];
        self.batches[0] = new_batch;
        self.supplier.hold_batch(new_batch);
    }

    /// End-of-stream drain: report residuals once and release held batches.
    fn finish(&mut self) -> Result<Option<ReadPair>> {
        self.finished = true;
        let window = self.unmatched[0].len() + self.unmatched[1].len();
        let residual = window + self.overflow.len();
        if residual > 0 {
            warn!(
                "discarding {residual} unpaired reads at end of input \
                 ({window} in window, {} in overflow)",
                self.overflow.len()
            );
        }
        if self.reads_dropped > 0 {
            warn!(
                "dropped {} reads with no RNEXT/PNEXT mate metadata; if the input came from a \
                 single-end alignment, run without --quick-drop-unpaired",
                self.reads_dropped
            );
        }
        self.supplier.release_batch(self.batches[0]);
        self.supplier.release_batch(self.batches[1]);
        Ok(None)
    }

    /// Forward a consumer hold to the supplier.
    pub fn hold_batch(&mut self, batch: Batch) {
        self.supplier.hold_batch(batch);
    }

    /// Release a consumer-held batch, freeing any overflow records that were
    /// consumed while producing that batch's pairs, then forwarding.
    pub fn release_batch(&mut self, batch: Batch) -> bool {
        self.overflow_release.remove(&batch.as_key());
        self.supplier.release_batch(batch)
    }

    /// Forward a repositioning request to the supplier.
    ///
    /// # Errors
    ///
    /// Whatever the supplier reports; see
    /// [`ReadSupplier::reinit`](crate::supplier::ReadSupplier::reinit).
    pub fn reinit(&mut self, start: u64, length: u64) -> Result<()> {
        self.supplier.reinit(start, length)
    }

    /// Reads discarded by quick-drop so far.
    #[must_use]
    pub fn reads_dropped(&self) -> u64 {
        self.reads_dropped
    }

    /// Pairs resolved through the overflow store so far.
    #[must_use]
    pub fn overflow_matched(&self) -> u64 {
        self.overflow_matched
    }

    /// Reads currently unmatched across all three tiers.
    #[must_use]
    pub fn pending_unmatched(&self) -> usize {
        self.unmatched[0].len() + self.unmatched[1].len() + self.overflow.len()
    }

    /// Overflow records parked awaiting a consumer batch release.
    #[must_use]
    pub fn pending_overflow_releases(&self) -> usize {
        self.overflow_release.values().map(Vec::len).sum()
    }

    /// Borrow the wrapped supplier.
    pub fn supplier(&self) -> &S {
        &self.supplier
    }

    /// Unwrap the matcher, returning the supplier.
    pub fn into_inner(self) -> S {
        self.supplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted supplier that records protocol events.
    #[derive(Debug, Default)]
    struct MockSupplier {
        reads: VecDeque<Read>,
        events: Vec<Event>,
        held: AHashMap<u64, usize>,
        reinits: Vec<(u64, u64)>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Hold(Batch),
        Release(Batch),
    }

    impl MockSupplier {
        fn with_reads(reads: Vec<Read>) -> Self {
            Self { reads: reads.into(), ..Self::default() }
        }

        /// Hold/release events for real batches, skipping the matcher's
        /// default placeholder.
        fn protocol(&self) -> Vec<Event> {
            self.events
                .iter()
                .copied()
                .filter(|e| {
                    let b = match e {
                        Event::Hold(b) | Event::Release(b) => *b,
                    };
                    b != Batch::default()
                })
                .collect()
        }
    }

    impl ReadSupplier for MockSupplier {
        fn next_read(&mut self) -> Result<Option<Read>> {
            Ok(self.reads.pop_front())
        }

        fn hold_batch(&mut self, batch: Batch) {
            self.events.push(Event::Hold(batch));
            *self.held.entry(batch.as_key()).or_insert(0) += 1;
        }

        fn release_batch(&mut self, batch: Batch) -> bool {
            self.events.push(Event::Release(batch));
            match self.held.get_mut(&batch.as_key()) {
                Some(refs) if *refs > 1 => {
                    *refs -= 1;
                    false
                }
                Some(_) => {
                    self.held.remove(&batch.as_key());
                    true
                }
                None => false,
            }
        }

        fn reinit(&mut self, start: u64, length: u64) -> Result<()> {
            self.reinits.push((start, length));
            Ok(())
        }
    }

    fn read(id: &str, batch: u32) -> Read {
        Read::from_parts(Batch::new(0, batch), id.as_bytes(), b"ACGT", b"IIII", false)
    }

    fn unpaired(id: &str, batch: u32) -> Read {
        Read::from_parts(Batch::new(0, batch), id.as_bytes(), b"ACGT", b"IIII", true)
    }

    fn drain(matcher: &mut PairMatcher<MockSupplier>) -> Vec<ReadPair> {
        let mut pairs = Vec::new();
        while let Some(pair) = matcher.next_pair().unwrap() {
            pairs.push(pair);
        }
        pairs
    }

    #[test]
    fn test_within_batch_match() {
        // scenario A: both mates in batch 1
        let supplier = MockSupplier::with_reads(vec![read("r1/1", 1), read("r1/2", 1)]);
        let mut matcher = PairMatcher::new(supplier);

        let pair = matcher.next_pair().unwrap().expect("pair");
        assert_eq!(pair.r1.id(), b"r1/2");
        assert_eq!(pair.r2.id(), b"r1/1");
        assert_eq!(pair.r1.batch(), Batch::new(0, 1));
        assert_eq!(pair.r2.batch(), Batch::new(0, 1));

        assert!(matcher.next_pair().unwrap().is_none());
        assert_eq!(matcher.pending_unmatched(), 0);
    }

    #[test]
    fn test_adjacent_batch_match() {
        let supplier = MockSupplier::with_reads(vec![read("r1/1", 1), read("r1/2", 2)]);
        let mut matcher = PairMatcher::new(supplier);

        let pair = matcher.next_pair().unwrap().expect("pair");
        assert_eq!(pair.r1.batch(), Batch::new(0, 2));
        // the mate still borrows its original batch, which is one
        // generation old and therefore still held
        assert_eq!(pair.r2.batch(), Batch::new(0, 1));
        assert!(matcher.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_overflow_match_across_three_boundaries() {
        // mates in batches 1 and 4: survives two rollovers, matches via overflow
        let supplier = MockSupplier::with_reads(vec![
            read("far/1", 1),
            read("b2", 2),
            read("b3", 3),
            read("far/2", 4),
        ]);
        let mut matcher = PairMatcher::new(supplier);

        let pair = matcher.next_pair().unwrap().expect("pair");
        assert_eq!(pair.r1.id(), b"far/2");
        assert_eq!(pair.r2.id(), b"far/1");
        // overflow mate is re-tagged to the output batch
        assert_eq!(pair.r2.batch(), Batch::new(0, 4));
        assert_eq!(matcher.overflow_matched(), 1);
        assert_eq!(matcher.pending_overflow_releases(), 1);

        assert!(matcher.next_pair().unwrap().is_none());
        // b2 (overflow) and b3 (previous generation) remain unmatched
        assert_eq!(matcher.pending_unmatched(), 2);
    }

    #[test]
    fn test_scenario_b_overflow_pair_and_residual() {
        // r1's mates two batches apart; r2 never pairs
        let supplier = MockSupplier::with_reads(vec![
            read("r1/1", 1),
            read("r2/1", 2),
            read("r1/2", 3),
        ]);
        let mut matcher = PairMatcher::new(supplier);

        let pairs = drain(&mut matcher);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].r1.id(), b"r1/2");
        assert_eq!(pairs[0].r2.id(), b"r1/1");
        assert_eq!(pairs[0].r2.batch(), Batch::new(0, 3));
        assert_eq!(matcher.overflow_matched(), 1);
        assert_eq!(matcher.pending_unmatched(), 1);
    }

    #[test]
    fn test_quick_drop_enabled() {
        let supplier = MockSupplier::with_reads(vec![
            unpaired("solo", 1),
            read("r1/1", 1),
            read("r1/2", 1),
        ]);
        let mut matcher = PairMatcher::new(supplier).with_quick_drop(true);

        let pairs = drain(&mut matcher);
        assert_eq!(pairs.len(), 1);
        assert_eq!(matcher.reads_dropped(), 1);
        assert_eq!(matcher.pending_unmatched(), 0);
    }

    #[test]
    fn test_quick_drop_disabled_retains_read() {
        let supplier = MockSupplier::with_reads(vec![unpaired("solo", 1)]);
        let mut matcher = PairMatcher::new(supplier);

        assert!(matcher.next_pair().unwrap().is_none());
        assert_eq!(matcher.reads_dropped(), 0);
        assert_eq!(matcher.pending_unmatched(), 1);
    }

    #[test]
    fn test_no_duplicate_emission_over_shuffled_stream() {
        // 30 pairs with first mates spread over batches 1-3 and second
        // mates over batches 2-5, interleaved within each batch
        let mut reads = Vec::new();
        for i in 0..30 {
            reads.push(read(&format!("p{i}/1"), 1 + (i % 3) as u32));
        }
        for i in (0..30).rev() {
            reads.push(read(&format!("p{i}/2"), 2 + (i % 4) as u32));
        }
        reads.sort_by_key(|r| r.batch().batch_id);

        let supplier = MockSupplier::with_reads(reads);
        let mut matcher = PairMatcher::new(supplier);
        let pairs = drain(&mut matcher);

        let mut stems: Vec<Vec<u8>> = pairs
            .iter()
            .map(|p| crate::keys::pairing_stem(p.r1.id()).to_vec())
            .collect();
        stems.sort();
        stems.dedup();
        assert_eq!(pairs.len(), 30, "every pair emitted");
        assert_eq!(stems.len(), 30, "no stem emitted twice");
        assert_eq!(matcher.pending_unmatched(), 0);
    }

    #[test]
    fn test_batch_release_ordering() {
        // three batches of unmatched reads: batch n must only be released
        // once the window has advanced past it (or at end of stream)
        let supplier =
            MockSupplier::with_reads(vec![read("a", 1), read("b", 2), read("c", 3)]);
        let mut matcher = PairMatcher::new(supplier);
        assert!(drain(&mut matcher).is_empty());

        let b = |n| Batch::new(0, n);
        let protocol = matcher.supplier().protocol();
        assert_eq!(
            protocol,
            vec![
                Event::Hold(b(1)),
                Event::Hold(b(2)),
                Event::Release(b(1)), // window advanced to (3, 2)
                Event::Hold(b(3)),
                Event::Release(b(3)), // end-of-stream drain
                Event::Release(b(2)),
            ]
        );
        assert!(matcher.supplier().held.is_empty(), "no batches left held");
    }

    #[test]
    fn test_overflow_release_interception() {
        let supplier = MockSupplier::with_reads(vec![
            read("far/1", 1),
            read("b2", 2),
            read("b3", 3),
            read("far/2", 4),
        ]);
        let mut matcher = PairMatcher::new(supplier);
        let pair = matcher.next_pair().unwrap().expect("pair");
        let out_batch = pair.r1.batch();
        assert_eq!(matcher.pending_overflow_releases(), 1);

        // consumer protocol: hold while using the pair, then release
        matcher.hold_batch(out_batch);
        matcher.release_batch(out_batch);
        assert_eq!(matcher.pending_overflow_releases(), 0);

        // releasing a batch with no attributed overflow records still forwards
        assert!(!matcher.release_batch(Batch::new(0, 99)));
    }

    #[test]
    fn test_reinit_forwarded() {
        let supplier = MockSupplier::default();
        let mut matcher = PairMatcher::new(supplier);
        matcher.reinit(1024, 4096).unwrap();
        assert_eq!(matcher.into_inner().reinits, vec![(1024, 4096)]);
    }

    #[test]
    fn test_key_collision_is_fatal_in_validation_mode() {
        // KeyValidator is unit-tested against a forced collision; here make
        // sure validation mode accepts collision-free input end to end
        let supplier = MockSupplier::with_reads(vec![
            read("r1/1", 1),
            read("r2/1", 1),
            read("r1/2", 1),
            read("r2/2", 1),
        ]);
        let mut matcher = PairMatcher::new(supplier).with_key_validation(true);
        assert_eq!(drain(&mut matcher).len(), 2);
    }

    #[test]
    fn test_watchdog_stream_still_drains() {
        // far past the watchdog threshold without a single pair; the warning
        // is non-fatal and every read is accounted for at end of stream
        let reads: Vec<Read> = (0..10_001).map(|i| read(&format!("u{i}"), 1)).collect();
        let supplier = MockSupplier::with_reads(reads);
        let mut matcher = PairMatcher::new(supplier);

        assert!(matcher.next_pair().unwrap().is_none());
        assert_eq!(matcher.pending_unmatched(), 10_001);
        // drain runs once; further pulls are cheap end-of-stream reports
        assert!(matcher.next_pair().unwrap().is_none());
    }
}
