#![deny(unsafe_code)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! # remate - streaming mate-pair reconstruction
//!
//! Paired-end aligners and downstream tools want reads two at a time, but
//! position-grouped SAM streams deliver mates individually and arbitrarily
//! far apart. This library reconstructs pairs on the fly under a hard memory
//! bound.
//!
//! ## Overview
//!
//! - **[`matcher`]** - the [`PairMatcher`] core: two-generation matching
//!   window, unbounded overflow store, batch-lifetime bookkeeping
//! - **[`supplier`]** - the [`ReadSupplier`] contract and
//!   [`SamBatchReader`], a batching raw-SAM-line supplier
//! - **[`keys`]** - mate-suffix-insensitive 64-bit match keys
//! - **[`read`]** - [`Read`] views over shared batch buffers and [`Batch`]
//!   lifetime tags
//!
//! Utilities: [`errors`], [`progress`], [`logging`].
//!
//! ## Quick start
//!
//! ```no_run
//! use remate_lib::{PairMatcher, SamBatchReader};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! # fn main() -> remate_lib::Result<()> {
//! let input = BufReader::new(File::open("input.sam")?);
//! let mut matcher = PairMatcher::new(SamBatchReader::new(input));
//! while let Some(pair) = matcher.next_pair()? {
//!     // pair.r1 / pair.r2 are mates
//! }
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod keys;
pub mod logging;
pub mod matcher;
pub mod progress;
pub mod read;
pub mod supplier;

pub use errors::{RemateError, Result};
pub use keys::{KeyMaker, MatchKey};
pub use matcher::{PairMatcher, ReadPair};
pub use read::{Batch, Read};
pub use supplier::{ReadSupplier, SamBatchReader};
