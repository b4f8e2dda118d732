//! # LSM-Tree Storage Engine
//!
//! An embedded key-value storage engine using the Log-Structured Merge-Tree
//! design, with multi-version reads and a write-ahead log.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes.
//!
//! ## Write path
//! `put`/`delete` → write-ahead log (sequence id assigned) → log consumer →
//! memstore → flushed to an immutable disk file → merged by compaction.
//!
//! ## Read path
//! A scan merges the memstore with every live disk file and keeps, per key,
//! the newest version at or below the scan's version ceiling.

pub mod bloom;
pub mod cache;
pub mod codec;
pub mod compaction;
pub mod db;
pub mod error;
pub mod filter;
pub mod iterator;
pub mod memtable;
pub mod options;
pub mod pool;
pub mod sstable;
pub mod store;
pub mod types;
pub mod wal;

// Public re-exports for the top-level API
pub use db::{DB, Stats};
pub use error::{Error, Result};
pub use filter::KeyValueFilter;
pub use options::{Options, WalLevel};
pub use types::{KeyValue, Op};
