//! Implementation of a disk-based chemical structure database with substructure and
//! similarity search.
//!
//! Records are serialized structure graphs stored append-only with stable u64 ids.
//! Every record carries two fingerprints computed at insert time: a similarity
//! fingerprint for Tanimoto/Tversky ranking and a segmented screening fingerprint
//! for substructure pre-filtering. `optimize` builds a transposed bit-slice index
//! over the screening fingerprints; records inserted after the last optimize are
//! screened by linear scan, so the index is never required for correctness.
//!
//! TODO
//! - [x] prototype store, screening index and matchers with tests
//! - [ ] implement parallel candidate verification
//! - [ ] mmap the record file instead of per-call opens
//!
//!
//!
pub mod error;
pub mod layout;
pub mod graph;
pub mod fingerprint;
pub mod metric;
pub mod io;
pub mod screen;
pub mod matcher;
pub mod database;
