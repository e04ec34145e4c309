//! Getting the in-memory document onto disk.
//!
//! `writer` performs one durable write; `debounce` decides when writes
//! happen so that bursts of mutations collapse into a single write.

mod debounce;
mod writer;

pub use debounce::{DebounceState, Persister, SaveTarget, DEFAULT_DEBOUNCE};
pub use writer::write_durable;
