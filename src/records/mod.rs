//! In-memory tables and record queries.
//!
//! Every table is an ordered `Vec<Record>`; lookups are linear scans.
//! Filtering and sorting happen after the fact on copies, never on the
//! stored sequence.

mod query;
mod table;

pub use query::{Filter, Query};
pub use table::{DeleteOutcome, Tables};
