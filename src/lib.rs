//! # Timesheet Store
//!
//! A single-process JSON document store for employee hours, absences and
//! mileage, built to never lose previously-committed data.
//!
//! ## Core Concepts
//!
//! - **Tables**: named, ordered sequences of caller-defined records
//! - **Debounced saves**: bursts of mutations collapse into one fsynced write
//! - **Backups**: timestamped snapshots before risky writes, with retention
//! - **Shutdown**: a close handshake that waits for the final save, bounded by a timeout
//!
//! ## Example
//!
//! ```ignore
//! use timesheet_store::{Query, Store, StoreConfig};
//! use serde_json::json;
//!
//! let store = Store::open(StoreConfig::in_user_data_dir("afwezigheidsplanning-app")?)?;
//!
//! let jan = store.create("werknemers", json!({"naam": "Jan"}))?;
//! store.create("uren", json!({"werknemerId": jan.id(), "datum": "2025-03-04", "uren": 8}))?;
//!
//! let march = store.query("uren", &Query::new().month("datum", "2025-03").sort_desc("datum"));
//!
//! store.begin_import("uren")?;
//! store.force_save()?;
//! ```

pub mod backups;
pub mod error;
pub mod lifecycle;
pub mod persist;
pub mod records;
pub mod store;
pub mod types;

// Re-exports
pub use backups::{BackupInfo, BackupManager};
pub use error::{Result, StoreError};
pub use lifecycle::{
    CloseOutcome, FinalSave, HostWindow, ShutdownConfig, ShutdownCoordinator, ShutdownState,
};
pub use persist::{DebounceState, Persister, SaveTarget};
pub use records::{DeleteOutcome, Filter, Query, Tables};
pub use store::{Store, StoreConfig};
pub use types::*;
