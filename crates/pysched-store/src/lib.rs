//! `pysched-store` — script records and the execution ledger over SQLite.
//!
//! # Overview
//!
//! Two stores share one database file (each wraps its own connection):
//!
//! | Store             | Table        | Role                                    |
//! |-------------------|--------------|-----------------------------------------|
//! | [`ScriptStore`]   | `scripts`    | Script metadata, counters, slug layout  |
//! | [`ExecutionLedger`] | `executions` | Append-only history of every attempt  |
//!
//! The ledger is the sole mutator of execution rows and of the owning
//! script's running counters — the runner only ever *returns* outcomes,
//! keeping the finalize protocol auditable in one place. The trigger table
//! lives in `pysched-scheduler`, next to the claim protocol that owns it.

pub mod db;
pub mod error;
pub mod ledger;
pub mod scripts;

pub use error::{Result, StoreError};
pub use ledger::{ExecutionLedger, ExecutionOutcome};
pub use scripts::{NewScript, ScriptStore};
