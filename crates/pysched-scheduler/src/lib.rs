//! `pysched-scheduler` — triggers, schedule arithmetic, and the dispatch loop.
//!
//! # Overview
//!
//! Triggers are persisted to a SQLite `triggers` table. The
//! [`engine::DispatchEngine`] polls the catalog on a fixed tick, asks the
//! pure evaluator which triggers are due, atomically claims each one, and
//! hands the resulting [`pysched_core::types::ExecutionRequest`] to the
//! worker queue — it never blocks on script execution itself.
//!
//! # Trigger kinds
//!
//! | Kind       | Behaviour                                                |
//! |------------|----------------------------------------------------------|
//! | `Interval` | Fire when N seconds have elapsed since the last firing   |
//! | `Cron`     | Five-field cron expression, UTC calendar semantics       |
//! | `Startup`  | Fire once per daemon start                               |
//! | `Manual`   | Only via explicit request, never from the loop           |

pub mod catalog;
pub mod cron;
pub mod db;
pub mod engine;
pub mod error;
pub mod evaluate;

pub use catalog::TriggerCatalog;
pub use cron::CronExpr;
pub use engine::DispatchEngine;
pub use error::{Result, ScheduleError};
pub use evaluate::{evaluate, Decision};
