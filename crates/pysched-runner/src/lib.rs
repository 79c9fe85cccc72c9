//! `pysched-runner` — isolated per-script runtimes and bounded execution.
//!
//! # Overview
//!
//! Each script owns a workspace directory with its source file, a
//! `requirements.txt`, and a private virtualenv:
//!
//! ```text
//! <data>/scripts/[<folder>/]<slug>/
//!   <slug>.py          ← source of record for the current run
//!   requirements.txt   ← declared dependencies
//!   .venv/             ← isolated interpreter + packages
//! ```
//!
//! The [`venv::Provisioner`] creates and synchronises the venv (slow,
//! idempotent, never on the dispatch path); [`exec::run`] executes the
//! script inside it under a hard wall-clock timeout and reports the outcome
//! as data. Neither touches the store — callers own persistence.
//!
//! Concurrent mutation of one workspace is undefined; the daemon serializes
//! provisioning and execution per script.

pub mod error;
pub mod exec;
pub mod truncate;
pub mod venv;
pub mod workspace;

pub use error::{Result, RunnerError};
pub use exec::{run, RunFailure, RunOutcome};
pub use venv::{EnvInfo, Provisioner};
pub use workspace::ScriptWorkspace;
