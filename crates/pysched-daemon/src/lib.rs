//! `pysched-daemon` — worker pool, retry policy, and the daemon process.
//!
//! The binary (`pysched`) wires the stores, the dispatch engine, and the
//! worker pool together; [`worker`] exposes the execution pipeline and the
//! [`worker::ExecutionHandle`] used by management surfaces to enqueue
//! "run now" requests.

pub mod worker;

pub use worker::{ExecutionHandle, WorkerContext, WorkerPool};
