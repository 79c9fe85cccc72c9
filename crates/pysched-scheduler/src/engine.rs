use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use pysched_core::types::{ExecutionRequest, Trigger, TriggeredBy};

use crate::catalog::TriggerCatalog;
use crate::error::Result;
use crate::evaluate::evaluate;

/// The dispatch loop: scans the catalog on a fixed tick, claims due
/// triggers, and enqueues execution requests.
///
/// The engine never blocks on provisioning or execution — claimed work goes
/// onto a bounded queue via `try_send` and the tick returns. A trigger whose
/// previous firing is still in flight is skipped, so a slow script can never
/// queue an unbounded backlog against itself.
pub struct DispatchEngine {
    catalog: Arc<TriggerCatalog>,
    queue: mpsc::Sender<ExecutionRequest>,
    /// Trigger ids with an execution currently in flight. Workers remove
    /// entries when an attempt reaches its terminal state.
    in_flight: Arc<DashMap<String, ()>>,
    tick_secs: u64,
}

impl DispatchEngine {
    pub fn new(
        catalog: Arc<TriggerCatalog>,
        queue: mpsc::Sender<ExecutionRequest>,
        in_flight: Arc<DashMap<String, ()>>,
        tick_secs: u64,
    ) -> Self {
        Self {
            catalog,
            queue,
            in_flight,
            tick_secs,
        }
    }

    /// Claim and enqueue every enabled startup trigger. Runs once, before
    /// the periodic loop. Returns the number of dispatched triggers.
    pub fn startup_pass(&self) -> Result<usize> {
        let now = Utc::now();
        let mut dispatched = 0;

        for trigger in self.catalog.list_startup()? {
            // Startup triggers have no next occurrence; the claim records
            // the firing instant only.
            if !self.catalog.claim(&trigger, now, None)? {
                continue;
            }
            if self.dispatch(&trigger, TriggeredBy::Startup) {
                dispatched += 1;
            }
        }

        if dispatched > 0 {
            info!(count = dispatched, "startup triggers dispatched");
        }
        Ok(dispatched)
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.tick_secs, "dispatch engine started");

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.tick_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick() {
                        Ok(n) if n > 0 => debug!(dispatched = n, "tick complete"),
                        Ok(_) => {}
                        // Tick failures are operational: log and keep going.
                        Err(e) => error!("dispatch tick error: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("dispatch engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One due-scan: evaluate every candidate, claim the due ones, enqueue.
    /// Returns the number of dispatched triggers.
    pub fn tick(&self) -> Result<usize> {
        let now = Utc::now();
        let mut dispatched = 0;

        for trigger in self.catalog.list_due_candidates()? {
            let last = trigger
                .last_triggered_at
                .as_deref()
                .and_then(Trigger::parse_instant);
            let next = trigger
                .next_run_at
                .as_deref()
                .and_then(Trigger::parse_instant);

            let decision = evaluate(&trigger.config, last, next, now);
            if !decision.due {
                continue;
            }

            // At most one execution in flight per trigger: a still-running
            // firing postpones this occurrence to a later tick.
            if self.in_flight.contains_key(&trigger.id) {
                debug!(trigger_id = %trigger.id, "previous firing still running — skipped");
                continue;
            }

            if !self.catalog.claim(&trigger, now, decision.next_run)? {
                debug!(trigger_id = %trigger.id, "lost claim race — skipped");
                continue;
            }

            if self.dispatch(&trigger, TriggeredBy::Schedule) {
                dispatched += 1;
            }
        }

        Ok(dispatched)
    }

    /// Mark in flight and enqueue; rolls the mark back if the queue is full.
    fn dispatch(&self, trigger: &Trigger, triggered_by: TriggeredBy) -> bool {
        self.in_flight.insert(trigger.id.clone(), ());

        let request = ExecutionRequest {
            script_id: trigger.script_id.clone(),
            trigger_id: Some(trigger.id.clone()),
            triggered_by,
        };

        // try_send keeps the tick non-blocking. The claim already advanced
        // the trigger, so a full queue costs exactly this one occurrence —
        // the same guarantee as a crash between claim and execution.
        if self.queue.try_send(request).is_err() {
            warn!(trigger_id = %trigger.id, "execution queue full — occurrence dropped");
            self.in_flight.remove(&trigger.id);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use pysched_core::types::TriggerConfig;
    use pysched_store::{NewScript, ScriptStore};
    use rusqlite::Connection;
    use uuid::Uuid;

    struct TestDb {
        path: std::path::PathBuf,
    }

    impl TestDb {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "pysched-engine-test-{}.db",
                Uuid::new_v4()
            ));
            let conn = Connection::open(&path).unwrap();
            pysched_store::db::init_db(&conn).unwrap();
            init_db(&conn).unwrap();
            Self { path }
        }

        fn open(&self) -> Connection {
            Connection::open(&self.path).unwrap()
        }
    }

    impl Drop for TestDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn build_engine(
        db: &TestDb,
        depth: usize,
    ) -> (
        DispatchEngine,
        mpsc::Receiver<ExecutionRequest>,
        Arc<TriggerCatalog>,
        Arc<DashMap<String, ()>>,
        String,
    ) {
        let scripts = ScriptStore::new(db.open());
        let script_id = scripts
            .create(NewScript::new("Engine Test", "print(1)"))
            .unwrap()
            .id;

        let catalog = Arc::new(TriggerCatalog::new(db.open()));
        let in_flight = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::channel(depth);
        let engine = DispatchEngine::new(Arc::clone(&catalog), tx, Arc::clone(&in_flight), 60);
        (engine, rx, catalog, in_flight, script_id)
    }

    #[test]
    fn never_fired_interval_is_dispatched_once() {
        let db = TestDb::new();
        let (engine, mut rx, catalog, _in_flight, script_id) = build_engine(&db, 8);

        let trigger = catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 3600 }, true)
            .unwrap();

        assert_eq!(engine.tick().unwrap(), 1);
        let request = rx.try_recv().unwrap();
        assert_eq!(request.script_id, script_id);
        assert_eq!(request.trigger_id.as_deref(), Some(trigger.id.as_str()));
        assert_eq!(request.triggered_by, TriggeredBy::Schedule);

        // The claim advanced the trigger: an immediate re-tick is a no-op.
        assert_eq!(engine.tick().unwrap(), 0);
        assert!(rx.try_recv().is_err());

        let stored = catalog.get(&trigger.id).unwrap().unwrap();
        assert!(stored.last_triggered_at.is_some());
        assert!(stored.next_run_at.is_some());
    }

    #[test]
    fn in_flight_trigger_is_skipped_not_queued() {
        let db = TestDb::new();
        let (engine, mut rx, catalog, in_flight, script_id) = build_engine(&db, 8);

        let trigger = catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 3600 }, true)
            .unwrap();
        in_flight.insert(trigger.id.clone(), ());

        assert_eq!(engine.tick().unwrap(), 0);
        assert!(rx.try_recv().is_err());
        // Skipping happens before the claim: the occurrence is postponed,
        // not consumed.
        let stored = catalog.get(&trigger.id).unwrap().unwrap();
        assert!(stored.last_triggered_at.is_none());

        // Once the worker clears the mark, the next tick dispatches.
        in_flight.remove(&trigger.id);
        assert_eq!(engine.tick().unwrap(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn startup_pass_claims_startup_triggers_once() {
        let db = TestDb::new();
        let (engine, mut rx, catalog, in_flight, script_id) = build_engine(&db, 8);

        catalog
            .create(&script_id, TriggerConfig::Startup, true)
            .unwrap();
        catalog
            .create(&script_id, TriggerConfig::Manual, true)
            .unwrap();

        assert_eq!(engine.startup_pass().unwrap(), 1);
        let request = rx.try_recv().unwrap();
        assert_eq!(request.triggered_by, TriggeredBy::Startup);

        // Simulate the worker finishing, then confirm the periodic loop
        // leaves startup triggers alone.
        in_flight.clear();
        assert_eq!(engine.tick().unwrap(), 0);
    }

    #[test]
    fn full_queue_drops_occurrence_and_clears_mark() {
        let db = TestDb::new();
        let (engine, mut rx, catalog, in_flight, script_id) = build_engine(&db, 1);

        catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 3600 }, true)
            .unwrap();
        catalog
            .create(&script_id, TriggerConfig::Interval { seconds: 3600 }, true)
            .unwrap();

        // Queue depth 1: the second dispatch is dropped but leaves no stale
        // in-flight mark behind.
        assert_eq!(engine.tick().unwrap(), 1);
        assert!(rx.try_recv().is_ok());
        assert_eq!(in_flight.len(), 1);
    }
}
