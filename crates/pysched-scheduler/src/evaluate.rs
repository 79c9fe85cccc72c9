//! The pure due/not-due decision for a single trigger.
//!
//! No I/O: the engine loads trigger state, calls [`evaluate`], and performs
//! the claim. Keeping the decision pure makes every scheduling property
//! testable with plain timestamps.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use pysched_core::types::TriggerConfig;

use crate::cron::CronExpr;

/// Outcome of evaluating one trigger at instant `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub due: bool,
    /// The `next_run_at` value to commit with the claim when `due`; the
    /// currently planned occurrence otherwise.
    pub next_run: Option<DateTime<Utc>>,
}

impl Decision {
    fn not_due(next_run: Option<DateTime<Utc>>) -> Self {
        Self {
            due: false,
            next_run,
        }
    }
}

/// Decide whether a trigger is due at `now` and what its post-firing
/// `next_run_at` should be.
///
/// Interval triggers re-anchor on the firing instant (`now + seconds`), not
/// on the previous schedule — a daemon that was down for three intervals
/// fires once and resumes, rather than bursting through the backlog. Cron
/// triggers likewise compute the occurrence following `now`.
pub fn evaluate(
    config: &TriggerConfig,
    last_triggered_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Decision {
    match config {
        TriggerConfig::Interval { seconds } => {
            let interval = Duration::seconds(*seconds as i64);
            let due = match last_triggered_at {
                None => true,
                Some(last) => now - last >= interval,
            };
            if due {
                Decision {
                    due: true,
                    next_run: Some(now + interval),
                }
            } else {
                Decision::not_due(last_triggered_at.map(|last| last + interval))
            }
        }

        TriggerConfig::Cron { expression } => {
            let expr = match CronExpr::parse(expression) {
                Ok(expr) => expr,
                Err(e) => {
                    // Creation-time validation makes this unreachable for
                    // well-formed rows; a hand-edited database should not
                    // wedge the loop.
                    warn!(error = %e, "stored cron expression failed to parse");
                    return Decision::not_due(None);
                }
            };
            let due = match next_run_at {
                None => true, // first evaluation fires immediately
                Some(next) => now >= next,
            };
            if due {
                Decision {
                    due: true,
                    next_run: expr.next_after(now),
                }
            } else {
                Decision::not_due(next_run_at)
            }
        }

        // Startup triggers are claimed by the dedicated startup pass;
        // manual triggers only fire via explicit request.
        TriggerConfig::Startup | TriggerConfig::Manual => Decision::not_due(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, mi, s).unwrap()
    }

    #[test]
    fn interval_never_fired_is_due_immediately() {
        let config = TriggerConfig::Interval { seconds: 30 };
        let now = at(10, 0, 0);
        let decision = evaluate(&config, None, None, now);
        assert!(decision.due);
        assert_eq!(decision.next_run, Some(at(10, 0, 30)));
    }

    #[test]
    fn interval_not_due_before_elapsed() {
        // Claimed at t=0 with seconds=30; re-evaluated at t=10.
        let config = TriggerConfig::Interval { seconds: 30 };
        let decision = evaluate(&config, Some(at(10, 0, 0)), Some(at(10, 0, 30)), at(10, 0, 10));
        assert!(!decision.due);
        assert_eq!(decision.next_run, Some(at(10, 0, 30)));
    }

    #[test]
    fn interval_due_at_exact_boundary() {
        let config = TriggerConfig::Interval { seconds: 30 };
        let decision = evaluate(&config, Some(at(10, 0, 0)), None, at(10, 0, 30));
        assert!(decision.due);
    }

    #[test]
    fn interval_reanchors_on_firing_instant_after_downtime() {
        // Last fired 10 minutes ago with a 60s interval: one firing, and the
        // next run is anchored on now — no catch-up burst.
        let config = TriggerConfig::Interval { seconds: 60 };
        let now = at(10, 10, 0);
        let decision = evaluate(&config, Some(at(10, 0, 0)), None, now);
        assert!(decision.due);
        assert_eq!(decision.next_run, Some(at(10, 11, 0)));
    }

    #[test]
    fn cron_first_evaluation_fires_and_plans_next() {
        let config = TriggerConfig::Cron {
            expression: "*/5 * * * *".into(),
        };
        let now = at(10, 2, 0);
        let decision = evaluate(&config, None, None, now);
        assert!(decision.due);
        assert_eq!(decision.next_run, Some(at(10, 5, 0)));
    }

    #[test]
    fn cron_waits_for_planned_occurrence() {
        let config = TriggerConfig::Cron {
            expression: "*/5 * * * *".into(),
        };
        let planned = at(10, 5, 0);
        let decision = evaluate(&config, Some(at(10, 0, 0)), Some(planned), at(10, 3, 0));
        assert!(!decision.due);
        assert_eq!(decision.next_run, Some(planned));

        let decision = evaluate(&config, Some(at(10, 0, 0)), Some(planned), at(10, 5, 0));
        assert!(decision.due);
        assert_eq!(decision.next_run, Some(at(10, 10, 0)));
    }

    #[test]
    fn startup_and_manual_never_due_in_the_loop() {
        let now = at(10, 0, 0);
        assert!(!evaluate(&TriggerConfig::Startup, None, None, now).due);
        assert!(!evaluate(&TriggerConfig::Manual, None, None, now).due);
    }

    #[test]
    fn bad_stored_cron_is_not_due() {
        let config = TriggerConfig::Cron {
            expression: "not a cron".into(),
        };
        let decision = evaluate(&config, None, None, at(10, 0, 0));
        assert!(!decision.due);
        assert_eq!(decision.next_run, None);
    }
}
