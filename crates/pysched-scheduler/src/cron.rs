//! Five-field cron expression parsing and occurrence computation.
//!
//! Supports the classic "MIN HOUR DOM MON DOW" form with `*`, single values,
//! ranges `a-b`, steps `*/n` and `a-b/n`, and comma lists. All arithmetic is
//! UTC. Day matching follows the vixie-cron rule: when both day-of-month and
//! day-of-week are restricted, a date matches if *either* field matches.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{Result, ScheduleError};

/// Upper bound on the forward search, in days. Covers every leap-year
/// combination (e.g. "0 0 29 2 *"); anything unmatched within it is an
/// impossible date such as Feb 30.
const MAX_SEARCH_DAYS: i64 = 4 * 366;

/// A parsed, validated cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>, // 0 = Sunday … 6 = Saturday
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse and validate a five-field expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let err = |reason: String| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59).map_err(|e| err(format!("minute: {e}")))?,
            hours: parse_field(fields[1], 0, 23).map_err(|e| err(format!("hour: {e}")))?,
            days_of_month: parse_field(fields[2], 1, 31)
                .map_err(|e| err(format!("day-of-month: {e}")))?,
            months: parse_field(fields[3], 1, 12).map_err(|e| err(format!("month: {e}")))?,
            days_of_week: parse_field(fields[4], 0, 6)
                .map_err(|e| err(format!("day-of-week: {e}")))?,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// The first occurrence strictly after `anchor`, or `None` when the
    /// expression can never match (impossible calendar date).
    pub fn next_after(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Candidates have second = 0; start one minute past the anchor so
        // the result is strictly in the future.
        let start = (anchor + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let start_date = start.date_naive();

        for offset in 0..=MAX_SEARCH_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.date_matches(date) {
                continue;
            }

            // On the first day the search begins at the anchor's time; on
            // later days the whole day is available.
            let earliest = if offset == 0 {
                (start.hour(), start.minute())
            } else {
                (0, 0)
            };

            if let Some((hour, minute)) = self.first_time_at_or_after(earliest) {
                return Utc
                    .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
                    .single();
            }
        }
        None
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&date.day());
        let dow_ok = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());

        match (self.dom_restricted, self.dow_restricted) {
            (false, false) => true,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            // Both restricted: vixie cron fires when either matches.
            (true, true) => dom_ok || dow_ok,
        }
    }

    /// Smallest (hour, minute) in the expression at or after `(h, m)`.
    fn first_time_at_or_after(&self, (from_hour, from_minute): (u32, u32)) -> Option<(u32, u32)> {
        for &hour in &self.hours {
            if hour < from_hour {
                continue;
            }
            let min_minute = if hour == from_hour { from_minute } else { 0 };
            if let Some(&minute) = self.minutes.iter().find(|&&m| m >= min_minute) {
                return Some((hour, minute));
            }
        }
        None
    }
}

/// Parse one cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<Vec<u32>, String> {
    if field.is_empty() {
        return Err("empty field".to_string());
    }

    let mut values = Vec::new();
    for token in field.split(',') {
        values.extend(parse_token(token, min, max)?);
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

/// Parse a single token: `*`, `N`, `a-b`, `*/n`, or `a-b/n`.
fn parse_token(token: &str, min: u32, max: u32) -> std::result::Result<Vec<u32>, String> {
    let (base, step) = match token.split_once('/') {
        Some((base, step_str)) => {
            let step: u32 = step_str
                .parse()
                .map_err(|_| format!("bad step '{step_str}'"))?;
            if step == 0 {
                return Err("step must be positive".to_string());
            }
            (base, step)
        }
        None => (token, 1),
    };

    let (lo, hi) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        let lo: u32 = a.parse().map_err(|_| format!("bad value '{a}'"))?;
        let hi: u32 = b.parse().map_err(|_| format!("bad value '{b}'"))?;
        if lo > hi {
            return Err(format!("reversed range {lo}-{hi}"));
        }
        (lo, hi)
    } else {
        let v: u32 = base.parse().map_err(|_| format!("bad value '{base}'"))?;
        (v, v)
    };

    if lo < min || hi > max {
        return Err(format!("value out of range {min}-{max}"));
    }

    Ok((lo..=hi).step_by(step as usize).collect())
}

/// Stateless authoring-time check used by trigger creation and exposed to
/// UI layers.
pub fn validate(expression: &str) -> bool {
    CronExpr::parse(expression).is_ok()
}

/// The next `n` occurrences of `expression` after `from`. Authoring helper
/// for "when will this run" previews.
pub fn next_occurrences(
    expression: &str,
    from: DateTime<Utc>,
    n: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let expr = CronExpr::parse(expression)?;
    let mut occurrences = Vec::with_capacity(n);
    let mut anchor = from;
    for _ in 0..n {
        match expr.next_after(anchor) {
            Some(next) => {
                occurrences.push(next);
                anchor = next;
            }
            None => break,
        }
    }
    Ok(occurrences)
}
