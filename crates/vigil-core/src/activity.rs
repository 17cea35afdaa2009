//! Staleness tracking for counters the worker reports about itself.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;
use serde_json::Value;
use tracing::debug;

use crate::config::seconds_f64;
use crate::types::{LoopProps, LoopType, WorkerStatus};

/// When the next change of a loop's counter is due at the latest.
///
/// Scheduled loops get the second upcoming trigger, so one late iteration
/// is tolerated. Periodic loops get their period plus `relax`. Anything
/// else has no deadline and is never flagged.
pub fn loop_deadline(props: &LoopProps, now: DateTime<Utc>, relax: TimeDelta) -> Option<DateTime<Utc>> {
    match props.loop_type? {
        LoopType::Scheduled | LoopType::ScheduledProducer => {
            let expr = props.schedule.as_deref()?;
            match Schedule::from_str(&normalize_cron_expr(expr)) {
                Ok(schedule) => schedule.after(&now).nth(1),
                Err(e) => {
                    debug!("Ignoring unparseable schedule {:?}: {}", expr, e);
                    None
                }
            }
        }
        LoopType::Periodic => {
            let period = props.period?;
            now.checked_add_signed(seconds_f64(period))?
                .checked_add_signed(relax)
        }
        LoopType::Other => None,
    }
}

/// Rewrites a classic 5-field crontab line into the form the `cron` crate
/// parses: a leading seconds field, and weekdays by name since crontab counts
/// them from 0 (or 7) = Sunday while the crate counts from 1 = Sunday.
fn normalize_cron_expr(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day,
            month,
            crontab_weekdays(weekday)
        ),
        _ => expr.to_string(),
    }
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn crontab_weekday(token: &str) -> Option<&'static str> {
    match token.parse::<usize>() {
        Ok(7) => Some(WEEKDAYS[0]),
        Ok(n) => WEEKDAYS.get(n).copied(),
        Err(_) => None,
    }
}

fn crontab_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };

            let mapped = match range.split_once('-') {
                Some((start, end)) => match (crontab_weekday(start), crontab_weekday(end)) {
                    // 7 closes a range on Sunday, past Saturday.
                    (Some(from), Some(_)) if end == "7" => {
                        if start == "0" || step.is_some() {
                            format!("{}-Sat", from)
                        } else if start == "7" {
                            from.to_string()
                        } else {
                            format!("{}-Sat,Sun", from)
                        }
                    }
                    (Some(from), Some(to)) => format!("{}-{}", from, to),
                    _ => range.to_string(),
                },
                None => crontab_weekday(range)
                    .map(str::to_string)
                    .unwrap_or_else(|| range.to_string()),
            };

            match step {
                Some(step) => format!("{}/{}", mapped, step),
                None => mapped,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// A counter that stopped changing past its deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleCounter {
    pub subject: String,
    pub counter: Value,
    pub changed_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl fmt::Display for StaleCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is stale on {} at {} (change expected before {})",
            self.subject,
            self.counter,
            self.changed_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.deadline.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        )
    }
}

/// Last seen value of a counter, when it changed, and when it must change next.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterWatch {
    pub counter: Value,
    pub changed_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}

impl CounterWatch {
    pub fn new(counter: Value, now: DateTime<Utc>, deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            counter,
            changed_at: now,
            deadline,
        }
    }

    /// Feeds a fresh observation. `next_deadline` becomes the deadline when
    /// the counter changed, or after a staleness report so the same window
    /// is not reported twice.
    fn observe(
        &mut self,
        subject: &str,
        counter: &Value,
        now: DateTime<Utc>,
        grace: TimeDelta,
        next_deadline: Option<DateTime<Utc>>,
    ) -> Option<StaleCounter> {
        if *counter != self.counter {
            debug!(
                "{} updated counter from {} to {} at {}",
                subject, self.counter, counter, now
            );
            self.counter = counter.clone();
            self.changed_at = now;
            self.deadline = next_deadline;
            return None;
        }

        let deadline = self.deadline?;
        if now.signed_duration_since(deadline) <= grace {
            return None;
        }

        self.deadline = next_deadline;
        Some(StaleCounter {
            subject: subject.to_string(),
            counter: self.counter.clone(),
            changed_at: self.changed_at,
            deadline,
        })
    }
}

fn observe_slot(
    slot: &mut Option<CounterWatch>,
    subject: &str,
    counter: &Value,
    now: DateTime<Utc>,
    grace: TimeDelta,
    next_deadline: Option<DateTime<Utc>>,
) -> Option<StaleCounter> {
    match slot {
        Some(watch) => watch.observe(subject, counter, now, grace, next_deadline),
        None => {
            *slot = Some(CounterWatch::new(counter.clone(), now, next_deadline));
            None
        }
    }
}

/// Per-loop counter tracking.
#[derive(Debug, Default)]
pub struct LoopTracker {
    stats: HashMap<String, CounterWatch>,
}

impl LoopTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        loops: &HashMap<String, LoopProps>,
        now: DateTime<Utc>,
        relax: TimeDelta,
    ) -> Vec<StaleCounter> {
        let mut names: Vec<&String> = loops.keys().collect();
        names.sort();

        let mut stale = Vec::new();
        for name in names {
            let props = &loops[name];
            let deadline = loop_deadline(props, now, relax);
            let subject = format!("{} counter", name);

            match self.stats.get_mut(name) {
                Some(watch) => {
                    if let Some(report) =
                        watch.observe(&subject, &props.counter, now, TimeDelta::zero(), deadline)
                    {
                        stale.push(report);
                    }
                }
                None => {
                    debug!("{} first seen with counter {} at {}", name, props.counter, now);
                    self.stats.insert(
                        name.clone(),
                        CounterWatch::new(props.counter.clone(), now, deadline),
                    );
                }
            }
        }
        stale
    }

    pub fn get(&self, name: &str) -> Option<&CounterWatch> {
        self.stats.get(name)
    }
}

/// Tracks the collect/submit/purge pipeline counters of the worker.
#[derive(Debug, Default)]
pub struct WorkflowTracker {
    collected: Option<CounterWatch>,
    submitted: Option<CounterWatch>,
    purged: Option<CounterWatch>,
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        status: &WorkerStatus,
        now: DateTime<Utc>,
        relax: TimeDelta,
        purge_period: TimeDelta,
    ) -> Vec<StaleCounter> {
        let mut has_measurement_loops = false;
        let mut deadline: Option<DateTime<Utc>> = None;
        for (_, props) in status.measurement_loops() {
            has_measurement_loops = true;
            if let Some(d) = loop_deadline(props, now, relax) {
                deadline = Some(deadline.map_or(d, |current| current.min(d)));
            }
        }

        if !has_measurement_loops {
            // Counters are not expected to move without measurement loops.
            debug!("No active measurement loops found");
            return Vec::new();
        }
        debug!("Workflow deadline is calculated as {:?}", deadline);

        let purge_deadline = now.checked_add_signed(purge_period);
        [
            observe_slot(
                &mut self.collected,
                "Measurement collection",
                &status.collected_counter,
                now,
                relax,
                deadline,
            ),
            observe_slot(
                &mut self.submitted,
                "Measurement submission",
                &status.submitted_counter,
                now,
                relax,
                deadline,
            ),
            observe_slot(
                &mut self.purged,
                "Measurement purging",
                &status.purged_records,
                now,
                relax,
                purge_deadline,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
