// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Series fetch engine.
//!
//! A batch of fully-qualified targets (`archive.metric[.instance]`) is
//! grouped into one job per archive. Jobs are claimed through an atomic
//! index by a scoped worker pool, the calling thread included. Each job
//! owns mutable borrows of exactly its targets' output series, so jobs
//! write disjoint memory and need no coordination beyond the claim.
//!
//! A failure inside one job (archive missing, backend gone) is reported as
//! a [`Diagnostic`] and leaves that job's series NaN. Other jobs are
//! unaffected. Only an empty target list or an invalid window fails the
//! whole batch.

pub mod rate;

use crate::codec;
use crate::enumerate::archive_path;
use crate::error::{BridgeError, Result};
use crate::shutdown::ShutdownFlag;
use crate::source::{
    Connector, Descriptor, InstanceId, MetricId, MetricSource, Semantics, SourceSpec, Timestamp,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, warn};

/// Most points a single window may hold.
pub const MAX_WINDOW_POINTS: i64 = 1 << 24;

/// Inclusive, evenly stepped window in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64, step: i64) -> Result<Self> {
        if step <= 0 {
            return Err(BridgeError::InvalidWindow(format!("step {} is not positive", step)));
        }
        if start > end {
            return Err(BridgeError::InvalidWindow(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        let points = end
            .checked_sub(start)
            .and_then(|span| (span / step).checked_add(1))
            .ok_or_else(|| {
                BridgeError::InvalidWindow(format!("window {}..{} is too wide", start, end))
            })?;
        if points > MAX_WINDOW_POINTS {
            return Err(BridgeError::InvalidWindow(format!(
                "{} points exceed the limit of {}",
                points, MAX_WINDOW_POINTS
            )));
        }
        Ok(Self { start, end, step })
    }

    /// Number of steps, `(end - start) / step + 1`. Zero for a hand-built
    /// window that is inverted, has no positive step, or overflows.
    pub fn len(&self) -> usize {
        if self.step <= 0 {
            return 0;
        }
        self.end
            .checked_sub(self.start)
            .filter(|span| *span >= 0)
            .and_then(|span| (span / self.step).checked_add(1))
            .map_or(0, |points| points as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn times(&self) -> impl Iterator<Item = i64> {
        let Self { start, step, .. } = *self;
        (0..self.len() as i64).map(move |k| start + k * step)
    }
}

/// One output series: a point per window step, NaN where no value exists.
#[derive(Debug, Clone)]
pub struct ValueSeries {
    pub target: String,
    pub points: Vec<(i64, f64)>,
}

impl ValueSeries {
    fn empty(target: &str, window: &TimeWindow) -> Self {
        Self {
            target: target.to_string(),
            points: window.times().map(|t| (t, f64::NAN)).collect(),
        }
    }

    fn clear(&mut self) {
        for point in &mut self.points {
            point.1 = f64::NAN;
        }
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, v)| *v)
    }

    /// True if no step produced a value.
    pub fn is_all_nan(&self) -> bool {
        self.points.iter().all(|(_, v)| v.is_nan())
    }
}

/// A non-fatal problem, scoped to a job or to one target.
#[derive(Debug)]
pub struct Diagnostic {
    /// Encoded archive identifier; `None` if the target could not be split.
    pub archive: Option<String>,
    /// The affected target; `None` when the whole job failed.
    pub target: Option<String>,
    pub error: BridgeError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.archive, &self.target) {
            (_, Some(target)) => write!(f, "{}: {}", target, self.error),
            (Some(archive), None) => write!(f, "archive {}: {}", archive, self.error),
            (None, None) => write!(f, "{}", self.error),
        }
    }
}

/// Batch result: series in input order plus diagnostics.
#[derive(Debug)]
pub struct FetchOutcome {
    pub series: Vec<ValueSeries>,
    pub diagnostics: Vec<Diagnostic>,
}

/// How the metric-name pieces of a target were interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Last piece named an instance of the preceding metric.
    ResolvedAsInstance {
        metric: MetricId,
        desc: Descriptor,
        instance: InstanceId,
    },
    /// All pieces formed a metric without an instance domain.
    ResolvedAsMetric { metric: MetricId, desc: Descriptor },
    Unresolved(String),
}

/// Resolve the pieces after the archive component.
///
/// First try `pieces[..n-1]` as the metric and `pieces[n-1]` as an encoded
/// instance label. If that metric does not exist or has no instance domain,
/// try all pieces as a singular metric. Nothing further is attempted.
pub fn resolve_target(source: &dyn MetricSource, pieces: &[&str]) -> Resolution {
    if pieces.is_empty() {
        return Resolution::Unresolved("no metric name".into());
    }

    if let Some((last, head)) = pieces.split_last().filter(|(_, head)| !head.is_empty()) {
        let name = head.join(".");
        if let Ok(metric) = source.lookup_name(&name) {
            let desc = match source.lookup_descriptor(metric) {
                Ok(desc) => desc,
                Err(e) => return Resolution::Unresolved(e.to_string()),
            };
            if let Some(indom) = desc.indom {
                let label = codec::decode(last);
                if label.is_empty() {
                    return Resolution::Unresolved(format!("undecodable instance {}", last));
                }
                return match source.lookup_instance(indom, &label) {
                    Ok(instance) => Resolution::ResolvedAsInstance {
                        metric,
                        desc,
                        instance,
                    },
                    Err(_) => Resolution::Unresolved(format!(
                        "metric {} has no instance {:?}",
                        name, label
                    )),
                };
            }
        }
    }

    let name = pieces.join(".");
    let metric = match source.lookup_name(&name) {
        Ok(metric) => metric,
        Err(_) => return Resolution::Unresolved(format!("unknown metric {}", name)),
    };
    match source.lookup_descriptor(metric) {
        Ok(desc) if desc.indom.is_some() => {
            Resolution::Unresolved(format!("metric {} needs an instance", name))
        }
        Ok(desc) => Resolution::ResolvedAsMetric { metric, desc },
        Err(e) => Resolution::Unresolved(e.to_string()),
    }
}

/// Split a target into its archive component and metric pieces.
fn split_target(target: &str) -> Result<(&str, Vec<&str>)> {
    let mut parts = target.split('.');
    let archive = parts.next().unwrap_or_default();
    let pieces: Vec<&str> = parts.collect();
    if pieces.is_empty() {
        return Err(BridgeError::unresolved(target, "not enough target components"));
    }
    if archive.is_empty() || pieces.iter().any(|p| p.is_empty()) {
        return Err(BridgeError::unresolved(target, "empty target component"));
    }
    Ok((archive, pieces))
}

struct Slot<'s> {
    target: &'s str,
    pieces: Vec<&'s str>,
    series: &'s mut ValueSeries,
}

struct Job<'s> {
    archive: &'s str,
    slots: Vec<Slot<'s>>,
}

/// A resolved slot: which (metric, instance) feeds it.
struct Plan {
    slot: usize,
    metric: MetricId,
    instance: InstanceId,
    semantics: Semantics,
}

/// Runs fetch batches.
pub struct FetchEngine<'a> {
    connector: &'a dyn Connector,
    workers: usize,
    shutdown: ShutdownFlag,
}

impl<'a> FetchEngine<'a> {
    /// `workers` threads help the calling thread; 0 runs everything inline.
    pub fn new(connector: &'a dyn Connector, workers: usize, shutdown: ShutdownFlag) -> Self {
        Self {
            connector,
            workers,
            shutdown,
        }
    }

    /// Fetch one series per target over `window`.
    pub fn fetch_all_series(&self, targets: &[String], window: TimeWindow) -> Result<FetchOutcome> {
        if targets.is_empty() {
            return Err(BridgeError::EmptyBatch);
        }

        let mut series: Vec<ValueSeries> =
            targets.iter().map(|t| ValueSeries::empty(t, &window)).collect();
        let mut diagnostics = Vec::new();

        let mut jobs: Vec<Job<'_>> = Vec::new();
        let mut by_archive: HashMap<&str, usize> = HashMap::new();
        for (target, output) in targets.iter().zip(series.iter_mut()) {
            match split_target(target) {
                Ok((archive, pieces)) => {
                    let idx = *by_archive.entry(archive).or_insert_with(|| {
                        jobs.push(Job {
                            archive,
                            slots: Vec::new(),
                        });
                        jobs.len() - 1
                    });
                    jobs[idx].slots.push(Slot {
                        target,
                        pieces,
                        series: output,
                    });
                }
                Err(error) => diagnostics.push(Diagnostic {
                    archive: None,
                    target: Some(target.clone()),
                    error,
                }),
            }
        }

        let job_count = jobs.len();
        let jobs: Vec<Mutex<Job<'_>>> = jobs.into_iter().map(Mutex::new).collect();
        let next = AtomicUsize::new(0);
        let claim_and_run = || {
            let mut found = Vec::new();
            loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(job) = jobs.get(i) else {
                    break;
                };
                if self.shutdown.is_requested() {
                    break;
                }
                self.run_job(&mut job.lock(), &window, &mut found);
            }
            found
        };

        let helpers = self.workers.min(job_count.saturating_sub(1));
        thread::scope(|scope| {
            let handles: Vec<_> = (0..helpers).map(|_| scope.spawn(&claim_and_run)).collect();
            diagnostics.extend(claim_and_run());
            for handle in handles {
                match handle.join() {
                    Ok(found) => diagnostics.extend(found),
                    Err(_) => warn!("fetch worker panicked"),
                }
            }
        });
        drop(jobs);

        debug!(
            targets = targets.len(),
            jobs = job_count,
            diagnostics = diagnostics.len(),
            "fetch batch complete"
        );
        Ok(FetchOutcome {
            series,
            diagnostics,
        })
    }

    fn run_job(&self, job: &mut Job<'_>, window: &TimeWindow, diagnostics: &mut Vec<Diagnostic>) {
        let archive = job.archive;
        let job_failed = |error: BridgeError| Diagnostic {
            archive: Some(archive.to_string()),
            target: None,
            error,
        };

        let Some(path) = archive_path(archive) else {
            diagnostics.push(job_failed(BridgeError::unresolved(
                archive,
                "undecodable archive identifier",
            )));
            return;
        };
        let source = match self.connector.connect(&SourceSpec::Archive(path)) {
            Ok(source) => source,
            Err(e) => {
                warn!(archive, error = %e, "fetch job cannot open archive");
                diagnostics.push(job_failed(e));
                return;
            }
        };

        let mut plans = Vec::with_capacity(job.slots.len());
        for (i, slot) in job.slots.iter().enumerate() {
            let (metric, desc, instance) = match resolve_target(source.as_ref(), &slot.pieces) {
                Resolution::ResolvedAsInstance {
                    metric,
                    desc,
                    instance,
                } => (metric, desc, instance),
                Resolution::ResolvedAsMetric { metric, desc } => (metric, desc, InstanceId::NULL),
                Resolution::Unresolved(reason) => {
                    debug!(series = slot.target, %reason, "unresolved target");
                    diagnostics.push(Diagnostic {
                        archive: Some(archive.to_string()),
                        target: Some(slot.target.to_string()),
                        error: BridgeError::unresolved(slot.target, reason),
                    });
                    continue;
                }
            };
            if !desc.metric_type.is_numeric() {
                diagnostics.push(Diagnostic {
                    archive: Some(archive.to_string()),
                    target: Some(slot.target.to_string()),
                    error: BridgeError::TypeIneligible {
                        metric: slot.pieces.join("."),
                        metric_type: desc.metric_type.to_string(),
                    },
                });
                continue;
            }
            plans.push(Plan {
                slot: i,
                metric,
                instance,
                semantics: desc.semantics,
            });
        }
        if plans.is_empty() {
            return;
        }

        let mut metrics: Vec<MetricId> = plans.iter().map(|p| p.metric).collect();
        metrics.sort_unstable();
        metrics.dedup();

        let bounds = source.time_bounds();
        let mut fetched = 0usize;
        for (k, t) in window.times().enumerate() {
            if self.shutdown.is_requested() {
                break;
            }
            let at = Timestamp::from_secs(t);
            if let Some((lo, hi)) = bounds {
                if at < lo || at > hi {
                    continue;
                }
            }
            let result = match source.fetch(&metrics, Some(at)) {
                Ok(result) => result,
                Err(e) => {
                    let error = match e {
                        BridgeError::BackendUnavailable(_) => e,
                        other => BridgeError::BackendUnavailable(other.to_string()),
                    };
                    warn!(archive, error = %error, "fetch job aborted");
                    for slot in &mut job.slots {
                        slot.series.clear();
                    }
                    diagnostics.push(job_failed(error));
                    return;
                }
            };
            fetched += 1;
            for plan in &plans {
                if let Some(value) = result
                    .find(plan.metric, plan.instance)
                    .and_then(|v| v.as_f64())
                {
                    job.slots[plan.slot].series.points[k].1 = value;
                }
            }
        }

        for plan in &plans {
            if plan.semantics == Semantics::Counter {
                rate::counter_to_rate(&mut job.slots[plan.slot].series.points);
            }
        }
        debug!(
            archive,
            targets = plans.len(),
            steps = window.len(),
            fetched,
            "fetch job complete"
        );
    }
}
