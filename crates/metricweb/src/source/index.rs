// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-(metric, instance) sample index with interpolated lookup.

use super::{InstanceId, MetricId, Semantics, Timestamp};
use std::collections::{BTreeMap, HashMap};

/// Time-ordered samples of one instance.
type Track = Vec<(Timestamp, f64)>;

/// Samples grouped by metric then instance.
#[derive(Debug, Default, Clone)]
pub struct SampleIndex {
    tracks: HashMap<MetricId, BTreeMap<InstanceId, Track>>,
}

impl SampleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Out-of-order samples are placed by timestamp.
    pub fn insert(&mut self, metric: MetricId, inst: InstanceId, at: Timestamp, value: f64) {
        let track = self
            .tracks
            .entry(metric)
            .or_default()
            .entry(inst)
            .or_default();
        match track.last() {
            Some((last, _)) if *last > at => {
                let pos = track.partition_point(|(t, _)| *t <= at);
                track.insert(pos, (at, value));
            }
            _ => track.push((at, value)),
        }
    }

    /// Number of stored samples across all tracks.
    pub fn len(&self) -> usize {
        self.tracks
            .values()
            .flat_map(|by_inst| by_inst.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of every instance of `metric` at `at`.
    ///
    /// Instant and counter semantics interpolate linearly between the samples
    /// surrounding `at`; discrete semantics hold the last value at or before
    /// `at`. Instances lacking the needed neighbours are omitted.
    pub fn values_at(
        &self,
        metric: MetricId,
        semantics: Semantics,
        at: Timestamp,
    ) -> Vec<(InstanceId, f64)> {
        let Some(by_inst) = self.tracks.get(&metric) else {
            return Vec::new();
        };
        by_inst
            .iter()
            .filter_map(|(inst, track)| interpolate(track, semantics, at).map(|v| (*inst, v)))
            .collect()
    }

    /// Most recent value of every instance of `metric`.
    pub fn latest(&self, metric: MetricId) -> Vec<(InstanceId, f64)> {
        let Some(by_inst) = self.tracks.get(&metric) else {
            return Vec::new();
        };
        by_inst
            .iter()
            .filter_map(|(inst, track)| track.last().map(|(_, v)| (*inst, *v)))
            .collect()
    }

    /// Earliest and latest sample timestamps.
    pub fn bounds(&self) -> Option<(Timestamp, Timestamp)> {
        let mut bounds: Option<(Timestamp, Timestamp)> = None;
        for track in self.tracks.values().flat_map(|by_inst| by_inst.values()) {
            if let (Some((first, _)), Some((last, _))) = (track.first(), track.last()) {
                bounds = Some(match bounds {
                    None => (*first, *last),
                    Some((lo, hi)) => (lo.min(*first), hi.max(*last)),
                });
            }
        }
        bounds
    }
}

fn interpolate(track: &Track, semantics: Semantics, at: Timestamp) -> Option<f64> {
    // Index of the first sample strictly after `at`.
    let after = track.partition_point(|(t, _)| *t <= at);
    let before = after.checked_sub(1).map(|i| track[i]);

    if let Some((t, v)) = before {
        if t == at || semantics == Semantics::Discrete {
            return Some(v);
        }
    }

    let (t0, v0) = before?;
    let (t1, v1) = *track.get(after)?;
    let span = (t1.0 - t0.0) as f64;
    let frac = (at.0 - t0.0) as f64 / span;
    Some(v0 + (v1 - v0) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: MetricId = MetricId(1);

    fn index() -> SampleIndex {
        let mut idx = SampleIndex::new();
        idx.insert(M, InstanceId(0), Timestamp::from_secs(10), 100.0);
        idx.insert(M, InstanceId(0), Timestamp::from_secs(20), 200.0);
        idx.insert(M, InstanceId(1), Timestamp::from_secs(10), 1.0);
        idx
    }

    #[test]
    fn test_exact_hit() {
        let values = index().values_at(M, Semantics::Instant, Timestamp::from_secs(10));
        assert_eq!(values, vec![(InstanceId(0), 100.0), (InstanceId(1), 1.0)]);
    }

    #[test]
    fn test_linear_interpolation() {
        let values = index().values_at(M, Semantics::Counter, Timestamp::from_secs(15));
        assert_eq!(values, vec![(InstanceId(0), 150.0)]);
    }

    #[test]
    fn test_discrete_holds_previous() {
        let values = index().values_at(M, Semantics::Discrete, Timestamp::from_secs(15));
        assert_eq!(values, vec![(InstanceId(0), 100.0), (InstanceId(1), 1.0)]);
    }

    #[test]
    fn test_outside_samples_absent() {
        let idx = index();
        assert!(idx
            .values_at(M, Semantics::Instant, Timestamp::from_secs(5))
            .is_empty());
        assert!(idx
            .values_at(M, Semantics::Instant, Timestamp::from_secs(25))
            .is_empty());
    }

    #[test]
    fn test_out_of_order_insert() {
        let mut idx = SampleIndex::new();
        idx.insert(M, InstanceId::NULL, Timestamp::from_secs(30), 3.0);
        idx.insert(M, InstanceId::NULL, Timestamp::from_secs(10), 1.0);
        idx.insert(M, InstanceId::NULL, Timestamp::from_secs(20), 2.0);
        assert_eq!(idx.latest(M), vec![(InstanceId::NULL, 3.0)]);
        assert_eq!(
            idx.bounds(),
            Some((Timestamp::from_secs(10), Timestamp::from_secs(30)))
        );
        assert_eq!(idx.len(), 3);
    }
}
