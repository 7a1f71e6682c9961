// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counter-to-rate conversion.

/// Replace raw counter samples with per-second rates, in place.
///
/// Walks backward so each step still sees the raw previous value. A decrease
/// (suspected wrap or reset) and a missing endpoint both give NaN. The time
/// delta is whole seconds, at least 1. The first point has nothing to
/// difference against and is always NaN.
pub fn counter_to_rate(points: &mut [(i64, f64)]) {
    if points.is_empty() {
        return;
    }
    for i in (1..points.len()).rev() {
        let (this_time, this_value) = points[i];
        let (last_time, last_value) = points[i - 1];

        points[i].1 = if this_value < last_value || this_value.is_nan() || last_value.is_nan() {
            f64::NAN
        } else {
            let delta = (this_time - last_time).max(1) as f64;
            // Divide first: large raw counters lose less precision.
            this_value / delta - last_value / delta
        };
    }
    points[0].1 = f64::NAN;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(points: &[(i64, f64)]) -> Vec<Option<f64>> {
        points
            .iter()
            .map(|(_, v)| if v.is_nan() { None } else { Some(*v) })
            .collect()
    }

    #[test]
    fn test_wraparound_sequence() {
        let mut points = vec![(0, 10.0), (1, 15.0), (2, 12.0), (3, 20.0)];
        counter_to_rate(&mut points);
        assert_eq!(values(&points), vec![None, Some(5.0), None, Some(8.0)]);
    }

    #[test]
    fn test_divides_by_step() {
        let mut points = vec![(0, 0.0), (10, 100.0), (20, 300.0)];
        counter_to_rate(&mut points);
        assert_eq!(values(&points), vec![None, Some(10.0), Some(20.0)]);
    }

    #[test]
    fn test_nan_endpoints() {
        let mut points = vec![(0, 1.0), (1, f64::NAN), (2, 5.0), (3, 6.0)];
        counter_to_rate(&mut points);
        assert_eq!(values(&points), vec![None, None, None, Some(1.0)]);
    }

    #[test]
    fn test_zero_delta_clamped() {
        let mut points = vec![(5, 1.0), (5, 4.0)];
        counter_to_rate(&mut points);
        assert_eq!(values(&points), vec![None, Some(3.0)]);
    }

    #[test]
    fn test_empty_and_single() {
        let mut empty: Vec<(i64, f64)> = Vec::new();
        counter_to_rate(&mut empty);
        let mut one = vec![(0, 7.0)];
        counter_to_rate(&mut one);
        assert!(one[0].1.is_nan());
    }
}
