//! Trailing-window aggregates over a time-sorted series.
//!
//! Both window edges only move forward, so each point is pushed and popped
//! at most once: sum and count come from prefix sums, the maximum from a
//! monotonic queue of candidate indices.

use crate::types::Timestamp;
use chrono::Duration;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    /// Mean of the non-null values, rounded to two decimals.
    pub avg: Option<f64>,
    pub max: Option<i64>,
}

/// `sum / count` rounded half away from zero to two decimals, computed in
/// integers so the result does not depend on binary float error. The
/// build query performs the same arithmetic.
pub fn round_ratio(sum: i128, count: i128) -> f64 {
    debug_assert!(count > 0);
    let hundredths = if sum >= 0 {
        (sum * 200 + count) / (2 * count)
    } else {
        -((-sum * 200 + count) / (2 * count))
    };
    hundredths as f64 / 100.0
}

/// For each point `i`, aggregate every point `j` with
/// `t_i - span <= t_j < t_i`. Points sharing `t_i` are excluded, so equal
/// timestamps never see each other.
///
/// `points` must be sorted by timestamp.
pub fn trailing_stats(points: &[(Timestamp, Option<i64>)], span: Duration) -> Vec<WindowStats> {
    debug_assert!(points.windows(2).all(|w| w[0].0 <= w[1].0), "points must be time-sorted");

    let mut prefix_sum = Vec::with_capacity(points.len() + 1);
    let mut prefix_cnt = Vec::with_capacity(points.len() + 1);
    prefix_sum.push(0i128);
    prefix_cnt.push(0i128);
    for (_, value) in points {
        let (s, c) = (*prefix_sum.last().unwrap_or(&0), *prefix_cnt.last().unwrap_or(&0));
        match value {
            Some(v) => { prefix_sum.push(s + i128::from(*v)); prefix_cnt.push(c + 1); }
            None    => { prefix_sum.push(s);     prefix_cnt.push(c);     }
        }
    }

    let mut out = Vec::with_capacity(points.len());
    let mut maxq: VecDeque<usize> = VecDeque::new();
    let (mut lo, mut hi) = (0usize, 0usize);

    for &(t, _) in points {
        // Admit everything strictly before t.
        while hi < points.len() && points[hi].0 < t {
            if let Some(v) = points[hi].1 {
                while maxq.back().is_some_and(|&b| points[b].1.unwrap_or(i64::MIN) <= v) {
                    maxq.pop_back();
                }
                maxq.push_back(hi);
            }
            hi += 1;
        }
        // Evict everything older than t - span.
        let floor = t - span;
        while lo < hi && points[lo].0 < floor {
            lo += 1;
        }
        while maxq.front().is_some_and(|&f| f < lo) {
            maxq.pop_front();
        }

        let cnt = prefix_cnt[hi] - prefix_cnt[lo];
        let avg = (cnt > 0).then(|| round_ratio(prefix_sum[hi] - prefix_sum[lo], cnt));
        let max = maxq.front().and_then(|&f| points[f].1);
        out.push(WindowStats { avg, max });
    }
    out
}
