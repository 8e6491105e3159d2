//! Musical metric positions: (measure, beat) against a beats-per-measure context.
//!
//! Measures and beats are 1-based positions; a [`MetricInterval`] (the
//! difference of two positions) is 0-based.
//!
//! # Subtraction borrow
//!
//! When `a.beat < b.beat`, `a - b` borrows one measure and adds the **larger**
//! of the two beats-per-measure contexts, not the minuend's:
//!
//! ```text
//! (2, 1 | 4) - (1, 3 | 7)  =  0 measures, 7 + (1 - 3) = 5 beats
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Sub;

use serde::{Deserialize, Serialize};

/// Position in musical time. Equality ignores `beats_per_measure`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MetricPosition {
    pub measure: i32,
    pub beat: i32,
    pub beats_per_measure: u32,
}

impl MetricPosition {
    pub fn new(measure: i32, beat: i32, beats_per_measure: u32) -> Self {
        Self {
            measure,
            beat,
            beats_per_measure,
        }
    }
}

impl PartialEq for MetricPosition {
    fn eq(&self, other: &Self) -> bool {
        self.measure == other.measure && self.beat == other.beat
    }
}

impl Eq for MetricPosition {}

impl Hash for MetricPosition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.measure.hash(state);
        self.beat.hash(state);
    }
}

impl PartialOrd for MetricPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetricPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.measure, self.beat).cmp(&(other.measure, other.beat))
    }
}

impl fmt::Display for MetricPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.measure, self.beat)
    }
}

impl Sub for MetricPosition {
    type Output = MetricInterval;

    fn sub(self, rhs: Self) -> MetricInterval {
        let mut measures = self.measure - rhs.measure;
        let mut beats = self.beat - rhs.beat;
        if beats < 0 {
            measures -= 1;
            let context = self.beats_per_measure.max(rhs.beats_per_measure) as i32;
            beats += context;
        }
        MetricInterval { measures, beats }
    }
}

/// Distance between two metric positions, 0-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricInterval {
    pub measures: i32,
    pub beats: i32,
}

impl MetricInterval {
    pub fn new(measures: i32, beats: i32) -> Self {
        Self { measures, beats }
    }
}

impl fmt::Display for MetricInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m {}b", self.measures, self.beats)
    }
}

/// Metric extent of a time span, as read from a beat timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricSpan {
    pub start: MetricPosition,
    pub end: MetricPosition,
    pub length: MetricInterval,
}

impl MetricSpan {
    pub fn new(start: MetricPosition, end: MetricPosition) -> Self {
        Self {
            start,
            end,
            length: end - start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_without_borrow() {
        let a = MetricPosition::new(2, 1, 4);
        let b = MetricPosition::new(1, 1, 4);
        assert_eq!(a - b, MetricInterval::new(1, 0));
    }

    #[test]
    fn test_sub_borrow_uses_larger_context() {
        let a = MetricPosition::new(2, 1, 4);
        let b = MetricPosition::new(1, 3, 7);
        assert_eq!(a - b, MetricInterval::new(0, 5));

        // Same rule when the minuend carries the larger context
        let a = MetricPosition::new(3, 2, 6);
        let b = MetricPosition::new(1, 4, 3);
        assert_eq!(a - b, MetricInterval::new(1, 4));
    }

    #[test]
    fn test_equality_ignores_context() {
        let a = MetricPosition::new(5, 2, 4);
        let b = MetricPosition::new(5, 2, 3);
        assert_eq!(a, b);
        assert_ne!(a, MetricPosition::new(5, 3, 4));
        assert!(MetricPosition::new(4, 9, 9) < MetricPosition::new(5, 1, 4));
    }

    #[test]
    fn test_display() {
        assert_eq!(MetricPosition::new(12, 3, 4).to_string(), "12.3");
        assert_eq!(MetricInterval::new(2, 1).to_string(), "2m 1b");
    }
}
