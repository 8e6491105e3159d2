//! Beat patterns: mapping a beat's index to its metric position.

use serde::{Deserialize, Serialize};

use super::error::ValidationFailure;
use super::metric::MetricPosition;
use crate::config::DEFAULT_BEAT_PATTERN;

/// Beats-per-measure sequence, cycled over the whole timeline.
///
/// `[4]` is 4/4 throughout; `[3, 2]` alternates 3 and 2 beats per measure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBeatPattern")]
pub struct BeatPattern {
    beats_per_measure: Vec<u32>,
    /// Number of the first measure (1, or 0 when there is a pickup measure)
    first_measure: i32,
}

/// Unchecked wire form. Loaded patterns go through [`BeatPattern::new`].
#[derive(Deserialize)]
struct RawBeatPattern {
    beats_per_measure: Vec<u32>,
    #[serde(default = "default_first_measure")]
    first_measure: i32,
}

impl TryFrom<RawBeatPattern> for BeatPattern {
    type Error = ValidationFailure;

    fn try_from(raw: RawBeatPattern) -> Result<Self, Self::Error> {
        Ok(BeatPattern::new(raw.beats_per_measure)?.with_first_measure(raw.first_measure))
    }
}

fn default_first_measure() -> i32 {
    1
}

impl Default for BeatPattern {
    fn default() -> Self {
        Self {
            beats_per_measure: DEFAULT_BEAT_PATTERN.to_vec(),
            first_measure: 1,
        }
    }
}

impl BeatPattern {
    pub fn new(beats_per_measure: Vec<u32>) -> Result<Self, ValidationFailure> {
        if beats_per_measure.is_empty() {
            return Err(ValidationFailure::new("Beat pattern can't be empty"));
        }
        if beats_per_measure.contains(&0) {
            return Err(ValidationFailure::new(
                "Beat pattern can't contain measures with no beats",
            ));
        }
        Ok(Self {
            beats_per_measure,
            first_measure: 1,
        })
    }

    pub fn with_first_measure(mut self, first_measure: i32) -> Self {
        self.first_measure = first_measure;
        self
    }

    pub fn beats_per_measure(&self) -> &[u32] {
        &self.beats_per_measure
    }

    pub fn first_measure(&self) -> i32 {
        self.first_measure
    }

    /// Beats in the measure `offset` measures after the first one.
    pub fn measure_length(&self, offset: usize) -> u32 {
        self.beats_per_measure[offset % self.beats_per_measure.len()]
    }

    /// Metric position of the `index`-th beat (0-based).
    pub fn position_of(&self, index: usize) -> MetricPosition {
        let cycle_beats: usize = self.beats_per_measure.iter().map(|&b| b as usize).sum();
        let cycles = index / cycle_beats;
        let mut remaining = index % cycle_beats;
        let mut offset = cycles * self.beats_per_measure.len();

        for &len in &self.beats_per_measure {
            let len_usize = len as usize;
            if remaining < len_usize {
                break;
            }
            remaining -= len_usize;
            offset += 1;
        }

        let bpm = self.measure_length(offset);
        MetricPosition::new(
            self.first_measure + offset as i32,
            remaining as i32 + 1,
            bpm,
        )
    }

    /// Inverse of [`position_of`](Self::position_of). None if the position
    /// does not exist in this pattern.
    pub fn index_of(&self, position: &MetricPosition) -> Option<usize> {
        let offset = usize::try_from(position.measure - self.first_measure).ok()?;
        let beat = usize::try_from(position.beat).ok()?;
        if beat == 0 || beat > self.measure_length(offset) as usize {
            return None;
        }

        let n = self.beats_per_measure.len();
        let cycle_beats: usize = self.beats_per_measure.iter().map(|&b| b as usize).sum();
        let before: usize = (offset / n) * cycle_beats
            + self.beats_per_measure[..offset % n]
                .iter()
                .map(|&b| b as usize)
                .sum::<usize>();
        Some(before + beat - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pattern() {
        let p = BeatPattern::new(vec![4]).unwrap();
        assert_eq!(p.position_of(0), MetricPosition::new(1, 1, 4));
        assert_eq!(p.position_of(3), MetricPosition::new(1, 4, 4));
        assert_eq!(p.position_of(4), MetricPosition::new(2, 1, 4));
        assert_eq!(p.position_of(9), MetricPosition::new(3, 2, 4));
    }

    #[test]
    fn test_alternating_pattern_carries_context() {
        let p = BeatPattern::new(vec![3, 2]).unwrap();
        let pos = p.position_of(3);
        assert_eq!(pos, MetricPosition::new(2, 1, 2));
        assert_eq!(pos.beats_per_measure, 2);
        assert_eq!(p.position_of(5), MetricPosition::new(3, 1, 3));
        assert_eq!(p.position_of(11), MetricPosition::new(5, 2, 3));
    }

    #[test]
    fn test_index_of_inverts_position_of() {
        let p = BeatPattern::new(vec![3, 2, 4]).unwrap().with_first_measure(0);
        for index in 0..40 {
            assert_eq!(p.index_of(&p.position_of(index)), Some(index));
        }
        assert_eq!(p.index_of(&MetricPosition::new(0, 4, 3)), None);
        assert_eq!(p.index_of(&MetricPosition::new(-1, 1, 3)), None);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(BeatPattern::new(vec![]).is_err());
        assert!(BeatPattern::new(vec![4, 0]).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let loaded: BeatPattern =
            serde_json::from_str(r#"{"beats_per_measure": [3, 2]}"#).unwrap();
        assert_eq!(loaded.beats_per_measure(), &[3, 2]);
        assert_eq!(loaded.first_measure(), 1);

        let empty = serde_json::from_str::<BeatPattern>(r#"{"beats_per_measure": []}"#);
        assert!(empty.unwrap_err().to_string().contains("can't be empty"));
        let zero = serde_json::from_str::<BeatPattern>(r#"{"beats_per_measure": [4, 0]}"#);
        assert!(zero.is_err());
    }
}
