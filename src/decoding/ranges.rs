//! Enumeration of candidate segments from a per-frame change probability curve.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::config::DecoderConfig;
use crate::decoding::timeline::Timeline;
use crate::error::DecodeError;

/// Candidate segment `[start, end)` with the log-probability of its boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
    /// Sum of `ln(1 - p)` over every splittable interior frame.
    pub no_change_log_prob: f64,
    /// `ln(p)` of the change at `end`; zero when the range runs to the end.
    pub change_log_prob: f64,
}

impl Range {
    pub fn log_prob(&self) -> f64 {
        self.no_change_log_prob + self.change_log_prob
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeEnumerator {
    min_change_prob: f64,
    max_no_change_prob: f64,
    max_segment_duration: f64,
}

impl RangeEnumerator {
    pub fn new(
        min_change_prob: f64,
        max_no_change_prob: f64,
        max_segment_duration: f64,
    ) -> Result<Self, DecodeError> {
        if !(0.0..=1.0).contains(&min_change_prob) || !(0.0..=1.0).contains(&max_no_change_prob)
        {
            return Err(DecodeError::config(
                "change thresholds must lie in [0, 1]",
            ));
        }
        if min_change_prob > max_no_change_prob {
            return Err(DecodeError::config(format!(
                "min_change_prob ({min_change_prob}) exceeds max_no_change_prob ({max_no_change_prob})"
            )));
        }
        if !(max_segment_duration > 0.0) {
            return Err(DecodeError::config(format!(
                "max_segment_duration must be positive, got {max_segment_duration}"
            )));
        }
        Ok(Self {
            min_change_prob,
            max_no_change_prob,
            max_segment_duration,
        })
    }

    pub fn from_config(config: &DecoderConfig) -> Result<Self, DecodeError> {
        Self::new(
            config.min_change_prob,
            config.max_no_change_prob,
            config.segment_duration_limit(),
        )
    }

    /// Every reachable `(start, end)` pair, sorted by start then end.
    ///
    /// Starts are visited once each in increasing order. A sweep from a start
    /// stops at the first frame that forces a change or that pushes the segment
    /// past `max_segment_duration`; otherwise it emits a final range to the end of
    /// the timeline.
    pub fn enumerate(
        &self,
        timeline: &Timeline,
        change_probs: &[f64],
    ) -> Result<Vec<Range>, DecodeError> {
        let n = timeline.len();
        if change_probs.len() != n {
            return Err(DecodeError::invalid_input(format!(
                "change probability curve has {} values for {n} frames",
                change_probs.len()
            )));
        }
        if let Some(i) = change_probs.iter().position(|p| !(0.0..=1.0).contains(p)) {
            return Err(DecodeError::invalid_input(format!(
                "change probability of frame {i} is outside [0, 1]: {}",
                change_probs[i]
            )));
        }

        let mut probs = change_probs.to_vec();
        timeline.collapse_simultaneous(&mut probs);

        let mut ranges = Vec::new();
        let mut starts = BinaryHeap::from([Reverse(0usize)]);
        let mut queued = vec![false; n];
        queued[0] = true;
        let mut visited = 0usize;

        while let Some(Reverse(start)) = starts.pop() {
            visited += 1;
            let mut running_log_prob = 0.0;
            let mut reached_end = true;

            for index in start + 1..n {
                if !timeline.is_splittable(index) {
                    continue;
                }
                if timeline.duration_between(start, index) > self.max_segment_duration {
                    reached_end = false;
                    break;
                }

                let change_prob = probs[index];
                if change_prob > self.min_change_prob {
                    ranges.push(Range {
                        start,
                        end: index,
                        no_change_log_prob: running_log_prob,
                        change_log_prob: change_prob.ln(),
                    });
                    if !queued[index] {
                        queued[index] = true;
                        starts.push(Reverse(index));
                    }
                    if change_prob > self.max_no_change_prob {
                        reached_end = false;
                        break;
                    }
                }
                // Continuing past an optional boundary means it did not change.
                running_log_prob += (1.0 - change_prob).ln();
            }

            if reached_end && timeline.duration_between(start, n) <= self.max_segment_duration {
                ranges.push(Range {
                    start,
                    end: n,
                    no_change_log_prob: running_log_prob,
                    change_log_prob: 0.0,
                });
            }
        }

        tracing::debug!(
            frames = n,
            starts_visited = visited,
            ranges = ranges.len(),
            "ranges: enumerated candidate segments"
        );
        Ok(ranges)
    }
}

/// Indexes into `ranges` grouped by start frame, for frames `0..timeline_len`.
pub fn ranges_by_start(ranges: &[Range], timeline_len: usize) -> Vec<Vec<usize>> {
    let mut by_start = vec![Vec::new(); timeline_len];
    for (idx, range) in ranges.iter().enumerate() {
        by_start[range.start].push(idx);
    }
    by_start
}
