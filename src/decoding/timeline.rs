//! Frame timeline: onsets, durations and the split mask derived from them.

use crate::error::DecodeError;

/// Ordered, immutable sequence of frames.
///
/// A frame that shares its onset with its predecessor is not splittable: no
/// segment may start or end on it. The first frame of such a group stays
/// splittable.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    onsets: Vec<f64>,
    end_time: f64,
    splittable: Vec<bool>,
}

impl Timeline {
    pub fn new(onsets: Vec<f64>, end_time: f64) -> Result<Self, DecodeError> {
        if onsets.is_empty() {
            return Err(DecodeError::invalid_input("timeline has no frames"));
        }
        if let Some(i) = onsets.iter().position(|o| !o.is_finite()) {
            return Err(DecodeError::invalid_input(format!(
                "onset of frame {i} is not finite"
            )));
        }
        if let Some(i) = onsets.windows(2).position(|w| w[1] < w[0]) {
            return Err(DecodeError::invalid_input(format!(
                "onsets decrease between frames {i} and {}",
                i + 1
            )));
        }
        let last = onsets[onsets.len() - 1];
        if !end_time.is_finite() || end_time < last {
            return Err(DecodeError::invalid_input(format!(
                "end time {end_time} precedes the last onset {last}"
            )));
        }

        let mut splittable = vec![true; onsets.len()];
        for i in 1..onsets.len() {
            splittable[i] = onsets[i] != onsets[i - 1];
        }

        Ok(Self {
            onsets,
            end_time,
            splittable,
        })
    }

    /// Builds a timeline starting at 0 from per-frame durations-to-next.
    /// Zero durations make the following frame simultaneous.
    pub fn from_durations(durations: &[f64]) -> Result<Self, DecodeError> {
        let mut onsets = Vec::with_capacity(durations.len());
        let mut position = 0.0;
        for (i, &duration) in durations.iter().enumerate() {
            if !(duration >= 0.0) {
                return Err(DecodeError::invalid_input(format!(
                    "duration of frame {i} is negative or NaN"
                )));
            }
            onsets.push(position);
            position += duration;
        }
        Self::new(onsets, position)
    }

    pub fn len(&self) -> usize {
        self.onsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty()
    }

    pub fn onset(&self, frame: usize) -> f64 {
        self.onsets[frame]
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    /// Duration from `frame` to the next frame (or to the end of the piece).
    pub fn duration(&self, frame: usize) -> f64 {
        self.position(frame + 1) - self.onsets[frame]
    }

    /// Duration covered by frames `start..end`. `end` may equal `len()`.
    pub fn duration_between(&self, start: usize, end: usize) -> f64 {
        self.position(end) - self.position(start)
    }

    pub fn is_splittable(&self, frame: usize) -> bool {
        self.splittable[frame]
    }

    pub fn split_mask(&self) -> &[bool] {
        &self.splittable
    }

    /// Gives each same-onset group the maximum change probability of its
    /// members, written to the group's first frame. Other members are left as is;
    /// they are never read as boundaries.
    pub fn collapse_simultaneous(&self, change_probs: &mut [f64]) {
        debug_assert_eq!(change_probs.len(), self.len());
        let mut first = 0usize;
        for i in 1..=self.len() {
            if i < self.len() && !self.splittable[i] {
                continue;
            }
            if i - first > 1 {
                let max = change_probs[first..i]
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                change_probs[first] = max;
            }
            first = i;
        }
    }

    fn position(&self, frame: usize) -> f64 {
        if frame >= self.onsets.len() {
            self.end_time
        } else {
            self.onsets[frame]
        }
    }
}
