use crate::decoding::hypothesis::{Hypothesis, Label};
use crate::decoding::ranges::Range;
use crate::decoding::timeline::Timeline;
use crate::error::DecodeError;
use crate::pipeline::traits::{ChangeProbabilityModel, KeyScorer, SegmentLabelModel};

/// Change probability curve supplied with the input.
pub struct PrecomputedChangeProbs {
    probs: Vec<f64>,
}

impl PrecomputedChangeProbs {
    pub fn new(probs: Vec<f64>) -> Self {
        Self { probs }
    }
}

impl ChangeProbabilityModel for PrecomputedChangeProbs {
    fn change_probs(&self, timeline: &Timeline) -> Result<Vec<f64>, DecodeError> {
        if self.probs.len() != timeline.len() {
            return Err(DecodeError::invalid_input(format!(
                "change probability curve has {} values for {} frames",
                self.probs.len(),
                timeline.len()
            )));
        }
        Ok(self.probs.clone())
    }
}

/// Prefix sums of per-frame label distributions, weighted by frame duration
/// and unweighted.
struct WeightedPosteriors {
    /// `weighted[f * width + l]`: duration-weighted mass of label `l` over frames `..f`.
    weighted: Vec<f64>,
    plain: Vec<f64>,
    /// `weight[f]`: total duration of frames `..f`.
    weight: Vec<f64>,
    width: usize,
}

impl WeightedPosteriors {
    fn new(timeline: &Timeline, rows: &[Vec<f64>], what: &str) -> Result<Self, DecodeError> {
        if rows.len() != timeline.len() {
            return Err(DecodeError::invalid_input(format!(
                "{what} posteriors have {} rows for {} frames",
                rows.len(),
                timeline.len()
            )));
        }
        let width = rows.first().map_or(0, Vec::len);
        if width == 0 {
            return Err(DecodeError::invalid_input(format!("{what} posteriors have no labels")));
        }

        let mut weighted = vec![0.0; (rows.len() + 1) * width];
        let mut plain = vec![0.0; (rows.len() + 1) * width];
        let mut weight = vec![0.0; rows.len() + 1];
        for (f, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(DecodeError::invalid_input(format!(
                    "{what} posterior row {f} has {} labels, expected {width}",
                    row.len()
                )));
            }
            if let Some(p) = row.iter().find(|p| !(p.is_finite() && **p >= 0.0)) {
                return Err(DecodeError::invalid_input(format!(
                    "{what} posterior row {f} holds an invalid probability {p}"
                )));
            }
            let w = timeline.duration(f);
            weight[f + 1] = weight[f] + w;
            for (l, &p) in row.iter().enumerate() {
                weighted[(f + 1) * width + l] = weighted[f * width + l] + w * p;
                plain[(f + 1) * width + l] = plain[f * width + l] + p;
            }
        }
        Ok(Self {
            weighted,
            plain,
            weight,
            width,
        })
    }

    /// Renormalised mean distribution over `[start, end)`; `None` when the
    /// span carries no mass. Spans of zero duration fall back to an unweighted
    /// mean.
    fn mean(&self, start: usize, end: usize) -> Option<Vec<f64>> {
        let prefix = if self.weight[end] - self.weight[start] > 0.0 {
            &self.weighted
        } else {
            &self.plain
        };
        let mut dist: Vec<f64> = (0..self.width)
            .map(|l| (prefix[end * self.width + l] - prefix[start * self.width + l]).max(0.0))
            .collect();
        let total: f64 = dist.iter().sum();
        if total <= 0.0 {
            return None;
        }
        for p in &mut dist {
            *p /= total;
        }
        Some(dist)
    }
}

/// Scores a range by the duration-weighted mean of its frames' chord
/// distributions. Labels with zero mean probability are left out.
pub struct FramePosteriorLabelModel {
    rows: Vec<Vec<f64>>,
}

impl FramePosteriorLabelModel {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }
}

impl SegmentLabelModel for FramePosteriorLabelModel {
    fn label_priors(
        &self,
        timeline: &Timeline,
        ranges: &[Range],
    ) -> Result<Vec<Vec<(Label, f64)>>, DecodeError> {
        let posteriors = WeightedPosteriors::new(timeline, &self.rows, "chord")?;
        let mut empty = 0usize;
        let priors: Vec<Vec<(Label, f64)>> = ranges
            .iter()
            .map(|range| match posteriors.mean(range.start, range.end) {
                Some(dist) => dist
                    .into_iter()
                    .enumerate()
                    .filter(|&(_, p)| p > 0.0)
                    .map(|(label, p)| (label, p.min(1.0).ln()))
                    .collect(),
                None => {
                    empty += 1;
                    Vec::new()
                }
            })
            .collect();
        if empty > 0 {
            tracing::warn!(
                ranges = ranges.len(),
                without_mass = empty,
                "chord posteriors: some ranges carry no probability mass"
            );
        }
        Ok(priors)
    }
}

/// Keys scored like chords, from per-frame key distributions.
///
/// Mean probabilities are floored at [`Self::PROB_FLOOR`] so an unlikely key
/// stays finite. A key change costs `ln(change_prob)` on top of re-scoring the
/// segment.
pub struct FramePosteriorKeyScorer {
    posteriors: WeightedPosteriors,
    frames: usize,
    change_log_prob: f64,
}

impl FramePosteriorKeyScorer {
    pub const DEFAULT_CHANGE_PROB: f64 = 0.1;
    pub const PROB_FLOOR: f64 = 1e-9;

    pub fn new(timeline: &Timeline, rows: &[Vec<f64>]) -> Result<Self, DecodeError> {
        Ok(Self {
            posteriors: WeightedPosteriors::new(timeline, rows, "key")?,
            frames: timeline.len(),
            change_log_prob: Self::DEFAULT_CHANGE_PROB.ln(),
        })
    }

    pub fn with_change_prob(mut self, change_prob: f64) -> Result<Self, DecodeError> {
        if !(change_prob > 0.0 && change_prob <= 1.0) {
            return Err(DecodeError::config(format!(
                "key change probability must be in (0, 1], got {change_prob}"
            )));
        }
        self.change_log_prob = change_prob.ln();
        Ok(self)
    }

    pub fn key_count(&self) -> usize {
        self.posteriors.width
    }

    fn all_keys(&self, start: usize, end: usize) -> Vec<(Label, f64)> {
        (0..self.key_count())
            .map(|key| (key, self.key_log_prob(start, end, key)))
            .collect()
    }
}

impl KeyScorer for FramePosteriorKeyScorer {
    fn key_log_prob(&self, start: usize, end: usize, key: Label) -> f64 {
        assert!(
            start < end && end <= self.frames,
            "key span ({start}, {end}) outside {} frames",
            self.frames
        );
        let p = self
            .posteriors
            .mean(start, end)
            .and_then(|dist| dist.get(key).copied())
            .unwrap_or(0.0);
        p.max(Self::PROB_FLOOR).ln()
    }

    fn initial_key_priors(&self, range: &Range) -> Vec<(Label, f64)> {
        self.all_keys(range.start, range.end)
    }

    fn key_change_priors(&self, hypothesis: &Hypothesis) -> Vec<(Label, f64)> {
        let (start, end) = (hypothesis.segment_start(), hypothesis.valid_until());
        if start >= end {
            return Vec::new();
        }
        let current = hypothesis
            .key()
            .map_or(0.0, |key| self.key_log_prob(start, end, key));
        let chord_term = hypothesis.step().label - current;
        self.all_keys(start, end)
            .into_iter()
            .filter(|&(key, _)| hypothesis.key() != Some(key))
            .map(|(key, log_prob)| (key, chord_term + log_prob + self.change_log_prob))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::decoding::hypothesis::{HypothesisGraph, StepLogProb};

    use super::*;

    fn range(start: usize, end: usize) -> Range {
        Range {
            start,
            end,
            no_change_log_prob: 0.0,
            change_log_prob: 0.0,
        }
    }

    #[test]
    fn precomputed_curve_checks_length() {
        let timeline = Timeline::from_durations(&[1.0; 3]).unwrap();
        let model = PrecomputedChangeProbs::new(vec![0.0, 0.5, 0.2]);
        assert_eq!(model.change_probs(&timeline).unwrap(), vec![0.0, 0.5, 0.2]);

        let short = PrecomputedChangeProbs::new(vec![0.0]);
        assert!(matches!(
            short.change_probs(&timeline),
            Err(DecodeError::InvalidInput { .. })
        ));
    }

    #[test]
    fn label_priors_weight_frames_by_duration() {
        let timeline = Timeline::from_durations(&[3.0, 1.0]).unwrap();
        let model = FramePosteriorLabelModel::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let priors = model
            .label_priors(&timeline, &[range(0, 2), range(1, 2)])
            .unwrap();

        assert_eq!(priors[0].len(), 2);
        assert!((priors[0][0].1 - 0.75f64.ln()).abs() < 1e-12);
        assert!((priors[0][1].1 - 0.25f64.ln()).abs() < 1e-12);
        // Label 0 has no mass over the second frame.
        assert_eq!(priors[1], vec![(1, 0.0)]);
    }

    #[test]
    fn label_priors_renormalise_rows() {
        let timeline = Timeline::from_durations(&[1.0, 1.0]).unwrap();
        let model = FramePosteriorLabelModel::new(vec![vec![2.0, 2.0], vec![1.0, 3.0]]);
        let priors = model.label_priors(&timeline, &[range(0, 2)]).unwrap();
        let total: f64 = priors[0].iter().map(|(_, lp)| lp.exp()).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((priors[0][1].1 - 0.625f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn label_priors_reject_ragged_or_negative_rows() {
        let timeline = Timeline::from_durations(&[1.0, 1.0]).unwrap();
        let ragged = FramePosteriorLabelModel::new(vec![vec![1.0, 0.0], vec![1.0]]);
        assert!(ragged.label_priors(&timeline, &[range(0, 2)]).is_err());

        let negative = FramePosteriorLabelModel::new(vec![vec![1.0, -0.5], vec![1.0, 0.0]]);
        assert!(negative.label_priors(&timeline, &[range(0, 2)]).is_err());

        let missing = FramePosteriorLabelModel::new(vec![vec![1.0]]);
        assert!(missing.label_priors(&timeline, &[range(0, 2)]).is_err());
    }

    #[test]
    fn key_log_prob_is_floored() {
        let timeline = Timeline::from_durations(&[1.0, 1.0]).unwrap();
        let scorer = FramePosteriorKeyScorer::new(&timeline, &[vec![1.0, 0.0], vec![1.0, 0.0]])
            .unwrap();
        assert_eq!(scorer.key_log_prob(0, 2, 0), 0.0);
        let floor = FramePosteriorKeyScorer::PROB_FLOOR.ln();
        assert!((scorer.key_log_prob(0, 2, 1) - floor).abs() < 1e-9);
        assert_eq!(scorer.initial_key_priors(&range(0, 1)).len(), 2);
    }

    #[test]
    fn key_change_replaces_only_the_key_term() {
        let timeline = Timeline::from_durations(&[1.0; 3]).unwrap();
        let rows = vec![vec![0.8, 0.2], vec![0.2, 0.8], vec![0.2, 0.8]];
        let scorer = FramePosteriorKeyScorer::new(&timeline, &rows)
            .unwrap()
            .with_change_prob(0.5)
            .unwrap();

        let mut graph = HypothesisGraph::new(2);
        let root = graph.root();
        let first = graph.open_segment(&root, 0, Some(0), 1, StepLogProb::new(0.0, 0.8f64.ln()));
        let chord_log_prob = 0.9f64.ln();
        let label = chord_log_prob + scorer.key_log_prob(1, 3, 0);
        let second = graph.extend_chord(&first, 1, 3, StepLogProb::new(-0.1, label));

        let options = scorer.key_change_priors(&second);
        assert_eq!(options.len(), 1);
        let (key, log_prob) = options[0];
        assert_eq!(key, 1);
        let expected = chord_log_prob + 0.8f64.ln() + 0.5f64.ln();
        assert!((log_prob - expected).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_change_prob() {
        let timeline = Timeline::from_durations(&[1.0]).unwrap();
        let scorer = FramePosteriorKeyScorer::new(&timeline, &[vec![1.0]]).unwrap();
        assert!(scorer.with_change_prob(0.0).is_err());
    }

    #[test]
    fn zero_duration_span_uses_plain_mean() {
        let timeline = Timeline::new(vec![0.0, 1.0], 1.0).unwrap();
        let model = FramePosteriorLabelModel::new(vec![vec![1.0, 0.0], vec![0.25, 0.75]]);
        let priors = model.label_priors(&timeline, &[range(1, 2)]).unwrap();
        assert!((priors[0][1].1 - 0.75f64.ln()).abs() < 1e-12);
    }
}
