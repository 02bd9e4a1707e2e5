use crate::config::DecoderConfig;
use crate::decoding::driver::{BeamSearch, CancelFlag, SearchOutcome, SearchParams};
use crate::decoding::hypothesis::{Hypothesis, Label};
use crate::decoding::naive::naive_frame_labels;
use crate::decoding::ranges::RangeEnumerator;
use crate::decoding::timeline::Timeline;
use crate::error::DecodeError;
use crate::pipeline::defaults::{
    FramePosteriorKeyScorer, FramePosteriorLabelModel, PrecomputedChangeProbs,
};
use crate::pipeline::traits::{ChangeProbabilityModel, KeyScorer, SegmentLabelModel};
use crate::types::{DecodeInput, DecodeOutcome, DecodeReport};

/// Where the decoder takes its key scores from.
pub enum KeySource {
    /// No key dimension; key output stays empty.
    Disabled,
    /// `FramePosteriorKeyScorer` over the input's key posteriors, when present.
    FromInput,
    Fixed(Box<dyn KeyScorer>),
}

pub struct HarmonyDecoder {
    config: DecoderConfig,
    enumerator: RangeEnumerator,
    params: SearchParams,
    change_model: Option<Box<dyn ChangeProbabilityModel>>,
    label_model: Option<Box<dyn SegmentLabelModel>>,
    keys: KeySource,
}

pub(crate) struct HarmonyDecoderParts {
    pub config: DecoderConfig,
    pub enumerator: RangeEnumerator,
    pub params: SearchParams,
    pub change_model: Option<Box<dyn ChangeProbabilityModel>>,
    pub label_model: Option<Box<dyn SegmentLabelModel>>,
    pub keys: KeySource,
}

impl HarmonyDecoder {
    pub(crate) fn from_parts(parts: HarmonyDecoderParts) -> Self {
        Self {
            config: parts.config,
            enumerator: parts.enumerator,
            params: parts.params,
            change_model: parts.change_model,
            label_model: parts.label_model,
            keys: parts.keys,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn decode(&self, input: &DecodeInput) -> Result<DecodeOutcome, DecodeError> {
        self.run(input, None)
    }

    pub fn decode_with_cancel(
        &self,
        input: &DecodeInput,
        cancel: &CancelFlag,
    ) -> Result<DecodeOutcome, DecodeError> {
        self.run(input, Some(cancel))
    }

    fn run(
        &self,
        input: &DecodeInput,
        cancel: Option<&CancelFlag>,
    ) -> Result<DecodeOutcome, DecodeError> {
        let timeline = Timeline::new(input.onsets.clone(), input.end_time)?;
        let frames = timeline.len();

        let change_probs = match (&self.change_model, &input.change_probs) {
            (Some(model), _) => model.change_probs(&timeline)?,
            (None, Some(curve)) => PrecomputedChangeProbs::new(curve.clone()).change_probs(&timeline)?,
            (None, None) => {
                return Err(DecodeError::invalid_input(
                    "input has no change probabilities and no change model is configured",
                ))
            }
        };

        let ranges = self.enumerator.enumerate(&timeline, &change_probs)?;

        let priors = match (&self.label_model, &input.chord_posteriors) {
            (Some(model), _) => model.label_priors(&timeline, &ranges)?,
            (None, Some(rows)) => {
                FramePosteriorLabelModel::new(rows.clone()).label_priors(&timeline, &ranges)?
            }
            (None, None) => {
                return Err(DecodeError::invalid_input(
                    "input has no chord posteriors and no label model is configured",
                ))
            }
        };
        if priors.len() != ranges.len() {
            return Err(DecodeError::model(
                "segment label model",
                format!("returned {} prior vectors for {} ranges", priors.len(), ranges.len()),
            ));
        }

        let naive_chords = naive_frame_labels(frames, &ranges, &priors);
        tracing::debug!(
            frames,
            labelled = naive_chords.iter().filter(|l| l.is_some()).count(),
            "decoder: naive per-frame baseline"
        );

        let input_keys = match (&self.keys, &input.key_posteriors) {
            (KeySource::FromInput, Some(rows)) => Some(FramePosteriorKeyScorer::new(&timeline, rows)?),
            _ => None,
        };
        let key_scorer: Option<&dyn KeyScorer> = match &self.keys {
            KeySource::Fixed(scorer) => Some(scorer.as_ref()),
            _ => input_keys.as_ref().map(|s| s as &dyn KeyScorer),
        };

        let mut search = BeamSearch::new(self.params)?;
        if let Some(scorer) = key_scorer {
            search = search.with_key_scorer(scorer);
        }
        let outcome = search.search(frames, &ranges, &priors, cancel)?;

        let report = |h: &Hypothesis| DecodeReport {
            labels: h.labels(),
            log_prob: h.log_prob(),
            range_count: ranges.len(),
            naive_chords: naive_chords.clone(),
        };
        let decoded = match outcome {
            SearchOutcome::Complete(best) => {
                let report = report(&best);
                tracing::info!(
                    frames,
                    ranges = ranges.len(),
                    chords = report.labels.chords.len(),
                    keys = report.labels.keys.len(),
                    log_prob = report.log_prob,
                    naive_agreement = agreement(&report.labels.frame_chords(frames), &naive_chords),
                    "decoder: solved"
                );
                DecodeOutcome::Solved(report)
            }
            SearchOutcome::NoSolution => {
                tracing::warn!(
                    frames,
                    ranges = ranges.len(),
                    max_segment_duration = ?self.config.max_segment_duration,
                    "decoder: no segmentation reaches the end of the timeline"
                );
                DecodeOutcome::NoSolution {
                    frames,
                    range_count: ranges.len(),
                }
            }
            SearchOutcome::Cancelled { frame, partial } => DecodeOutcome::Cancelled {
                frame,
                partial: partial.as_ref().map(report),
            },
        };
        Ok(decoded)
    }
}

/// Share of frames on which two labelings agree.
fn agreement(decoded: &[Option<Label>], naive: &[Option<Label>]) -> f64 {
    if decoded.is_empty() {
        return 0.0;
    }
    let same = decoded.iter().zip(naive).filter(|(a, b)| a == b).count();
    same as f64 / decoded.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::builder::HarmonyDecoderBuilder;

    fn input() -> DecodeInput {
        DecodeInput {
            onsets: vec![0.0, 1.0, 2.0, 3.0, 4.0],
            end_time: 5.0,
            change_probs: Some(vec![0.0, 0.9, 0.1, 0.95, 0.0]),
            chord_posteriors: Some(vec![
                vec![0.9, 0.1, 0.0],
                vec![0.1, 0.8, 0.1],
                vec![0.1, 0.8, 0.1],
                vec![0.0, 0.2, 0.8],
                vec![0.0, 0.2, 0.8],
            ]),
            key_posteriors: None,
        }
    }

    fn config() -> DecoderConfig {
        DecoderConfig {
            min_change_prob: 0.3,
            max_no_change_prob: 0.7,
            max_segment_duration: None,
            ..DecoderConfig::default()
        }
    }

    #[test]
    fn decodes_forced_boundaries() {
        let decoder = HarmonyDecoderBuilder::new(config()).build().unwrap();
        let outcome = decoder.decode(&input()).unwrap();
        let report = outcome.report().expect("solved");
        let spans: Vec<_> = report
            .labels
            .chords
            .iter()
            .map(|s| (s.label, s.start, s.end))
            .collect();
        assert_eq!(spans, vec![(0, 0, 1), (1, 1, 3), (2, 3, 5)]);
        assert!(report.labels.keys.is_empty());
        assert_eq!(report.range_count, 3);
        assert_eq!(report.naive_chords, vec![Some(0), Some(1), Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn short_duration_limit_is_no_solution() {
        let decoder = HarmonyDecoderBuilder::new(DecoderConfig {
            max_segment_duration: Some(0.5),
            ..config()
        })
        .build()
        .unwrap();
        let outcome = decoder.decode(&input()).unwrap();
        assert!(matches!(outcome, DecodeOutcome::NoSolution { frames: 5, .. }));
    }

    #[test]
    fn missing_curve_is_invalid_input() {
        let decoder = HarmonyDecoderBuilder::new(config()).build().unwrap();
        let mut bare = input();
        bare.change_probs = None;
        assert!(matches!(
            decoder.decode(&bare),
            Err(DecodeError::InvalidInput { .. })
        ));
    }

    #[test]
    fn key_posteriors_label_keys() {
        let decoder = HarmonyDecoderBuilder::new(config()).build().unwrap();
        let mut with_keys = input();
        with_keys.key_posteriors = Some(vec![vec![0.9, 0.1]; 5]);
        let outcome = decoder.decode(&with_keys).unwrap();
        let report = outcome.report().expect("solved");
        assert_eq!(report.labels.frame_keys(5), vec![Some(0); 5]);

        let no_keys = HarmonyDecoderBuilder::new(config())
            .without_keys()
            .build()
            .unwrap();
        let outcome = no_keys.decode(&with_keys).unwrap();
        assert!(outcome.report().expect("solved").labels.keys.is_empty());
    }

    #[test]
    fn cancelled_decode_reports_frame() {
        let decoder = HarmonyDecoderBuilder::new(config()).build().unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let outcome = decoder.decode_with_cancel(&input(), &flag).unwrap();
        assert!(matches!(
            outcome,
            DecodeOutcome::Cancelled {
                frame: 0,
                partial: None
            }
        ));
    }

    #[test]
    fn agreement_counts_matching_frames() {
        let a = vec![Some(1), Some(2), None, Some(3)];
        let b = vec![Some(1), Some(0), None, Some(3)];
        assert!((agreement(&a, &b) - 0.75).abs() < 1e-12);
        assert_eq!(agreement(&[], &[]), 0.0);
    }
}
