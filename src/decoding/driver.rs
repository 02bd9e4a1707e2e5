//! Left-to-right beam search over candidate segments.
//!
//! One beam per frame index. Sweeping `current` upwards, every hypothesis in
//! beam `current` is extended across every range starting there, into the
//! beam at the range's end. A beam is final once the sweep reaches it, so the
//! beam at `timeline_len` holds complete labelings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::decoding::beam::{new_beam, HypothesisBeam};
use crate::decoding::hypothesis::{Hypothesis, HypothesisGraph, Label, StepLogProb};
use crate::decoding::ranges::{ranges_by_start, Range};
use crate::error::DecodeError;
use crate::pipeline::traits::KeyScorer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub beam_size: usize,
    pub max_branching_factor: usize,
    pub target_branch_prob: f64,
    pub signature_length: Option<usize>,
    pub max_key_branching_factor: usize,
    pub target_key_branch_prob: f64,
}

impl SearchParams {
    pub fn from_config(config: &DecoderConfig) -> Self {
        Self {
            beam_size: config.beam_size,
            max_branching_factor: config.max_branching_factor,
            target_branch_prob: config.target_branch_prob,
            signature_length: config.signature_length,
            max_key_branching_factor: config.max_key_branching_factor,
            target_key_branch_prob: config.target_key_branch_prob,
        }
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.beam_size == 0 || self.max_branching_factor == 0 || self.max_key_branching_factor == 0
        {
            return Err(DecodeError::config(
                "beam size and branching factors must be positive",
            ));
        }
        for target in [self.target_branch_prob, self.target_key_branch_prob] {
            if !(target > 0.0 && target <= 1.0) {
                return Err(DecodeError::config(format!(
                    "branch probability target must be in (0, 1], got {target}"
                )));
            }
        }
        if self.signature_length == Some(0) {
            return Err(DecodeError::config("signature_length must be positive"));
        }
        Ok(())
    }
}

/// Shared flag for abandoning a search; checked once per frame index.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Complete(Hypothesis),
    /// The final beam is empty: no chain of ranges covers the timeline.
    NoSolution,
    /// Abandoned before processing `frame`. `partial` is the best hypothesis of
    /// the latest final beam that held a non-root hypothesis.
    Cancelled {
        frame: usize,
        partial: Option<Hypothesis>,
    },
}

/// Label candidates sorted by descending log-probability (ties: lower label).
fn sorted_candidates(priors: &[(Label, f64)]) -> Vec<(Label, f64)> {
    let mut sorted = priors.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Smallest prefix of `sorted` whose probability mass reaches `target`,
/// clamped to `1..=max_width` and to the number of candidates.
pub fn branching_cutoff(sorted: &[(Label, f64)], target: f64, max_width: usize) -> usize {
    let mut cumulative = 0.0;
    let mut width = 0usize;
    for &(_, log_prob) in sorted {
        width += 1;
        cumulative += log_prob.exp();
        if cumulative >= target {
            break;
        }
    }
    width.clamp(1, max_width.max(1)).min(sorted.len())
}

pub struct BeamSearch<'a> {
    params: SearchParams,
    key_scorer: Option<&'a dyn KeyScorer>,
}

#[derive(Debug, Default)]
struct SweepStats {
    expansions: usize,
    pruned: usize,
    inserted: usize,
    key_changes: usize,
}

impl<'a> BeamSearch<'a> {
    pub fn new(params: SearchParams) -> Result<Self, DecodeError> {
        params.validate()?;
        Ok(Self {
            params,
            key_scorer: None,
        })
    }

    pub fn with_key_scorer(mut self, key_scorer: &'a dyn KeyScorer) -> Self {
        self.key_scorer = Some(key_scorer);
        self
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Runs the sweep. `priors[i]` holds the chord log-priors of `ranges[i]`.
    pub fn search(
        &self,
        timeline_len: usize,
        ranges: &[Range],
        priors: &[Vec<(Label, f64)>],
        cancel: Option<&CancelFlag>,
    ) -> Result<SearchOutcome, DecodeError> {
        validate_candidates(timeline_len, ranges, priors)?;

        let hashed = self.params.signature_length.is_some();
        let mut graph = HypothesisGraph::new(self.params.signature_length.unwrap_or(0));
        let mut beams: Vec<Box<dyn HypothesisBeam>> = (0..=timeline_len)
            .map(|_| new_beam(self.params.beam_size, hashed))
            .collect();
        beams[0].insert(graph.root());

        let by_start = ranges_by_start(ranges, timeline_len);
        let candidates: Vec<Vec<(Label, f64)>> =
            priors.iter().map(|p| sorted_candidates(p)).collect();
        let cutoffs: Vec<usize> = candidates
            .iter()
            .map(|c| {
                branching_cutoff(
                    c,
                    self.params.target_branch_prob,
                    self.params.max_branching_factor,
                )
            })
            .collect();

        let mut stats = SweepStats::default();
        let mut latest: Option<Hypothesis> = None;

        for current in 0..timeline_len {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                tracing::info!(frame = current, "beam search: cancelled");
                // Beam `current` is already final, though not yet expanded.
                let partial = beams[current]
                    .best()
                    .filter(|h| !h.is_root())
                    .or(latest);
                return Ok(SearchOutcome::Cancelled {
                    frame: current,
                    partial,
                });
            }

            if let Some(scorer) = self.key_scorer {
                stats.key_changes +=
                    self.offer_key_changes(&mut graph, beams[current].as_mut(), scorer);
            }

            let live = beams[current].take_all();
            if live.is_empty() {
                continue;
            }
            if !live[0].is_root() {
                latest = Some(live[0].clone());
            }
            tracing::trace!(frame = current, live = live.len(), "beam search: expanding");

            for h in &live {
                for &idx in &by_start[current] {
                    let range = &ranges[idx];
                    self.expand(
                        &mut graph,
                        h,
                        range,
                        &candidates[idx],
                        cutoffs[idx],
                        beams[range.end].as_mut(),
                        &mut stats,
                    );
                }
            }
        }

        // The final beam is never expanded, so its key changes are offered here.
        if let Some(scorer) = self.key_scorer {
            stats.key_changes +=
                self.offer_key_changes(&mut graph, beams[timeline_len].as_mut(), scorer);
        }

        let outcome = match beams[timeline_len].best() {
            Some(best) => SearchOutcome::Complete(best),
            None => SearchOutcome::NoSolution,
        };
        tracing::debug!(
            frames = timeline_len,
            ranges = ranges.len(),
            hypotheses = graph.created(),
            expansions = stats.expansions,
            pruned = stats.pruned,
            inserted = stats.inserted,
            key_changes = stats.key_changes,
            solved = matches!(outcome, SearchOutcome::Complete(_)),
            "beam search: sweep finished"
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        graph: &mut HypothesisGraph,
        h: &Hypothesis,
        range: &Range,
        candidates: &[(Label, f64)],
        cutoff: usize,
        beam: &mut dyn HypothesisBeam,
        stats: &mut SweepStats,
    ) {
        stats.expansions += 1;
        let Some(&(top, _)) = candidates.first() else {
            return;
        };
        let base = h.log_prob() + range.log_prob();
        if !beam.admits_log_prob(base + best_other(candidates, h.chord())) {
            stats.pruned += 1;
            return;
        }

        let mut width = cutoff;
        if width == 1 && h.chord() == Some(top) {
            width = candidates.len().min(2);
        }

        let opening_keys = match self.key_scorer {
            Some(scorer) if h.is_root() => Some(self.initial_keys(scorer, range)),
            _ => None,
        };
        let key_term = match (self.key_scorer, h.key()) {
            (Some(scorer), Some(key)) => scorer.key_log_prob(range.start, range.end, key),
            _ => 0.0,
        };

        for &(chord, chord_log_prob) in &candidates[..width] {
            if h.chord() == Some(chord) {
                continue;
            }
            let label_log_prob = chord_log_prob + key_term;
            // Candidates are sorted, so later ones cannot do better.
            if !beam.admits_log_prob(base + label_log_prob) {
                stats.pruned += 1;
                break;
            }

            match &opening_keys {
                Some(keys) => {
                    for &(key, key_log_prob) in keys {
                        let step = StepLogProb::new(range.log_prob(), label_log_prob + key_log_prob);
                        if !beam.admits_log_prob(base + step.label) {
                            break;
                        }
                        let child = graph.open_segment(h, chord, Some(key), range.end, step);
                        if beam.insert(child) {
                            stats.inserted += 1;
                        }
                    }
                }
                None => {
                    let step = StepLogProb::new(range.log_prob(), label_log_prob);
                    let child = graph.extend_chord(h, chord, range.end, step);
                    if beam.insert(child) {
                        stats.inserted += 1;
                    }
                }
            }
        }
    }

    fn initial_keys(&self, scorer: &dyn KeyScorer, range: &Range) -> Vec<(Label, f64)> {
        let mut keys = sorted_candidates(&scorer.initial_key_priors(range));
        let width = branching_cutoff(
            &keys,
            self.params.target_key_branch_prob,
            self.params.max_key_branching_factor,
        );
        keys.truncate(width);
        keys
    }

    /// Adds key-changed siblings of eligible members to `beam`. Returns how many
    /// were kept.
    fn offer_key_changes(
        &self,
        graph: &mut HypothesisGraph,
        beam: &mut dyn HypothesisBeam,
        scorer: &dyn KeyScorer,
    ) -> usize {
        let mut kept = 0usize;
        for h in beam.members() {
            if !h.can_retarget_key() {
                continue;
            }
            let Some(parent_log_prob) = h.parent().map(Hypothesis::log_prob) else {
                continue;
            };
            let mut options: Vec<(Label, f64)> = scorer
                .key_change_priors(&h)
                .into_iter()
                .filter(|&(key, _)| h.key() != Some(key))
                .collect();
            options = sorted_candidates(&options);
            options.truncate(self.params.max_key_branching_factor);

            for (key, key_log_prob) in options {
                if !beam.admits_log_prob(parent_log_prob + h.step().range + key_log_prob) {
                    break;
                }
                if beam.insert(graph.retarget_key(&h, key, key_log_prob)) {
                    kept += 1;
                }
            }
        }
        kept
    }
}

/// Best log-prior among candidates other than `current`.
fn best_other(candidates: &[(Label, f64)], current: Option<Label>) -> f64 {
    candidates
        .iter()
        .find(|&&(label, _)| Some(label) != current)
        .map_or(f64::NEG_INFINITY, |&(_, log_prob)| log_prob)
}

fn validate_candidates(
    timeline_len: usize,
    ranges: &[Range],
    priors: &[Vec<(Label, f64)>],
) -> Result<(), DecodeError> {
    if ranges.len() != priors.len() {
        return Err(DecodeError::invalid_input(format!(
            "{} label prior vectors for {} ranges",
            priors.len(),
            ranges.len()
        )));
    }
    for (range, prior) in ranges.iter().zip(priors) {
        if range.start >= range.end || range.end > timeline_len {
            return Err(DecodeError::invalid_input(format!(
                "range ({}, {}) does not fit a timeline of {timeline_len} frames",
                range.start, range.end
            )));
        }
        if range.log_prob().is_nan() || prior.iter().any(|(_, lp)| lp.is_nan() || *lp > 0.0) {
            return Err(DecodeError::invalid_input(format!(
                "range ({}, {}) carries an invalid log-probability",
                range.start, range.end
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(beam_size: usize, signature_length: Option<usize>) -> SearchParams {
        SearchParams {
            beam_size,
            max_branching_factor: 4,
            target_branch_prob: 1.0,
            signature_length,
            max_key_branching_factor: 2,
            target_key_branch_prob: 1.0,
        }
    }

    fn range(start: usize, end: usize, log_prob: f64) -> Range {
        Range {
            start,
            end,
            no_change_log_prob: log_prob,
            change_log_prob: 0.0,
        }
    }

    fn ln(p: f64) -> f64 {
        p.ln()
    }

    fn chords_of(h: &Hypothesis) -> Vec<(Label, usize, usize)> {
        h.labels()
            .chords
            .iter()
            .map(|s| (s.label, s.start, s.end))
            .collect()
    }

    #[test]
    fn cutoff_covers_target_mass() {
        let sorted = vec![(0, ln(0.5)), (1, ln(0.3)), (2, ln(0.2))];
        assert_eq!(branching_cutoff(&sorted, 0.5, 5), 1);
        assert_eq!(branching_cutoff(&sorted, 0.75, 5), 2);
        assert_eq!(branching_cutoff(&sorted, 0.75, 1), 1);
        assert_eq!(branching_cutoff(&sorted, 1.0, 5), 3);
        assert_eq!(branching_cutoff(&[], 1.0, 5), 0);
    }

    #[test]
    fn picks_highest_scoring_path() {
        let ranges = vec![range(0, 2, ln(0.6)), range(0, 1, ln(0.4)), range(1, 2, 0.0)];
        let priors = vec![
            vec![(0, ln(0.5)), (1, ln(0.5))],
            vec![(0, ln(0.9)), (1, ln(0.1))],
            vec![(0, ln(0.1)), (1, ln(0.9))],
        ];
        let search = BeamSearch::new(params(4, None)).unwrap();
        let SearchOutcome::Complete(best) = search.search(2, &ranges, &priors, None).unwrap()
        else {
            panic!("expected a complete path");
        };
        // 0.4 * 0.9 * 0.9 = 0.324 beats 0.6 * 0.5 = 0.3
        assert_eq!(chords_of(&best), vec![(0, 0, 1), (1, 1, 2)]);
        assert!((best.log_prob() - 0.324f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn self_transitions_widen_single_candidate_cutoff() {
        let ranges = vec![range(0, 1, 0.0), range(1, 2, 0.0)];
        let priors = vec![vec![(3, ln(0.9)), (4, ln(0.1))], vec![(3, ln(0.95)), (5, ln(0.05))]];
        let search = BeamSearch::new(SearchParams {
            target_branch_prob: 0.5,
            ..params(4, None)
        })
        .unwrap();
        let SearchOutcome::Complete(best) = search.search(2, &ranges, &priors, None).unwrap()
        else {
            panic!("expected a complete path");
        };
        assert_eq!(chords_of(&best), vec![(3, 0, 1), (5, 1, 2)]);
    }

    #[test]
    fn unreachable_end_is_no_solution() {
        let ranges = vec![range(0, 1, 0.0)];
        let priors = vec![vec![(0, 0.0)]];
        let search = BeamSearch::new(params(2, Some(2))).unwrap();
        let outcome = search.search(3, &ranges, &priors, None).unwrap();
        assert!(matches!(outcome, SearchOutcome::NoSolution));
    }

    #[test]
    fn cancelled_search_stops_before_first_frame() {
        let ranges = vec![range(0, 1, 0.0), range(1, 2, 0.0)];
        let priors = vec![vec![(0, 0.0)], vec![(1, 0.0)]];
        let search = BeamSearch::new(params(2, None)).unwrap();

        let flag = CancelFlag::new();
        flag.cancel();
        let outcome = search.search(2, &ranges, &priors, Some(&flag)).unwrap();
        assert!(matches!(
            outcome,
            SearchOutcome::Cancelled {
                frame: 0,
                partial: None
            }
        ));
    }

    #[test]
    fn key_scorer_moves_key_of_final_segment() {
        let ranges = vec![range(0, 2, 0.0), range(2, 3, 0.0)];
        let priors = vec![vec![(0, 0.0)], vec![(1, 0.0)]];
        let scorer = TwoKeys;
        let search = BeamSearch::new(params(8, Some(3)))
            .unwrap()
            .with_key_scorer(&scorer);
        let SearchOutcome::Complete(best) = search.search(3, &ranges, &priors, None).unwrap()
        else {
            panic!("expected a complete path");
        };
        let keys: Vec<_> = best
            .labels()
            .keys
            .iter()
            .map(|s| (s.label, s.start, s.end))
            .collect();
        assert_eq!(keys, vec![(0, 0, 2), (1, 2, 3)]);
        // ln 0.9 for the opening key, ln 0.9 + ln 0.5 for the changed one.
        let expected = 0.9f64.ln() + 0.9f64.ln() + 0.5f64.ln();
        assert!((best.log_prob() - expected).abs() < 1e-9);
    }

    struct CancelFrom {
        flag: CancelFlag,
        start: usize,
    }

    impl KeyScorer for CancelFrom {
        fn key_log_prob(&self, start: usize, _end: usize, _key: Label) -> f64 {
            if start >= self.start {
                self.flag.cancel();
            }
            0.0
        }

        fn initial_key_priors(&self, _range: &Range) -> Vec<(Label, f64)> {
            vec![(0, 0.0)]
        }

        fn key_change_priors(&self, _h: &Hypothesis) -> Vec<(Label, f64)> {
            Vec::new()
        }
    }

    #[test]
    fn cancellation_mid_sweep_keeps_final_beam_best() {
        let ranges = vec![range(0, 1, 0.0), range(1, 2, 0.0), range(2, 3, 0.0)];
        let priors = vec![vec![(0, 0.0)], vec![(1, 0.0)], vec![(0, 0.0)]];
        let flag = CancelFlag::new();
        let scorer = CancelFrom {
            flag: flag.clone(),
            start: 1,
        };
        let search = BeamSearch::new(params(2, None))
            .unwrap()
            .with_key_scorer(&scorer);
        let outcome = search.search(3, &ranges, &priors, Some(&flag)).unwrap();
        match outcome {
            SearchOutcome::Cancelled {
                frame,
                partial: Some(partial),
            } => {
                assert_eq!(frame, 2);
                assert_eq!(partial.valid_until(), 2);
                assert_eq!(chords_of(&partial), vec![(0, 0, 1), (1, 1, 2)]);
            }
            other => panic!("expected a cancelled search with a partial path, got {other:?}"),
        }
    }

    #[test]
    fn rejects_mismatched_priors_and_bad_params() {
        let search = BeamSearch::new(params(2, None)).unwrap();
        let ranges = vec![range(0, 1, 0.0)];
        assert!(search.search(1, &ranges, &[], None).is_err());
        assert!(search
            .search(1, &[range(0, 2, 0.0)], &[vec![(0, 0.0)]], None)
            .is_err());
        assert!(search
            .search(1, &ranges, &[vec![(0, 0.5)]], None)
            .is_err());

        assert!(BeamSearch::new(params(0, None)).is_err());
        assert!(BeamSearch::new(params(2, Some(0))).is_err());
    }

    struct TwoKeys;

    impl KeyScorer for TwoKeys {
        fn key_log_prob(&self, start: usize, _end: usize, key: Label) -> f64 {
            // Key 1 fits frames from 2 on; key 0 fits the opening.
            match (start >= 2, key) {
                (true, 1) | (false, 0) => ln(0.9),
                _ => ln(0.1),
            }
        }

        fn initial_key_priors(&self, range: &Range) -> Vec<(Label, f64)> {
            vec![
                (0, self.key_log_prob(range.start, range.end, 0)),
                (1, self.key_log_prob(range.start, range.end, 1)),
            ]
        }

        fn key_change_priors(&self, h: &Hypothesis) -> Vec<(Label, f64)> {
            let start = h.segment_start();
            let end = h.valid_until();
            let current = h.key().map_or(0.0, |k| self.key_log_prob(start, end, k));
            let chord_term = h.step().label - current;
            (0..2)
                .map(|k| (k, chord_term + self.key_log_prob(start, end, k) + ln(0.5)))
                .collect()
        }
    }

    #[test]
    fn key_scorer_moves_key_at_segment_start() {
        let ranges = vec![range(0, 2, 0.0), range(2, 3, 0.0), range(3, 4, 0.0)];
        let priors = vec![vec![(0, 0.0)], vec![(1, 0.0)], vec![(2, 0.0)]];
        let scorer = TwoKeys;
        let search = BeamSearch::new(params(8, Some(3)))
            .unwrap()
            .with_key_scorer(&scorer);
        let SearchOutcome::Complete(best) = search.search(4, &ranges, &priors, None).unwrap()
        else {
            panic!("expected a complete path");
        };
        let keys: Vec<_> = best
            .labels()
            .keys
            .iter()
            .map(|s| (s.label, s.start, s.end))
            .collect();
        assert_eq!(keys, vec![(0, 0, 2), (1, 2, 4)]);
        assert_eq!(chords_of(&best).len(), 3);
    }
}
