use crate::decoding::hypothesis::{Hypothesis, Label};
use crate::decoding::ranges::Range;
use crate::decoding::timeline::Timeline;
use crate::error::DecodeError;

/// Scores, per frame, the probability that a new segment starts right after it.
pub trait ChangeProbabilityModel: Send + Sync {
    fn change_probs(&self, timeline: &Timeline) -> Result<Vec<f64>, DecodeError>;
}

/// Scores chord labels for candidate segments, in bulk.
///
/// Returns one `(label, log_prob)` vector per range, in the order of `ranges`.
/// Each vector describes a distribution (probabilities summing to at most 1).
pub trait SegmentLabelModel: Send + Sync {
    fn label_priors(
        &self,
        timeline: &Timeline,
        ranges: &[Range],
    ) -> Result<Vec<Vec<(Label, f64)>>, DecodeError>;
}

/// Key scoring hooks consulted by the beam search.
///
/// All values are log-probabilities and must not be positive: the search
/// prunes children using bounds computed without key terms.
pub trait KeyScorer: Send + Sync {
    /// Cost of segment `[start, end)` staying in `key`.
    fn key_log_prob(&self, start: usize, end: usize, key: Label) -> f64;

    /// Key distribution for the opening segment `range`.
    fn initial_key_priors(&self, range: &Range) -> Vec<(Label, f64)>;

    /// Alternative keys for the most recent segment of `hypothesis`. Each value
    /// replaces that segment's whole label term
    /// ([`crate::decoding::StepLogProb::label`]).
    fn key_change_priors(&self, hypothesis: &Hypothesis) -> Vec<(Label, f64)>;
}
