use serde::{Deserialize, Serialize};

use crate::decoding::hypothesis::Label;

/// Piece handed to [`crate::HarmonyDecoder::decode`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeInput {
    /// Onset position of each frame, non-decreasing.
    pub onsets: Vec<f64>,
    /// Position at which the last frame ends.
    pub end_time: f64,
    /// Per-frame probability that a new segment starts after the frame.
    #[serde(default)]
    pub change_probs: Option<Vec<f64>>,
    /// Per-frame chord label distributions, one row per frame.
    #[serde(default)]
    pub chord_posteriors: Option<Vec<Vec<f64>>>,
    /// Per-frame key label distributions, one row per frame.
    #[serde(default)]
    pub key_posteriors: Option<Vec<Vec<f64>>>,
}

/// One run of a label. Frame interval is `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledSpan {
    pub label: Label,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonyLabels {
    pub chords: Vec<LabeledSpan>,
    /// Empty when keys are not scored.
    pub keys: Vec<LabeledSpan>,
}

impl HarmonyLabels {
    pub fn frame_chords(&self, frame_count: usize) -> Vec<Option<Label>> {
        expand_spans(&self.chords, frame_count)
    }

    pub fn frame_keys(&self, frame_count: usize) -> Vec<Option<Label>> {
        expand_spans(&self.keys, frame_count)
    }

    /// Frame index the labels run up to.
    pub fn end(&self) -> usize {
        self.chords.last().map_or(0, |span| span.end)
    }
}

fn expand_spans(spans: &[LabeledSpan], frame_count: usize) -> Vec<Option<Label>> {
    let mut frames = vec![None; frame_count];
    for span in spans {
        let end = span.end.min(frame_count);
        for slot in frames.iter_mut().take(end).skip(span.start) {
            *slot = Some(span.label);
        }
    }
    frames
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeReport {
    pub labels: HarmonyLabels,
    pub log_prob: f64,
    pub range_count: usize,
    /// Per-frame argmax of the summed segment priors, for comparison.
    pub naive_chords: Vec<Option<Label>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecodeOutcome {
    Solved(DecodeReport),
    /// No path of candidate segments reaches the end of the timeline under the
    /// configured thresholds and duration limit.
    NoSolution { frames: usize, range_count: usize },
    /// The search was abandoned at `frame`. `partial` is the best path ending at
    /// the latest frame with live hypotheses, if any.
    Cancelled {
        frame: usize,
        partial: Option<DecodeReport>,
    },
}

impl DecodeOutcome {
    pub fn report(&self) -> Option<&DecodeReport> {
        match self {
            Self::Solved(report) => Some(report),
            _ => None,
        }
    }
}
