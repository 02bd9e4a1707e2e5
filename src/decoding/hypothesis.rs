//! Persistent hypothesis tree.
//!
//! A [`Hypothesis`] is one node of a reverse-linked tree: it stores the labels
//! of its most recent segment and a shared pointer to the hypothesis it extends.
//! Branching clones a pointer, never a history. Nodes are immutable once built.

use std::fmt;
use std::sync::Arc;

use crate::types::{HarmonyLabels, LabeledSpan};

pub type Label = usize;

/// Log-probability a node adds on top of its parent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepLogProb {
    /// Boundary term of the segment (see [`crate::decoding::Range::log_prob`]).
    pub range: f64,
    /// Label term: chord prior, plus key terms when keys are scored.
    pub label: f64,
}

impl StepLogProb {
    pub fn new(range: f64, label: f64) -> Self {
        Self { range, label }
    }

    pub fn total(&self) -> f64 {
        self.range + self.label
    }
}

/// The last few `(key, chord)` pairs of a path. Only used for deduplication.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(Arc<[(Option<Label>, Label)]>);

impl Signature {
    fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    fn extend(&self, pair: (Option<Label>, Label), length: usize) -> Self {
        if length == 0 {
            return Self::empty();
        }
        let keep = self.0.len().min(length - 1);
        let mut pairs = Vec::with_capacity(keep + 1);
        pairs.extend_from_slice(&self.0[self.0.len() - keep..]);
        pairs.push(pair);
        Self(Arc::from(pairs))
    }

    pub fn pairs(&self) -> &[(Option<Label>, Label)] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

struct Node {
    id: u64,
    chord: Option<Label>,
    key: Option<Label>,
    valid_until: usize,
    log_prob: f64,
    step: StepLogProb,
    depth: usize,
    key_retargeted: bool,
    signature: Signature,
    parent: Option<Hypothesis>,
}

impl Drop for Node {
    // Unlink the chain iteratively; recursive drops overflow on long pieces.
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(hypothesis) = next {
            match Arc::try_unwrap(hypothesis.0) {
                Ok(mut node) => next = node.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Shared handle to an immutable node of the hypothesis tree.
#[derive(Clone)]
pub struct Hypothesis(Arc<Node>);

impl Hypothesis {
    /// Creation order within its graph; lower ids win score ties.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn chord(&self) -> Option<Label> {
        self.0.chord
    }

    pub fn key(&self) -> Option<Label> {
        self.0.key
    }

    /// Frame index (exclusive) at which the most recent segment ends.
    pub fn valid_until(&self) -> usize {
        self.0.valid_until
    }

    /// Frame index at which the most recent segment starts.
    pub fn segment_start(&self) -> usize {
        self.0.parent.as_ref().map_or(0, |p| p.valid_until())
    }

    pub fn log_prob(&self) -> f64 {
        self.0.log_prob
    }

    pub fn step(&self) -> StepLogProb {
        self.0.step
    }

    /// Number of segments on the path.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn parent(&self) -> Option<&Hypothesis> {
        self.0.parent.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    pub fn is_key_retargeted(&self) -> bool {
        self.0.key_retargeted
    }

    /// A key change needs a previous segment to change from, and may only be
    /// applied once per segment.
    pub fn can_retarget_key(&self) -> bool {
        self.0.depth >= 2 && !self.0.key_retargeted
    }

    /// True when `self` ranks above `other`: higher log-probability, ties going
    /// to the earlier-created hypothesis.
    pub fn outranks(&self, other: &Hypothesis) -> bool {
        match self.log_prob().total_cmp(&other.log_prob()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.id() < other.id(),
        }
    }

    /// Segments from the root, oldest first, as `(chord, key, start, end)`.
    pub fn segments(&self) -> Vec<(Label, Option<Label>, usize, usize)> {
        let mut segments = Vec::with_capacity(self.depth());
        let mut cursor = self;
        while let (Some(chord), Some(parent)) = (cursor.chord(), cursor.parent()) {
            segments.push((chord, cursor.key(), parent.valid_until(), cursor.valid_until()));
            cursor = parent;
        }
        segments.reverse();
        segments
    }

    /// Chord and key label sequences of the path.
    ///
    /// Every segment is a chord span, even when its label repeats an earlier
    /// one. Consecutive segments in the same key merge into one key span.
    pub fn labels(&self) -> HarmonyLabels {
        let segments = self.segments();
        let chords = segments
            .iter()
            .map(|&(chord, _, start, end)| LabeledSpan {
                label: chord,
                start,
                end,
            })
            .collect();

        let mut keys: Vec<LabeledSpan> = Vec::new();
        for &(_, key, start, end) in &segments {
            let Some(key) = key else { continue };
            match keys.last_mut() {
                Some(last) if last.label == key && last.end == start => last.end = end,
                _ => keys.push(LabeledSpan {
                    label: key,
                    start,
                    end,
                }),
            }
        }

        HarmonyLabels { chords, keys }
    }
}

impl fmt::Debug for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypothesis")
            .field("id", &self.id())
            .field("chord", &self.chord())
            .field("key", &self.key())
            .field("valid_until", &self.valid_until())
            .field("log_prob", &self.log_prob())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Factory for the nodes of one search. Hands out creation-order ids and
/// builds signatures of the configured length.
#[derive(Debug)]
pub struct HypothesisGraph {
    signature_length: usize,
    next_id: u64,
}

impl HypothesisGraph {
    /// `signature_length` of zero disables signatures (all are empty).
    pub fn new(signature_length: usize) -> Self {
        Self {
            signature_length,
            next_id: 0,
        }
    }

    pub fn created(&self) -> u64 {
        self.next_id
    }

    pub fn root(&mut self) -> Hypothesis {
        let id = self.next_id();
        Hypothesis(Arc::new(Node {
            id,
            chord: None,
            key: None,
            valid_until: 0,
            log_prob: 0.0,
            step: StepLogProb::default(),
            depth: 0,
            key_retargeted: false,
            signature: Signature::empty(),
            parent: None,
        }))
    }

    /// New segment `[h.valid_until(), end)` labelled `chord`, in `h`'s key.
    ///
    /// # Panics
    ///
    /// If `chord` repeats `h`'s chord or `end` does not advance.
    pub fn extend_chord(
        &mut self,
        h: &Hypothesis,
        chord: Label,
        end: usize,
        step: StepLogProb,
    ) -> Hypothesis {
        self.open_segment(h, chord, h.key(), end, step)
    }

    /// Like [`Self::extend_chord`] but with an explicit key, used for the
    /// opening segment.
    pub fn open_segment(
        &mut self,
        h: &Hypothesis,
        chord: Label,
        key: Option<Label>,
        end: usize,
        step: StepLogProb,
    ) -> Hypothesis {
        assert_ne!(
            h.chord(),
            Some(chord),
            "self-transition to chord {chord} at frame {}",
            h.valid_until()
        );
        assert!(
            end > h.valid_until(),
            "segment end {end} does not advance past {}",
            h.valid_until()
        );
        let id = self.next_id();
        Hypothesis(Arc::new(Node {
            id,
            chord: Some(chord),
            key,
            valid_until: end,
            log_prob: h.log_prob() + step.total(),
            step,
            depth: h.depth() + 1,
            key_retargeted: false,
            signature: h.signature().extend((key, chord), self.signature_length),
            parent: Some(h.clone()),
        }))
    }

    /// Sibling of `h` whose most recent segment is in `key`. The label term of
    /// that segment is replaced by `key_log_prob`; its boundary term is kept.
    ///
    /// # Panics
    ///
    /// If `h` is not eligible ([`Hypothesis::can_retarget_key`]) or already in `key`.
    pub fn retarget_key(&mut self, h: &Hypothesis, key: Label, key_log_prob: f64) -> Hypothesis {
        assert!(
            h.can_retarget_key(),
            "key retarget on ineligible hypothesis {h:?}"
        );
        assert_ne!(h.key(), Some(key), "key retarget to the current key {key}");
        let parent = h
            .parent()
            .expect("eligible hypothesis has a parent")
            .clone();
        let chord = h.chord().expect("eligible hypothesis has a chord");
        let step = StepLogProb::new(h.step().range, key_log_prob);
        let id = self.next_id();
        Hypothesis(Arc::new(Node {
            id,
            chord: Some(chord),
            key: Some(key),
            valid_until: h.valid_until(),
            log_prob: parent.log_prob() + step.total(),
            step,
            depth: h.depth(),
            key_retargeted: true,
            signature: parent
                .signature()
                .extend((Some(key), chord), self.signature_length),
            parent: Some(parent),
        }))
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
