use std::collections::BTreeMap;

use crate::decoding::hypothesis::Label;
use crate::decoding::ranges::Range;

/// Per-frame argmax of the summed prior probabilities of every range covering
/// the frame. Frames no range covers stay `None`. Ties go to the lower label.
pub fn naive_frame_labels(
    timeline_len: usize,
    ranges: &[Range],
    priors: &[Vec<(Label, f64)>],
) -> Vec<Option<Label>> {
    // Labels are opaque ids, possibly sparse.
    let mut mass: Vec<BTreeMap<Label, f64>> = vec![BTreeMap::new(); timeline_len];
    for (range, prior) in ranges.iter().zip(priors) {
        for frame_mass in mass.iter_mut().take(range.end).skip(range.start) {
            for &(label, log_prob) in prior {
                *frame_mass.entry(label).or_insert(0.0) += log_prob.exp();
            }
        }
    }

    mass.iter()
        .map(|frame_mass| {
            let mut best: Option<(Label, f64)> = None;
            // Ascending label order, so a strict comparison keeps the lower label.
            for (&label, &m) in frame_mass {
                if m > 0.0 && best.map_or(true, |(_, top)| m > top) {
                    best = Some((label, m));
                }
            }
            best.map(|(label, _)| label)
        })
        .collect()
}
