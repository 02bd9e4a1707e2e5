//! Bounded best-k containers of hypotheses, one per frame index.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::decoding::hypothesis::Hypothesis;

mod hashed;

pub use hashed::HashedBeam;

/// Capability set shared by [`PlainBeam`] and [`HashedBeam`].
pub trait HypothesisBeam: Send {
    fn capacity(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`Self::insert`] would keep `h`. Does not mutate.
    fn admits(&self, h: &Hypothesis) -> bool;

    /// Whether any not-yet-built hypothesis scoring `log_prob` could be kept.
    /// Never false for a hypothesis that [`Self::admits`] would accept.
    fn admits_log_prob(&self, log_prob: f64) -> bool;

    /// Keeps `h` if admitted, evicting the worst member when full.
    fn insert(&mut self, h: Hypothesis) -> bool;

    /// Highest-ranked member. Linear in the beam size.
    fn best(&self) -> Option<Hypothesis>;

    /// Clones of every member, best first.
    fn members(&self) -> Vec<Hypothesis>;

    /// Removes every member, best first.
    fn take_all(&mut self) -> Vec<Hypothesis>;

    fn clear(&mut self);
}

/// Builds the beam variant for a search: hashed when a signature is in use.
pub fn new_beam(capacity: usize, hashed: bool) -> Box<dyn HypothesisBeam> {
    if hashed {
        Box::new(HashedBeam::new(capacity))
    } else {
        Box::new(PlainBeam::new(capacity))
    }
}

/// Heap entry ordered by hypothesis rank; the payload does not take part.
#[derive(Debug)]
pub(super) struct Ranked<T> {
    log_prob: f64,
    id: u64,
    item: T,
}

impl<T> Ranked<T> {
    pub(super) fn new(h: &Hypothesis, item: T) -> Self {
        Self {
            log_prob: h.log_prob(),
            id: h.id(),
            item,
        }
    }

    pub(super) fn item(&self) -> &T {
        &self.item
    }

    pub(super) fn into_item(self) -> T {
        self.item
    }
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.log_prob
            .total_cmp(&other.log_prob)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

pub(super) fn best_of<'a>(members: impl Iterator<Item = &'a Hypothesis>) -> Option<Hypothesis> {
    members
        .fold(None::<&Hypothesis>, |best, h| match best {
            Some(current) if !h.outranks(current) => Some(current),
            _ => Some(h),
        })
        .cloned()
}

pub(super) fn sort_best_first(members: &mut [Hypothesis]) {
    members.sort_by(|a, b| {
        b.log_prob()
            .total_cmp(&a.log_prob())
            .then_with(|| a.id().cmp(&b.id()))
    });
}

/// Min-heap of at most `capacity` hypotheses; the root is the worst member.
#[derive(Debug)]
pub struct PlainBeam {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked<Hypothesis>>>,
}

impl PlainBeam {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "beam capacity must be positive");
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
        }
    }

    fn worst(&self) -> Option<&Hypothesis> {
        self.heap.peek().map(|Reverse(entry)| entry.item())
    }
}

impl HypothesisBeam for PlainBeam {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn admits(&self, h: &Hypothesis) -> bool {
        self.len() < self.capacity || self.worst().map_or(true, |worst| h.outranks(worst))
    }

    fn admits_log_prob(&self, log_prob: f64) -> bool {
        self.len() < self.capacity
            || self
                .worst()
                .map_or(true, |worst| log_prob > worst.log_prob())
    }

    fn insert(&mut self, h: Hypothesis) -> bool {
        if !self.admits(&h) {
            return false;
        }
        if self.len() >= self.capacity {
            self.heap.pop();
        }
        let entry = Ranked::new(&h, h.clone());
        self.heap.push(Reverse(entry));
        true
    }

    fn best(&self) -> Option<Hypothesis> {
        best_of(self.heap.iter().map(|Reverse(entry)| entry.item()))
    }

    fn members(&self) -> Vec<Hypothesis> {
        let mut members: Vec<Hypothesis> =
            self.heap.iter().map(|Reverse(entry)| entry.item().clone()).collect();
        sort_best_first(&mut members);
        members
    }

    fn take_all(&mut self) -> Vec<Hypothesis> {
        let mut members: Vec<Hypothesis> = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .map(|Reverse(entry)| entry.into_item())
            .collect();
        sort_best_first(&mut members);
        members
    }

    fn clear(&mut self) {
        self.heap.clear();
    }
}
