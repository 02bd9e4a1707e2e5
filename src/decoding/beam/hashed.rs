use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::{best_of, sort_best_first, HypothesisBeam, Ranked};
use crate::decoding::hypothesis::{Hypothesis, Signature};

/// Beam holding at most one hypothesis per [`Signature`].
///
/// Members live in slots. Replacing a member by a better one with the same
/// signature only empties its slot; the heap entry pointing at it is discarded
/// once it reaches the top. The heap top is always a live member, and a slot is
/// reused only after its entry has left the heap.
#[derive(Debug)]
pub struct HashedBeam {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked<usize>>>,
    slots: Vec<Option<Hypothesis>>,
    free: Vec<usize>,
    by_signature: HashMap<Signature, usize>,
}

impl HashedBeam {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "beam capacity must be positive");
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            by_signature: HashMap::with_capacity(capacity),
        }
    }

    /// Heap entries including stale ones; at least [`HypothesisBeam::len`].
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    fn worst(&self) -> Option<&Hypothesis> {
        self.heap
            .peek()
            .and_then(|Reverse(entry)| self.slots[*entry.item()].as_ref())
    }

    fn incumbent(&self, h: &Hypothesis) -> Option<(usize, &Hypothesis)> {
        let slot = *self.by_signature.get(h.signature())?;
        self.slots[slot].as_ref().map(|member| (slot, member))
    }

    fn push(&mut self, h: Hypothesis) {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.heap.push(Reverse(Ranked::new(&h, slot)));
        self.by_signature.insert(h.signature().clone(), slot);
        self.slots[slot] = Some(h);
    }

    fn discard_stale_top(&mut self) {
        while matches!(self.heap.peek(), Some(Reverse(top)) if self.slots[*top.item()].is_none())
        {
            if let Some(Reverse(stale)) = self.heap.pop() {
                self.free.push(stale.into_item());
            }
        }
    }
}

impl HypothesisBeam for HashedBeam {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.by_signature.len()
    }

    fn admits(&self, h: &Hypothesis) -> bool {
        if let Some((_, incumbent)) = self.incumbent(h) {
            return h.outranks(incumbent);
        }
        self.len() < self.capacity || self.worst().map_or(true, |worst| h.outranks(worst))
    }

    fn admits_log_prob(&self, log_prob: f64) -> bool {
        self.len() < self.capacity
            || self
                .worst()
                .map_or(true, |worst| log_prob > worst.log_prob())
    }

    fn insert(&mut self, h: Hypothesis) -> bool {
        if let Some((slot, incumbent)) = self.incumbent(&h) {
            if !h.outranks(incumbent) {
                return false;
            }
            self.slots[slot] = None;
            self.push(h);
            self.discard_stale_top();
            return true;
        }

        if self.len() >= self.capacity {
            match self.worst() {
                Some(worst) if h.outranks(worst) => {}
                Some(_) => return false,
                None => {}
            }
            if let Some(Reverse(evicted)) = self.heap.pop() {
                let slot = evicted.into_item();
                if let Some(member) = self.slots[slot].take() {
                    self.by_signature.remove(member.signature());
                }
                self.free.push(slot);
            }
        }

        self.push(h);
        self.discard_stale_top();
        true
    }

    fn best(&self) -> Option<Hypothesis> {
        best_of(self.slots.iter().flatten())
    }

    fn members(&self) -> Vec<Hypothesis> {
        let mut members: Vec<Hypothesis> = self.slots.iter().flatten().cloned().collect();
        sort_best_first(&mut members);
        members
    }

    fn take_all(&mut self) -> Vec<Hypothesis> {
        let mut members: Vec<Hypothesis> = self.slots.drain(..).flatten().collect();
        self.clear();
        sort_best_first(&mut members);
        members
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.slots.clear();
        self.free.clear();
        self.by_signature.clear();
    }
}
