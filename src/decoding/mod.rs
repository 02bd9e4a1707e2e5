pub mod beam;
pub mod driver;
pub mod hypothesis;
pub mod naive;
pub mod ranges;
pub mod timeline;

pub use driver::{BeamSearch, CancelFlag, SearchOutcome, SearchParams};
pub use hypothesis::{Hypothesis, HypothesisGraph, Label, StepLogProb};
pub use naive::naive_frame_labels;
pub use ranges::{Range, RangeEnumerator};
pub use timeline::Timeline;
