pub mod config;
pub mod decoding;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::DecoderConfig;
pub use decoding::{CancelFlag, Label};
pub use error::DecodeError;
pub use pipeline::builder::HarmonyDecoderBuilder;
pub use pipeline::runtime::{HarmonyDecoder, KeySource};
pub use pipeline::traits::{ChangeProbabilityModel, KeyScorer, SegmentLabelModel};
pub use types::{DecodeInput, DecodeOutcome, DecodeReport, HarmonyLabels, LabeledSpan};
