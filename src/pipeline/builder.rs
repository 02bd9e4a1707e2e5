use crate::config::DecoderConfig;
use crate::decoding::driver::SearchParams;
use crate::decoding::ranges::RangeEnumerator;
use crate::error::DecodeError;
use crate::pipeline::runtime::{HarmonyDecoder, HarmonyDecoderParts, KeySource};
use crate::pipeline::traits::{ChangeProbabilityModel, KeyScorer, SegmentLabelModel};

/// Assembles a [`HarmonyDecoder`]. Collaborators left unset are built per
/// input from the curves and posteriors carried by [`crate::DecodeInput`].
pub struct HarmonyDecoderBuilder {
    config: DecoderConfig,
    change_model: Option<Box<dyn ChangeProbabilityModel>>,
    label_model: Option<Box<dyn SegmentLabelModel>>,
    keys: KeySource,
}

impl HarmonyDecoderBuilder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            change_model: None,
            label_model: None,
            keys: KeySource::FromInput,
        }
    }

    pub fn with_change_model(mut self, change_model: Box<dyn ChangeProbabilityModel>) -> Self {
        self.change_model = Some(change_model);
        self
    }

    pub fn with_label_model(mut self, label_model: Box<dyn SegmentLabelModel>) -> Self {
        self.label_model = Some(label_model);
        self
    }

    pub fn with_key_scorer(mut self, key_scorer: Box<dyn KeyScorer>) -> Self {
        self.keys = KeySource::Fixed(key_scorer);
        self
    }

    /// Decode chords only, ignoring any key posteriors in the input.
    pub fn without_keys(mut self) -> Self {
        self.keys = KeySource::Disabled;
        self
    }

    pub fn build(self) -> Result<HarmonyDecoder, DecodeError> {
        self.config.validate()?;
        let enumerator = RangeEnumerator::from_config(&self.config)?;
        let params = SearchParams::from_config(&self.config);
        tracing::debug!(
            beam_size = params.beam_size,
            signature_length = ?params.signature_length,
            custom_change_model = self.change_model.is_some(),
            custom_label_model = self.label_model.is_some(),
            "decoder: built"
        );

        Ok(HarmonyDecoder::from_parts(HarmonyDecoderParts {
            config: self.config,
            enumerator,
            params,
            change_model: self.change_model,
            label_model: self.label_model,
            keys: self.keys,
        }))
    }
}
