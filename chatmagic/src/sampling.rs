//! Generation parameters

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Per-call generation parameters.
///
/// An immutable value supplied with every generation call. The crate keeps no
/// defaults of its own; the caller owns whichever defaults are active (e.g.
/// the `generation_parameters` block of a model bundle).
///
/// Field names deserialize from the camelCase keys used by the remote
/// configuration (`doSample`, `topK`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    /// Sample from the processed distribution; `false` means greedy argmax.
    pub do_sample: bool,
    /// Logit divisor. Must be > 0.
    pub temperature: f32,
    /// Candidates kept after mean narrowing; 0 disables the top-k stage.
    pub top_k: usize,
    /// Nucleus probability mass in (0, 1].
    pub top_p: f32,
    /// Penalty for already-seen tokens. Must be > 0; 1.0 disables it.
    pub repetition_penalty: f32,
    /// Maximum number of new tokens. Must be > 0.
    pub max_new_tokens: usize,
}

impl GenerationParameters {
    /// Greedy decoding with the given token cap.
    #[must_use]
    pub fn greedy(max_new_tokens: usize) -> Self {
        Self {
            do_sample: false,
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            max_new_tokens,
        }
    }

    /// Check the parameters at the API boundary.
    ///
    /// The logits processor divides by `temperature` unconditionally, so a
    /// zero or negative value must be rejected here rather than producing
    /// NaN scores mid-generation.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(Error::InvalidParameters(
                "maxNewTokens must be greater than 0".into(),
            ));
        }
        if !self.do_sample {
            return Ok(());
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(Error::InvalidParameters(format!(
                "temperature must be a finite value > 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(Error::InvalidParameters(format!(
                "topP must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if !(self.repetition_penalty.is_finite() && self.repetition_penalty > 0.0) {
            return Err(Error::InvalidParameters(format!(
                "repetitionPenalty must be a finite value > 0, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}
