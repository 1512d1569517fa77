//! Model trait for the network step function
//!
//! The network itself (architecture, weights, execution backend) lives
//! outside this crate. The Generator only needs a step function that maps
//! input ids plus the cached per-layer state to logits plus a new cache.

use serde::Deserialize;

use crate::tensor::{HostTensor, Tensor};
use crate::{Error, Result};

/// Sequence length of the placeholder past state fed to the first step.
pub const EMPTY_PAST_SEQ_LEN: usize = 1;

/// Shape parameters fixed at model load.
///
/// Used to size the empty cache handed to the first inference step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ModelRuntimeConfig {
    /// Number of attention heads
    pub num_attention_heads: usize,
    /// Number of transformer layers (one cache entry per layer)
    pub num_hidden_layers: usize,
    /// Hidden dimension size
    pub hidden_size: usize,
}

impl ModelRuntimeConfig {
    /// Check the shape parameters are usable.
    ///
    /// # Errors
    /// Returns a configuration error if a count is zero or the hidden size is
    /// not a multiple of the head count.
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 {
            return Err(Error::Configuration(
                "num_attention_heads must be non-zero".into(),
            ));
        }
        if self.num_hidden_layers == 0 {
            return Err(Error::Configuration(
                "num_hidden_layers must be non-zero".into(),
            ));
        }
        if self.hidden_size == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Configuration(format!(
                "hidden_size {} is not a positive multiple of num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        Ok(())
    }

    /// Get the head dimension
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Shape of one layer's empty past state:
    /// `(2, batch=1, num_heads, EMPTY_PAST_SEQ_LEN, head_dim)`.
    #[must_use]
    pub fn empty_cache_shape(&self) -> [usize; 5] {
        [
            2,
            1,
            self.num_attention_heads,
            EMPTY_PAST_SEQ_LEN,
            self.head_dim(),
        ]
    }
}

/// Output of one network step.
pub struct StepOutput<C> {
    /// Logits of shape (`seq_len`, `vocab_size`)
    pub logits: HostTensor,
    /// New per-layer cache; ownership passes to the caller.
    pub past: Vec<C>,
}

impl<C> StepOutput<C> {
    /// Score vector for the final input position.
    ///
    /// # Errors
    /// Returns a generation error if the logits are not a non-empty
    /// (`seq_len`, `vocab_size`) tensor.
    pub fn next_token_scores(&self) -> Result<&[f32]> {
        if self.logits.ndim() == 0 {
            return Err(Error::Generation("network returned scalar logits".into()));
        }
        self.logits
            .last_row()
            .ok_or_else(|| Error::Generation("network returned empty logits".into()))
    }
}

/// Trait for networks that can be driven by the Generator.
///
/// `Cache` is the backend's per-layer state handle. It is released by
/// `Drop`, so the Generator controls every buffer's lifetime by owning the
/// values: an entry lives exactly as long as the step that still needs it.
///
/// Implementations are expected to be deterministic given identical inputs
/// and cache.
pub trait Model {
    /// Per-layer cached state (e.g. a native key/value tensor).
    type Cache;

    /// Shape parameters for allocating the initial cache.
    fn config(&self) -> ModelRuntimeConfig;

    /// Allocate a zero-filled cache entry of the given shape.
    ///
    /// # Errors
    /// Returns an error if the backend cannot allocate the buffer.
    fn zeroed_cache(&self, shape: &[usize]) -> Result<Self::Cache>;

    /// Run one forward step.
    ///
    /// # Arguments
    /// * `input_ids` - Token ids for this step (the whole prompt on the first
    ///   step, then a single id)
    /// * `past` - One cache entry per hidden layer
    ///
    /// # Errors
    /// Returns an error if the forward pass fails. The Generator reports any
    /// variant other than [`Error::Generation`] wrapped in a generation error.
    fn step(&self, input_ids: &[u32], past: &[Self::Cache]) -> Result<StepOutput<Self::Cache>>;
}

impl<M: Model + ?Sized> Model for &M {
    type Cache = M::Cache;

    fn config(&self) -> ModelRuntimeConfig {
        (**self).config()
    }

    fn zeroed_cache(&self, shape: &[usize]) -> Result<Self::Cache> {
        (**self).zeroed_cache(shape)
    }

    fn step(&self, input_ids: &[u32], past: &[Self::Cache]) -> Result<StepOutput<Self::Cache>> {
        (**self).step(input_ids, past)
    }
}
