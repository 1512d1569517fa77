//! Host tensor used for network logits and host-resident cache entries

use crate::{Error, Result};

/// Minimal tensor interface shared by host and backend buffers
pub trait Tensor {
    /// Returns the shape of the tensor as a slice of dimensions
    fn shape(&self) -> &[usize];

    /// Returns the number of dimensions (rank) of the tensor
    fn ndim(&self) -> usize {
        self.shape().len()
    }
}

/// A contiguous f32 tensor in host memory.
///
/// Dropping the tensor frees its buffer, so a `Vec<HostTensor>` can be used
/// directly as a per-layer cache.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl HostTensor {
    /// Create a tensor from its shape and row-major data.
    ///
    /// # Errors
    /// Returns an error if `data.len()` does not match the shape.
    pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(Error::Generation(format!(
                "tensor data length {} does not match shape {shape:?} ({numel} elements)",
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Create a zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        let numel = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; numel],
        }
    }

    /// The innermost row at `index` over the leading dimensions.
    ///
    /// For a `(seq_len, vocab_size)` logits tensor this is the score vector of
    /// position `index`.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let width = *self.shape.last()?;
        if width == 0 {
            return None;
        }
        let start = index.checked_mul(width)?;
        self.data.get(start..start + width)
    }

    /// The last innermost row, i.e. the final sequence position.
    #[must_use]
    pub fn last_row(&self) -> Option<&[f32]> {
        let width = *self.shape.last()?;
        if width == 0 || self.data.is_empty() {
            return None;
        }
        self.row(self.data.len() / width - 1)
    }
}

impl Tensor for HostTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }
}
