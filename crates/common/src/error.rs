//! Error types for LUTNet layers.
//!
//! ```text
//! LutError
//! ├── ConfigError   (construction-time validation, pruning-mask updates)
//! ├── ShapeMismatch (forward-time input checks)
//! └── candle_core::Error (tensor runtime)
//! ```

use thiserror::Error;

/// Convenient `Result` alias for layer construction and evaluation.
pub type LutResult<T> = Result<T, LutError>;

/// Top-level error for layer construction and forward evaluation.
#[derive(Debug, Error)]
pub enum LutError {
    /// The layer configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A forward input does not match the configured layout.
    #[error("shape mismatch: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        /// Expected layout, e.g. `(2, batch, 64)`.
        expected: String,
        /// Actual dimensions of the offending tensor.
        actual: Vec<usize>,
    },

    /// The tensor runtime rejected an operation.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// A layer configuration or mutable layer state failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Only one- and two-level residual binarization exist.
    #[error("unsupported residual level count {0} (expected 1 or 2)")]
    UnsupportedLevels(usize),

    /// A size, factor, stride or kernel side is zero.
    #[error("`{0}` must be non-zero")]
    ZeroSized(&'static str),

    /// A tiling factor does not evenly divide its axis.
    #[error("{axis} = {size} is not divisible by tiling factor {factor}")]
    NotDivisible {
        axis: &'static str,
        size: usize,
        factor: usize,
    },

    /// A dense config was handed to a convolution layer or vice versa.
    #[error("layer kind mismatch: {0}")]
    WrongLayerKind(&'static str),

    /// A pruning mask has the wrong shape or non-binary entries.
    #[error("invalid pruning mask: {0}")]
    InvalidMask(String),
}
