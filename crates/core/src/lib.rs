//! # lutnet-core: Binarized and LUT-emulating layers
//!
//! Every compute primitive needed to train a LUTNet layer stack lives in
//! this crate:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`quantize`] | STE binarizer, clipping, indicator helpers |
//! | [`residual`] | `ResidualSign` (L ∈ {1, 2}) and coefficient calibration |
//! | [`randmap`] | Seeded randomisation maps for the secondary LUT inputs |
//! | [`tiling`] | `TileGeometry` (tile ⇄ full expansion), `PruningMask` |
//! | [`lut`] | 4-input Lagrangian LUT kernel over 32 mask tiles |
//! | [`kernel`] | `LayerCore`: kernel variant, gamma, mask, maps, weight cache |
//! | [`dense`] / [`conv`] / [`flatten`] | Layer adapters |
//! | [`stats`] | `layer_stats`: parameter and LUT accounting |
//!
//! ## Design principles
//!
//! 1. **Pure Rust hot path.** Everything goes through `candle-core`/`candle-nn`,
//!    so the same layers run on CPU, CUDA and Metal.
//! 2. **`Send + Sync`-safe.** Weight and shape caches use `parking_lot::Mutex`.
//! 3. **Deterministic.** Randomisation maps come from the layer seed; forward
//!    is a pure function of inputs and parameters.

pub mod conv;
pub mod dense;
pub mod flatten;
pub mod kernel;
pub mod lut;
pub mod quantize;
pub mod randmap;
pub mod residual;
pub mod stats;
pub mod tiling;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use conv::{extract_patches, BinaryConv2d};
pub use dense::BinaryDense;
pub use flatten::Flatten;
pub use kernel::{EffectiveWeights, LayerCore, LayerKernel, LutWeights};
pub use lut::{LUT_INPUTS, LUT_ROWS, MASK_COUNT};
pub use quantize::{binarize, clip_unit, hard_sign};
pub use randmap::{RandomisationMap, RandomisationMaps, SECONDARY_INPUTS};
pub use residual::ResidualSign;
pub use stats::{layer_stats, LayerStats};
pub use tiling::{PruningMask, TileGeometry};
