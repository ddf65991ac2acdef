//! Dense adapter: feature vectors are already unrolled windows.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use lutnet_common::{ConfigError, LayerConfig, LutResult};

use crate::kernel::LayerCore;

/// Binarized / LUT dense layer.
///
/// Input: `(batch, in)` or, for two-level layers, `(2, batch, in)`.
/// Output: `(batch, out)`.
pub struct BinaryDense {
    core: LayerCore,
}

impl BinaryDense {
    pub fn new(config: &LayerConfig, vb: VarBuilder) -> LutResult<Self> {
        if config.conv.is_some() {
            return Err(ConfigError::WrongLayerKind("dense layer given a convolution geometry").into());
        }
        Ok(Self {
            core: LayerCore::new(config, vb)?,
        })
    }

    pub fn core(&self) -> &LayerCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    pub fn forward(&self, x: &Tensor) -> LutResult<Tensor> {
        let levels = self.core.split_levels(x, &[self.core.config().in_features])?;
        Ok(self.core.evaluate(&levels)?)
    }

    /// Pre-compute effective weights for inference.
    pub fn cache_effective_weights(&self) -> Result<()> {
        self.core.cache_effective_weights()
    }

    pub fn clear_cache(&self) {
        self.core.clear_cache()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
