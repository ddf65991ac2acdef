//! Parameter accounting: tile storage versus the expanded layer it stands for.

use lutnet_common::LayerConfig;

use crate::lut::MASK_COUNT;

/// Parameter accounting of one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStats {
    /// Stored trainable values: tiles plus gamma.
    pub trainable_params: usize,
    /// Physical LUTs (one per tile element); zero on the plain path.
    pub lut_count: usize,
    /// Values a dense, untiled layer of the same shape would store.
    pub expanded_params: usize,
    /// How many times each tile is reused (`TM·TN`).
    pub sharing_ratio: usize,
}

/// Compute parameter counts from the config alone.
///
/// No layer instance needed. The residual coefficients belong to the
/// activation stage and are not counted.
pub fn layer_stats(config: &LayerConfig) -> LayerStats {
    let k = config.kernel_size();
    let tm = config.tm.max(1);
    let tn = config.tn.max(1);
    let tile = k * k * (config.in_features / tm) * (config.out_features / tn);
    let kind = config.kernel_kind();

    let (tiles, lut_count) = if kind.is_lut() {
        // 32 masks + the weight-select tile
        (MASK_COUNT + 1, tile)
    } else {
        (1, 0)
    };
    let expanded = config.window() * config.out_features;

    LayerStats {
        trainable_params: tiles * tile + 1,
        lut_count,
        expanded_params: tiles * expanded,
        sharing_ratio: tm * tn,
    }
}
