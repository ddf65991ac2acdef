//! Shared layer state and the window-level evaluation kernel.
//!
//! [`LayerCore`] owns everything a dense or convolution layer needs once
//! activations have been unrolled into `(rows, window)` matrices: the
//! trainable tiles, gamma, the pruning mask, the randomisation maps and an
//! optional cache of effective weights. The adapters in [`crate::dense`] and
//! [`crate::conv`] only reshape.
//!
//! # Thread safety
//!
//! The effective-weight cache uses [`parking_lot::Mutex`], so layers are
//! `Send + Sync` and can be evaluated from several threads.

use parking_lot::Mutex;

use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};

use lutnet_common::{KernelKind, LayerConfig, LutError, LutResult};

use crate::lut::{self, MASK_COUNT};
use crate::quantize::{binarize, clip_unit, debug_sign_distribution};
use crate::randmap::RandomisationMaps;
use crate::tiling::{PruningMask, TileGeometry};

// ── Parameter sets ──────────────────────────────────────────────────────────

/// Trainable tiles of the LUT path.
pub struct LutWeights {
    /// `c1..c32`, tile-shaped.
    pub masks: Vec<Tensor>,
    /// Weight-select tile.
    pub w_select: Tensor,
}

/// Parameters of the resolved evaluation path.
pub enum LayerKernel {
    PlainBinary(Tensor),
    PlainClipped(Tensor),
    LutBinary(LutWeights),
    LutClipped(LutWeights),
}

impl LayerKernel {
    fn new(kind: KernelKind, geometry: &TileGeometry, vb: &VarBuilder) -> Result<Self> {
        let init = Init::Randn {
            mean: 0.,
            stdev: 1.0 / (geometry.window() as f64).sqrt(),
        };
        let dims = geometry.tile_dims();
        let lut = |vb: &VarBuilder| -> Result<LutWeights> {
            let masks = (0..MASK_COUNT)
                .map(|k| vb.get_with_hints(dims.as_slice(), &format!("c.{k}"), init))
                .collect::<Result<Vec<_>>>()?;
            let w_select = vb.get_with_hints(dims.as_slice(), "w1", init)?;
            Ok(LutWeights { masks, w_select })
        };
        Ok(match kind {
            KernelKind::PlainBinary => Self::PlainBinary(vb.get_with_hints(dims.as_slice(), "w", init)?),
            KernelKind::PlainClipped => Self::PlainClipped(vb.get_with_hints(dims.as_slice(), "w", init)?),
            KernelKind::LutBinary => Self::LutBinary(lut(vb)?),
            KernelKind::LutClipped => Self::LutClipped(lut(vb)?),
        })
    }

    pub fn kind(&self) -> KernelKind {
        match self {
            Self::PlainBinary(_) => KernelKind::PlainBinary,
            Self::PlainClipped(_) => KernelKind::PlainClipped,
            Self::LutBinary(_) => KernelKind::LutBinary,
            Self::LutClipped(_) => KernelKind::LutClipped,
        }
    }
}

/// Weight quantiser of a kernel kind.
fn quantise(kind: KernelKind, w: &Tensor) -> Result<Tensor> {
    if kind.is_binary() {
        binarize(w)
    } else {
        clip_unit(w)
    }
}

/// Weights ready to multiply against unrolled windows.
#[derive(Clone)]
pub enum EffectiveWeights {
    /// `(window, out)`.
    Plain(Tensor),
    /// One `(window, out)` table per truth-table row.
    Lut(Vec<Tensor>),
}

// ── LayerCore ───────────────────────────────────────────────────────────────

pub struct LayerCore {
    config: LayerConfig,
    geometry: TileGeometry,
    kernel: LayerKernel,
    /// Per-layer output scale (scalar, used as `|γ|`).
    gamma: Tensor,
    pruning: PruningMask,
    maps: RandomisationMaps,
    cache: Mutex<Option<EffectiveWeights>>,
}

impl LayerCore {
    /// Validate `config` and allocate tiles, gamma, mask and maps. `vb`
    /// should be scoped to the layer prefix (e.g. `vb.pp("conv1")`).
    pub fn new(config: &LayerConfig, vb: VarBuilder) -> LutResult<Self> {
        config.validate()?;
        let geometry = TileGeometry::from_config(config)?;
        let kind = config.kernel_kind();
        if config.use_lut && !kind.is_lut() {
            if config.first_layer {
                tracing::warn!("first layer receives fixed-point input; LUT emulation disabled");
            } else {
                tracing::warn!("single-level input; LUT emulation disabled");
            }
        }

        let kernel = LayerKernel::new(kind, &geometry, &vb)?;
        let gamma = vb.get_with_hints((), "gamma", Init::Const(1.0))?;
        let pruning = PruningMask::ones(&geometry, vb.dtype(), vb.device())?;
        let maps = RandomisationMaps::generate(
            geometry.tile_window(),
            geometry.window(),
            config.seed,
            vb.device(),
        )?;

        tracing::debug!(
            ?kind,
            tile = ?geometry.tile_dims(),
            window = geometry.window(),
            "built layer"
        );

        Ok(Self {
            config: config.clone(),
            geometry,
            kernel,
            gamma,
            pruning,
            maps,
            cache: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn kind(&self) -> KernelKind {
        self.kernel.kind()
    }

    pub fn kernel(&self) -> &LayerKernel {
        &self.kernel
    }

    pub fn maps(&self) -> &RandomisationMaps {
        &self.maps
    }

    pub fn pruning_mask(&self) -> &PruningMask {
        &self.pruning
    }

    /// Replace the pruning mask (tile-shaped, 0/1, any float dtype). Drops
    /// cached weights.
    pub fn set_pruning_mask(&mut self, mask: &Tensor) -> LutResult<()> {
        let (dtype, device) = (self.gamma.dtype(), self.gamma.device());
        self.pruning = PruningMask::new(&self.geometry, mask, dtype, device)?;
        self.cache.get_mut().take();
        tracing::debug!(density = ?self.pruning.density().ok(), "pruning mask updated");
        Ok(())
    }

    /// Expand, quantise, scale and prune the current parameters.
    pub fn effective_weights(&self) -> Result<EffectiveWeights> {
        let kind = self.kind();
        let gamma = self.gamma.abs()?;
        let mask = self.pruning.expand(&self.geometry)?;
        let scaled = |tile: &Tensor| -> Result<Tensor> {
            let full = quantise(kind, &self.geometry.expand(tile)?)?;
            (full.broadcast_mul(&gamma)? * &mask)
        };
        match &self.kernel {
            LayerKernel::PlainBinary(w) | LayerKernel::PlainClipped(w) => {
                Ok(EffectiveWeights::Plain(scaled(w)?))
            }
            LayerKernel::LutBinary(p) | LayerKernel::LutClipped(p) => {
                let masks = p.masks.iter().map(scaled).collect::<Result<Vec<_>>>()?;
                let w_select = quantise(kind, &self.geometry.expand(&p.w_select)?)?;
                Ok(EffectiveWeights::Lut(lut::row_tables(&masks, &w_select)?))
            }
        }
    }

    /// Pre-compute effective weights for inference (no gradient tracking).
    pub fn cache_effective_weights(&self) -> Result<()> {
        let weights = match self.effective_weights()? {
            EffectiveWeights::Plain(w) => EffectiveWeights::Plain(w.detach()),
            EffectiveWeights::Lut(t) => EffectiveWeights::Lut(t.iter().map(|t| t.detach()).collect()),
        };
        self.cache.lock().replace(weights);
        Ok(())
    }

    /// Clear the inference cache (call before training resumes).
    pub fn clear_cache(&self) {
        self.cache.lock().take();
    }

    /// Evaluate unrolled windows, one `(rows, window)` tensor per level.
    ///
    /// The plain path sums the levels and multiplies once; the LUT path
    /// evaluates each level against the row tables.
    pub fn evaluate(&self, levels: &[Tensor]) -> Result<Tensor> {
        let cached = self.cache.lock().clone();
        let weights = match cached {
            Some(w) => w,
            None => self.effective_weights()?,
        };
        match weights {
            EffectiveWeights::Plain(w) => {
                let mut x = levels
                    .first()
                    .cloned()
                    .ok_or_else(|| candle_core::Error::Msg("no input levels".into()))?;
                for level in &levels[1..] {
                    x = (x + level)?;
                }
                x.matmul(&w)
            }
            EffectiveWeights::Lut(tables) => lut::evaluate(levels, &self.maps.expanded, &tables),
        }
    }

    /// Split `x` into per-level tensors, checking the non-batch dims.
    ///
    /// Stacked input: `(2, batch, ..inner)`; otherwise `(batch, ..inner)`.
    pub fn split_levels(&self, x: &Tensor, inner: &[usize]) -> LutResult<Vec<Tensor>> {
        let stacked = self.config.stacked_input();
        let lead = if stacked { 2 } else { 1 };
        let dims = x.dims();
        let fits = dims.len() == lead + inner.len()
            && (!stacked || dims[0] == 2)
            && dims[lead..] == *inner;
        if !fits {
            let inner_str: Vec<String> = inner.iter().map(|d| d.to_string()).collect();
            let prefix = if stacked { "2, batch" } else { "batch" };
            return Err(LutError::ShapeMismatch {
                expected: format!("({prefix}, {})", inner_str.join(", ")),
                actual: dims.to_vec(),
            });
        }
        if stacked {
            Ok(vec![x.get(0)?, x.get(1)?])
        } else {
            Ok(vec![x.clone()])
        }
    }

    /// Human-readable ±1 distribution of the quantised tiles.
    pub fn debug_weight_distribution(&self) -> Result<String> {
        let kind = self.kind();
        match &self.kernel {
            LayerKernel::PlainBinary(w) | LayerKernel::PlainClipped(w) => {
                let (neg, pos) = debug_sign_distribution(&quantise(kind, w)?)?;
                Ok(format!("{kind:?} w -1:{neg} +1:{pos}"))
            }
            LayerKernel::LutBinary(p) | LayerKernel::LutClipped(p) => {
                let (mut neg, mut pos) = (0u64, 0u64);
                for m in &p.masks {
                    let (n, q) = debug_sign_distribution(&quantise(kind, m)?)?;
                    neg += n;
                    pos += q;
                }
                let (wn, wp) = debug_sign_distribution(&quantise(kind, &p.w_select)?)?;
                Ok(format!("{kind:?} masks -1:{neg} +1:{pos} w1 -1:{wn} +1:{wp}"))
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
