//! Tiling and pruning: one physical tile of weights, replicated `TM` times
//! along the input axis and `TN` times along the output axis.
//!
//! Tiles keep the natural parameter layout (`(in/TM, out/TN)` for dense,
//! `(k, k, in/TM, out/TN)` for convolution). [`TileGeometry::expand`]
//! replicates a tile and flattens it into the `(window, out)` matrix the
//! evaluation kernels multiply against, with window index
//! `(kh·k + kw)·in + c`.

use candle_core::{DType, Device, Result, Tensor};

use lutnet_common::{ConfigError, LayerConfig};

/// Shape bookkeeping for one layer's tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    /// Kernel side; `None` for dense layers.
    kernel: Option<usize>,
    in_features: usize,
    out_features: usize,
    tm: usize,
    tn: usize,
}

impl TileGeometry {
    /// Validates divisibility; never truncates.
    pub fn new(
        kernel: Option<usize>,
        in_features: usize,
        out_features: usize,
        tm: usize,
        tn: usize,
    ) -> std::result::Result<Self, ConfigError> {
        if tm == 0 || tn == 0 {
            return Err(ConfigError::ZeroSized(if tm == 0 { "tm" } else { "tn" }));
        }
        if in_features % tm != 0 {
            return Err(ConfigError::NotDivisible {
                axis: "in_features",
                size: in_features,
                factor: tm,
            });
        }
        if out_features % tn != 0 {
            return Err(ConfigError::NotDivisible {
                axis: "out_features",
                size: out_features,
                factor: tn,
            });
        }
        Ok(Self {
            kernel,
            in_features,
            out_features,
            tm,
            tn,
        })
    }

    pub fn from_config(config: &LayerConfig) -> std::result::Result<Self, ConfigError> {
        Self::new(
            config.conv.map(|c| c.kernel_size),
            config.in_features,
            config.out_features,
            config.tm,
            config.tn,
        )
    }

    /// `(in/TM, out/TN)` or `(k, k, in/TM, out/TN)`.
    pub fn tile_dims(&self) -> Vec<usize> {
        let (ti, to) = (self.in_features / self.tm, self.out_features / self.tn);
        match self.kernel {
            Some(k) => vec![k, k, ti, to],
            None => vec![ti, to],
        }
    }

    pub fn tile_len(&self) -> usize {
        self.tile_dims().iter().product()
    }

    /// Input window of one tile: `k·k·in/TM`.
    pub fn tile_window(&self) -> usize {
        self.window() / self.tm
    }

    /// Full input window: `k·k·in`.
    pub fn window(&self) -> usize {
        let k = self.kernel.unwrap_or(1);
        k * k * self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn factors(&self) -> (usize, usize) {
        (self.tm, self.tn)
    }

    /// Replicate `tile` along both tiled axes and flatten to `(window, out)`.
    pub fn expand(&self, tile: &Tensor) -> Result<Tensor> {
        let dims = self.tile_dims();
        if tile.dims() != dims.as_slice() {
            candle_core::bail!("tile has shape {:?}, expected {:?}", tile.dims(), dims);
        }
        let mut reps = vec![1usize; dims.len() - 2];
        reps.extend([self.tm, self.tn]);
        tile.repeat(reps)?.reshape((self.window(), self.out_features))
    }
}

/// Binary (0/1) tile-shaped multiplier applied to every expanded weight.
#[derive(Debug, Clone)]
pub struct PruningMask {
    mask: Tensor,
}

impl PruningMask {
    /// All-ones mask: nothing pruned.
    pub fn ones(geometry: &TileGeometry, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            mask: Tensor::ones(geometry.tile_dims(), dtype, device)?,
        })
    }

    /// Validate shape and 0/1 entries, then move the mask to the layer's
    /// `dtype` and `device`.
    pub fn new(
        geometry: &TileGeometry,
        mask: &Tensor,
        dtype: DType,
        device: &Device,
    ) -> std::result::Result<Self, ConfigError> {
        let dims = geometry.tile_dims();
        if mask.dims() != dims.as_slice() {
            return Err(ConfigError::InvalidMask(format!(
                "shape {:?} does not match tile {:?}",
                mask.dims(),
                dims
            )));
        }
        let invalid = |e: candle_core::Error| ConfigError::InvalidMask(e.to_string());
        let values = mask
            .flatten_all()
            .and_then(|m| m.to_dtype(DType::F32))
            .and_then(|m| m.to_vec1::<f32>())
            .map_err(invalid)?;
        if let Some(v) = values.iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(ConfigError::InvalidMask(format!("entry {v} is not 0 or 1")));
        }
        let mask = mask
            .detach()
            .to_dtype(dtype)
            .and_then(|m| m.to_device(device))
            .map_err(invalid)?;
        Ok(Self { mask })
    }

    pub fn tensor(&self) -> &Tensor {
        &self.mask
    }

    /// Fraction of tile positions that are kept.
    pub fn density(&self) -> Result<f32> {
        self.mask.to_dtype(DType::F32)?.mean_all()?.to_scalar::<f32>()
    }

    /// Expanded `(window, out)` mask.
    pub fn expand(&self, geometry: &TileGeometry) -> Result<Tensor> {
        geometry.expand(&self.mask)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
