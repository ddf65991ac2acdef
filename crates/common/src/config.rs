//! Layer configuration for LUTNet layers.
//!
//! Serialised as JSON so calling code can keep layer definitions next to
//! trained parameters. Optional fields fall back to `#[serde(default)]`
//! values, so a JSON with only the sizes produces a working LUT layer.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Spatial padding mode for convolution layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// No padding; the output shrinks by `kernel - 1` per axis (before stride).
    #[default]
    Valid,
    /// Zero padding so that `out = ceil(in / stride)`.
    Same,
}

/// Spatial geometry of a convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    /// Square kernel side `k`.
    pub kernel_size: usize,
    /// `(row, column)` stride.
    #[serde(default = "default_stride")]
    pub stride: (usize, usize),
    #[serde(default)]
    pub padding: Padding,
}

fn default_stride() -> (usize, usize) {
    (1, 1)
}

impl ConvGeometry {
    pub fn new(kernel_size: usize, padding: Padding) -> Self {
        Self {
            kernel_size,
            stride: default_stride(),
            padding,
        }
    }
}

/// Resolved evaluation path of a layer, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    /// `γ · sign(W)` multiply.
    PlainBinary,
    /// `γ · clip(W, -1, 1)` multiply.
    PlainClipped,
    /// 4-input LUT emulation with binarized mask tiles.
    LutBinary,
    /// 4-input LUT emulation with clipped mask tiles.
    LutClipped,
}

impl KernelKind {
    pub fn is_lut(self) -> bool {
        matches!(self, Self::LutBinary | Self::LutClipped)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::PlainBinary | Self::LutBinary)
    }
}

/// Configuration of one binarized dense or convolution layer.
///
/// Dense layers leave `conv` empty; convolution layers read `in_features`
/// and `out_features` as input/output channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    // ── Sizes ───────────────────────────────────────────────────────────────
    /// Input features (dense) or input channels (convolution).
    pub in_features: usize,
    /// Output features (dense) or filters (convolution).
    pub out_features: usize,
    /// Present for convolution layers only.
    #[serde(default)]
    pub conv: Option<ConvGeometry>,

    // ── Residual binarization ───────────────────────────────────────────────
    /// Binary levels carried by the incoming activations (1 or 2).
    #[serde(default = "default_levels")]
    pub levels: usize,

    // ── Tiling ──────────────────────────────────────────────────────────────
    /// Tiling factor along the input axis.
    #[serde(default = "default_tiling")]
    pub tm: usize,
    /// Tiling factor along the output axis.
    #[serde(default = "default_tiling")]
    pub tn: usize,

    // ── Architecture switches ───────────────────────────────────────────────
    /// The first layer sees fixed-point activations and always takes the
    /// plain path.
    #[serde(default)]
    pub first_layer: bool,
    /// Emulate 4-input LUTs instead of XNOR multiply-accumulate.
    #[serde(default = "default_true")]
    pub use_lut: bool,
    /// Binarize weights/masks (`sign`) instead of clipping them to [-1, 1].
    #[serde(default = "default_true")]
    pub binary_weights: bool,

    /// Seed for the randomisation maps.
    #[serde(default)]
    pub seed: u64,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_levels() -> usize {
    2
}
fn default_tiling() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            in_features: 64,
            out_features: 64,
            conv: None,
            levels: 2,
            tm: 1,
            tn: 1,
            first_layer: false,
            use_lut: true,
            binary_weights: true,
            seed: 0,
        }
    }
}

impl LayerConfig {
    /// Dense layer with every switch at its default.
    pub fn dense(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            ..Default::default()
        }
    }

    /// Convolution layer with every switch at its default.
    pub fn conv(in_channels: usize, filters: usize, geometry: ConvGeometry) -> Self {
        Self {
            in_features: in_channels,
            out_features: filters,
            conv: Some(geometry),
            ..Default::default()
        }
    }

    /// Kernel side, `1` for dense layers.
    pub fn kernel_size(&self) -> usize {
        self.conv.map(|c| c.kernel_size).unwrap_or(1)
    }

    /// Length of one unrolled input window (`k·k·in`).
    pub fn window(&self) -> usize {
        let k = self.kernel_size();
        k * k * self.in_features
    }

    /// Whether incoming activations carry a leading axis of two levels.
    pub fn stacked_input(&self) -> bool {
        self.levels == 2 && !self.first_layer
    }

    /// Check every invariant the layers rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.levels) {
            return Err(ConfigError::UnsupportedLevels(self.levels));
        }
        for (name, value) in [
            ("in_features", self.in_features),
            ("out_features", self.out_features),
            ("tm", self.tm),
            ("tn", self.tn),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSized(name));
            }
        }
        if let Some(conv) = &self.conv {
            if conv.kernel_size == 0 {
                return Err(ConfigError::ZeroSized("kernel_size"));
            }
            if conv.stride.0 == 0 || conv.stride.1 == 0 {
                return Err(ConfigError::ZeroSized("stride"));
            }
        }
        if self.in_features % self.tm != 0 {
            return Err(ConfigError::NotDivisible {
                axis: "in_features",
                size: self.in_features,
                factor: self.tm,
            });
        }
        if self.out_features % self.tn != 0 {
            return Err(ConfigError::NotDivisible {
                axis: "out_features",
                size: self.out_features,
                factor: self.tn,
            });
        }
        Ok(())
    }

    /// Resolve the evaluation path (priority: first layer > levels > LUT flag).
    pub fn kernel_kind(&self) -> KernelKind {
        let lut = self.use_lut && self.levels == 2 && !self.first_layer;
        match (lut, self.binary_weights) {
            (true, true) => KernelKind::LutBinary,
            (true, false) => KernelKind::LutClipped,
            (false, true) => KernelKind::PlainBinary,
            (false, false) => KernelKind::PlainClipped,
        }
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file and validate it.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
