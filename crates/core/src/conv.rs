//! Convolution adapter: im2col patch extraction, then the dense kernel on
//! the unrolled windows.
//!
//! Activations are channels-last: `(batch, height, width, channels)`.
//! Windows are laid out `(kh, kw, c)`, matching [`crate::tiling`].

use parking_lot::Mutex;

use candle_core::{Device, Result, Tensor};
use candle_nn::VarBuilder;

use lutnet_common::{ConfigError, ConvGeometry, LayerConfig, LutError, LutResult, Padding};

use crate::kernel::LayerCore;

// ── Patch extraction ────────────────────────────────────────────────────────

/// Output extent and leading pad along one spatial axis, `None` for an
/// empty axis.
///
/// * `Valid`: `out = (n - k) / s + 1`, no padding (`None` if `n < k`).
/// * `Same`: `out = ceil(n / s)`, total pad `max((out-1)·s + k - n, 0)`
///   split with the smaller half in front.
pub fn output_extent(n: usize, k: usize, stride: usize, padding: Padding) -> Option<(usize, usize, usize)> {
    if n == 0 {
        return None;
    }
    match padding {
        Padding::Valid => (n >= k).then(|| ((n - k) / stride + 1, 0, 0)),
        Padding::Same => {
            let out = n.div_ceil(stride);
            let total = ((out - 1) * stride + k).saturating_sub(n);
            Some((out, total / 2, total - total / 2))
        }
    }
}

fn positions(out: usize, stride: usize, offset: usize, device: &Device) -> Result<Tensor> {
    let idx: Vec<u32> = (0..out).map(|i| (i * stride + offset) as u32).collect();
    Tensor::new(idx.as_slice(), device)
}

/// Unroll every `k × k` window of `x: (b, h, w, c)` into
/// `(b, out_h, out_w, k·k·c)`.
pub fn extract_patches(x: &Tensor, geometry: &ConvGeometry) -> Result<Tensor> {
    let (_, h, w, _) = x.dims4()?;
    let k = geometry.kernel_size;
    let (sh, sw) = geometry.stride;
    let (Some((oh, top, bottom)), Some((ow, left, right))) = (
        output_extent(h, k, sh, geometry.padding),
        output_extent(w, k, sw, geometry.padding),
    ) else {
        candle_core::bail!("input {h}x{w} is smaller than the {k}x{k} kernel");
    };
    let x = x.pad_with_zeros(1, top, bottom)?.pad_with_zeros(2, left, right)?;

    let mut pieces = Vec::with_capacity(k * k);
    for kh in 0..k {
        let rows = positions(oh, sh, kh, x.device())?;
        let band = x.index_select(&rows, 1)?;
        for kw in 0..k {
            let cols = positions(ow, sw, kw, x.device())?;
            pieces.push(band.index_select(&cols, 2)?);
        }
    }
    Tensor::cat(&pieces, 3)
}

// ── BinaryConv2d ────────────────────────────────────────────────────────────

/// Binarized / LUT 2-D convolution.
///
/// Input: `(b, h, w, c)` or, for two-level layers, `(2, b, h, w, c)`.
/// Output: `(b, out_h, out_w, filters)`.
pub struct BinaryConv2d {
    core: LayerCore,
    geometry: ConvGeometry,
    /// Output shape recorded by the first successful forward call.
    output_shape: Mutex<Option<[usize; 4]>>,
}

impl BinaryConv2d {
    pub fn new(config: &LayerConfig, vb: VarBuilder) -> LutResult<Self> {
        let geometry = config
            .conv
            .ok_or(ConfigError::WrongLayerKind("convolution layer needs a conv geometry"))?;
        Ok(Self {
            core: LayerCore::new(config, vb)?,
            geometry,
            output_shape: Mutex::new(None),
        })
    }

    pub fn core(&self) -> &LayerCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    /// `(batch, out_h, out_w, filters)` of the first forward call, `None`
    /// before it. Later calls do not update it.
    pub fn output_shape(&self) -> Option<[usize; 4]> {
        *self.output_shape.lock()
    }

    pub fn forward(&self, x: &Tensor) -> LutResult<Tensor> {
        let channels = self.core.config().in_features;
        let dims = x.dims();
        let spatial = if dims.len() >= 3 {
            [dims[dims.len() - 3], dims[dims.len() - 2]]
        } else {
            [0, 0]
        };
        let levels = self.core.split_levels(x, &[spatial[0], spatial[1], channels])?;

        let k = self.geometry.kernel_size;
        let extents = (
            output_extent(spatial[0], k, self.geometry.stride.0, self.geometry.padding),
            output_extent(spatial[1], k, self.geometry.stride.1, self.geometry.padding),
        );
        let (Some((oh, ..)), Some((ow, ..))) = extents else {
            return Err(LutError::ShapeMismatch {
                expected: format!("spatial extent of at least {k}x{k}"),
                actual: dims.to_vec(),
            });
        };
        let batch = levels[0].dim(0)?;
        let window = self.core.geometry().window();

        let unrolled = levels
            .iter()
            .map(|l| extract_patches(l, &self.geometry)?.reshape((batch * oh * ow, window)))
            .collect::<Result<Vec<_>>>()?;
        let out = self.core.evaluate(&unrolled)?;
        let shape = [batch, oh, ow, self.core.config().out_features];
        let out = out.reshape(shape.as_slice())?;
        self.output_shape.lock().get_or_insert(shape);
        Ok(out)
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

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn image(b: usize, h: usize, w: usize, c: usize) -> Tensor {
        let n = b * h * w * c;
        Tensor::arange(1f32, (n + 1) as f32, &Device::Cpu)
            .unwrap()
            .reshape((b, h, w, c))
            .unwrap()
    }

    fn build(config: &LayerConfig) -> (VarMap, BinaryConv2d) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = BinaryConv2d::new(config, vb).unwrap();
        (varmap, layer)
    }

    #[test]
    fn extents() {
        assert_eq!(output_extent(5, 3, 1, Padding::Valid), Some((3, 0, 0)));
        assert_eq!(output_extent(5, 3, 2, Padding::Valid), Some((2, 0, 0)));
        assert_eq!(output_extent(2, 3, 1, Padding::Valid), None);
        assert_eq!(output_extent(5, 3, 1, Padding::Same), Some((5, 1, 1)));
        assert_eq!(output_extent(6, 3, 2, Padding::Same), Some((3, 0, 1)));
        assert_eq!(output_extent(4, 2, 1, Padding::Same), Some((4, 0, 1)));
        assert_eq!(output_extent(0, 3, 1, Padding::Same), None);
        assert_eq!(output_extent(0, 1, 1, Padding::Valid), None);
    }

    #[test]
    fn empty_spatial_axis_is_a_shape_error() {
        let dev = Device::Cpu;
        let config = LayerConfig {
            first_layer: true,
            ..LayerConfig::conv(2, 2, ConvGeometry::new(3, Padding::Same))
        };
        let (_vm, layer) = build(&config);
        let x = Tensor::zeros((1, 0, 4, 2), DType::F32, &dev).unwrap();
        assert!(matches!(layer.forward(&x), Err(LutError::ShapeMismatch { .. })));
        assert_eq!(layer.output_shape(), None);
    }

    #[test]
    fn valid_patches_unroll_kh_kw_c() {
        // 1×3×3×1 image with values 1..9, 2×2 kernel.
        let x = image(1, 3, 3, 1);
        let p = extract_patches(&x, &ConvGeometry::new(2, Padding::Valid)).unwrap();
        assert_eq!(p.dims(), &[1, 2, 2, 4]);
        let v: Vec<f32> = p.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(
            v,
            vec![1., 2., 4., 5., 2., 3., 5., 6., 4., 5., 7., 8., 5., 6., 8., 9.]
        );
    }

    #[test]
    fn same_patches_are_zero_padded() {
        let x = image(1, 2, 2, 1);
        let p = extract_patches(&x, &ConvGeometry::new(3, Padding::Same)).unwrap();
        assert_eq!(p.dims(), &[1, 2, 2, 9]);
        // Top-left window centred on pixel (0, 0).
        let first: Vec<f32> = p.get(0).unwrap().get(0).unwrap().get(0).unwrap().to_vec1().unwrap();
        assert_eq!(first, vec![0., 0., 0., 0., 1., 2., 0., 3., 4.]);
    }

    #[test]
    fn strided_patches() {
        let x = image(1, 4, 4, 1);
        let mut geometry = ConvGeometry::new(2, Padding::Valid);
        geometry.stride = (2, 2);
        let p = extract_patches(&x, &geometry).unwrap();
        assert_eq!(p.dims(), &[1, 2, 2, 4]);
        let last: Vec<f32> = p.get(0).unwrap().get(1).unwrap().get(1).unwrap().to_vec1().unwrap();
        assert_eq!(last, vec![11., 12., 15., 16.]);
    }

    #[test]
    fn multichannel_window_order() {
        let x = image(1, 2, 2, 2);
        let p = extract_patches(&x, &ConvGeometry::new(2, Padding::Valid)).unwrap();
        let v: Vec<f32> = p.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![1., 2., 3., 4., 5., 6., 7., 8.]);
    }

    #[test]
    fn plain_conv_sums_window() {
        let dev = Device::Cpu;
        let config = LayerConfig {
            levels: 1,
            use_lut: false,
            ..LayerConfig::conv(1, 1, ConvGeometry::new(2, Padding::Valid))
        };
        let (mut varmap, layer) = build(&config);
        varmap
            .set_one("w", Tensor::ones((2, 2, 1, 1), DType::F32, &dev).unwrap())
            .unwrap();
        let y = layer.forward(&image(1, 3, 3, 1)).unwrap();
        assert_eq!(y.dims(), &[1, 2, 2, 1]);
        let v: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![12., 16., 24., 28.]);
    }

    #[test]
    fn output_shape_is_cached_after_first_forward() {
        let dev = Device::Cpu;
        let config = LayerConfig {
            tm: 2,
            tn: 2,
            ..LayerConfig::conv(4, 6, ConvGeometry::new(3, Padding::Same))
        };
        let (_vm, layer) = build(&config);
        assert_eq!(layer.output_shape(), None);
        let x = Tensor::randn(0f32, 1., (2, 2, 5, 5, 4), &dev).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 5, 5, 6]);
        assert_eq!(layer.output_shape(), Some([2, 5, 5, 6]));

        let x = Tensor::randn(0f32, 1., (2, 3, 5, 5, 4), &dev).unwrap();
        assert_eq!(layer.forward(&x).unwrap().dims(), &[3, 5, 5, 6]);
        assert_eq!(layer.output_shape(), Some([2, 5, 5, 6]));
    }

    #[test]
    fn lut_conv_matches_dense_on_one_window() {
        // A valid k×k convolution over a k×k image is one dense evaluation.
        let dev = Device::Cpu;
        let config = LayerConfig::conv(2, 3, ConvGeometry::new(2, Padding::Valid));
        let (_vm, layer) = build(&config);
        let x = Tensor::randn(0f32, 1., (2, 1, 2, 2, 2), &dev).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 1, 1, 3]);

        let levels = vec![
            x.get(0).unwrap().reshape((1, 8)).unwrap(),
            x.get(1).unwrap().reshape((1, 8)).unwrap(),
        ];
        let direct = layer.core().evaluate(&levels).unwrap();
        let diff = (y.reshape((1, 3)).unwrap() - direct)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-5);
    }

    #[test]
    fn wrong_channels_or_tiny_input_fail() {
        let dev = Device::Cpu;
        let config = LayerConfig {
            first_layer: true,
            ..LayerConfig::conv(3, 4, ConvGeometry::new(3, Padding::Valid))
        };
        let (_vm, layer) = build(&config);
        let wrong_c = Tensor::zeros((1, 5, 5, 2), DType::F32, &dev).unwrap();
        assert!(matches!(layer.forward(&wrong_c), Err(LutError::ShapeMismatch { .. })));
        let tiny = Tensor::zeros((1, 2, 2, 3), DType::F32, &dev).unwrap();
        assert!(matches!(layer.forward(&tiny), Err(LutError::ShapeMismatch { .. })));
        assert_eq!(layer.output_shape(), None);
    }

    #[test]
    fn dense_config_is_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            BinaryConv2d::new(&LayerConfig::dense(4, 4), vb),
            Err(LutError::Config(ConfigError::WrongLayerKind(_)))
        ));
    }
}
