//! Residual binarization: approximate activations as a weighted sum of
//! sign tensors.
//!
//! With `L = 1` the output has the input's shape. With `L = 2` the two
//! per-level contributions are stacked on a new leading axis, so the next
//! layer can tell the primary bit (index 0) from the residual bit (index 1).

use candle_core::{DType, Result, Tensor, Var};
use candle_nn::{Init, VarBuilder};

use lutnet_common::{ConfigError, LutResult};

use crate::quantize::{binarize, hard_sign};

/// Initial magnitude coefficients: `(L, L-1, .., 1) / sum`.
fn initial_means(levels: usize) -> Vec<f32> {
    let total = (levels * (levels + 1) / 2) as f32;
    (1..=levels).rev().map(|l| l as f32 / total).collect()
}

/// Trainable residual sign activation.
pub struct ResidualSign {
    levels: usize,
    /// Magnitude coefficient per level, shape `(levels,)`.
    means: Var,
}

impl ResidualSign {
    pub fn new(levels: usize, vb: VarBuilder) -> LutResult<Self> {
        if !(1..=2).contains(&levels) {
            return Err(ConfigError::UnsupportedLevels(levels).into());
        }
        // Shares storage with a VarMap entry; any other backend gets its own copy.
        let means = Var::from_tensor(&vb.get_with_hints(levels, "means", Init::Const(0.0))?)?;
        let init = Tensor::new(initial_means(levels).as_slice(), means.device())?
            .to_dtype(means.dtype())?;
        means.set(&init)?;
        Ok(Self { levels, means })
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Current coefficients (raw, before `abs`).
    pub fn means(&self) -> Result<Vec<f32>> {
        self.means.to_dtype(DType::F32)?.to_vec1()
    }

    /// Per-level binary contributions `sign(residual_l) · |m_l|`.
    pub fn levels_of(&self, x: &Tensor) -> Result<Vec<Tensor>> {
        let scales = self.means.as_tensor().abs()?;
        let mut resid = x.clone();
        let mut out = Vec::with_capacity(self.levels);
        for l in 0..self.levels {
            let level = binarize(&resid)?.broadcast_mul(&scales.get(l)?)?;
            resid = (&resid - &level)?;
            out.push(level);
        }
        Ok(out)
    }

    /// `L = 1`: same shape as `x`. `L = 2`: `(2, ..x.shape)`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut levels = self.levels_of(x)?;
        if levels.len() == 1 {
            Ok(levels.remove(0))
        } else {
            Tensor::stack(&levels, 0)
        }
    }

    /// Greedy, training-free coefficient calibration on a concrete sample.
    ///
    /// Level `l` gets `mean(|r_l|)` where `r_0 = clip(x)` and
    /// `r_{l+1} = r_l - sign(r_l) · m_l`; the result is normalised to sum to
    /// 1 and written into the trainable coefficients.
    pub fn calibrate(&self, x: &Tensor) -> Result<Vec<f32>> {
        if x.elem_count() == 0 {
            candle_core::bail!("cannot calibrate residual coefficients on an empty sample");
        }
        let mut resid = x.detach().to_dtype(DType::F32)?.clamp(-1f64, 1f64)?;
        let mut means = Vec::with_capacity(self.levels);
        for _ in 0..self.levels {
            let m = resid.abs()?.mean_all()?.to_scalar::<f32>()?;
            let approx = hard_sign(&resid)?.affine(m as f64, 0.0)?;
            resid = (&resid - &approx)?;
            means.push(m);
        }
        let total: f32 = means.iter().sum();
        if !total.is_finite() {
            candle_core::bail!("calibration produced non-finite coefficients {means:?}");
        }
        if total > 0.0 {
            means.iter_mut().for_each(|m| *m /= total);
        }
        let t = Tensor::new(means.as_slice(), self.means.device())?.to_dtype(self.means.dtype())?;
        self.means.set(&t)?;
        tracing::debug!(?means, "calibrated residual coefficients");
        Ok(means)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn build(levels: usize) -> (VarMap, ResidualSign) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let rs = ResidualSign::new(levels, vb).unwrap();
        (varmap, rs)
    }

    #[test]
    fn initial_coefficients() {
        assert_eq!(initial_means(1), vec![1.0]);
        let m = initial_means(2);
        assert!((m[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((m[1] - 1.0 / 3.0).abs() < 1e-6);
        let (_vm, rs) = build(2);
        let stored = rs.means().unwrap();
        assert!((stored[0] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn coefficients_live_in_the_varmap() {
        let (varmap, _rs) = build(2);
        assert_eq!(varmap.all_vars().len(), 1);
    }

    #[test]
    fn rejects_three_levels() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(ResidualSign::new(3, vb).is_err());
    }

    #[test]
    fn single_level_keeps_shape() {
        let (_vm, rs) = build(1);
        let x = Tensor::new(&[[0.4f32, -0.2], [0.0, -3.0]], &Device::Cpu).unwrap();
        let y = rs.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 2]);
        assert_eq!(y.to_vec2::<f32>().unwrap(), vec![vec![1.0, -1.0], vec![1.0, -1.0]]);
    }

    #[test]
    fn two_levels_stack_on_leading_axis() {
        let (_vm, rs) = build(2);
        let x = Tensor::new(&[[0.4f32, -0.2, 0.9]], &Device::Cpu).unwrap();
        let y = rs.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 1, 3]);
        // level 0 = sign(x)·2/3; residual r = x - level0; level 1 = sign(r)·1/3
        let l0: Vec<f32> = y.get(0).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let l1: Vec<f32> = y.get(1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let third = 1.0 / 3.0;
        assert!((l0[0] - 2.0 * third).abs() < 1e-6);
        assert!((l0[1] + 2.0 * third).abs() < 1e-6);
        assert!((l1[0] + third).abs() < 1e-6); // 0.4 - 0.667 < 0
        assert!((l1[1] - third).abs() < 1e-6); // -0.2 + 0.667 > 0
        assert!((l1[2] - third).abs() < 1e-6); // 0.9 - 0.667 > 0
    }

    #[test]
    fn calibration_normalises_and_improves_reconstruction() {
        let (_vm, rs) = build(2);
        let x = Tensor::new(&[0.9f32, -0.3, 0.5, -0.7], &Device::Cpu).unwrap();
        let means = rs.calibrate(&x).unwrap();
        // m0 = mean|x| = 0.6, m1 = mean|x - sign(x)·0.6| = 0.2 → [0.75, 0.25]
        assert!((means[0] - 0.75).abs() < 1e-5);
        assert!((means[1] - 0.25).abs() < 1e-5);
        assert!((means.iter().sum::<f32>() - 1.0).abs() < 1e-6);

        let levels = rs.levels_of(&x).unwrap();
        let target: Vec<f32> = x.clamp(-1f64, 1f64).unwrap().to_vec1().unwrap();
        let l0: Vec<f32> = levels[0].to_vec1().unwrap();
        let both: Vec<f32> = (&levels[0] + &levels[1]).unwrap().to_vec1().unwrap();
        let mse = |approx: &[f32]| -> f32 {
            approx.iter().zip(&target).map(|(a, t)| (a - t).powi(2)).sum::<f32>() / target.len() as f32
        };
        // level0 + level1 ≈ clip(x): [1.0, -0.5, 0.5, -0.5]
        assert!((mse(&both) - 0.0225).abs() < 1e-5);
        assert!(mse(&both) < mse(&l0));
    }

    #[test]
    fn calibration_on_binary_input_is_exact() {
        let (_vm, rs) = build(2);
        let x = Tensor::new(&[1.0f32, -1.0, -1.0, 1.0], &Device::Cpu).unwrap();
        let means = rs.calibrate(&x).unwrap();
        assert_eq!(means, vec![1.0, 0.0]);
        let y = rs.forward(&x).unwrap();
        let sum = (y.get(0).unwrap() + y.get(1).unwrap()).unwrap();
        assert_eq!(sum.to_vec1::<f32>().unwrap(), vec![1.0, -1.0, -1.0, 1.0]);
    }

    #[test]
    fn calibrated_coefficients_are_stored() {
        let (varmap, rs) = build(2);
        let x = Tensor::new(&[0.9f32, -0.3, 0.5, -0.7], &Device::Cpu).unwrap();
        let means = rs.calibrate(&x).unwrap();
        assert_eq!(rs.means().unwrap(), means);
        let stored: Vec<f32> = varmap.all_vars()[0].as_tensor().to_vec1().unwrap();
        assert_eq!(stored, means);
    }

    #[test]
    fn coefficients_survive_without_a_varmap() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let rs = ResidualSign::new(2, vb).unwrap();
        let init = rs.means().unwrap();
        assert!((init[0] - 2.0 / 3.0).abs() < 1e-6);

        let x = Tensor::new(&[0.9f32, -0.3, 0.5, -0.7], &Device::Cpu).unwrap();
        let means = rs.calibrate(&x).unwrap();
        assert_eq!(rs.means().unwrap(), means);
        let y = rs.forward(&x).unwrap();
        let l0: Vec<f32> = y.get(0).unwrap().to_vec1().unwrap();
        assert!((l0[0] - 0.75).abs() < 1e-5);
    }

    #[test]
    fn empty_sample_is_rejected() {
        let (_vm, rs) = build(2);
        let before = rs.means().unwrap();
        let empty = Tensor::zeros(0, DType::F32, &Device::Cpu).unwrap();
        assert!(rs.calibrate(&empty).is_err());
        assert_eq!(rs.means().unwrap(), before);
        assert!(rs.means().unwrap().iter().all(|m| m.is_finite()));
    }
}
