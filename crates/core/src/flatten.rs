//! Flatten adapter: collapse every axis after the leading ones.

use candle_core::{Result, Tensor};

/// Reshape `(d0, .., d{n-1}, rest..)` to `(d0, .., d{n-1}, prod(rest))`.
///
/// `leading = 1` keeps the batch axis; `leading = 2` keeps the level and
/// batch axes of a stacked two-level activation.
#[derive(Debug, Clone, Copy)]
pub struct Flatten {
    leading: usize,
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl Flatten {
    pub fn new() -> Self {
        Self { leading: 1 }
    }

    pub fn with_leading_dims(leading: usize) -> Self {
        Self { leading }
    }

    pub fn leading_dims(&self) -> usize {
        self.leading
    }

    /// Output shape for an input of shape `dims`.
    pub fn output_shape(&self, dims: &[usize]) -> Result<Vec<usize>> {
        if dims.len() < self.leading {
            candle_core::bail!(
                "cannot keep {} leading axes of a rank-{} tensor",
                self.leading,
                dims.len()
            );
        }
        let mut shape = dims[..self.leading].to_vec();
        shape.push(dims[self.leading..].iter().product());
        Ok(shape)
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let shape = self.output_shape(x.dims())?;
        x.reshape(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn keeps_batch_axis() {
        let x = Tensor::zeros((2, 3, 4, 5), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(Flatten::new().forward(&x).unwrap().dims(), &[2, 60]);
    }

    #[test]
    fn keeps_level_and_batch_axes() {
        let x = Tensor::zeros((2, 7, 3, 3, 8), DType::F32, &Device::Cpu).unwrap();
        let y = Flatten::with_leading_dims(2).forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 7, 72]);
    }

    #[test]
    fn preserves_row_major_order() {
        let x = Tensor::arange(0f32, 8., &Device::Cpu)
            .unwrap()
            .reshape((2, 2, 2))
            .unwrap();
        let y = Flatten::new().forward(&x).unwrap();
        assert_eq!(
            y.to_vec2::<f32>().unwrap(),
            vec![vec![0., 1., 2., 3.], vec![4., 5., 6., 7.]]
        );
    }

    #[test]
    fn rank_too_small() {
        let f = Flatten::with_leading_dims(3);
        assert!(f.output_shape(&[4, 5]).is_err());
        assert_eq!(f.output_shape(&[4, 5, 6]).unwrap(), vec![4, 5, 6, 1]);
    }
}
