//! Binarization primitives: clipped sign with a straight-through estimator.
//!
//! Every other module quantises through [`binarize`]. The forward value is
//! exactly `±1`; the backward pass is the gradient of `clip(x, -1, 1)`,
//! i.e. identity inside (-1, 1) and zero outside.
//!
//! # Sign convention
//!
//! `sign(0)` is `+1`. The runtime's own `sign` maps zero to zero, which would
//! let a third value leak into LUT indicators, so it is never used here.

use candle_core::{DType, Result, Tensor};

// ── STE primitives ──────────────────────────────────────────────────────────

/// `±1` sign of `x` with `0 → +1`. No gradient.
#[inline]
pub fn hard_sign(x: &Tensor) -> Result<Tensor> {
    x.ge(0f64)?.to_dtype(x.dtype())?.affine(2.0, -1.0)
}

/// Clipped STE: `forward = sign(clip(x))`, `backward = ∂clip(x)/∂x`.
///
/// The trick: `sign(c).detach() + (c - c.detach())` with `c = clip(x, -1, 1)`.
/// The residual is exactly zero in the forward pass, so the output is
/// exactly `±1`.
#[inline]
pub fn binarize(x: &Tensor) -> Result<Tensor> {
    let clipped = x.clamp(-1f64, 1f64)?;
    let rounded = hard_sign(&clipped)?.detach();
    let residual = (&clipped - &clipped.detach())?;
    &rounded + &residual
}

/// Clip to `[-1, 1]`, keeping the clip gradient.
#[inline]
pub fn clip_unit(x: &Tensor) -> Result<Tensor> {
    x.clamp(-1f64, 1f64)
}

// ── Lagrangian indicators ───────────────────────────────────────────────────

/// `(1 + b) / 2`: 1 where the binarized bit is set, 0 otherwise.
#[inline]
pub fn positive_indicator(bin: &Tensor) -> Result<Tensor> {
    bin.affine(0.5, 0.5)
}

/// `(1 - b) / 2`: 1 where the binarized bit is clear, 0 otherwise.
#[inline]
pub fn negative_indicator(bin: &Tensor) -> Result<Tensor> {
    bin.affine(-0.5, 0.5)
}

// ── Debug helpers ───────────────────────────────────────────────────────────

/// Count `{-1, +1}` occurrences after binarization.
pub fn debug_sign_distribution(w: &Tensor) -> Result<(u64, u64)> {
    let flat = w.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    let n_neg = flat.iter().filter(|&&v| v < 0.0).count() as u64;
    Ok((n_neg, flat.len() as u64 - n_neg))
}

// ── Tests ───────────────────────────────────────────────────────────────────
