//! 4-input LUT emulation by Lagrangian interpolation over sign space.
//!
//! A physical K-LUT with K = 4 is fed by the primary activation and three
//! activations picked by the layer's randomisation maps. For a binarized
//! signal `b` the pair `pos = (1 + b)/2`, `neg = (1 - b)/2` is an exact
//! one-hot encoding of its bit, so the product of one indicator per input
//! selects exactly one of the 16 truth-table rows. The weight-select tile
//! `w1` contributes a fifth bit, giving 32 trainable mask tiles:
//!
//! ```text
//! mask index = 2·row + w_bit,   row = p·8 + s0·4 + s1·2 + s2
//! bit = 0 → positive indicator, bit = 1 → negative indicator
//! ```
//!
//! The primary indicators carry `|x|` so each dot product is scaled once by
//! the residual level's magnitude; the shuffled copies carry no magnitude.
//!
//! Evaluation folds the two `w1`-sign masks of a row into one table before
//! the matmul (`ind·A + ind·B = ind·(A + B)`), so each level costs 16
//! matmuls instead of 32.

use candle_core::{Result, Tensor};

use crate::quantize::{binarize, negative_indicator, positive_indicator};
use crate::randmap::{RandomisationMap, SECONDARY_INPUTS};

/// Inputs per emulated LUT.
pub const LUT_INPUTS: usize = 1 + SECONDARY_INPUTS;
/// Truth-table rows per LUT.
pub const LUT_ROWS: usize = 1 << LUT_INPUTS;
/// Trainable mask tiles per layer (rows × weight-select sign).
pub const MASK_COUNT: usize = LUT_ROWS * 2;

/// Indicator selection per LUT input for `row`, most significant input
/// (the primary activation) first. `true` selects the negative indicator.
pub fn row_pattern(row: usize) -> [bool; LUT_INPUTS] {
    let mut pattern = [false; LUT_INPUTS];
    for (i, bit) in pattern.iter_mut().enumerate() {
        *bit = (row >> (LUT_INPUTS - 1 - i)) & 1 == 1;
    }
    pattern
}

/// Mask tile selected by `row` and the sign of the weight-select tile.
pub fn mask_index(row: usize, weight_negative: bool) -> usize {
    row * 2 + weight_negative as usize
}

/// Truth-table row addressed by concrete input signs (`true` = negative).
pub fn row_of(signs: [bool; LUT_INPUTS]) -> usize {
    signs.iter().fold(0, |acc, &neg| (acc << 1) | neg as usize)
}

/// One-hot indicator pair of a binarized signal.
pub struct Indicators {
    pos: Tensor,
    neg: Tensor,
}

impl Indicators {
    /// Indicators of `x` without magnitude.
    pub fn of(x: &Tensor) -> Result<Self> {
        let bin = binarize(x)?;
        Ok(Self {
            pos: positive_indicator(&bin)?,
            neg: negative_indicator(&bin)?,
        })
    }

    /// Indicators of `x` scaled by `|x|`.
    pub fn scaled(x: &Tensor) -> Result<Self> {
        let Self { pos, neg } = Self::of(x)?;
        let magnitude = x.abs()?;
        Ok(Self {
            pos: (pos * &magnitude)?,
            neg: (neg * &magnitude)?,
        })
    }

    pub fn select(&self, negative: bool) -> &Tensor {
        if negative {
            &self.neg
        } else {
            &self.pos
        }
    }
}

/// Per-row weight tables, each `(window, out)`:
/// `table[row] = c[2·row] ⊙ ws_pos + c[2·row+1] ⊙ ws_neg`, where `masks`
/// are the expanded, quantised, gamma-scaled, pruned mask matrices and
/// `w_select` is the expanded, quantised weight-select matrix.
pub fn row_tables(masks: &[Tensor], w_select: &Tensor) -> Result<Vec<Tensor>> {
    if masks.len() != MASK_COUNT {
        candle_core::bail!("expected {MASK_COUNT} mask matrices, got {}", masks.len());
    }
    let ws = Indicators::of(w_select)?;
    (0..LUT_ROWS)
        .map(|row| {
            let keep = (&masks[mask_index(row, false)] * ws.select(false))?;
            let flip = (&masks[mask_index(row, true)] * ws.select(true))?;
            keep + flip
        })
        .collect()
}

/// Evaluate the LUT layer on unrolled windows.
///
/// * `levels`: one `(rows, window)` tensor per residual level.
/// * `maps`: expanded randomisation maps for inputs 2..4.
/// * `tables`: output of [`row_tables`].
///
/// Returns `(rows, out)`; every level is evaluated against the same tables
/// and the results are summed.
pub fn evaluate(
    levels: &[Tensor],
    maps: &[RandomisationMap; SECONDARY_INPUTS],
    tables: &[Tensor],
) -> Result<Tensor> {
    if tables.len() != LUT_ROWS {
        candle_core::bail!("expected {LUT_ROWS} row tables, got {}", tables.len());
    }
    let mut out: Option<Tensor> = None;
    for x in levels {
        let primary = Indicators::scaled(x)?;
        let shuffled = maps
            .iter()
            .map(|m| Indicators::of(&m.gather(x, 1)?))
            .collect::<Result<Vec<_>>>()?;

        for (row, table) in tables.iter().enumerate() {
            let pattern = row_pattern(row);
            let mut product = primary.select(pattern[0]).clone();
            for (ind, &neg) in shuffled.iter().zip(&pattern[1..]) {
                product = (product * ind.select(neg))?;
            }
            let term = product.matmul(table)?;
            out = Some(match out {
                Some(acc) => (acc + term)?,
                None => term,
            });
        }
    }
    match out {
        Some(out) => Ok(out),
        None => candle_core::bail!("LUT evaluation needs at least one level"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
