//! Randomisation maps: fixed pseudo-random wiring of a LUT's secondary inputs.
//!
//! Entry `i` of a map names the window position whose activation drives the
//! LUT input at position `i`. Entries are independent uniform draws over the
//! window, so a map may repeat positions; it models physical wiring, not a
//! bijection. Maps are drawn once at layer construction and never change.

use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of secondary LUT inputs (inputs 2, 3 and 4).
pub const SECONDARY_INPUTS: usize = 3;

/// One index table plus its device-resident copy for gathering.
#[derive(Debug, Clone)]
pub struct RandomisationMap {
    table: Vec<u32>,
    index: Tensor,
}

impl RandomisationMap {
    /// Draw `window` entries uniformly from `[0, window)`.
    pub fn generate<R: Rng + ?Sized>(window: usize, rng: &mut R, device: &Device) -> Result<Self> {
        let table: Vec<u32> = (0..window).map(|_| rng.gen_range(0..window) as u32).collect();
        Self::from_table(table, device)
    }

    /// Wrap an explicit table. Entries must be smaller than the table length.
    pub fn from_table(table: Vec<u32>, device: &Device) -> Result<Self> {
        let window = table.len();
        if let Some(bad) = table.iter().find(|&&e| e as usize >= window) {
            candle_core::bail!("randomisation map entry {bad} out of range for window {window}");
        }
        let index = Tensor::new(table.as_slice(), device)?;
        Ok(Self { table, index })
    }

    pub fn window(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &[u32] {
        &self.table
    }

    /// Select `x[.., table[i], ..]` along `dim` for every position `i`.
    pub fn gather(&self, x: &Tensor, dim: usize) -> Result<Tensor> {
        x.index_select(&self.index, dim)
    }
}

/// The three tile-level and three expanded maps owned by one layer.
#[derive(Debug, Clone)]
pub struct RandomisationMaps {
    /// Sized to one tile's input window; the wiring a physical tile gets.
    pub tile: [RandomisationMap; SECONDARY_INPUTS],
    /// Sized to the full window; drives the forward gather.
    pub expanded: [RandomisationMap; SECONDARY_INPUTS],
}

impl RandomisationMaps {
    /// Draw all six maps from a generator seeded with `seed`: tile maps
    /// first, then expanded maps.
    pub fn generate(tile_window: usize, window: usize, seed: u64, device: &Device) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let tile = [
            RandomisationMap::generate(tile_window, &mut rng, device)?,
            RandomisationMap::generate(tile_window, &mut rng, device)?,
            RandomisationMap::generate(tile_window, &mut rng, device)?,
        ];
        let expanded = [
            RandomisationMap::generate(window, &mut rng, device)?,
            RandomisationMap::generate(window, &mut rng, device)?,
            RandomisationMap::generate(window, &mut rng, device)?,
        ];
        Ok(Self { tile, expanded })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
