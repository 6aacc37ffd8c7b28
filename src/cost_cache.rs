//! Memoized band costs
//!
//! One slot per (scalefactor, band slot) remembers the last codebook and
//! rounding it was evaluated with. Slots carry the generation they were
//! filled in, so invalidating the whole cache is a counter bump.

use crate::quantization::{BandCost, BandQuantizer, Rounding};
use crate::types::{BandType, MAX_BANDS, SCALE_MAX_POS};

const SF_SLOTS: usize = SCALE_MAX_POS as usize + 1;

/// Lookup key of a cached band cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CostKey {
    /// Band slot (`window * 16 + band`)
    pub band: usize,
    pub scalefactor: i32,
    pub codebook: BandType,
    pub rounding: Rounding,
}

#[derive(Debug, Clone, Copy, Default)]
struct CostSlot {
    generation: u16,
    codebook: BandType,
    rounding: Rounding,
    cost: BandCost,
}

/// Generation-tagged cache of unit-lambda band costs
#[derive(Debug, Clone)]
pub struct CostCache {
    slots: Vec<CostSlot>,
    generation: u16,
    hits: u64,
    misses: u64,
}

impl CostCache {
    pub fn new() -> Self {
        Self {
            slots: vec![CostSlot::default(); SF_SLOTS * MAX_BANDS],
            generation: 1,
            hits: 0,
            misses: 0,
        }
    }

    /// Return the cost for `key`, computing it from the band contents on a miss
    ///
    /// `input` and `scaled` are the band's coefficients and their 3/4 powers.
    /// Keys with a scalefactor outside 0..=255 are computed without caching.
    pub fn get_or_compute(&mut self, key: CostKey, input: &[f32], scaled: &[f32]) -> BandCost {
        let quantizer = BandQuantizer::new(key.rounding);
        if key.band >= MAX_BANDS || !(0..=SCALE_MAX_POS).contains(&key.scalefactor) {
            return quantizer.cost(input, scaled, key.scalefactor, key.codebook);
        }

        let idx = key.scalefactor as usize * MAX_BANDS + key.band;
        let slot = &mut self.slots[idx];
        if slot.generation == self.generation && slot.codebook == key.codebook && slot.rounding == key.rounding {
            self.hits += 1;
            return slot.cost;
        }

        self.misses += 1;
        let cost = quantizer.cost(input, scaled, key.scalefactor, key.codebook);
        *slot = CostSlot {
            generation: self.generation,
            codebook: key.codebook,
            rounding: key.rounding,
            cost,
        };
        cost
    }

    /// Invalidate every entry
    ///
    /// Stale entries are recomputed lazily. When the 16-bit generation wraps,
    /// the slots are cleared so an ancient entry can never match again.
    pub fn invalidate_all(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            log::trace!("cost cache generation wrapped, clearing slots");
            self.slots.fill(CostSlot::default());
            self.generation = 1;
        }
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for CostCache {
    fn default() -> Self {
        Self::new()
    }
}
