//! Vector MAC primitive contract
//!
//! Three operations make up the unit's instruction set:
//! - `VEC_MACZ`: `out[i] = Σ_j data[j] * coef[i * stride + j]`
//! - `VEC_MACC`: `out[i] += Σ_j data[j] * coef[i * stride + j]`
//! - `VEC_STOR`: `dest[i] = acc[i]`
//!
//! `data` is unsigned 8-bit, `coef` signed 8-bit, and every product and sum
//! is computed in 32-bit signed arithmetic that wraps on overflow.

use serde::{Deserialize, Serialize};

use crate::hardware::VecMacConfig;

/// One of the unit's operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intrinsic {
    /// Zero the accumulators, then multiply-accumulate
    ZeroAccumulate,
    /// Multiply-accumulate into the existing accumulators
    Accumulate,
    /// Flush the accumulators to memory
    Store,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 3] = [
        Intrinsic::ZeroAccumulate,
        Intrinsic::Accumulate,
        Intrinsic::Store,
    ];

    /// External symbol the lowered program calls
    pub fn symbol(&self) -> &'static str {
        match self {
            Intrinsic::ZeroAccumulate => "VEC_MACZ",
            Intrinsic::Accumulate => "VEC_MACC",
            Intrinsic::Store => "VEC_STOR",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    pub fn is_mac(&self) -> bool {
        !matches!(self, Intrinsic::Store)
    }
}

impl std::fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Coefficient elements a MAC call reads for the given lane stride
pub fn coef_footprint(config: &VecMacConfig, stride: usize) -> usize {
    (config.lanes - 1) * stride + config.macs
}

/// An executor of the three operations
///
/// Callers guarantee `out`/`dest`/`src` hold at least `lanes` elements,
/// `data` at least `macs`, and `coef` at least [`coef_footprint`].
pub trait VecMacUnit {
    fn config(&self) -> &VecMacConfig;

    fn zero_accumulate(&mut self, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize);

    fn accumulate(&mut self, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize);

    fn store(&mut self, dest: &mut [i32], src: &[i32]);
}

/// `VEC_MACZ` semantics
pub fn vec_macz(config: &VecMacConfig, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize) {
    out[..config.lanes].fill(0);
    vec_macc(config, out, data, coef, stride);
}

/// `VEC_MACC` semantics
pub fn vec_macc(config: &VecMacConfig, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize) {
    let data = &data[..config.macs];
    for (lane, acc) in out[..config.lanes].iter_mut().enumerate() {
        let row = &coef[lane * stride..lane * stride + config.macs];
        *acc = data
            .iter()
            .zip(row)
            .fold(*acc, |sum, (&d, &c)| sum.wrapping_add(i32::from(d) * i32::from(c)));
    }
}

/// `VEC_STOR` semantics
pub fn vec_stor(config: &VecMacConfig, dest: &mut [i32], src: &[i32]) {
    dest[..config.lanes].copy_from_slice(&src[..config.lanes]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols() {
        for op in Intrinsic::ALL {
            assert_eq!(Intrinsic::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(Intrinsic::from_symbol("VEC_NOPE"), None);
        assert!(!Intrinsic::Store.is_mac());
    }

    #[test]
    fn test_macz_discards_prior_value() {
        let config = VecMacConfig::new(4, 2);
        let data = [1u8, 2, 3, 4];
        // lane 0 at offset 0, lane 1 at offset 6
        let coef = [1i8, 1, 1, 1, 9, 9, -1, 0, 2, 0];
        let mut out = [100, 100];

        vec_macz(&config, &mut out, &data, &coef, 6);
        assert_eq!(out, [10, -1 + 6]);
    }

    #[test]
    fn test_macc_adds_into_existing() {
        let config = VecMacConfig::new(2, 2);
        let data = [255u8, 255];
        let coef = [-128i8, -128, 127, 127];
        let mut out = [1, 2];

        vec_macc(&config, &mut out, &data, &coef, 2);
        assert_eq!(out, [1 - 2 * 255 * 128, 2 + 2 * 255 * 127]);
    }

    #[test]
    fn test_macc_wraps_on_overflow() {
        let config = VecMacConfig::new(1, 1);
        let mut out = [i32::MAX];
        vec_macc(&config, &mut out, &[1], &[1], 1);
        assert_eq!(out, [i32::MIN]);
    }

    #[test]
    fn test_store_copies_lanes() {
        let config = VecMacConfig::new(8, 2);
        let mut dest = [0, 0, 7];
        vec_stor(&config, &mut dest, &[5, -6]);
        assert_eq!(dest, [5, -6, 7]);
    }

    #[test]
    fn test_coef_footprint() {
        let config = VecMacConfig::new(8, 2);
        assert_eq!(coef_footprint(&config, 64), 72);
        assert_eq!(coef_footprint(&config, 8), 16);
    }
}
