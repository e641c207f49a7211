//! Hardware interface definitions for the vector MAC unit
//!
//! The unit multiplies one data vector of `macs` unsigned 8-bit elements
//! against `lanes` coefficient vectors of signed 8-bit elements, summing
//! each product row into one of `lanes` signed 32-bit accumulators.

use serde::{Deserialize, Serialize};

use crate::descriptor::{Descriptor, ElemKind, LaneGroup, OperandGroup};
use crate::error::{HarnessError, HarnessResult};

/// Bit width of data vector elements
pub const DATA_BITS: usize = 8;
/// Bit width of coefficient vector elements
pub const COEF_BITS: usize = 8;
/// Bit width of accumulator lanes
pub const ACC_BITS: usize = 32;

/// Configuration for the vector MAC hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VecMacConfig {
    /// int8 elements per int32 accumulator (INT8_MACS)
    pub macs: usize,
    /// int32 accumulator lanes (INT32_LANES)
    pub lanes: usize,
}

impl VecMacConfig {
    pub fn new(macs: usize, lanes: usize) -> Self {
        Self { macs, lanes }
    }

    /// The 8U8-16I8-2S32 instantiation
    pub fn default_8x2() -> Self {
        Self::new(8, 2)
    }

    /// Coefficient elements consumed by one MAC call
    pub fn coef_elems(&self) -> usize {
        self.macs * self.lanes
    }

    /// Width of one lane's running sum inside a single call, rounded up
    /// to a power of two
    pub fn lane_bits(&self) -> usize {
        (DATA_BITS + COEF_BITS + self.macs).next_power_of_two()
    }

    /// Canonical descriptor of this instantiation
    ///
    /// Lanes are rendered at the derived width from [`lane_bits`](Self::lane_bits),
    /// which is `S32` only while `macs <= 16`. Wider units still run, but
    /// their descriptor names an `S64` (or wider) accumulator that
    /// `parse_descriptor` rejects.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            data: OperandGroup::new(1, self.macs, ElemKind::Unsigned, DATA_BITS),
            coef: OperandGroup::new(self.lanes, self.macs, ElemKind::Signed, COEF_BITS),
            lanes: LaneGroup {
                lanes: self.lanes,
                kind: ElemKind::SignedAcc,
                bits: self.lane_bits(),
            },
        }
    }

    /// File stem for artifacts named after this instantiation
    pub fn diagram_stem(&self) -> String {
        format!("OLIMP-VEC-{}", self.descriptor())
    }

    /// Both operand shape constants must be non-zero
    pub fn check(&self) -> HarnessResult<()> {
        if self.macs == 0 || self.lanes == 0 {
            return Err(HarnessError::precondition(format!(
                "MAC unit needs at least one element and one lane, got macs={} lanes={}",
                self.macs, self.lanes
            )));
        }
        Ok(())
    }
}

impl Default for VecMacConfig {
    fn default() -> Self {
        Self::default_8x2()
    }
}

/// Problem dimensions of `C[M,N] = X[M,K] · Wᵗ[N,K]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl GemmShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    pub fn square(size: usize) -> Self {
        Self::new(size, size, size)
    }

    /// Element count of `X`, saturating for shapes `check_divisible` rejects
    pub fn x_len(&self) -> usize {
        self.m.saturating_mul(self.k)
    }

    pub fn w_len(&self) -> usize {
        self.n.saturating_mul(self.k)
    }

    pub fn c_len(&self) -> usize {
        self.m.saturating_mul(self.n)
    }

    /// Check the shape tiles exactly onto the MAC unit
    pub fn check_divisible(&self, config: &VecMacConfig) -> HarnessResult<()> {
        config.check()?;

        if self.m == 0 || self.n == 0 || self.k == 0 {
            return Err(HarnessError::precondition(format!(
                "empty GEMM {}x{}x{}",
                self.m, self.n, self.k
            )));
        }
        if self.n % config.lanes != 0 {
            return Err(HarnessError::precondition(format!(
                "N={} is not a multiple of INT32_LANES={}",
                self.n, config.lanes
            )));
        }
        if self.k % config.macs != 0 {
            return Err(HarnessError::precondition(format!(
                "K={} is not a multiple of INT8_MACS={}",
                self.k, config.macs
            )));
        }

        // every operand offset is bounded by its buffer length
        let lens = [("X", self.m, self.k), ("W", self.n, self.k), ("C", self.m, self.n)];
        for (name, rows, cols) in lens {
            if rows.checked_mul(cols).is_none() {
                return Err(HarnessError::precondition(format!(
                    "{} of {}x{} elements is not addressable",
                    name, rows, cols
                )));
            }
        }
        Ok(())
    }
}

impl Default for GemmShape {
    fn default() -> Self {
        Self::square(64)
    }
}

impl std::fmt::Display for GemmShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M={} N={} K={}", self.m, self.n, self.k)
    }
}

/// Half-open range `[low, high)` for generated matrix values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub low: i32,
    pub high: i32,
}

impl ValueRange {
    pub fn new(low: i32, high: i32) -> Self {
        Self { low, high }
    }

    /// Check the range is non-empty and lies within `[min, max]`
    pub fn check_within(&self, what: &str, min: i32, max: i32) -> HarnessResult<()> {
        if self.low >= self.high {
            return Err(HarnessError::precondition(format!(
                "{} range [{}, {}) is empty",
                what, self.low, self.high
            )));
        }
        if self.low < min || self.high - 1 > max {
            return Err(HarnessError::precondition(format!(
                "{} range [{}, {}) is not representable in [{}, {}]",
                what, self.low, self.high, min, max
            )));
        }
        Ok(())
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Everything one validation run depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub vec_mac: VecMacConfig,
    pub shape: GemmShape,
    /// Seed for generating X and W
    pub seed: u64,
    /// Values drawn for the unsigned data matrix X
    pub data_range: ValueRange,
    /// Values drawn for the signed coefficient matrix W
    pub coef_range: ValueRange,
}

impl HarnessConfig {
    pub fn new(vec_mac: VecMacConfig, shape: GemmShape) -> Self {
        Self {
            vec_mac,
            shape,
            seed: 0,
            data_range: ValueRange::default(),
            coef_range: ValueRange::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// All checks that must pass before any scheduling work
    pub fn check(&self) -> HarnessResult<()> {
        self.shape.check_divisible(&self.vec_mac)?;
        self.data_range
            .check_within("data", u8::MIN as i32, u8::MAX as i32)?;
        self.coef_range
            .check_within("coef", i8::MIN as i32, i8::MAX as i32)?;
        Ok(())
    }

    /// Parse a JSON configuration
    pub fn from_json(text: &str) -> HarnessResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| HarnessError::precondition(format!("invalid configuration: {}", e)))
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new(VecMacConfig::default(), GemmShape::default())
    }
}
