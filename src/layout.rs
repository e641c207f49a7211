//! Physical coefficient layout
//!
//! The MAC unit reads coefficients lane-major, then mac-major. The logical
//! weight matrix `W[N, K]` is viewed as `[N/LANES, K/MACS, LANES, MACS]`
//! where element `[r, s, l, t]` aliases `W[r*LANES + l, s*MACS + t]`.
//! No data is copied: a row-major `W` already places lane `l` of a tile
//! exactly one row (`K` elements) after lane `l - 1`.

use crate::error::{HarnessError, HarnessResult};
use crate::hardware::{GemmShape, VecMacConfig};

/// Index mapping from the physical view onto row-major `W`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefLayout {
    n: usize,
    k: usize,
    lanes: usize,
    macs: usize,
}

impl CoefLayout {
    /// Fails if `N % LANES != 0` or `K % MACS != 0`
    pub fn new(n: usize, k: usize, config: &VecMacConfig) -> HarnessResult<Self> {
        GemmShape::new(1, n, k).check_divisible(config)?;
        Ok(Self {
            n,
            k,
            lanes: config.lanes,
            macs: config.macs,
        })
    }

    pub fn for_gemm(shape: &GemmShape, config: &VecMacConfig) -> HarnessResult<Self> {
        Self::new(shape.n, shape.k, config)
    }

    /// `[N/LANES, K/MACS, LANES, MACS]`
    pub fn shape(&self) -> [usize; 4] {
        [self.n / self.lanes, self.k / self.macs, self.lanes, self.macs]
    }

    /// Logical `(row, col)` of physical element `[r, s, l, t]`
    pub fn logical_index(&self, r: usize, s: usize, l: usize, t: usize) -> (usize, usize) {
        (r * self.lanes + l, s * self.macs + t)
    }

    /// Flat offset into row-major `W` of physical element `[r, s, l, t]`
    pub fn offset(&self, r: usize, s: usize, l: usize, t: usize) -> usize {
        let (row, col) = self.logical_index(r, s, l, t);
        row * self.k + col
    }

    /// Distance between consecutive lanes of one tile
    pub fn lane_stride(&self) -> usize {
        (self.k / self.macs) * self.macs
    }

    /// Offset step per lane-group (`r`)
    pub fn group_stride(&self) -> usize {
        self.lanes * self.lane_stride()
    }

    /// Offset step per reduction step (`s`)
    pub fn step_stride(&self) -> usize {
        self.macs
    }

    /// Number of elements of `W`
    pub fn len(&self) -> usize {
        self.n * self.k
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only physical view over a row-major coefficient matrix
#[derive(Debug, Clone, Copy)]
pub struct PhysicalCoefView<'a> {
    layout: CoefLayout,
    data: &'a [i8],
}

impl<'a> PhysicalCoefView<'a> {
    pub fn new(layout: CoefLayout, data: &'a [i8]) -> HarnessResult<Self> {
        if data.len() != layout.len() {
            return Err(HarnessError::precondition(format!(
                "coefficient matrix has {} elements, layout expects {}",
                data.len(),
                layout.len()
            )));
        }
        Ok(Self { layout, data })
    }

    pub fn layout(&self) -> &CoefLayout {
        &self.layout
    }

    pub fn get(&self, r: usize, s: usize, l: usize, t: usize) -> i8 {
        self.data[self.layout.offset(r, s, l, t)]
    }

    /// The coefficient block one MAC call reads for tile `[r, s]`
    pub fn tile(&self, r: usize, s: usize) -> &'a [i8] {
        let start = self.layout.offset(r, s, 0, 0);
        let len = (self.layout.lanes - 1) * self.layout.lane_stride() + self.layout.macs;
        &self.data[start..start + len]
    }

    /// Copy out in physical order, for inspection
    pub fn to_physical(&self) -> Vec<i8> {
        let [groups, steps, lanes, macs] = self.layout.shape();
        let mut out = Vec::with_capacity(self.layout.len());
        for r in 0..groups {
            for s in 0..steps {
                for l in 0..lanes {
                    for t in 0..macs {
                        out.push(self.get(r, s, l, t));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_shape() {
        let layout = CoefLayout::new(64, 64, &VecMacConfig::new(8, 2)).unwrap();
        assert_eq!(layout.shape(), [32, 8, 2, 8]);
        assert_eq!(layout.lane_stride(), 64);
        assert_eq!(layout.group_stride(), 128);
    }

    #[test]
    fn test_layout_rejects_partial_tiles() {
        let config = VecMacConfig::new(8, 2);
        assert!(CoefLayout::new(64, 63, &config).is_err());
        assert!(CoefLayout::new(3, 64, &config).is_err());
    }

    #[test]
    fn test_view_aliases_logical_matrix() {
        // W[4, 4] with values row * 10 + col
        let w: Vec<i8> = (0..4)
            .flat_map(|row| (0..4).map(move |col| (row * 10 + col) as i8))
            .collect();
        let layout = CoefLayout::new(4, 4, &VecMacConfig::new(2, 2)).unwrap();
        let view = PhysicalCoefView::new(layout, &w).unwrap();

        assert_eq!(view.get(1, 1, 0, 1), 23); // W[2, 3]
        assert_eq!(view.get(0, 1, 1, 0), 12); // W[1, 2]
        assert_eq!(view.tile(1, 0), &[20, 21, 22, 23, 30, 31]);
        assert_eq!(
            view.to_physical(),
            vec![0, 1, 10, 11, 2, 3, 12, 13, 20, 21, 30, 31, 22, 23, 32, 33]
        );
    }

    #[test]
    fn test_view_length_checked() {
        let layout = CoefLayout::new(4, 4, &VecMacConfig::new(2, 2)).unwrap();
        assert!(PhysicalCoefView::new(layout, &[0; 15]).is_err());
    }
}
