//! Test data generation and the reference GEMM the lowered program is
//! checked against

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::hardware::{GemmShape, HarnessConfig};

/// The two GEMM inputs, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmOperands {
    pub shape: GemmShape,
    /// `X[M, K]`
    pub x: Vec<u8>,
    /// `W[N, K]`
    pub w: Vec<i8>,
}

impl GemmOperands {
    pub fn new(shape: GemmShape, x: Vec<u8>, w: Vec<i8>) -> HarnessResult<Self> {
        if x.len() != shape.x_len() || w.len() != shape.w_len() {
            return Err(HarnessError::precondition(format!(
                "{} needs X of {} and W of {} elements, got {} and {}",
                shape,
                shape.x_len(),
                shape.w_len(),
                x.len(),
                w.len()
            )));
        }
        Ok(Self { shape, x, w })
    }

    /// Draw X then W from a generator seeded with `config.seed`
    pub fn generate(config: &HarnessConfig) -> HarnessResult<Self> {
        config.check()?;

        let shape = config.shape;
        let data = config.data_range;
        let coef = config.coef_range;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let x = (0..shape.x_len())
            .map(|_| rng.random_range(data.low..data.high) as u8)
            .collect();
        let w = (0..shape.w_len())
            .map(|_| rng.random_range(coef.low..coef.high) as i8)
            .collect();

        Self::new(shape, x, w)
    }
}

/// `X · Wᵗ` by plain triple loop, 32-bit wrapping
pub fn reference_gemm(operands: &GemmOperands) -> Vec<i32> {
    let GemmShape { m, n, k } = operands.shape;
    let mut c = vec![0i32; m * n];
    for i in 0..m {
        let x_row = &operands.x[i * k..(i + 1) * k];
        for j in 0..n {
            let w_row = &operands.w[j * k..(j + 1) * k];
            c[i * n + j] = x_row
                .iter()
                .zip(w_row)
                .fold(0i32, |sum, (&a, &b)| sum.wrapping_add(i32::from(a) * i32::from(b)));
        }
    }
    c
}

/// Require exact equality, reporting the first differing cell in row-major order
pub fn compare(shape: &GemmShape, expected: &[i32], actual: &[i32]) -> HarnessResult<()> {
    if expected.len() != shape.c_len() || actual.len() != shape.c_len() {
        return Err(HarnessError::precondition(format!(
            "output of {} elements compared against {} for {}",
            actual.len(),
            expected.len(),
            shape
        )));
    }

    let mismatch = expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a);

    match mismatch {
        None => {
            info!(cells = expected.len(), "output matches reference");
            Ok(())
        }
        Some(idx) => {
            let (row, col) = (idx / shape.n, idx % shape.n);
            warn!(row, col, expected = expected[idx], actual = actual[idx], "output mismatch");
            Err(HarnessError::Mismatch {
                row,
                col,
                expected: expected[idx],
                actual: actual[idx],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ValueRange;

    #[test]
    fn test_reference_gemm() {
        // X = [[1, 2], [3, 4]], W = [[5, 6], [-7, 8]]
        let operands =
            GemmOperands::new(GemmShape::new(2, 2, 2), vec![1, 2, 3, 4], vec![5, 6, -7, 8])
                .unwrap();
        assert_eq!(reference_gemm(&operands), vec![17, 9, 39, 11]);
    }

    #[test]
    fn test_generate_is_seeded() {
        let config = HarnessConfig::default().with_seed(42);
        let a = GemmOperands::generate(&config).unwrap();
        let b = GemmOperands::generate(&config).unwrap();
        assert_eq!(a, b);

        let c = GemmOperands::generate(&config.clone().with_seed(43)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_generate_respects_ranges() {
        let mut config = HarnessConfig::default();
        config.data_range = ValueRange::new(200, 256);
        config.coef_range = ValueRange::new(-128, -100);

        let operands = GemmOperands::generate(&config).unwrap();
        assert!(operands.x.iter().all(|&v| v >= 200));
        assert!(operands.w.iter().all(|&v| (-128..-100).contains(&v)));
    }

    #[test]
    fn test_compare_reports_first_mismatch() {
        let shape = GemmShape::new(2, 3, 8);
        let expected = vec![1, 2, 3, 4, 5, 6];
        let actual = vec![1, 2, 3, 4, 0, 0];

        match compare(&shape, &expected, &actual) {
            Err(HarnessError::Mismatch {
                row,
                col,
                expected,
                actual,
            }) => {
                assert_eq!((row, col), (1, 1));
                assert_eq!((expected, actual), (5, 0));
            }
            other => panic!("Expected mismatch, got {:?}", other),
        }

        assert!(compare(&shape, &expected, &expected).is_ok());
    }

    #[test]
    fn test_operand_lengths_checked() {
        assert!(GemmOperands::new(GemmShape::new(1, 2, 8), vec![0; 8], vec![0; 15]).is_err());
    }
}
