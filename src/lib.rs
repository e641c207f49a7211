//! VEC-MAC GEMM validation harness
//!
//! This library decomposes `C[M,N] = X[M,K] · Wᵗ[N,K]` into calls to a
//! fixed-shape vector multiply-accumulate unit, lowers the result into an
//! executable program, runs it, and checks it bit-exactly against a plain
//! reference GEMM.
//!
//! # Example
//!
//! ```rust
//! use vec_mac_gemm::{run, GemmShape, HarnessConfig, VecMacConfig};
//!
//! let config = HarnessConfig::new(VecMacConfig::new(8, 2), GemmShape::square(16)).with_seed(1);
//! let report = run(&config).unwrap();
//! println!("{}", report.program);
//! ```

pub mod analyzer;
pub mod codegen;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod primitive;
pub mod reference;
pub mod tensorize;
pub mod tiling;
pub mod verify;

pub use analyzer::Analyzer;
pub use codegen::{CodeGenerator, LoweredProgram};
pub use descriptor::Descriptor;
pub use error::{HarnessError, HarnessResult};
pub use executor::{Execution, ExecutionStats, Executor};
pub use hardware::{GemmShape, HarnessConfig, ValueRange, VecMacConfig};
pub use layout::{CoefLayout, PhysicalCoefView};
pub use parser::Parser;
pub use primitive::{Intrinsic, VecMacUnit};
pub use reference::ReferenceUnit;
pub use tensorize::IntrinsicSubstitution;
pub use tiling::{Schedule, TilingScheduler};
pub use verify::{compare, reference_gemm, GemmOperands};

use tracing::info;

/// Parse and check an accelerator descriptor such as `1x8U8-2x8I8-2S32`
pub fn parse_descriptor(source: &str) -> HarnessResult<VecMacConfig> {
    let mut parser = Parser::new(source);
    let descriptor = parser.parse_descriptor()?;
    Analyzer::new().analyze(&descriptor)
}

/// Schedule, substitute and lower the GEMM described by `config`
pub fn lower(config: &HarnessConfig) -> HarnessResult<LoweredProgram> {
    config.check()?;

    let tiler = TilingScheduler::new(config.vec_mac);
    let schedule = tiler.schedule(&config.shape)?;

    let substitution = IntrinsicSubstitution::new(&config.shape, &config.vec_mac)?;
    let substituted = substitution.substitute(&schedule)?;

    CodeGenerator::new(config.vec_mac).generate(&substituted)
}

/// Result of a passing validation run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub program: LoweredProgram,
    /// `C[M, N]` produced by the lowered program
    pub output: Vec<i32>,
    pub stats: ExecutionStats,
}

/// Validate the lowering on inputs generated from `config.seed`
pub fn run(config: &HarnessConfig) -> HarnessResult<RunReport> {
    config.check()?;
    let operands = GemmOperands::generate(config)?;
    run_with_operands(config, &operands)
}

/// Validate the lowering on the given inputs
///
/// Fails with [`HarnessError::Mismatch`] on the first output cell that
/// differs from the reference GEMM.
pub fn run_with_operands(config: &HarnessConfig, operands: &GemmOperands) -> HarnessResult<RunReport> {
    config.check()?;
    if operands.shape != config.shape {
        return Err(HarnessError::precondition(format!(
            "operands are {}, configuration is {}",
            operands.shape, config.shape
        )));
    }

    // no partial lowering if the primitive cannot be built
    let mut unit = ReferenceUnit::build(&config.vec_mac)?;

    let program = lower(config)?;
    unit.link(&program)?;

    let execution = Executor::new(&mut unit).run(&program, &operands.x, &operands.w)?;
    let expected = reference_gemm(operands);
    compare(&config.shape, &expected, &execution.output)?;

    info!(
        shape = %config.shape,
        calls = program.total_calls(),
        "lowered program matches reference"
    );

    Ok(RunReport {
        program,
        output: execution.output,
        stats: execution.stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        assert_eq!(parse_descriptor("1x8U8-2x8I8-2S32").unwrap(), VecMacConfig::new(8, 2));
        assert!(parse_descriptor("1x8I8-2x8I8-2S32").unwrap_err().is_precondition());
    }

    #[test]
    fn test_run_small() {
        let config = HarnessConfig::new(VecMacConfig::new(8, 2), GemmShape::new(4, 6, 24));
        let report = run(&config).unwrap();
        assert_eq!(report.output.len(), 24);
        assert_eq!(report.stats.stores, 4 * 3);
    }

    #[test]
    fn test_divisibility_fails_before_lowering() {
        let config = HarnessConfig::new(VecMacConfig::new(8, 2), GemmShape::new(64, 64, 63));
        assert!(lower(&config).unwrap_err().is_precondition());
        assert!(run(&config).unwrap_err().is_precondition());
    }
}
