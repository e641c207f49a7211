//! Runs a lowered program against a vector MAC unit

use tracing::{debug, info};

use crate::codegen::LoweredProgram;
use crate::error::{HarnessError, HarnessResult};
use crate::primitive::{coef_footprint, Intrinsic, VecMacUnit};
use crate::tensorize::{Access, Buffer, CallOperands};
use crate::tiling::AxisEnv;

/// Counts of issued calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub tiles: usize,
    pub zero_accumulates: usize,
    pub accumulates: usize,
    pub stores: usize,
}

/// Output of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// `C[M, N]`, row-major
    pub output: Vec<i32>,
    pub stats: ExecutionStats,
}

/// Drives a [`VecMacUnit`] through a lowered program
pub struct Executor<'u, U: VecMacUnit> {
    unit: &'u mut U,
}

impl<'u, U: VecMacUnit> Executor<'u, U> {
    pub fn new(unit: &'u mut U) -> Self {
        Self { unit }
    }

    /// Execute `program` on row-major `x[M, K]` and `w[N, K]`
    pub fn run(&mut self, program: &LoweredProgram, x: &[u8], w: &[i8]) -> HarnessResult<Execution> {
        let config = *self.unit.config();
        if config != program.config {
            return Err(HarnessError::build(
                "unit configuration does not match the lowered program",
            ));
        }
        if x.len() != program.shape.x_len() || w.len() != program.shape.w_len() {
            return Err(HarnessError::precondition(format!(
                "operands have {} and {} elements, {} needs {} and {}",
                x.len(),
                w.len(),
                program.shape,
                program.shape.x_len(),
                program.shape.w_len()
            )));
        }

        let mut output = vec![0i32; program.shape.c_len()];
        // accumulator registers persist across tiles; each tile's first
        // step zero-accumulates
        let mut acc = vec![0i32; config.lanes];
        let mut stats = ExecutionStats::default();
        let mut env = AxisEnv::new();

        for iteration in 0..program.iterations() {
            let mut rest = iteration;
            for var in program.loops.iter().rev() {
                var.bind(rest % var.extent, &mut env);
                rest /= var.extent;
            }

            for call in &program.body {
                match &call.operands {
                    CallOperands::Mac {
                        acc: acc_at,
                        data,
                        coef,
                        stride,
                    } => {
                        let acc_at = offset(acc_at, Buffer::Acc, &env)?;
                        let data_at = offset(data, Buffer::X, &env)?;
                        let coef_at = offset(coef, Buffer::W, &env)?;

                        let out = window_mut(&mut acc, acc_at, config.lanes)?;
                        let data = window(x, data_at, config.macs)?;
                        let coef = window(w, coef_at, coef_footprint(&config, *stride))?;

                        if call.intrinsic == Intrinsic::ZeroAccumulate {
                            self.unit.zero_accumulate(out, data, coef, *stride);
                            stats.zero_accumulates += 1;
                        } else {
                            self.unit.accumulate(out, data, coef, *stride);
                            stats.accumulates += 1;
                        }
                    }
                    CallOperands::Store { dest, acc: acc_at } => {
                        let dest_at = offset(dest, Buffer::C, &env)?;
                        let acc_at = offset(acc_at, Buffer::Acc, &env)?;

                        let src = window(&acc, acc_at, config.lanes)?;
                        let dest = window_mut(&mut output, dest_at, config.lanes)?;
                        self.unit.store(dest, src);
                        stats.stores += 1;
                    }
                }
            }
            stats.tiles += 1;
        }

        debug!(?stats, "execution finished");
        info!(tiles = stats.tiles, stores = stats.stores, "executed lowered program");

        Ok(Execution { output, stats })
    }
}

fn offset(access: &Access, expected: Buffer, env: &AxisEnv) -> HarnessResult<usize> {
    if access.buffer != expected {
        return Err(HarnessError::lowering(format!(
            "operand {} should address {}",
            access,
            expected.name()
        )));
    }
    access.index.eval(env)
}

fn window<T>(buffer: &[T], start: usize, len: usize) -> HarnessResult<&[T]> {
    buffer
        .get(start..start + len)
        .ok_or_else(|| out_of_bounds(start, len, buffer.len()))
}

fn window_mut<T>(buffer: &mut [T], start: usize, len: usize) -> HarnessResult<&mut [T]> {
    let total = buffer.len();
    buffer
        .get_mut(start..start + len)
        .ok_or_else(|| out_of_bounds(start, len, total))
}

fn out_of_bounds(start: usize, len: usize, total: usize) -> HarnessError {
    HarnessError::lowering(format!(
        "access [{}, {}) outside {}-element buffer",
        start,
        start + len,
        total
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodeGenerator;
    use crate::hardware::{GemmShape, VecMacConfig};
    use crate::reference::ReferenceUnit;
    use crate::tensorize::IntrinsicSubstitution;
    use crate::tiling::TilingScheduler;

    fn lowered(shape: GemmShape, config: VecMacConfig) -> LoweredProgram {
        let schedule = TilingScheduler::new(config).schedule(&shape).unwrap();
        let substituted = IntrinsicSubstitution::new(&shape, &config)
            .unwrap()
            .substitute(&schedule)
            .unwrap();
        CodeGenerator::new(config).generate(&substituted).unwrap()
    }

    /// Records every call and poisons the accumulators it is handed
    struct RecordingUnit {
        inner: ReferenceUnit,
        calls: Vec<&'static str>,
    }

    impl VecMacUnit for RecordingUnit {
        fn config(&self) -> &VecMacConfig {
            self.inner.config()
        }

        fn zero_accumulate(&mut self, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize) {
            out.fill(0x5a5a);
            self.calls.push("MACZ");
            self.inner.zero_accumulate(out, data, coef, stride);
        }

        fn accumulate(&mut self, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize) {
            self.calls.push("MACC");
            self.inner.accumulate(out, data, coef, stride);
        }

        fn store(&mut self, dest: &mut [i32], src: &[i32]) {
            self.calls.push("STOR");
            self.inner.store(dest, src);
        }
    }

    #[test]
    fn test_single_step_equals_macz() {
        let config = VecMacConfig::new(8, 2);
        let program = lowered(GemmShape::new(1, 2, 8), config);
        let x: Vec<u8> = (1..=8).collect();
        let w: Vec<i8> = (0..16).map(|v| v as i8 - 4).collect();

        let mut unit = ReferenceUnit::build(&config).unwrap();
        let run = Executor::new(&mut unit).run(&program, &x, &w).unwrap();

        let mut expected = [0i32; 2];
        unit.zero_accumulate(&mut expected, &x, &w, 8);
        assert_eq!(run.output, expected.to_vec());
    }

    #[test]
    fn test_two_steps_equal_macz_then_macc() {
        let config = VecMacConfig::new(8, 2);
        let program = lowered(GemmShape::new(1, 2, 16), config);
        let x: Vec<u8> = (0..16).map(|v| (v * 3 % 7) as u8).collect();
        let w: Vec<i8> = (0..32).map(|v| (v % 5) as i8 - 2).collect();

        let mut unit = ReferenceUnit::build(&config).unwrap();
        let run = Executor::new(&mut unit).run(&program, &x, &w).unwrap();

        let mut expected = [0i32; 2];
        unit.zero_accumulate(&mut expected, &x[..8], &w, 16);
        unit.accumulate(&mut expected, &x[8..], &w[8..], 16);
        assert_eq!(run.output, expected.to_vec());
    }

    #[test]
    fn test_store_once_per_tile() {
        let config = VecMacConfig::new(4, 2);
        let shape = GemmShape::new(3, 4, 12);
        let program = lowered(shape, config);

        let mut unit = RecordingUnit {
            inner: ReferenceUnit::build(&config).unwrap(),
            calls: Vec::new(),
        };
        let run = Executor::new(&mut unit)
            .run(&program, &vec![1; shape.x_len()], &vec![1; shape.w_len()])
            .unwrap();

        assert_eq!(run.stats.tiles, 6);
        assert_eq!(run.stats.stores, 6);
        assert_eq!(run.stats.zero_accumulates, 6);
        assert_eq!(run.stats.accumulates, 12);
        assert_eq!(&unit.calls[..4], &["MACZ", "MACC", "MACC", "STOR"]);
        assert!(run.output.iter().all(|&v| v == 12));
    }

    #[test]
    fn test_operand_length_checked() {
        let config = VecMacConfig::new(8, 2);
        let program = lowered(GemmShape::new(1, 2, 8), config);
        let mut unit = ReferenceUnit::build(&config).unwrap();
        let err = Executor::new(&mut unit)
            .run(&program, &[0; 7], &[0; 16])
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_unit_mismatch_rejected() {
        let program = lowered(GemmShape::new(1, 2, 8), VecMacConfig::new(8, 2));
        let mut unit = ReferenceUnit::build(&VecMacConfig::new(4, 2)).unwrap();
        assert!(Executor::new(&mut unit).run(&program, &[0; 8], &[0; 16]).is_err());
    }
}
