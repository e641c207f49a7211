//! Property tests for the coefficient layout and the tiling schedule

use proptest::prelude::*;

use vec_mac_gemm::{
    lower, reference_gemm, run_with_operands, CoefLayout, GemmOperands, GemmShape, HarnessConfig,
    PhysicalCoefView, TilingScheduler, VecMacConfig,
};

/// A unit shape and a problem it divides
fn unit_and_shape() -> impl Strategy<Value = (VecMacConfig, GemmShape)> {
    (1usize..=8, 1usize..=4, 1usize..=4, 1usize..=4, 1usize..=4).prop_map(
        |(macs, lanes, m, groups, steps)| {
            (
                VecMacConfig::new(macs, lanes),
                GemmShape::new(m, groups * lanes, steps * macs),
            )
        },
    )
}

proptest! {
    #[test]
    fn layout_aliases_row_major((config, shape) in unit_and_shape()) {
        let layout = CoefLayout::for_gemm(&shape, &config).unwrap();
        let w: Vec<i8> = (0..shape.w_len()).map(|v| (v % 251) as i8).collect();
        let view = PhysicalCoefView::new(layout, &w).unwrap();

        let [groups, steps, lanes, macs] = layout.shape();
        for r in 0..groups {
            for s in 0..steps {
                for l in 0..lanes {
                    for t in 0..macs {
                        let (row, col) = layout.logical_index(r, s, l, t);
                        prop_assert_eq!(view.get(r, s, l, t), w[row * shape.k + col]);
                    }
                }
            }
        }

        let mut physical = view.to_physical();
        let mut logical = w.clone();
        physical.sort_unstable();
        logical.sort_unstable();
        prop_assert_eq!(physical, logical);
    }

    #[test]
    fn schedule_covers_every_point_once((config, shape) in unit_and_shape()) {
        let schedule = TilingScheduler::new(config).schedule(&shape).unwrap();
        let mut seen = vec![0u8; shape.m * shape.n * shape.k];
        for (i, j, k) in schedule.iteration_points().unwrap() {
            seen[(i * shape.n + j) * shape.k + k] += 1;
        }
        prop_assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn lowered_program_matches_reference(
        (config, shape) in unit_and_shape(),
        seed in any::<u64>(),
    ) {
        let harness = HarnessConfig::new(config, shape).with_seed(seed);
        let operands = GemmOperands::generate(&harness).unwrap();
        let report = run_with_operands(&harness, &operands).unwrap();
        prop_assert_eq!(report.output, reference_gemm(&operands));
    }

    #[test]
    fn indivisible_shapes_rejected(
        (config, shape) in unit_and_shape(),
        extra in 1usize..8,
    ) {
        prop_assume!(extra % config.macs != 0);
        let bad = GemmShape::new(shape.m, shape.n, shape.k + extra);
        let err = lower(&HarnessConfig::new(config, bad)).unwrap_err();
        prop_assert!(err.is_precondition());
    }
}
