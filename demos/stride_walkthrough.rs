//! Example: Coefficient stride walkthrough
//!
//! A single row of X against four rows of W with K=16 on a unit with two
//! lanes of eight MACs. Shows how each call's coefficient pointer and lane
//! stride select a block of the row-major weight matrix.
//!
//! Run with: cargo run --example stride_walkthrough

use vec_mac_gemm::{
    lower, reference_gemm, run_with_operands, CoefLayout, GemmOperands, GemmShape, HarnessConfig,
    PhysicalCoefView, VecMacConfig,
};

fn main() {
    println!("=== Coefficient Stride Walkthrough ===\n");

    let vec_mac = VecMacConfig::new(8, 2);
    let shape = GemmShape::new(1, 4, 16);
    let config = HarnessConfig::new(vec_mac, shape);

    // X = 1..=16, W[j, k] = j + 1
    let x: Vec<u8> = (1..=16).collect();
    let w: Vec<i8> = (0..4).flat_map(|j| vec![j as i8 + 1; 16]).collect();
    let operands = GemmOperands::new(shape, x, w).unwrap();

    let layout = CoefLayout::for_gemm(&shape, &vec_mac).unwrap();
    let view = PhysicalCoefView::new(layout, &operands.w).unwrap();

    println!("Physical view shape: {:?}", layout.shape());
    println!("Lane stride: {}", layout.lane_stride());
    println!("Group stride: {}", layout.group_stride());
    println!();

    let [groups, steps, _, _] = layout.shape();
    for r in 0..groups {
        for s in 0..steps {
            println!(
                "  tile [{}, {}] starts at W[{}], first lanes {:?} / {:?}",
                r,
                s,
                layout.offset(r, s, 0, 0),
                view.get(r, s, 0, 0),
                view.get(r, s, 1, 0)
            );
        }
    }
    println!();

    let program = lower(&config).unwrap();
    println!("{}", program);

    // sum(1..=16) = 136, so C[0, j] = 136 * (j + 1)
    println!("Expected: {:?}", reference_gemm(&operands));
    let report = run_with_operands(&config, &operands).unwrap();
    println!("Lowered:  {:?}", report.output);
}
