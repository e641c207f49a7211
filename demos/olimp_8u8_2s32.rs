//! Example: 64x64x64 GEMM on the 8U8-16I8-2S32 unit
//!
//! Lowers the default problem onto a unit with eight MACs per lane and two
//! accumulator lanes, then validates it against the plain triple loop.
//!
//! Run with: cargo run --example olimp_8u8_2s32

use vec_mac_gemm::{lower, run, GemmShape, HarnessConfig, ReferenceUnit, VecMacConfig};

fn main() {
    println!("=== 8U8-16I8-2S32 Vector MAC Example ===\n");

    let vec_mac = VecMacConfig::default_8x2();
    let config = HarnessConfig::new(vec_mac, GemmShape::square(64)).with_seed(0);

    println!("Target: {}", vec_mac.diagram_stem());
    println!("Problem: {}", config.shape);
    println!();

    let unit = ReferenceUnit::build(&vec_mac).unwrap();
    println!("Reference primitive exports:");
    for symbol in unit.symbols() {
        println!("  {}", symbol);
    }
    println!();

    let program = lower(&config).unwrap();
    println!("{}", program);
    println!("{}", program.summary);

    let report = run(&config).unwrap();
    println!(
        "Executed {} tiles ({} MACZ, {} MACC, {} STOR)",
        report.stats.tiles,
        report.stats.zero_accumulates,
        report.stats.accumulates,
        report.stats.stores
    );
    println!("C[0][0..4] = {:?}", &report.output[..4]);
    println!("\nAll {} cells match the reference GEMM", report.output.len());
}
