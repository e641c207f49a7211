//! VEC-MAC GEMM validation CLI
//!
//! Usage:
//!   vecmac
//!   vecmac --descriptor 8U8-16I8-2S32 -m 64 -n 64 -k 64 --seed 7
//!   vecmac -c run.json --json
//!   vecmac --emit-c out/

use clap::Parser as ClapParser;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tracing::Level;

use vec_mac_gemm::{
    parse_descriptor, run, GemmShape, HarnessConfig, HarnessError, ReferenceUnit, RunReport,
    TilingScheduler, ValueRange,
};

#[derive(ClapParser, Debug)]
#[command(name = "vecmac")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Lowers a GEMM onto a vector MAC unit and validates it bit-exactly")]
struct Args {
    /// Accelerator descriptor, e.g. "1x8U8-2x8I8-2S32"
    #[arg(short = 'd', long = "descriptor", default_value = "1x8U8-2x8I8-2S32")]
    descriptor: String,

    /// Rows of X and C
    #[arg(short = 'm', default_value = "64")]
    m: usize,

    /// Rows of W, columns of C (multiple of the lane count)
    #[arg(short = 'n', default_value = "64")]
    n: usize,

    /// Reduction length (multiple of the MAC width)
    #[arg(short = 'k', default_value = "64")]
    k: usize,

    /// Seed for the generated matrices
    #[arg(long = "seed", default_value = "0")]
    seed: u64,

    /// Half-open range of X values (e.g., "1..10")
    #[arg(long = "data-range", value_parser = parse_range, default_value = "1..10", allow_hyphen_values = true)]
    data_range: ValueRange,

    /// Half-open range of W values (e.g., "-128..128")
    #[arg(long = "coef-range", value_parser = parse_range, default_value = "1..10", allow_hyphen_values = true)]
    coef_range: ValueRange,

    /// Read the whole configuration from a JSON file
    #[arg(short = 'c', long = "config")]
    config_file: Option<PathBuf>,

    /// Output the lowered program as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Write the reference primitive source into this directory
    #[arg(long = "emit-c")]
    emit_c: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn parse_range(s: &str) -> Result<ValueRange, String> {
    let (low, high) = s
        .split_once("..")
        .ok_or_else(|| format!("Invalid range format: {}", s))?;

    let low = low
        .trim()
        .parse::<i32>()
        .map_err(|_| format!("Invalid range start: {}", low))?;
    let high = high
        .trim()
        .parse::<i32>()
        .map_err(|_| format!("Invalid range end: {}", high))?;

    Ok(ValueRange::new(low, high))
}

fn load_config(args: &Args) -> Result<HarnessConfig, HarnessError> {
    if let Some(path) = &args.config_file {
        let text = fs::read_to_string(path)?;
        return HarnessConfig::from_json(&text);
    }

    let vec_mac = parse_descriptor(&args.descriptor)?;
    let mut config = HarnessConfig::new(vec_mac, GemmShape::new(args.m, args.n, args.k))
        .with_seed(args.seed);
    config.data_range = args.data_range;
    config.coef_range = args.coef_range;
    Ok(config)
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("{}: {}", "Configuration error".red(), e);
        std::process::exit(1);
    });

    if args.verbose {
        println!("{}", "VEC-MAC GEMM Validation".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!("{}: {}", "Target".green(), config.vec_mac.diagram_stem());
        println!("{}: {}", "Problem".green(), config.shape);
        println!("{}: {}", "Seed".green(), config.seed);
        println!();

        match TilingScheduler::new(config.vec_mac).schedule(&config.shape) {
            Ok(schedule) => println!("{}", schedule),
            Err(e) => {
                eprintln!("{}: {}", "Scheduling error".red(), e);
                std::process::exit(1);
            }
        }
    }

    if let Some(dir) = &args.emit_c {
        let written = ReferenceUnit::build(&config.vec_mac).and_then(|unit| unit.export(dir));
        match written {
            Ok(path) => println!("{}: {}", "Wrote".green(), path.display()),
            Err(e) => {
                eprintln!("{}: {}", "Build error".red(), e);
                std::process::exit(1);
            }
        }
    }

    let report = match run(&config) {
        Ok(report) => report,
        Err(e @ HarnessError::Mismatch { .. }) => {
            println!("{}: {}", "FAIL".bold().red(), e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    if args.json_output {
        match report.program.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print_report(&report, args.verbose);
    }
}

fn print_report(report: &RunReport, verbose: bool) {
    let program = &report.program;

    println!("{}", "Lowered Program".bold().green());
    println!("{}", "=".repeat(50));
    println!("{}", program);

    println!("{}: {}", "Tiles".cyan(), report.stats.tiles);
    println!(
        "{}: {} MACZ, {} MACC, {} STOR",
        "Calls".cyan(),
        report.stats.zero_accumulates,
        report.stats.accumulates,
        report.stats.stores
    );

    if verbose {
        let n = program.shape.n;
        println!();
        println!("{}", "X x Wt".bold().yellow());
        println!("{}", "-".repeat(50));
        for row in report.output.chunks(n) {
            println!("  {:?}", row);
        }
    }

    println!();
    println!(
        "{}: {} cells match the reference GEMM",
        "PASS".bold().green(),
        report.output.len()
    );
}
