//! Reference implementation of the vector MAC primitive
//!
//! Provides the C source of the three extern functions, parameterised by the
//! unit's shape constants, together with a native unit that executes the
//! same semantics. A lowered program is linked against the unit's exported
//! symbol table before it may run.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::codegen::LoweredProgram;
use crate::error::{HarnessError, HarnessResult};
use crate::hardware::VecMacConfig;
use crate::primitive::{vec_macc, vec_macz, vec_stor, Intrinsic, VecMacUnit};

/// Render the C source of the reference primitive
pub fn render_c_source(config: &VecMacConfig) -> String {
    let lanes = config.lanes;
    let macs = config.macs;

    let mac = |symbol: &str, zero: bool| {
        let reset = if zero { "\n    output[i] = 0;" } else { "" };
        format!(
            "#ifdef __cplusplus\n\
             extern \"C\"\n\
             #endif\n\
             int32_t {symbol}(int32_t *output,\n\
             \x20                const uint8_t *data,\n\
             \x20                const int8_t *kernel,\n\
             \x20                const int32_t stride) {{\n\
             \x20 for (int i = 0; i < {lanes}; ++i) {{{reset}\n\
             \x20   for (int j = 0; j < {macs}; ++j) {{\n\
             \x20     output[i] += data[j] * kernel[i * stride + j];\n\
             \x20   }}\n\
             \x20 }}\n\
             \x20 return 0;\n\
             }}\n"
        )
    };

    let mut source = String::new();
    source.push_str(&format!(
        "// Reference vector MAC primitive: {} x u8 data, {} x {} x i8 coef, {} x i32 lanes\n",
        macs, lanes, macs, lanes
    ));
    source.push_str("#include <stdint.h>\n\n");
    source.push_str(&mac(Intrinsic::Accumulate.symbol(), false));
    source.push('\n');
    source.push_str(&mac(Intrinsic::ZeroAccumulate.symbol(), true));
    source.push('\n');
    source.push_str(&format!(
        "#ifdef __cplusplus\n\
         extern \"C\"\n\
         #endif\n\
         int32_t {}(int32_t *output,\n\
         \x20                const int32_t *acc) {{\n\
         \x20 for (int i = 0; i < {}; ++i) {{\n\
         \x20   output[i] = acc[i];\n\
         \x20 }}\n\
         \x20 return 0;\n\
         }}\n",
        Intrinsic::Store.symbol(),
        lanes
    ));
    source
}

/// Symbols a C translation unit defines at file scope as `int32_t NAME(`
fn exported_symbols(source: &str) -> BTreeSet<String> {
    source
        .lines()
        .filter_map(|line| line.strip_prefix("int32_t "))
        .filter_map(|rest| rest.split_once('('))
        .map(|(name, _)| name.trim().to_string())
        .collect()
}

/// A built reference unit
#[derive(Debug, Clone)]
pub struct ReferenceUnit {
    config: VecMacConfig,
    source: String,
    symbols: BTreeSet<String>,
}

impl ReferenceUnit {
    /// Build the reference primitive for a configuration
    pub fn build(config: &VecMacConfig) -> HarnessResult<Self> {
        config
            .check()
            .map_err(|e| HarnessError::build(format!("cannot instantiate primitive: {}", e)))?;
        Self::from_source(config, render_c_source(config))
    }

    /// Build from an externally supplied source
    pub fn from_source(config: &VecMacConfig, source: String) -> HarnessResult<Self> {
        let symbols = exported_symbols(&source);

        let missing: Vec<&str> = Intrinsic::ALL
            .iter()
            .map(|op| op.symbol())
            .filter(|symbol| !symbols.contains(*symbol))
            .collect();
        if !missing.is_empty() {
            return Err(HarnessError::build(format!(
                "reference source does not define {}",
                missing.join(", ")
            )));
        }

        info!(
            macs = config.macs,
            lanes = config.lanes,
            symbols = symbols.len(),
            "built reference primitive"
        );

        Ok(Self {
            config: *config,
            source,
            symbols,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    /// Resolve every call site of a lowered program against this unit
    pub fn link(&self, program: &LoweredProgram) -> HarnessResult<()> {
        if program.config != self.config {
            return Err(HarnessError::build(format!(
                "program targets macs={} lanes={}, unit provides macs={} lanes={}",
                program.config.macs, program.config.lanes, self.config.macs, self.config.lanes
            )));
        }

        for call in &program.body {
            let symbol = call.intrinsic.symbol();
            if !self.symbols.contains(symbol) {
                return Err(HarnessError::build(format!("undefined symbol {}", symbol)));
            }
        }

        debug!(calls = program.body.len(), "linked lowered program");
        Ok(())
    }

    /// Write the source artifact into `dir`, named after the instantiation
    pub fn export(&self, dir: &Path) -> HarnessResult<PathBuf> {
        let path = dir.join(format!("{}.c", self.config.diagram_stem()));
        fs::write(&path, &self.source)?;
        info!(path = %path.display(), "wrote reference source");
        Ok(path)
    }
}

impl VecMacUnit for ReferenceUnit {
    fn config(&self) -> &VecMacConfig {
        &self.config
    }

    fn zero_accumulate(&mut self, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize) {
        vec_macz(&self.config, out, data, coef, stride);
    }

    fn accumulate(&mut self, out: &mut [i32], data: &[u8], coef: &[i8], stride: usize) {
        vec_macc(&self.config, out, data, coef, stride);
    }

    fn store(&mut self, dest: &mut [i32], src: &[i32]) {
        vec_stor(&self.config, dest, src);
    }
}
