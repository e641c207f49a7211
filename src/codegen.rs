//! Code generator for the vector MAC unit
//!
//! Lowers a substituted schedule into a flat program: a perfect nest of
//! serial loops around a straight-line body of primitive calls.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::hardware::{GemmShape, VecMacConfig};
use crate::primitive::{coef_footprint, Intrinsic};
use crate::tensorize::{Access, Buffer, CallOperands, CallSite, SubstitutedProgram};
use crate::tiling::{AxisEnv, LoopKind, LoopVar, ScheduleNode};

/// An executable program for the vector MAC unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoweredProgram {
    pub config: VecMacConfig,
    pub shape: GemmShape,
    /// Serial loops, outermost first
    pub loops: Vec<LoopVar>,
    /// Calls issued once per innermost iteration
    pub body: Vec<CallSite>,
    /// Human-readable summary
    pub summary: String,
}

impl LoweredProgram {
    /// Number of times the body runs
    pub fn iterations(&self) -> usize {
        self.loops.iter().map(|l| l.extent).product()
    }

    /// Calls of one kind per body iteration
    pub fn calls_per_iteration(&self, intrinsic: Intrinsic) -> usize {
        self.body.iter().filter(|c| c.intrinsic == intrinsic).count()
    }

    pub fn total_calls(&self) -> usize {
        self.iterations() * self.body.len()
    }

    /// Length in elements of each buffer the program addresses
    pub fn buffer_len(&self, buffer: Buffer) -> usize {
        match buffer {
            Buffer::X => self.shape.x_len(),
            Buffer::W => self.shape.w_len(),
            Buffer::C => self.shape.c_len(),
            Buffer::Acc => self.config.lanes,
        }
    }

    fn generate_summary(&mut self) {
        self.summary = format!(
            "Lowered Program Summary:\n\
             ========================\n\
             Target: {}\n\
             Problem: {}\n\
             Tiles: {}\n\
             Calls per tile: {} (MACZ {}, MACC {}, STOR {})\n\
             Total calls: {}\n",
            self.config.diagram_stem(),
            self.shape,
            self.iterations(),
            self.body.len(),
            self.calls_per_iteration(Intrinsic::ZeroAccumulate),
            self.calls_per_iteration(Intrinsic::Accumulate),
            self.calls_per_iteration(Intrinsic::Store),
            self.total_calls(),
        );
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for LoweredProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "// {} {}", self.config.diagram_stem(), self.shape)?;
        for var in self.loops.iter().filter(|v| v.parts.len() > 1) {
            let mut stride = var.extent;
            let parts: Vec<String> = var
                .parts
                .iter()
                .map(|(axis, extent)| {
                    stride /= extent;
                    match stride {
                        1 => axis.to_string(),
                        _ => format!("{}*{}", axis, stride),
                    }
                })
                .collect();
            writeln!(f, "// {} = {}", var.axis, parts.join(" + "))?;
        }

        for (depth, var) in self.loops.iter().enumerate() {
            writeln!(f, "{}for ({}, 0, {}) {{", "  ".repeat(depth), var.axis, var.extent)?;
        }
        let pad = "  ".repeat(self.loops.len());
        for call in &self.body {
            writeln!(f, "{}{}", pad, call)?;
        }
        for depth in (0..self.loops.len()).rev() {
            writeln!(f, "{}}}", "  ".repeat(depth))?;
        }
        Ok(())
    }
}

/// Code generator for the vector MAC unit
pub struct CodeGenerator {
    config: VecMacConfig,
}

impl CodeGenerator {
    pub fn new(config: VecMacConfig) -> Self {
        Self { config }
    }

    /// Generate the executable program from a substituted schedule
    pub fn generate(&self, program: &SubstitutedProgram) -> HarnessResult<LoweredProgram> {
        if program.config != self.config {
            return Err(HarnessError::lowering(
                "substituted program targets a different MAC unit",
            ));
        }

        let mut loops = Vec::new();
        let mut node = &program.root;
        let body = loop {
            let ScheduleNode::Loop(current) = node else {
                return Err(HarnessError::lowering("program must start with a loop"));
            };
            if current.var.kind != LoopKind::Serial {
                return Err(HarnessError::lowering(format!(
                    "loop {} was not expanded",
                    current.var.axis
                )));
            }
            loops.push(current.var.clone());

            match current.body.as_slice() {
                [inner @ ScheduleNode::Loop(_)] => node = inner,
                nodes => break Self::collect_calls(nodes)?,
            }
        };

        let mut lowered = LoweredProgram {
            config: self.config,
            shape: program.shape,
            loops,
            body,
            summary: String::new(),
        };

        self.check_bounds(&lowered)?;
        lowered.generate_summary();

        info!(
            loops = lowered.loops.len(),
            iterations = lowered.iterations(),
            body = lowered.body.len(),
            "lowered program"
        );
        Ok(lowered)
    }

    fn collect_calls(nodes: &[ScheduleNode]) -> HarnessResult<Vec<CallSite>> {
        if nodes.is_empty() {
            return Err(HarnessError::lowering("innermost loop has an empty body"));
        }
        nodes
            .iter()
            .map(|node| match node {
                ScheduleNode::Call(call) => Ok(call.clone()),
                ScheduleNode::Block(_) | ScheduleNode::Flush(_) => {
                    Err(HarnessError::lowering("block left without intrinsic substitution"))
                }
                ScheduleNode::Loop(inner) => Err(HarnessError::lowering(format!(
                    "loop {} is not perfectly nested",
                    inner.var.axis
                ))),
            })
            .collect()
    }

    /// Every operand footprint must stay inside its buffer for all loop values
    fn check_bounds(&self, program: &LoweredProgram) -> HarnessResult<()> {
        // offsets are non-decreasing in every axis, so the last iteration
        // reaches furthest
        let mut env = AxisEnv::new();
        for var in &program.loops {
            var.bind(var.extent.saturating_sub(1), &mut env);
        }

        for call in &program.body {
            let accesses: Vec<(&Access, usize)> = match &call.operands {
                CallOperands::Mac {
                    acc,
                    data,
                    coef,
                    stride,
                } => {
                    if !call.intrinsic.is_mac() {
                        return Err(HarnessError::lowering(format!(
                            "{} bound with MAC operands",
                            call.intrinsic
                        )));
                    }
                    vec![
                        (acc, self.config.lanes),
                        (data, self.config.macs),
                        (coef, coef_footprint(&self.config, *stride)),
                    ]
                }
                CallOperands::Store { dest, acc } => {
                    if call.intrinsic != Intrinsic::Store {
                        return Err(HarnessError::lowering(format!(
                            "{} bound with store operands",
                            call.intrinsic
                        )));
                    }
                    vec![(dest, self.config.lanes), (acc, self.config.lanes)]
                }
            };

            for (access, footprint) in accesses {
                let end = access.index.eval(&env)? + footprint;
                let len = program.buffer_len(access.buffer);
                if end > len {
                    return Err(HarnessError::lowering(format!(
                        "{} in {} reaches element {} of {}-element buffer",
                        access, call, end, len
                    )));
                }
            }
            debug!(%call, "bounds checked");
        }
        Ok(())
    }
}
