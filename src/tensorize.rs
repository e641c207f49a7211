//! Intrinsic substitution
//!
//! Rewrites the MAC and flush blocks of a schedule into calls to the vector
//! MAC primitive. Within one output tile the first unrolled reduction step
//! becomes `VEC_MACZ`, every later step `VEC_MACC`, and the flush block a
//! single `VEC_STOR`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::hardware::{GemmShape, VecMacConfig};
use crate::layout::CoefLayout;
use crate::primitive::Intrinsic;
use crate::tiling::{Axis, AxisEnv, FlushBlock, LoopKind, LoopNode, Schedule, ScheduleNode, TileBlock};

/// Memory an operand points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Buffer {
    /// Data matrix `X[M, K]`
    X,
    /// Coefficient matrix `W[N, K]`, read through its physical view
    W,
    /// Output matrix `C[M, N]`
    C,
    /// The unit's accumulator lanes
    Acc,
}

impl Buffer {
    pub fn name(&self) -> &'static str {
        match self {
            Buffer::X => "X",
            Buffer::W => "W",
            Buffer::C => "C",
            Buffer::Acc => "acc",
        }
    }
}

/// `Σ coeff * axis + constant`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineIndex {
    pub terms: Vec<(Axis, usize)>,
    pub constant: usize,
}

impl AffineIndex {
    pub fn constant(constant: usize) -> Self {
        Self {
            terms: Vec::new(),
            constant,
        }
    }

    pub fn term(mut self, axis: Axis, coeff: usize) -> Self {
        self.terms.push((axis, coeff));
        self
    }

    pub fn eval(&self, env: &AxisEnv) -> HarnessResult<usize> {
        self.terms.iter().try_fold(self.constant, |sum, (axis, coeff)| {
            coeff
                .checked_mul(env.get(*axis)?)
                .and_then(|offset| sum.checked_add(offset))
                .ok_or_else(|| HarnessError::lowering(format!("index {} overflows", self)))
        })
    }
}

impl std::fmt::Display for AffineIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = self
            .terms
            .iter()
            .map(|(axis, coeff)| match coeff {
                1 => axis.to_string(),
                _ => format!("{}*{}", axis, coeff),
            })
            .collect();
        if self.constant != 0 || parts.is_empty() {
            parts.push(self.constant.to_string());
        }
        f.write_str(&parts.join(" + "))
    }
}

/// An operand pointer: a buffer and an element offset into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub buffer: Buffer,
    pub index: AffineIndex,
}

impl Access {
    pub fn new(buffer: Buffer, index: AffineIndex) -> Self {
        Self { buffer, index }
    }
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.buffer.name(), self.index)
    }
}

/// Operands bound at a call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOperands {
    Mac {
        acc: Access,
        data: Access,
        coef: Access,
        /// Elements between consecutive lanes of the coefficient block
        stride: usize,
    },
    Store {
        dest: Access,
        acc: Access,
    },
}

/// A point in the program replaced by a primitive call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub intrinsic: Intrinsic,
    pub operands: CallOperands,
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operands {
            CallOperands::Mac {
                acc,
                data,
                coef,
                stride,
            } => write!(f, "{}({}, {}, {}, {})", self.intrinsic, acc, data, coef, stride),
            CallOperands::Store { dest, acc } => {
                write!(f, "{}({}, {})", self.intrinsic, dest, acc)
            }
        }
    }
}

/// Accumulator state of one output tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// No reduction step issued yet
    Fresh,
    Accumulating { steps: usize },
    /// Flushed to `C`; no further calls allowed
    Stored { steps: usize },
}

impl TileState {
    /// Issue the next reduction step and return the primitive it lowers to
    pub fn next_step(&mut self) -> HarnessResult<Intrinsic> {
        match *self {
            TileState::Fresh => {
                *self = TileState::Accumulating { steps: 1 };
                Ok(Intrinsic::ZeroAccumulate)
            }
            TileState::Accumulating { steps } => {
                *self = TileState::Accumulating { steps: steps + 1 };
                Ok(Intrinsic::Accumulate)
            }
            TileState::Stored { .. } => Err(HarnessError::substitution(
                "reduction step issued after the tile was stored",
            )),
        }
    }

    pub fn store(&mut self) -> HarnessResult<()> {
        match *self {
            TileState::Accumulating { steps } => {
                *self = TileState::Stored { steps };
                Ok(())
            }
            TileState::Fresh => Err(HarnessError::substitution(
                "tile stored before any reduction step",
            )),
            TileState::Stored { .. } => Err(HarnessError::substitution("tile stored twice")),
        }
    }

    /// The tile must end stored, after exactly `expected` reduction steps
    pub fn finish(self, expected: usize) -> HarnessResult<()> {
        match self {
            TileState::Stored { steps } if steps == expected => Ok(()),
            TileState::Stored { steps } => Err(HarnessError::substitution(format!(
                "tile stored after {} reduction steps, expected {}",
                steps, expected
            ))),
            _ => Err(HarnessError::substitution("tile never stored")),
        }
    }
}

/// A schedule whose blocks have all been replaced by primitive calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutedProgram {
    pub shape: GemmShape,
    pub config: VecMacConfig,
    pub root: ScheduleNode,
}

/// Replaces MAC and flush blocks with primitive calls
pub struct IntrinsicSubstitution {
    shape: GemmShape,
    config: VecMacConfig,
    layout: CoefLayout,
}

impl IntrinsicSubstitution {
    pub fn new(shape: &GemmShape, config: &VecMacConfig) -> HarnessResult<Self> {
        Ok(Self {
            shape: *shape,
            config: *config,
            layout: CoefLayout::for_gemm(shape, config)?,
        })
    }

    pub fn substitute(&self, schedule: &Schedule) -> HarnessResult<SubstitutedProgram> {
        if schedule.shape != self.shape || schedule.config != self.config {
            return Err(HarnessError::substitution(
                "schedule was built for a different problem",
            ));
        }

        let mut nodes = self.rewrite_body(std::slice::from_ref(&schedule.root))?;
        let root = match (nodes.pop(), nodes.is_empty()) {
            (Some(root), true) => root,
            _ => return Err(HarnessError::substitution("expected a single root node")),
        };

        info!(
            steps = self.steps(),
            lanes = self.config.lanes,
            "substituted vector MAC intrinsics"
        );

        Ok(SubstitutedProgram {
            shape: self.shape,
            config: self.config,
            root,
        })
    }

    fn steps(&self) -> usize {
        self.shape.k / self.config.macs
    }

    /// Rewrite a loop body. A body holding a flush block is one output
    /// tile and gets its own accumulator state.
    fn rewrite_body(&self, body: &[ScheduleNode]) -> HarnessResult<Vec<ScheduleNode>> {
        let is_tile = body.iter().any(|n| matches!(n, ScheduleNode::Flush(_)));
        if !is_tile {
            return body.iter().map(|node| self.rewrite_spatial(node)).collect();
        }

        let mut state = TileState::Fresh;
        let mut out = Vec::new();
        for node in body {
            match node {
                ScheduleNode::Loop(node) => out.extend(self.expand_reduction(node, &mut state)?),
                ScheduleNode::Flush(flush) => out.push(self.store_call(flush, &mut state)?),
                ScheduleNode::Call(call) => out.push(ScheduleNode::Call(call.clone())),
                ScheduleNode::Block(_) => {
                    return Err(HarnessError::substitution(
                        "MAC block outside a reduction loop",
                    ))
                }
            }
        }
        state.finish(self.steps())?;
        Ok(out)
    }

    fn rewrite_spatial(&self, node: &ScheduleNode) -> HarnessResult<ScheduleNode> {
        match node {
            ScheduleNode::Loop(node) if node.var.kind == LoopKind::Serial => {
                Ok(ScheduleNode::Loop(LoopNode {
                    var: node.var.clone(),
                    body: self.rewrite_body(&node.body)?,
                }))
            }
            ScheduleNode::Call(call) => Ok(ScheduleNode::Call(call.clone())),
            _ => Err(HarnessError::substitution(
                "reduction or block found outside an output tile",
            )),
        }
    }

    /// Expand an unrolled reduction loop into one call per step
    fn expand_reduction(
        &self,
        node: &LoopNode,
        state: &mut TileState,
    ) -> HarnessResult<Vec<ScheduleNode>> {
        if node.var.kind != LoopKind::Unrolled || node.var.axis != Axis::KOuter {
            return Err(HarnessError::substitution(format!(
                "reduction loop {} must be unrolled to be tensorized",
                node.var.axis
            )));
        }
        let block = match node.body.as_slice() {
            [ScheduleNode::Block(block)] => block,
            _ => {
                return Err(HarnessError::substitution(
                    "unrolled reduction must contain exactly one MAC block",
                ))
            }
        };

        (0..node.var.extent)
            .map(|step| self.mac_call(block, step, state))
            .collect()
    }

    fn mac_call(
        &self,
        block: &TileBlock,
        step: usize,
        state: &mut TileState,
    ) -> HarnessResult<ScheduleNode> {
        if block.lanes != self.config.lanes || block.macs != self.config.macs {
            return Err(HarnessError::substitution(format!(
                "block {}x{} does not match the {}x{} intrinsic",
                block.lanes, block.macs, self.config.lanes, self.config.macs
            )));
        }

        let intrinsic = state.next_step()?;

        // X[i, step*MACS : +MACS]
        let data = AffineIndex::constant(step * self.config.macs).term(Axis::I, self.shape.k);
        // physical view [j.outer, step, 0, 0], lanes K apart
        let coef = AffineIndex::constant(step * self.layout.step_stride())
            .term(Axis::JOuter, self.layout.group_stride());

        let call = CallSite {
            intrinsic,
            operands: CallOperands::Mac {
                acc: Access::new(Buffer::Acc, AffineIndex::constant(0)),
                data: Access::new(Buffer::X, data),
                coef: Access::new(Buffer::W, coef),
                stride: self.layout.lane_stride(),
            },
        };
        debug!(step, %call, "bound MAC call site");
        Ok(ScheduleNode::Call(call))
    }

    fn store_call(&self, flush: &FlushBlock, state: &mut TileState) -> HarnessResult<ScheduleNode> {
        if flush.lanes != self.config.lanes {
            return Err(HarnessError::substitution(format!(
                "flush of {} lanes does not match the {}-lane unit",
                flush.lanes, self.config.lanes
            )));
        }
        state.store()?;

        // C[i, j.outer*LANES : +LANES]
        let dest = AffineIndex::constant(0)
            .term(Axis::I, self.shape.n)
            .term(Axis::JOuter, self.config.lanes);

        Ok(ScheduleNode::Call(CallSite {
            intrinsic: Intrinsic::Store,
            operands: CallOperands::Store {
                dest: Access::new(Buffer::C, dest),
                acc: Access::new(Buffer::Acc, AffineIndex::constant(0)),
            },
        }))
    }
}
