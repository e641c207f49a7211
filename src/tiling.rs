//! GEMM tiling for the vector MAC unit
//!
//! For `C[i, j] = Σ_k X[i, k] * W[j, k]` the iteration space `(i, j, k)` is
//! rewritten so that its innermost block matches one MAC call exactly:
//! - split `j` by LANES into `(j.outer, j.inner)`
//! - split `k` by MACS into `(k.outer, k.inner)`
//! - reorder to `j.outer, i, k.outer, j.inner, k.inner`
//! - fuse `j.outer` and `i` into a single outer loop
//! - unroll `k.outer`
//!
//! The result is a schedule tree. Each fused iteration owns one output tile:
//! the unrolled reduction steps run the `(j.inner, k.inner)` block, then a
//! flush block writes the tile's LANES accumulators to `C`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::hardware::{GemmShape, VecMacConfig};
use crate::tensorize::CallSite;

/// Loop axes of the GEMM iteration space and its derived loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    I,
    J,
    K,
    JOuter,
    JInner,
    KOuter,
    KInner,
    /// `j.outer` fused with `i`
    Fused,
}

impl Axis {
    pub fn name(&self) -> &'static str {
        match self {
            Axis::I => "i",
            Axis::J => "j",
            Axis::K => "k",
            Axis::JOuter => "j.outer",
            Axis::JInner => "j.inner",
            Axis::KOuter => "k.outer",
            Axis::KInner => "k.inner",
            Axis::Fused => "j.outer.i.fused",
        }
    }

    pub fn is_reduction(&self) -> bool {
        matches!(self, Axis::K | Axis::KOuter | Axis::KInner)
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a loop is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    Serial,
    /// Expanded at compile time, one copy of the body per iteration
    Unrolled,
}

/// A loop of the nest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopVar {
    pub axis: Axis,
    pub extent: usize,
    pub kind: LoopKind,
    /// Base axes this loop enumerates, outermost first, with extents.
    /// A plain loop has itself as its only part.
    pub parts: Vec<(Axis, usize)>,
}

impl LoopVar {
    pub fn new(axis: Axis, extent: usize) -> Self {
        Self {
            axis,
            extent,
            kind: LoopKind::Serial,
            parts: vec![(axis, extent)],
        }
    }

    pub fn is_reduction(&self) -> bool {
        self.parts.iter().all(|(axis, _)| axis.is_reduction())
    }

    /// Bind `value` of this loop into `env`, decomposing fused parts
    pub fn bind(&self, value: usize, env: &mut AxisEnv) {
        let mut rest = value;
        for (axis, extent) in self.parts.iter().rev() {
            env.set(*axis, rest % extent);
            rest /= extent;
        }
        env.set(self.axis, value);
    }
}

/// Values of the loop axes at one point of execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisEnv {
    values: BTreeMap<Axis, usize>,
}

impl AxisEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, axis: Axis, value: usize) {
        self.values.insert(axis, value);
    }

    pub fn get(&self, axis: Axis) -> HarnessResult<usize> {
        self.values
            .get(&axis)
            .copied()
            .ok_or_else(|| HarnessError::lowering(format!("axis {} is not bound", axis)))
    }
}

/// A scheduling directive, recorded in the order applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    Split {
        axis: Axis,
        factor: usize,
        outer: Axis,
        inner: Axis,
    },
    Reorder(Vec<Axis>),
    Fuse {
        outer: Axis,
        inner: Axis,
        fused: Axis,
    },
    Unroll(Axis),
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Directive::Split {
                axis,
                factor,
                outer,
                inner,
            } => write!(f, "split {} by {} -> ({}, {})", axis, factor, outer, inner),
            Directive::Reorder(order) => {
                let names: Vec<&str> = order.iter().map(Axis::name).collect();
                write!(f, "reorder ({})", names.join(", "))
            }
            Directive::Fuse {
                outer,
                inner,
                fused,
            } => write!(f, "fuse ({}, {}) -> {}", outer, inner, fused),
            Directive::Unroll(axis) => write!(f, "unroll {}", axis),
        }
    }
}

/// The fixed-shape `(j.inner, k.inner)` multiply-accumulate block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileBlock {
    pub lanes: usize,
    pub macs: usize,
}

/// Writes a tile's accumulators to the output matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushBlock {
    pub lanes: usize,
}

/// A node of the schedule tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleNode {
    Loop(LoopNode),
    Block(TileBlock),
    Flush(FlushBlock),
    /// A primitive call, only present after intrinsic substitution
    Call(CallSite),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopNode {
    pub var: LoopVar,
    pub body: Vec<ScheduleNode>,
}

impl ScheduleNode {
    fn write_indented(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            ScheduleNode::Loop(node) => {
                let keyword = match node.var.kind {
                    LoopKind::Serial => "for",
                    LoopKind::Unrolled => "unrolled",
                };
                writeln!(f, "{}{} ({}, 0, {}) {{", pad, keyword, node.var.axis, node.var.extent)?;
                for child in &node.body {
                    child.write_indented(f, depth + 1)?;
                }
                writeln!(f, "{}}}", pad)
            }
            ScheduleNode::Block(block) => writeln!(
                f,
                "{}mac block [j.inner: {}, k.inner: {}]",
                pad, block.lanes, block.macs
            ),
            ScheduleNode::Flush(flush) => {
                writeln!(f, "{}flush block [j.inner: {}]", pad, flush.lanes)
            }
            ScheduleNode::Call(call) => writeln!(f, "{}{}", pad, call),
        }
    }
}

/// Loop nest under construction
#[derive(Debug, Clone)]
struct LoopNest {
    loops: Vec<LoopVar>,
    directives: Vec<Directive>,
}

impl LoopNest {
    fn for_gemm(shape: &GemmShape) -> Self {
        Self {
            loops: vec![
                LoopVar::new(Axis::I, shape.m),
                LoopVar::new(Axis::J, shape.n),
                LoopVar::new(Axis::K, shape.k),
            ],
            directives: Vec::new(),
        }
    }

    fn position(&self, axis: Axis) -> HarnessResult<usize> {
        self.loops
            .iter()
            .position(|l| l.axis == axis)
            .ok_or_else(|| HarnessError::schedule(format!("no loop over {}", axis)))
    }

    fn split(&mut self, axis: Axis, factor: usize, outer: Axis, inner: Axis) -> HarnessResult<()> {
        let pos = self.position(axis)?;
        let extent = self.loops[pos].extent;
        if factor == 0 || extent % factor != 0 {
            return Err(HarnessError::schedule(format!(
                "cannot split {} of extent {} by {}",
                axis, extent, factor
            )));
        }

        self.loops.splice(
            pos..=pos,
            [
                LoopVar::new(outer, extent / factor),
                LoopVar::new(inner, factor),
            ],
        );
        self.directives.push(Directive::Split {
            axis,
            factor,
            outer,
            inner,
        });
        Ok(())
    }

    /// `order` must name every loop of the nest exactly once
    fn reorder(&mut self, order: &[Axis]) -> HarnessResult<()> {
        if order.len() != self.loops.len() {
            return Err(HarnessError::schedule(format!(
                "reorder names {} loops, nest has {}",
                order.len(),
                self.loops.len()
            )));
        }

        let mut reordered = Vec::with_capacity(order.len());
        for axis in order {
            let pos = self.position(*axis)?;
            if reordered.iter().any(|l: &LoopVar| l.axis == *axis) {
                return Err(HarnessError::schedule(format!("{} named twice in reorder", axis)));
            }
            reordered.push(self.loops[pos].clone());
        }

        self.loops = reordered;
        self.directives.push(Directive::Reorder(order.to_vec()));
        Ok(())
    }

    /// Fuse two adjacent loops, `outer` directly enclosing `inner`
    fn fuse(&mut self, outer: Axis, inner: Axis, fused: Axis) -> HarnessResult<()> {
        let pos = self.position(outer)?;
        if self.loops.get(pos + 1).map(|l| l.axis) != Some(inner) {
            return Err(HarnessError::schedule(format!(
                "{} does not directly enclose {}",
                outer, inner
            )));
        }
        if self.loops[pos].is_reduction() != self.loops[pos + 1].is_reduction() {
            return Err(HarnessError::schedule(format!(
                "cannot fuse reduction and spatial loops {} and {}",
                outer, inner
            )));
        }

        let inner_loop = self.loops.remove(pos + 1);
        let outer_loop = &mut self.loops[pos];
        outer_loop.axis = fused;
        outer_loop.extent *= inner_loop.extent;
        outer_loop.parts.extend(inner_loop.parts);

        self.directives.push(Directive::Fuse {
            outer,
            inner,
            fused,
        });
        Ok(())
    }

    fn unroll(&mut self, axis: Axis) -> HarnessResult<()> {
        let pos = self.position(axis)?;
        self.loops[pos].kind = LoopKind::Unrolled;
        self.directives.push(Directive::Unroll(axis));
        Ok(())
    }

    /// Build the schedule tree. Loops from `block_axis` inward form the
    /// MAC block; the flush block is attached after the reduction loops,
    /// inside the innermost spatial loop enclosing them.
    fn into_tree(self, block_axis: Axis, config: &VecMacConfig) -> HarnessResult<ScheduleNode> {
        let block_pos = self.loops.iter().position(|l| l.axis == block_axis).ok_or_else(|| {
            HarnessError::schedule(format!("no loop over block axis {}", block_axis))
        })?;

        let block_loops = &self.loops[block_pos..];
        let block = match block_loops {
            [lanes, macs] if !lanes.is_reduction() && macs.is_reduction() => TileBlock {
                lanes: lanes.extent,
                macs: macs.extent,
            },
            _ => {
                let names: Vec<&str> = block_loops.iter().map(|l| l.axis.name()).collect();
                return Err(HarnessError::schedule(format!(
                    "innermost block must be (spatial, reduction), got ({})",
                    names.join(", ")
                )));
            }
        };
        if block.lanes != config.lanes || block.macs != config.macs {
            return Err(HarnessError::schedule(format!(
                "innermost block {}x{} does not match the {}x{} MAC unit",
                block.lanes, block.macs, config.lanes, config.macs
            )));
        }

        let outer = &self.loops[..block_pos];
        let tile_pos = outer.iter().rposition(|l| !l.is_reduction()).ok_or_else(|| {
            HarnessError::schedule("no spatial loop encloses the reduction".to_string())
        })?;
        if outer[..tile_pos].iter().any(LoopVar::is_reduction) {
            return Err(HarnessError::schedule(
                "reduction loops must be nested inside every spatial loop".to_string(),
            ));
        }

        // reduction loops wrapping the MAC block
        let mut reduction = ScheduleNode::Block(block);
        for var in outer[tile_pos + 1..].iter().rev() {
            reduction = ScheduleNode::Loop(LoopNode {
                var: var.clone(),
                body: vec![reduction],
            });
        }

        let flush = ScheduleNode::Flush(FlushBlock { lanes: block.lanes });
        let mut node = ScheduleNode::Loop(LoopNode {
            var: outer[tile_pos].clone(),
            body: vec![reduction, flush],
        });
        for var in outer[..tile_pos].iter().rev() {
            node = ScheduleNode::Loop(LoopNode {
                var: var.clone(),
                body: vec![node],
            });
        }

        Ok(node)
    }
}

/// A scheduled GEMM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub shape: GemmShape,
    pub config: VecMacConfig,
    pub directives: Vec<Directive>,
    pub root: ScheduleNode,
}

impl Schedule {
    /// Visit every `(i, j, k)` point the MAC blocks cover, in execution order
    pub fn for_each_point(&self, mut f: impl FnMut(usize, usize, usize)) -> HarnessResult<()> {
        let mut env = AxisEnv::new();
        self.visit(&self.root, &mut env, &mut f)
    }

    /// Collect every covered `(i, j, k)` point
    pub fn iteration_points(&self) -> HarnessResult<Vec<(usize, usize, usize)>> {
        let mut points = Vec::new();
        self.for_each_point(|i, j, k| points.push((i, j, k)))?;
        Ok(points)
    }

    fn visit(
        &self,
        node: &ScheduleNode,
        env: &mut AxisEnv,
        f: &mut impl FnMut(usize, usize, usize),
    ) -> HarnessResult<()> {
        match node {
            ScheduleNode::Loop(node) => {
                for value in 0..node.var.extent {
                    node.var.bind(value, env);
                    for child in &node.body {
                        self.visit(child, env, f)?;
                    }
                }
                Ok(())
            }
            ScheduleNode::Block(block) => {
                let i = env.get(Axis::I)?;
                let j_base = env.get(Axis::JOuter)? * block.lanes;
                let k_base = env.get(Axis::KOuter)? * block.macs;
                for j_inner in 0..block.lanes {
                    for k_inner in 0..block.macs {
                        f(i, j_base + j_inner, k_base + k_inner);
                    }
                }
                Ok(())
            }
            ScheduleNode::Flush(_) | ScheduleNode::Call(_) => Ok(()),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "// schedule for {} on {}", self.shape, self.config.descriptor())?;
        for directive in &self.directives {
            writeln!(f, "// {}", directive)?;
        }
        self.root.write_indented(f, 0)
    }
}

/// Tiling scheduler for the vector MAC unit
pub struct TilingScheduler {
    config: VecMacConfig,
}

impl TilingScheduler {
    pub fn new(config: VecMacConfig) -> Self {
        Self { config }
    }

    /// Schedule a GEMM so its innermost block is one MAC call
    pub fn schedule(&self, shape: &GemmShape) -> HarnessResult<Schedule> {
        shape.check_divisible(&self.config)?;

        let mut nest = LoopNest::for_gemm(shape);
        nest.split(Axis::J, self.config.lanes, Axis::JOuter, Axis::JInner)?;
        nest.split(Axis::K, self.config.macs, Axis::KOuter, Axis::KInner)?;
        // (lanes, macs) as inner most
        nest.reorder(&[Axis::JOuter, Axis::I, Axis::KOuter, Axis::JInner, Axis::KInner])?;
        nest.fuse(Axis::JOuter, Axis::I, Axis::Fused)?;
        nest.unroll(Axis::KOuter)?;

        for directive in &nest.directives {
            debug!(%directive, "applied");
        }

        let directives = nest.directives.clone();
        let root = nest.into_tree(Axis::JInner, &self.config)?;

        info!(
            m = shape.m,
            n = shape.n,
            k = shape.k,
            tiles = shape.m * (shape.n / self.config.lanes),
            steps = shape.k / self.config.macs,
            "scheduled GEMM"
        );

        Ok(Schedule {
            shape: *shape,
            config: self.config,
            directives,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scheduled(m: usize, n: usize, k: usize) -> Schedule {
        TilingScheduler::new(VecMacConfig::new(8, 2))
            .schedule(&GemmShape::new(m, n, k))
            .unwrap()
    }

    #[test]
    fn test_tree_shape() {
        let schedule = scheduled(4, 6, 24);

        let ScheduleNode::Loop(tile_loop) = &schedule.root else {
            panic!("Expected fused tile loop at the root");
        };
        assert_eq!(tile_loop.var.axis, Axis::Fused);
        assert_eq!(tile_loop.var.extent, 3 * 4);
        assert_eq!(
            tile_loop.var.parts,
            vec![(Axis::JOuter, 3), (Axis::I, 4)]
        );
        assert_eq!(tile_loop.body.len(), 2);

        let ScheduleNode::Loop(reduction) = &tile_loop.body[0] else {
            panic!("Expected reduction loop");
        };
        assert_eq!(reduction.var.axis, Axis::KOuter);
        assert_eq!(reduction.var.kind, LoopKind::Unrolled);
        assert_eq!(reduction.var.extent, 3);
        assert_eq!(
            reduction.body,
            vec![ScheduleNode::Block(TileBlock { lanes: 2, macs: 8 })]
        );

        assert_eq!(tile_loop.body[1], ScheduleNode::Flush(FlushBlock { lanes: 2 }));
    }

    #[test]
    fn test_directive_order() {
        let schedule = scheduled(2, 2, 8);
        let text: Vec<String> = schedule.directives.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            text,
            vec![
                "split j by 2 -> (j.outer, j.inner)",
                "split k by 8 -> (k.outer, k.inner)",
                "reorder (j.outer, i, k.outer, j.inner, k.inner)",
                "fuse (j.outer, i) -> j.outer.i.fused",
                "unroll k.outer",
            ]
        );
    }

    #[test]
    fn test_fused_binding() {
        let var = LoopVar {
            axis: Axis::Fused,
            extent: 12,
            kind: LoopKind::Serial,
            parts: vec![(Axis::JOuter, 3), (Axis::I, 4)],
        };
        let mut env = AxisEnv::new();
        var.bind(7, &mut env);
        assert_eq!(env.get(Axis::JOuter).unwrap(), 1);
        assert_eq!(env.get(Axis::I).unwrap(), 3);
        assert_eq!(env.get(Axis::Fused).unwrap(), 7);
    }

    #[test]
    fn test_tiling_completeness() {
        let schedule = scheduled(3, 4, 16);
        let points = schedule.iteration_points().unwrap();

        assert_eq!(points.len(), 3 * 4 * 16);
        let unique: HashSet<_> = points.iter().copied().collect();
        assert_eq!(unique.len(), points.len());
        assert!(points.iter().all(|&(i, j, k)| i < 3 && j < 4 && k < 16));
    }

    #[test]
    fn test_reduction_order_within_tile() {
        let schedule = scheduled(1, 2, 16);
        let points = schedule.iteration_points().unwrap();
        // k.outer outside j.inner outside k.inner
        assert_eq!(points[0], (0, 0, 0));
        assert_eq!(points[7], (0, 0, 7));
        assert_eq!(points[8], (0, 1, 0));
        assert_eq!(points[16], (0, 0, 8));
    }

    #[test]
    fn test_schedule_rejects_partial_tiles() {
        let scheduler = TilingScheduler::new(VecMacConfig::new(8, 2));
        let err = scheduler.schedule(&GemmShape::new(64, 64, 63)).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_fuse_requires_adjacent_loops() {
        let mut nest = LoopNest::for_gemm(&GemmShape::new(2, 2, 2));
        assert!(nest.fuse(Axis::I, Axis::K, Axis::Fused).is_err());
        assert!(nest.fuse(Axis::J, Axis::K, Axis::Fused).is_err());
        assert!(nest.fuse(Axis::I, Axis::J, Axis::Fused).is_ok());
    }

    #[test]
    fn test_reorder_must_be_permutation() {
        let mut nest = LoopNest::for_gemm(&GemmShape::new(2, 2, 2));
        assert!(nest.reorder(&[Axis::K, Axis::I]).is_err());
        assert!(nest.reorder(&[Axis::K, Axis::K, Axis::I]).is_err());
        assert!(nest.reorder(&[Axis::K, Axis::J, Axis::I]).is_ok());
    }

    #[test]
    fn test_display() {
        let text = scheduled(2, 2, 16).to_string();
        assert!(text.contains("for (j.outer.i.fused, 0, 2) {"));
        assert!(text.contains("unrolled (k.outer, 0, 2) {"));
        assert!(text.contains("mac block [j.inner: 2, k.inner: 8]"));
        assert!(text.contains("flush block [j.inner: 2]"));
    }
}
