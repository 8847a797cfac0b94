// vecinfo.rs — Vector-fold analysis
//
// For every grid read in the equation DAG, under a chosen fold shape,
// decides which fold-aligned vector blocks must be loaded and how to
// synthesize the read's vector from them: a single aligned load when the
// offsets are fold-multiples, one align operation when the block span
// exceeds one block along a single folded dimension, or a composition of
// pairwise aligns (folded along each participating dimension in
// declaration order) when the span extends along several. Aligned blocks
// are deduplicated across the whole DAG so the emitter issues each load
// once per iteration and reuses the register.
//
// Preconditions: fold dimensions exist in every grid (driver-validated);
//                equations extracted and optimized.
// Postconditions: every distinct grid read has a plan whose lane mapping
//                 covers the requested vector exactly.
// Failure modes: unaligned loads requested with more than one folded
//                dimension of length > 1 (E0301).
// Side effects: none.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::diag::{codes, Diagnostic};
use crate::equation::Equation;
use crate::expr::{ptr_id, Expr, ExprRef, GridPoint};
use crate::tuple::{IntTuple, TraversalOrder};

// ── Stable identifiers ───────────────────────────────────────────────────

/// Identity of one deduplicated aligned block, allocated in first-seen
/// order across the whole DAG for deterministic emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Identity of one intermediate vector produced by an align step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

// ── Plan types ───────────────────────────────────────────────────────────

/// A vector-sized, fold-aligned region of one grid. Folded dimensions
/// carry the block coordinate in block units; unfolded dimensions carry
/// the raw element offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlignedBlock {
    pub grid: String,
    pub block: IntTuple,
}

impl AlignedBlock {
    /// Element offsets of the block's low corner.
    pub fn low_corner(&self, fold: &IntTuple) -> IntTuple {
        let mut t = IntTuple::new();
        for (dim, coord) in self.block.entries() {
            let len = fold.lookup(dim).unwrap_or(1);
            t.add_dim(dim, coord * len);
        }
        t
    }
}

/// Source of one output lane: which aligned block, and which lane of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSource {
    pub block: BlockId,
    pub lane: i64,
}

/// Operand of an align step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Block(BlockId),
    Temp(TempId),
}

/// One pairwise align: lane `j` of `dst` sources lane `shift + j` of the
/// concatenation `lo ++ hi` along `dim`'s fold geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignStep {
    pub dim: String,
    pub shift: i64,
    pub lo: Operand,
    pub hi: Operand,
    pub dst: TempId,
}

/// How one grid read's vector is synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VecPlanKind {
    /// All folded offsets are fold-multiples: one aligned load.
    SingleAligned { block: BlockId },
    /// Allow-unaligned policy, single folded dimension: one unaligned load.
    Unaligned,
    /// Span of two blocks along exactly one folded dimension.
    Align {
        dim: String,
        shift: i64,
        lo: BlockId,
        hi: BlockId,
    },
    /// Span along two or more folded dimensions: pairwise aligns folded
    /// along each participating dimension in declaration order.
    Compose { steps: Vec<AlignStep> },
}

/// The complete recipe for one grid read.
#[derive(Debug, Clone)]
pub struct VecPlan {
    pub point: GridPoint,
    /// Aligned blocks this read needs, first participating dimension
    /// varying fastest. Empty for an unaligned plan.
    pub blocks: Vec<BlockId>,
    /// Per-output-lane source. Empty for an unaligned plan.
    pub lanes: Vec<LaneSource>,
    pub kind: VecPlanKind,
}

// ── Result table ─────────────────────────────────────────────────────────

/// Side table produced by the analysis, consumed verbatim by emitters.
#[derive(Debug)]
pub struct VecPlanTable {
    pub fold: IntTuple,
    pub vlen: i64,
    plans: IndexMap<GridPoint, VecPlan>,
    block_ids: IndexMap<AlignedBlock, BlockId>,
    next_temp: u32,
}

impl VecPlanTable {
    pub fn plan_for(&self, point: &GridPoint) -> Option<&VecPlan> {
        self.plans.get(point)
    }

    pub fn plans(&self) -> impl Iterator<Item = &VecPlan> {
        self.plans.values()
    }

    pub fn num_points(&self) -> usize {
        self.plans.len()
    }

    /// Deduplicated aligned blocks in first-seen order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &AlignedBlock)> {
        self.block_ids.iter().map(|(b, id)| (*id, b))
    }

    pub fn num_blocks(&self) -> usize {
        self.block_ids.len()
    }

    pub fn block(&self, id: BlockId) -> &AlignedBlock {
        match self.block_ids.get_index(id.0 as usize) {
            Some((b, _)) => b,
            None => panic!("no aligned block with id {}", id.0),
        }
    }

    /// One-line report for the driver's stderr output.
    pub fn summary(&self) -> String {
        let naive = self.plans.values().map(|p| p.blocks.len().max(1)).sum::<usize>();
        format!(
            "{} vector read(s), {} aligned block load(s) after reuse ({} before)",
            self.num_points(),
            self.num_blocks(),
            naive
        )
    }

    fn block_id(&mut self, block: AlignedBlock) -> BlockId {
        let next = BlockId(self.block_ids.len() as u32);
        *self.block_ids.entry(block).or_insert(next)
    }

    fn alloc_temp(&mut self) -> TempId {
        let id = TempId(self.next_temp);
        self.next_temp += 1;
        id
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────

/// Analyze every grid read reachable from `eqs` under `fold`.
///
/// `fold` carries every common dimension (length 1 where not folded);
/// `order` fixes the lane layout within a fold.
pub fn analyze(
    eqs: &[Equation],
    fold: &IntTuple,
    order: TraversalOrder,
    allow_unaligned: bool,
) -> Result<VecPlanTable, Diagnostic> {
    let folded_gt1: Vec<&str> = fold
        .entries()
        .filter(|(_, len)| *len > 1)
        .map(|(d, _)| d)
        .collect();
    if allow_unaligned && folded_gt1.len() > 1 {
        return Err(Diagnostic::error(format!(
            "unaligned loads cannot be used with {} folded dimensions of length > 1 ({})",
            folded_gt1.len(),
            fold.make_dim_val_str(", ")
        ))
        .with_code(codes::UNALIGNED_CONFLICT));
    }

    let mut table = VecPlanTable {
        fold: fold.clone(),
        vlen: fold.product(),
        plans: IndexMap::new(),
        block_ids: IndexMap::new(),
        next_temp: 0,
    };

    let mut visited = HashSet::new();
    for eq in eqs {
        collect_reads(&eq.rhs, &mut visited, &mut table, order, allow_unaligned);
    }
    Ok(table)
}

fn collect_reads(
    e: &ExprRef,
    visited: &mut HashSet<usize>,
    table: &mut VecPlanTable,
    order: TraversalOrder,
    allow_unaligned: bool,
) {
    if !visited.insert(ptr_id(e)) {
        return;
    }
    match e.as_ref() {
        Expr::Const(_) | Expr::ParamRead(_) => {}
        Expr::GridRead(p) => {
            if !table.plans.contains_key(p) {
                let plan = plan_read(p, table, order, allow_unaligned);
                table.plans.insert(p.clone(), plan);
            }
        }
        Expr::Neg(c) => collect_reads(c, visited, table, order, allow_unaligned),
        Expr::Commutative { args, .. } => {
            for a in args {
                collect_reads(a, visited, table, order, allow_unaligned);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_reads(lhs, visited, table, order, allow_unaligned);
            collect_reads(rhs, visited, table, order, allow_unaligned);
        }
    }
}

/// Per-dimension span of the blocks a read touches.
struct DimSpan {
    dim: String,
    /// Home block coordinate (block units for folded dims, raw offset
    /// for unfolded ones).
    coord: i64,
    /// Euclidean remainder of the offset within the fold.
    rem: i64,
    /// True when the span extends into the next block.
    wide: bool,
}

fn plan_read(
    point: &GridPoint,
    table: &mut VecPlanTable,
    order: TraversalOrder,
    allow_unaligned: bool,
) -> VecPlan {
    let fold = table.fold.clone();

    // Home block and span per dimension, in the grid's declared order.
    let mut spans: Vec<DimSpan> = Vec::with_capacity(point.offsets.len());
    for (dim, off) in point.offsets.entries() {
        let len = fold.lookup(dim).unwrap_or(1);
        if len <= 1 {
            spans.push(DimSpan {
                dim: dim.to_string(),
                coord: off,
                rem: 0,
                wide: false,
            });
        } else {
            let rem = off.rem_euclid(len);
            let base = off - rem;
            spans.push(DimSpan {
                dim: dim.to_string(),
                coord: base / len,
                rem,
                wide: rem != 0,
            });
        }
    }
    let participating: Vec<usize> = spans
        .iter()
        .enumerate()
        .filter(|(_, s)| s.wide)
        .map(|(i, _)| i)
        .collect();

    // Unaligned policy: the whole read becomes one unaligned load. The
    // driver guarantees at most one folded dimension of length > 1.
    if allow_unaligned && !participating.is_empty() {
        return VecPlan {
            point: point.clone(),
            blocks: Vec::new(),
            lanes: Vec::new(),
            kind: VecPlanKind::Unaligned,
        };
    }

    // Cartesian product of per-dimension spans, first participating
    // dimension varying fastest, deduplicated across the whole DAG.
    let mut span_shape = IntTuple::new();
    for &i in &participating {
        span_shape.add_dim(&spans[i].dim, 2);
    }
    let mut blocks = Vec::new();
    span_shape.visit_all_points(TraversalOrder::FirstInner, |corner| {
        let mut coords = IntTuple::new();
        for s in &spans {
            let step = corner.lookup(&s.dim).unwrap_or(0);
            coords.add_dim(&s.dim, s.coord + step);
        }
        let id = table.block_id(AlignedBlock {
            grid: point.grid.clone(),
            block: coords,
        });
        blocks.push(id);
    });

    // Output-lane mapping: walk the fold's lanes in layout order and
    // locate each element's source block and lane within it.
    let mut lanes = Vec::with_capacity(table.vlen as usize);
    for flat in 0..fold.product() {
        let pos = fold.point_at(flat, order);
        let mut coords = IntTuple::new();
        let mut rems = IntTuple::new();
        for s in &spans {
            let len = fold.lookup(&s.dim).unwrap_or(1);
            if len <= 1 {
                coords.add_dim(&s.dim, s.coord);
            } else {
                let elem = point.offsets.get(&s.dim) + pos.get(&s.dim);
                coords.add_dim(&s.dim, elem.div_euclid(len));
                rems.set_val(&s.dim, elem.rem_euclid(len));
            }
        }
        // Lane within the source block, under the same layout order.
        let mut rem_point = IntTuple::new();
        for (dim, _) in fold.entries() {
            rem_point.add_dim(dim, rems.lookup(dim).unwrap_or(0));
        }
        let lane = fold.flat_index_of(&rem_point, order);
        let block = table.block_id(AlignedBlock {
            grid: point.grid.clone(),
            block: coords,
        });
        lanes.push(LaneSource { block, lane });
    }

    let kind = match participating.len() {
        0 => VecPlanKind::SingleAligned { block: blocks[0] },
        1 => {
            let s = &spans[participating[0]];
            VecPlanKind::Align {
                dim: s.dim.clone(),
                shift: s.rem,
                lo: blocks[0],
                hi: blocks[1],
            }
        }
        _ => {
            // Fold pairwise along each participating dimension in
            // declaration order; the product order above makes each
            // level's pairs adjacent.
            let mut steps = Vec::new();
            let mut ops: Vec<Operand> = blocks.iter().map(|b| Operand::Block(*b)).collect();
            for &i in &participating {
                let s = &spans[i];
                let mut next = Vec::with_capacity(ops.len() / 2);
                for pair in ops.chunks(2) {
                    let dst = table.alloc_temp();
                    steps.push(AlignStep {
                        dim: s.dim.clone(),
                        shift: s.rem,
                        lo: pair[0],
                        hi: pair[1],
                        dst,
                    });
                    next.push(Operand::Temp(dst));
                }
                ops = next;
            }
            VecPlanKind::Compose { steps }
        }
    };

    VecPlan {
        point: point.clone(),
        blocks,
        lanes,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Ast;

    fn eq_reading(grid: &str, offsets: &[(&str, i64)]) -> Equation {
        let point = GridPoint::new(grid, IntTuple::from_pairs(offsets));
        Equation {
            grid: "out".to_string(),
            offsets: IntTuple::from_pairs(offsets),
            rhs: Ast::grid_read(point).into_expr(),
        }
    }

    fn fold_x4() -> IntTuple {
        IntTuple::from_pairs(&[("x", 4)])
    }

    #[test]
    fn aligned_read_is_single_block() {
        let eqs = vec![eq_reading("A", &[("x", 8)])];
        let table = analyze(&eqs, &fold_x4(), TraversalOrder::FirstInner, false).unwrap();
        let plan = table
            .plan_for(&GridPoint::new("A", IntTuple::from_pairs(&[("x", 8)])))
            .unwrap();
        assert!(matches!(plan.kind, VecPlanKind::SingleAligned { .. }));
        assert_eq!(plan.blocks.len(), 1);
        assert_eq!(table.block(plan.blocks[0]).block.get("x"), 2);
    }

    #[test]
    fn misaligned_read_spans_two_blocks_with_align() {
        let eqs = vec![eq_reading("A", &[("x", 1)])];
        let table = analyze(&eqs, &fold_x4(), TraversalOrder::FirstInner, false).unwrap();
        let plan = table
            .plan_for(&GridPoint::new("A", IntTuple::from_pairs(&[("x", 1)])))
            .unwrap();
        match &plan.kind {
            VecPlanKind::Align { dim, shift, lo, hi } => {
                assert_eq!(dim, "x");
                assert_eq!(*shift, 1);
                assert_eq!(table.block(*lo).block.get("x"), 0);
                assert_eq!(table.block(*hi).block.get("x"), 1);
            }
            other => panic!("expected align plan, got {:?}", other),
        }
    }

    #[test]
    fn negative_offset_uses_euclidean_home_block() {
        let eqs = vec![eq_reading("A", &[("x", -1)])];
        let table = analyze(&eqs, &fold_x4(), TraversalOrder::FirstInner, false).unwrap();
        let plan = table
            .plan_for(&GridPoint::new("A", IntTuple::from_pairs(&[("x", -1)])))
            .unwrap();
        match &plan.kind {
            VecPlanKind::Align { shift, lo, hi, .. } => {
                assert_eq!(*shift, 3);
                assert_eq!(table.block(*lo).block.get("x"), -1);
                assert_eq!(table.block(*hi).block.get("x"), 0);
            }
            other => panic!("expected align plan, got {:?}", other),
        }
    }

    #[test]
    fn lane_mapping_covers_requested_vector_exactly() {
        let fold = IntTuple::from_pairs(&[("x", 4), ("y", 2)]);
        let offsets = IntTuple::from_pairs(&[("x", -3), ("y", 1)]);
        let eqs = vec![eq_reading("A", &[("x", -3), ("y", 1)])];
        let table = analyze(&eqs, &fold, TraversalOrder::FirstInner, false).unwrap();
        let plan = table.plan_for(&GridPoint::new("A", offsets.clone())).unwrap();
        assert_eq!(plan.lanes.len(), 8);

        // Reconstruct each lane's element point; the set must equal the
        // requested vector of points, no duplicates, no gaps.
        let mut reconstructed = Vec::new();
        for src in &plan.lanes {
            let block = table.block(src.block);
            let low = block.low_corner(&fold);
            let within = fold.point_at(src.lane, TraversalOrder::FirstInner);
            reconstructed.push(low.add_elements(&within));
        }
        let mut expected = Vec::new();
        fold.visit_all_points(TraversalOrder::FirstInner, |pos| {
            expected.push(offsets.add_elements(pos));
        });
        assert_eq!(reconstructed, expected);
    }

    #[test]
    fn two_dim_misalignment_composes_pairwise_aligns() {
        let fold = IntTuple::from_pairs(&[("x", 4), ("y", 2)]);
        let eqs = vec![eq_reading("A", &[("x", 1), ("y", 1)])];
        let table = analyze(&eqs, &fold, TraversalOrder::FirstInner, false).unwrap();
        let plan = table
            .plan_for(&GridPoint::new(
                "A",
                IntTuple::from_pairs(&[("x", 1), ("y", 1)]),
            ))
            .unwrap();
        assert_eq!(plan.blocks.len(), 4);
        match &plan.kind {
            VecPlanKind::Compose { steps } => {
                assert_eq!(steps.len(), 3);
                // Two aligns along x (declared first), then one along y.
                assert_eq!(steps[0].dim, "x");
                assert_eq!(steps[1].dim, "x");
                assert_eq!(steps[2].dim, "y");
                assert!(matches!(steps[2].lo, Operand::Temp(_)));
                assert!(matches!(steps[2].hi, Operand::Temp(_)));
            }
            other => panic!("expected compose plan, got {:?}", other),
        }
    }

    #[test]
    fn blocks_are_deduplicated_across_reads() {
        // A(x-1) and A(x+1) share the home block of the iteration.
        let eqs = vec![
            eq_reading("A", &[("x", -1)]),
            eq_reading("A", &[("x", 1)]),
        ];
        let table = analyze(&eqs, &fold_x4(), TraversalOrder::FirstInner, false).unwrap();
        assert_eq!(table.num_points(), 2);
        assert_eq!(table.num_blocks(), 3);
    }

    #[test]
    fn unaligned_policy_single_fold_dim() {
        let eqs = vec![eq_reading("A", &[("x", 1)])];
        let table = analyze(&eqs, &fold_x4(), TraversalOrder::FirstInner, true).unwrap();
        let plan = table
            .plan_for(&GridPoint::new("A", IntTuple::from_pairs(&[("x", 1)])))
            .unwrap();
        assert!(matches!(plan.kind, VecPlanKind::Unaligned));
        assert!(plan.blocks.is_empty());
    }

    #[test]
    fn unaligned_policy_keeps_aligned_reads_aligned() {
        let eqs = vec![eq_reading("A", &[("x", 4)])];
        let table = analyze(&eqs, &fold_x4(), TraversalOrder::FirstInner, true).unwrap();
        let plan = table
            .plan_for(&GridPoint::new("A", IntTuple::from_pairs(&[("x", 4)])))
            .unwrap();
        assert!(matches!(plan.kind, VecPlanKind::SingleAligned { .. }));
    }

    #[test]
    fn unaligned_with_multi_dim_fold_is_rejected() {
        let fold = IntTuple::from_pairs(&[("x", 4), ("y", 2)]);
        let eqs = vec![eq_reading("A", &[("x", 1), ("y", 0)])];
        let err = analyze(&eqs, &fold, TraversalOrder::FirstInner, true).unwrap_err();
        assert_eq!(err.code, Some(codes::UNALIGNED_CONFLICT));
    }

    #[test]
    fn unfolded_dim_passes_through_raw_offset() {
        let fold = IntTuple::from_pairs(&[("x", 4), ("t", 1)]);
        let eqs = vec![eq_reading("A", &[("t", -1), ("x", 0)])];
        let table = analyze(&eqs, &fold, TraversalOrder::FirstInner, false).unwrap();
        let plan = table
            .plan_for(&GridPoint::new(
                "A",
                IntTuple::from_pairs(&[("t", -1), ("x", 0)]),
            ))
            .unwrap();
        assert_eq!(plan.blocks.len(), 1);
        let block = table.block(plan.blocks[0]);
        assert_eq!(block.block.get("t"), -1);
        assert_eq!(block.block.get("x"), 0);
    }
}
