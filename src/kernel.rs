//! Symmetric sequential kernel.
//!
//! Operates on a single process's local dense buffers after all
//! distribution/virtualization wrappings have already selected this
//! process's block — the outer plan-tree nodes ([`crate::plan`]) are
//! responsible for that selection; this module only walks the
//! traversal-bound-restricted index space of the resulting local operands.

use crate::fold::FoldPlan;
use crate::semiring::Semiring;
use crate::symmetry::{row_major_strides, unravel};
use crate::tensor::SymMark;
use rustc_hash::{FxHashMap, FxHashSet};

/// A local operand's shape for kernel purposes: mode labels (unique —
/// diagonal extraction is assumed already applied upstream), adjacent-pair
/// symmetry marks (`sym[i]` relates mode `i` and `i+1`, same convention as
/// [`crate::tensor::TensorMeta`]), and edge lengths.
#[derive(Clone, Debug)]
pub struct OperandLayout {
    /// Mode labels, one per mode, unique within this operand.
    pub labels: Vec<char>,
    /// Adjacent-pair symmetry marks.
    pub sym: Vec<SymMark>,
    /// Edge length per mode (local, already mapped/padded as needed).
    pub edge_len: Vec<usize>,
}

impl OperandLayout {
    /// Builds a layout with no declared symmetry (`NS` everywhere).
    #[must_use]
    pub fn dense(labels: Vec<char>, edge_len: Vec<usize>) -> Self {
        let sym = vec![SymMark::NS; labels.len()];
        Self { labels, sym, edge_len }
    }

    fn strides(&self) -> Vec<usize> {
        row_major_strides(&self.edge_len)
    }

    fn mode_of(&self, label: char) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }
}

/// Joined label universe in first-occurrence order across `A`, `B`, `C`,
/// restricted here to the shape the sequential kernel needs rather than
/// the full presence mask the planner computes.
fn label_universe(a: &OperandLayout, b: &OperandLayout, c: &OperandLayout) -> Vec<char> {
    let mut seen = FxHashSet::default();
    let mut order = Vec::new();
    for layout in [a, b, c] {
        for &l in &layout.labels {
            if seen.insert(l) {
                order.push(l);
            }
        }
    }
    order
}

fn label_extent(label: char, a: &OperandLayout, b: &OperandLayout, c: &OperandLayout) -> usize {
    for layout in [a, b, c] {
        if let Some(m) = layout.mode_of(label) {
            return layout.edge_len[m];
        }
    }
    unreachable!("label must appear in at least one operand")
}

/// Computes the `(min, max)` traversal bound for `label` at its mode in
/// `layout`, given the labels already assigned in `assigned`: `min = idx[i]`
/// for `SY`/`SH`, `min = idx[i] + 1` for `AS`, where `i` is the symmetric
/// partner immediately preceding `j` in the same operand.
fn tighten_bound(label: char, layout: &OperandLayout, assigned: &FxHashMap<char, usize>, default_max: usize) -> (usize, usize) {
    let Some(mode) = layout.mode_of(label) else { return (0, default_max) };
    if mode == 0 {
        return (0, default_max);
    }
    let prev_mark = layout.sym[mode - 1];
    if !prev_mark.is_symmetric() {
        return (0, default_max);
    }
    let prev_label = layout.labels[mode - 1];
    let Some(&prev_val) = assigned.get(&prev_label) else { return (0, default_max) };
    let min = match prev_mark {
        SymMark::AS => prev_val + 1,
        _ => prev_val,
    };
    (min, default_max)
}

/// The cross-operand symmetry predicate (`CHECK_SYM`): for each operand's
/// declared symmetric groups, if two distinct *global*
/// labels occupying a symmetric pair currently hold equal values, this point
/// is a spurious diagonal artifact of a broken-symmetry unfolding and must
/// not contribute.
fn check_sym(layout: &OperandLayout, assigned: &FxHashMap<char, usize>) -> bool {
    for mode in 0..layout.labels.len().saturating_sub(1) {
        if layout.sym[mode].is_symmetric() {
            let (l0, l1) = (layout.labels[mode], layout.labels[mode + 1]);
            if l0 != l1 {
                if let (Some(&v0), Some(&v1)) = (assigned.get(&l0), assigned.get(&l1)) {
                    if v0 == v1 {
                        return false;
                    }
                }
            }
        }
    }
    true
}

fn offset_of(layout: &OperandLayout, strides: &[usize], assigned: &FxHashMap<char, usize>) -> usize {
    layout
        .labels
        .iter()
        .zip(strides)
        .map(|(&label, &stride)| assigned.get(&label).copied().unwrap_or(0) * stride)
        .sum()
}

/// Executes the unfolded symmetric sequential contraction kernel:
/// `C[idx_C] = beta * C[idx_C] + alpha * A[idx_A] * B[idx_B]`, walking the
/// traversal-bound-restricted index space of `a`/`b`/`c` with the
/// bound-tightening and `CHECK_SYM` rules.
///
/// `fold`, when present, short-circuits the whole walk into a single
/// `gemm` call over the dense buffers — valid when the contraction has no
/// virtualization and no symmetry within the folded groups (the concrete
/// matmul-shaped scenarios this crate targets); a fold plan coexisting with
/// surviving symmetry groups is rejected upstream by [`crate::fold::can_fold`]
/// only when the breaking is structural (interleaved classes), not when
/// symmetry merely persists inside one class's run, so callers must not pass
/// `fold` when `a`/`b`/`c` still carry `sym` marks outside `NS`.
///
/// `respect_check_sym` enables the `CHECK_SYM` predicate. It must stay
/// `false` for an ordinary single-term contraction
/// over a tensor's own symmetric modes (there, equal index values on a
/// symmetric pair are the legitimate diagonal, not a spurious artifact).
/// It is meant for `true` only when this call is one term of a
/// desymmetrized sum-of-permutations expansion ([`crate::symmetry::get_sym_perms`]),
/// where a tensor's originally-symmetric pair has been split across two
/// distinct global contraction labels and the diagonal must not be
/// double-counted across terms.
#[allow(clippy::too_many_arguments)]
pub fn contract_sequential<T: Copy, S: Semiring<T>>(
    sr: &S,
    a: &OperandLayout,
    a_data: &[T],
    b: &OperandLayout,
    b_data: &[T],
    c: &OperandLayout,
    c_data: &mut [T],
    alpha: T,
    beta: T,
    fold: Option<FoldPlan>,
    respect_check_sym: bool,
) {
    if let Some(plan) = fold {
        run_folded(sr, a_data, b_data, c_data, alpha, beta, &plan);
        return;
    }

    let universe = label_universe(a, b, c);
    let c_strides = c.strides();
    let a_strides = a.strides();
    let b_strides = b.strides();

    let mut assigned = FxHashMap::default();
    let mut scaled = FxHashSet::default();
    walk_unfolded(
        sr, &universe, 0, a, &a_strides, a_data, b, &b_strides, b_data, c, &c_strides, c_data, alpha, beta, respect_check_sym, &mut assigned,
        &mut scaled,
    );
}

#[allow(clippy::too_many_arguments)]
fn walk_unfolded<T: Copy, S: Semiring<T>>(
    sr: &S,
    universe: &[char],
    pos: usize,
    a: &OperandLayout,
    a_strides: &[usize],
    a_data: &[T],
    b: &OperandLayout,
    b_strides: &[usize],
    b_data: &[T],
    c: &OperandLayout,
    c_strides: &[usize],
    c_data: &mut [T],
    alpha: T,
    beta: T,
    respect_check_sym: bool,
    assigned: &mut FxHashMap<char, usize>,
    scaled: &mut FxHashSet<usize>,
) {
    if pos == universe.len() {
        if respect_check_sym && (!check_sym(a, assigned) || !check_sym(b, assigned) || !check_sym(c, assigned)) {
            return;
        }
        let off_c = offset_of(c, c_strides, assigned);
        if !sr.isequal(beta, sr.mulid()) && scaled.insert(off_c) {
            c_data[off_c] = sr.scale_elem(beta, c_data[off_c]);
        }
        let off_a = offset_of(a, a_strides, assigned);
        let off_b = offset_of(b, b_strides, assigned);
        c_data[off_c] = sr.fma(alpha, a_data[off_a], b_data[off_b], sr.mulid(), c_data[off_c]);
        return;
    }

    let label = universe[pos];
    let default_max = label_extent(label, a, b, c);
    let (mut min, mut max) = (0, default_max);
    for layout in [a, b, c] {
        let (lo, hi) = tighten_bound(label, layout, assigned, default_max);
        min = min.max(lo);
        max = max.min(hi);
    }

    for value in min..max {
        assigned.insert(label, value);
        walk_unfolded(
            sr, universe, pos + 1, a, a_strides, a_data, b, b_strides, b_data, c, c_strides, c_data, alpha, beta, respect_check_sym, assigned, scaled,
        );
    }
    assigned.remove(&label);
}

fn run_folded<T: Copy, S: Semiring<T>>(sr: &S, a_data: &[T], b_data: &[T], c_data: &mut [T], alpha: T, beta: T, plan: &FoldPlan) {
    let lda = if plan.ta { plan.m } else { plan.k };
    let ldb = if plan.tb { plan.k } else { plan.n };
    sr.gemm(plan.ta, plan.tb, plan.m, plan.n, plan.k, alpha, a_data, lda, b_data, ldb, beta, c_data, plan.n);
}

/// Builds the flat row-major buffer offset for a dense tensor given an
/// index tuple, exposed for callers (home-buffer restore, tests) that need
/// to address the same packed layout the kernel uses.
#[must_use]
pub fn flat_offset(edge_len: &[usize], idx: &[usize]) -> usize {
    let strides = row_major_strides(edge_len);
    idx.iter().zip(&strides).map(|(&i, &s)| i * s).sum()
}

/// Unravels a flat row-major offset back into an index tuple.
#[must_use]
pub fn unravel_index(flat: usize, edge_len: &[usize]) -> Vec<usize> {
    unravel(flat, edge_len)
}
