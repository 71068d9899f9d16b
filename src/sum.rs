//! Summation planner and kernel: the two-operand specialization of the
//! contraction planner and sequential kernel.
//!
//! `B[idx_B] = beta * B[idx_B] + alpha * A[idx_A]`. Unlike the contraction
//! kernel, the "scale `B` by β at most once" property cannot piggyback on a
//! (possibly empty) iteration over `A`'s index space the way the
//! contraction kernel's lazy scale does, because `A`'s label set may only
//! cover a strict subset of `B`'s modes (an implicit broadcast-sum). So the
//! summation kernel runs an explicit prior traversal over *B's own* index
//! space first, scaling exactly the positions the main traversal will later
//! touch, rather than scaling the whole tensor.

use crate::semiring::Semiring;
use crate::symmetry::row_major_strides;
use crate::tensor::SymMark;
use rustc_hash::{FxHashMap, FxHashSet};

/// Operand layout for the summation kernel; identical shape to
/// [`crate::kernel::OperandLayout`] but kept as its own type since the two
/// kernels are independent components.
#[derive(Clone, Debug)]
pub struct OperandLayout {
    /// Mode labels, unique within this operand.
    pub labels: Vec<char>,
    /// Adjacent-pair symmetry marks.
    pub sym: Vec<SymMark>,
    /// Edge length per mode.
    pub edge_len: Vec<usize>,
}

impl OperandLayout {
    /// Builds a layout with no declared symmetry.
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

fn label_universe(a: &OperandLayout, b: &OperandLayout) -> Vec<char> {
    let mut seen = FxHashSet::default();
    let mut order = Vec::new();
    for layout in [a, b] {
        for &l in &layout.labels {
            if seen.insert(l) {
                order.push(l);
            }
        }
    }
    order
}

fn label_extent(label: char, a: &OperandLayout, b: &OperandLayout) -> usize {
    for layout in [a, b] {
        if let Some(m) = layout.mode_of(label) {
            return layout.edge_len[m];
        }
    }
    unreachable!("label must appear in at least one operand")
}

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

/// Executes `B[idx_B] = beta * B[idx_B] + alpha * A[idx_A]` by walking the
/// traversal-bound-restricted index space of `a`/`b`.
///
/// When `a` and `b` are foldable into a contiguous stripe relationship
/// (identical label order, `a`'s labels a prefix of `b`'s, or vice versa),
/// callers should prefer [`axpy_stripe`] directly; this function always
/// takes the general unfolded path.
///
/// `respect_check_sym` gates the `CHECK_SYM` predicate; see
/// [`crate::kernel::contract_sequential`]'s doc comment for when `true` is
/// appropriate (a desymmetrized permutation-sum term, never an ordinary
/// single-term sum over a tensor's own symmetric modes).
pub fn sum_sequential<T: Copy, S: Semiring<T>>(
    sr: &S,
    a: &OperandLayout,
    a_data: &[T],
    b: &OperandLayout,
    b_data: &mut [T],
    alpha: T,
    beta: T,
    respect_check_sym: bool,
) {
    // Prior full traversal of B's own index space, scaling exactly the
    // positions the main traversal will subsequently read.
    if !sr.isequal(beta, sr.mulid()) {
        scale_b_traversal(sr, b, b_data, beta);
    }

    let universe = label_universe(a, b);
    let a_strides = a.strides();
    let b_strides = b.strides();
    let mut assigned = FxHashMap::default();
    walk(sr, &universe, 0, a, &a_strides, a_data, b, &b_strides, b_data, alpha, respect_check_sym, &mut assigned);
}

fn scale_b_traversal<T: Copy, S: Semiring<T>>(sr: &S, b: &OperandLayout, b_data: &mut [T], beta: T) {
    let strides = b.strides();
    let universe: Vec<char> = b.labels.clone();
    let mut assigned = FxHashMap::default();
    scale_walk(sr, &universe, 0, b, &strides, b_data, beta, &mut assigned);
}

fn scale_walk<T: Copy, S: Semiring<T>>(
    sr: &S,
    universe: &[char],
    pos: usize,
    b: &OperandLayout,
    strides: &[usize],
    b_data: &mut [T],
    beta: T,
    assigned: &mut FxHashMap<char, usize>,
) {
    if pos == universe.len() {
        let off = offset_of(b, strides, assigned);
        b_data[off] = sr.scale_elem(beta, b_data[off]);
        return;
    }
    let label = universe[pos];
    let default_max = b.edge_len[b.mode_of(label).unwrap()];
    let (min, max) = tighten_bound(label, b, assigned, default_max);
    for value in min..max {
        assigned.insert(label, value);
        scale_walk(sr, universe, pos + 1, b, strides, b_data, beta, assigned);
    }
    assigned.remove(&label);
}

#[allow(clippy::too_many_arguments)]
fn walk<T: Copy, S: Semiring<T>>(
    sr: &S,
    universe: &[char],
    pos: usize,
    a: &OperandLayout,
    a_strides: &[usize],
    a_data: &[T],
    b: &OperandLayout,
    b_strides: &[usize],
    b_data: &mut [T],
    alpha: T,
    respect_check_sym: bool,
    assigned: &mut FxHashMap<char, usize>,
) {
    if pos == universe.len() {
        if respect_check_sym && (!check_sym(a, assigned) || !check_sym(b, assigned)) {
            return;
        }
        let off_a = offset_of(a, a_strides, assigned);
        let off_b = offset_of(b, b_strides, assigned);
        b_data[off_b] = sr.fma(alpha, a_data[off_a], sr.mulid(), sr.mulid(), b_data[off_b]);
        return;
    }
    let label = universe[pos];
    let default_max = label_extent(label, a, b);
    let (mut min, mut max) = (0, default_max);
    for layout in [a, b] {
        let (lo, hi) = tighten_bound(label, layout, assigned, default_max);
        min = min.max(lo);
        max = max.min(hi);
    }
    for value in min..max {
        assigned.insert(label, value);
        walk(sr, universe, pos + 1, a, a_strides, a_data, b, b_strides, b_data, alpha, respect_check_sym, assigned);
    }
    assigned.remove(&label);
}

/// Folded path: valid when `a.labels == b.labels` in the same order, so the
/// entire operand is one contiguous run and the sum reduces to a single
/// `axpy` call.
pub fn axpy_stripe<T: Copy, S: Semiring<T>>(sr: &S, a_data: &[T], b_data: &mut [T], alpha: T, beta: T) {
    if !sr.isequal(beta, sr.mulid()) {
        for v in b_data.iter_mut() {
            *v = sr.scale_elem(beta, *v);
        }
    }
    sr.axpy(a_data.len(), alpha, a_data, 1, b_data, 1);
}
