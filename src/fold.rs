//! Folding: collapsing contiguous index groups into matrix rows/columns so
//! the sequential kernel's inner loop becomes a single `gemm`.

use itertools::Itertools;

/// Which two operands an index class is shared between. A folded
/// contraction only ever sees `AB` (the contracted axis, becomes `k`), `AC`
/// (A's free axis, becomes `m`) or `BC` (B's free axis, becomes `n`) — any
/// index touching all three, or only one, of `{A,B,C}` cannot fold (the
/// former has no matrix-multiply analogue; the latter is summed/diagonal,
/// handled upstream by symmetry normalization).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexClass {
    /// Contracted index: in A and B, not in C.
    Ab,
    /// A's external index: in A and C, not in B.
    Ac,
    /// B's external index: in B and C, not in A.
    Bc,
    /// Touches all three or only one operand — never foldable.
    Unfoldable,
}

/// Classifies `label` by which of `{a, b, c}` it appears in.
#[must_use]
pub fn classify(label: char, a: &[char], b: &[char], c: &[char]) -> IndexClass {
    let in_a = a.contains(&label);
    let in_b = b.contains(&label);
    let in_c = c.contains(&label);
    match (in_a, in_b, in_c) {
        (true, true, false) => IndexClass::Ab,
        (true, false, true) => IndexClass::Ac,
        (false, true, true) => IndexClass::Bc,
        _ => IndexClass::Unfoldable,
    }
}

/// The result of a successful [`map_fold`]: the inner matrix-multiply
/// triple plus a transpose flag per operand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FoldPlan {
    /// Rows of `C` (and of `op(A)`).
    pub m: usize,
    /// Columns of `C` (and of `op(B)`).
    pub n: usize,
    /// Contracted dimension.
    pub k: usize,
    /// Transpose `A` before multiplying.
    pub ta: bool,
    /// Transpose `B` before multiplying.
    pub tb: bool,
    /// Total size of `C`'s folded block (`m * n`), used by the kernel to
    /// size the lazy β-scale.
    pub sz_c: usize,
}

/// Checks whether `(labels_a, labels_b, labels_c)` can fold: every label
/// must classify as exactly one of `Ab`/`Ac`/`Bc` (every run touches
/// exactly two of {A,B,C}), and, within each operand, all labels of the
/// same class must form one contiguous run (so the run can become a matrix
/// axis without reordering memory).
#[must_use]
pub fn can_fold(labels_a: &[char], labels_b: &[char], labels_c: &[char]) -> bool {
    let universe: Vec<char> = labels_a
        .iter()
        .chain(labels_b)
        .chain(labels_c)
        .copied()
        .unique()
        .collect();

    if universe
        .iter()
        .any(|&l| classify(l, labels_a, labels_b, labels_c) == IndexClass::Unfoldable)
    {
        return false;
    }

    is_grouped_by_class(labels_a, labels_b, labels_c)
        && is_grouped_by_class(labels_b, labels_a, labels_c)
        && is_grouped_by_class(labels_c, labels_a, labels_b)
}

fn is_grouped_by_class(own: &[char], other1: &[char], other2: &[char]) -> bool {
    let classes: Vec<IndexClass> = own
        .iter()
        .map(|&l| classify_in(l, own, other1, other2))
        .collect();
    // a sequence is "grouped" if, scanning left to right, once a class is
    // left behind it never reappears.
    let mut seen = Vec::new();
    for class in classes {
        if seen.last() == Some(&class) {
            continue;
        }
        if seen.contains(&class) {
            return false;
        }
        seen.push(class);
    }
    true
}

/// Like [`classify`] but takes the operand that owns `label` as `own`
/// (disambiguating which of the two remaining operand label sets plays the
/// role of "b"/"c" in [`classify`]'s signature is irrelevant to the
/// classification itself, only to which `IndexClass` variant comes out —
/// callers of [`is_grouped_by_class`] only care whether runs are
/// contiguous, not the variant's name).
fn classify_in(label: char, own: &[char], other1: &[char], other2: &[char]) -> IndexClass {
    let in_other1 = other1.contains(&label);
    let in_other2 = other2.contains(&label);
    debug_assert!(own.contains(&label));
    match (in_other1, in_other2) {
        (true, false) => IndexClass::Ab,
        (false, true) => IndexClass::Ac,
        (true, true) => IndexClass::Unfoldable,
        (false, false) => IndexClass::Bc,
    }
}

/// Builds the inner matrix-multiply triple for a foldable contraction.
/// `edge_len_*` give the edge length of each mode in the corresponding
/// operand's label order.
///
/// # Panics
///
/// Panics if `can_fold` would return `false` for these labels (callers are
/// expected to check first).
#[must_use]
pub fn map_fold(
    labels_a: &[char],
    edge_len_a: &[usize],
    labels_b: &[char],
    edge_len_b: &[usize],
    labels_c: &[char],
    edge_len_c: &[usize],
) -> FoldPlan {
    assert!(can_fold(labels_a, labels_b, labels_c), "operands are not foldable");

    let m: usize = labels_a
        .iter()
        .zip(edge_len_a)
        .filter(|(&l, _)| classify(l, labels_a, labels_b, labels_c) == IndexClass::Ac)
        .map(|(_, &len)| len)
        .product();
    let n: usize = labels_b
        .iter()
        .zip(edge_len_b)
        .filter(|(&l, _)| classify(l, labels_a, labels_b, labels_c) == IndexClass::Bc)
        .map(|(_, &len)| len)
        .product();
    let k: usize = labels_a
        .iter()
        .zip(edge_len_a)
        .filter(|(&l, _)| classify(l, labels_a, labels_b, labels_c) == IndexClass::Ab)
        .map(|(_, &len)| len)
        .product();

    // A is stored with modes in `labels_a` order; if its leading (first)
    // surviving class-run is the contracted (k) class, the storage is
    // effectively (k, m) and must be read transposed to behave as (m, k).
    let ta = labels_a
        .first()
        .is_some_and(|&l| classify(l, labels_a, labels_b, labels_c) == IndexClass::Ab);
    // B is stored with modes in `labels_b` order; (n, k) storage (n leading)
    // must be transposed to behave as (k, n).
    let tb = labels_b
        .first()
        .is_some_and(|&l| classify(l, labels_a, labels_b, labels_c) == IndexClass::Bc);

    let m = m.max(1);
    let n = n.max(1);
    let k = k.max(1);
    FoldPlan { m, n, k, ta, tb, sz_c: labels_c.iter().zip(edge_len_c).map(|(_, &l)| l).product::<usize>().max(1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_matmul_folds() {
        let a: Vec<char> = "ik".chars().collect();
        let b: Vec<char> = "kj".chars().collect();
        let c: Vec<char> = "ij".chars().collect();
        assert!(can_fold(&a, &b, &c));

        let plan = map_fold(&a, &[4, 6], &b, &[6, 5], &c, &[4, 5]);
        assert_eq!(plan.m, 4);
        assert_eq!(plan.n, 5);
        assert_eq!(plan.k, 6);
        assert!(!plan.ta); // A is (i,k) = (m,k): no transpose needed
        assert!(!plan.tb); // B is (k,j) = (k,n): no transpose needed
    }

    #[test]
    fn transposed_operand_storage_detected() {
        let a: Vec<char> = "ki".chars().collect(); // (k, m) storage
        let b: Vec<char> = "kj".chars().collect();
        let c: Vec<char> = "ij".chars().collect();
        assert!(can_fold(&a, &b, &c));
        let plan = map_fold(&a, &[6, 4], &b, &[6, 5], &c, &[4, 5]);
        assert!(plan.ta);
        assert!(!plan.tb);
    }

    #[test]
    fn index_touching_all_three_operands_never_folds() {
        // a pure Hadamard-like product where 'i' is in all three: no matrix
        // multiply analogue.
        let a: Vec<char> = "i".chars().collect();
        let b: Vec<char> = "i".chars().collect();
        let c: Vec<char> = "i".chars().collect();
        assert!(!can_fold(&a, &b, &c));
    }

    #[test]
    fn noncontiguous_class_runs_do_not_fold() {
        // k and l are both contracted (Ab-class) against B, but i (Ac-class)
        // splits them in A's mode order: k, i, l.
        let a: Vec<char> = "kil".chars().collect();
        let b: Vec<char> = "kl".chars().collect();
        let c: Vec<char> = "i".chars().collect();
        assert!(!can_fold(&a, &b, &c));
    }
}
