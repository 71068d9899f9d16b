//! Symmetry and diagonal normalization: collapsing repeated labels to a
//! diagonal, aligning a symmetric group's canonical order against an
//! applied permutation, overcounting correction, and the two strategies
//! for contracting a symmetric group that a contraction only partially
//! uses (desymmetrize, or sum over signed permutations).

use crate::tensor::SymMark;
use itertools::Itertools;
use rustc_hash::FxHashMap;

/// Result of [`extract_diag`]: the reduced label list (one entry per
/// distinct label, first-occurrence order) plus, for each reduced mode, the
/// original mode positions that were collapsed into it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiagExtraction {
    /// Reduced labels, one per surviving mode.
    pub labels: Vec<char>,
    /// For each reduced mode, the original mode indices (in the
    /// pre-extraction operand) that repeated this label.
    pub source_modes: Vec<Vec<usize>>,
}

/// Extracts repeated labels from `labels`: when `labels` repeats a label,
/// the repeated modes collapse into a single reduced mode.
/// Applied conceptually "until no repeats remain" — since a label can only
/// repeat as a set of positions, one pass already finds every repeat.
#[must_use]
pub fn extract_diag(labels: &[char]) -> DiagExtraction {
    let mut first_seen: FxHashMap<char, usize> = FxHashMap::default();
    let mut source_modes: Vec<Vec<usize>> = Vec::new();
    let mut out_labels = Vec::new();

    for (pos, &label) in labels.iter().enumerate() {
        if let Some(&reduced_idx) = first_seen.get(&label) {
            source_modes[reduced_idx].push(pos);
        } else {
            first_seen.insert(label, out_labels.len());
            out_labels.push(label);
            source_modes.push(vec![pos]);
        }
    }

    DiagExtraction { labels: out_labels, source_modes }
}

/// Reads the diagonal of a dense row-major buffer described by
/// `DiagExtraction::source_modes`, given the full (pre-extraction)
/// `edge_len` per original mode.
///
/// This is the data-level counterpart of [`extract_diag`]: it walks the
/// *reduced* index space and reads back the one entry of the original dense
/// buffer at which all of a reduced mode's source positions agree.
#[must_use]
pub fn extract_diag_dense<T: Copy + Default>(
    data: &[T],
    edge_len: &[usize],
    extraction: &DiagExtraction,
) -> Vec<T> {
    let strides = row_major_strides(edge_len);
    let reduced_lens: Vec<usize> = extraction
        .source_modes
        .iter()
        .map(|modes| edge_len[modes[0]])
        .collect();
    let reduced_total: usize = reduced_lens.iter().product();

    let mut out = vec![T::default(); reduced_total];
    for flat in 0..reduced_total {
        let reduced_idx = unravel(flat, &reduced_lens);
        let mut full_idx = vec![0usize; edge_len.len()];
        for (reduced_mode, modes) in extraction.source_modes.iter().enumerate() {
            for &orig_mode in modes {
                full_idx[orig_mode] = reduced_idx[reduced_mode];
            }
        }
        let offset: usize = full_idx.iter().zip(&strides).map(|(&i, &s)| i * s).sum();
        out[flat] = data[offset];
    }
    out
}

/// Row-major strides for a dense buffer of shape `edge_len`. Shared by the
/// kernel and summation modules, which walk the same kind of dense local
/// buffers this module reads diagonals out of.
pub(crate) fn row_major_strides(edge_len: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; edge_len.len()];
    for i in (0..edge_len.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * edge_len[i + 1];
    }
    strides
}

pub(crate) fn unravel(mut flat: usize, lens: &[usize]) -> Vec<usize> {
    let mut idx = vec![0usize; lens.len()];
    for i in (0..lens.len()).rev() {
        idx[i] = flat % lens[i];
        flat /= lens[i];
    }
    idx
}

/// Compensating factor for choosing a canonical ordering of a contracted
/// symmetric index set. Reordering a `SY`/`SH` group's labels
/// into canonical order changes nothing (factor `1.0`); reordering an `AS`
/// group's labels multiplies by the sign of the permutation applied.
#[must_use]
pub fn align_symmetric_indices(mark: SymMark, permutation: &[usize]) -> f64 {
    match mark {
        SymMark::SY | SymMark::SH | SymMark::NS => 1.0,
        SymMark::AS => permutation_sign(permutation),
    }
}

fn permutation_sign(perm: &[usize]) -> f64 {
    let mut seen = vec![false; perm.len()];
    let mut sign = 1.0;
    for start in 0..perm.len() {
        if seen[start] {
            continue;
        }
        let mut cycle_len = 0;
        let mut i = start;
        while !seen[i] {
            seen[i] = true;
            i = perm[i];
            cycle_len += 1;
        }
        if cycle_len % 2 == 0 {
            sign = -sign;
        }
    }
    sign
}

/// Factorial overcounting correction: the product, over every
/// contracted symmetric group, of `g!` for that group's size `g`.
#[must_use]
pub fn overcounting_factor(contracted_group_sizes: &[usize]) -> f64 {
    contracted_group_sizes.iter().map(|&g| factorial(g)).product()
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|i| i as f64).product::<f64>().max(1.0)
}

/// Outcome of [`unfold_broken_sym`]: a tensor's symmetry mark is downgraded
/// at a position because the contraction's index map treats a declared
/// symmetric pair asymmetrically.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnfoldedSym {
    /// Symmetry marks with the offending position(s) downgraded to `NS`.
    pub sym: Vec<SymMark>,
    /// `true` if the caller must symmetrize the result afterward to restore
    /// the declared invariant.
    pub symmetrize_after: bool,
}

/// Detects whether `labels` contracts only part of a declared symmetric
/// group of `sym` (e.g. only one of a symmetric pair is contracted against
/// another operand) and, if so, downgrades that group to `NS` for the
/// purposes of this contraction.
///
/// `contracted` marks, per mode, whether that mode's label is contracted
/// (appears in another operand) rather than free.
#[must_use]
pub fn unfold_broken_sym(sym: &[SymMark], contracted: &[bool]) -> UnfoldedSym {
    assert_eq!(sym.len(), contracted.len());
    let mut out = sym.to_vec();
    let mut symmetrize_after = false;

    let mut i = 0;
    while i < sym.len() {
        if sym[i].is_symmetric() {
            let mark = sym[i];
            let mut j = i + 1;
            while j < sym.len() && sym[j - 1] == mark {
                j += 1;
            }
            let group_contracted: Vec<bool> = contracted[i..j].to_vec();
            let all_same = group_contracted.iter().all(|&c| c == group_contracted[0]);
            if !all_same {
                for mark_slot in out.iter_mut().take(j).skip(i) {
                    *mark_slot = SymMark::NS;
                }
                symmetrize_after = true;
            }
            i = j;
        } else {
            i += 1;
        }
    }

    UnfoldedSym { sym: out, symmetrize_after }
}

/// Restores a declared symmetric group's invariant on a dense result buffer
/// that was computed treating that group as plain (`NS`): every element
/// becomes the average of itself and its counterparts under every
/// permutation of the group's modes, each weighted by
/// [`align_symmetric_indices`] (so an antisymmetric group alternates sign
/// rather than averaging toward a value that would violate it).
///
/// `group` is `(start, end, mark)`, a half-open mode range as returned by
/// [`crate::tensor::TensorMeta::sym_groups`].
#[must_use]
pub fn symmetrize_broken_group<T>(data: &[T], edge_len: &[usize], group: (usize, usize, SymMark)) -> Vec<T>
where
    T: Copy + Default + std::ops::Add<Output = T> + std::ops::Mul<Output = T> + From<f64>,
{
    let (start, end, mark) = group;
    let group_len = end - start;
    let strides = row_major_strides(edge_len);
    let total: usize = edge_len.iter().product();
    let perms: Vec<Vec<usize>> = (0..group_len).permutations(group_len).collect();
    let weight = T::from(1.0 / factorial(group_len));

    let mut out = vec![T::default(); total];
    for flat in 0..total {
        let idx = unravel(flat, edge_len);
        let mut acc = T::default();
        for perm in &perms {
            let mut permuted = idx.clone();
            for (k, &p) in perm.iter().enumerate() {
                permuted[start + k] = idx[start + p];
            }
            let offset: usize = permuted.iter().zip(&strides).map(|(&i, &s)| i * s).sum();
            let sign = T::from(align_symmetric_indices(mark, perm));
            acc = acc + data[offset] * sign * weight;
        }
        out[flat] = acc;
    }
    out
}

/// Enumerates the minimal set of signed permutations of `group_positions`
/// (mode indices belonging to one broken symmetric group) that, applied as
/// independent contractions on `alpha` and summed, recover the symmetric
/// result without desymmetrizing.
///
/// Returns `(permutation_of_group_positions, scaled_alpha)` pairs; the
/// permutation is a full permutation of `0..group_positions.len()` to apply
/// to the group's label order, and `scaled_alpha` already folds in both the
/// `1/g!` average (so the sum over all permutations reproduces one
/// contraction at canonical order) and, for `AS`, the permutation's sign.
#[must_use]
pub fn get_sym_perms(mark: SymMark, group_len: usize, alpha: f64) -> Vec<(Vec<usize>, f64)> {
    if group_len <= 1 {
        return vec![(vec![0; group_len.min(1)], alpha)];
    }
    let g_fact = factorial(group_len);
    (0..group_len)
        .permutations(group_len)
        .map(|perm| {
            let coeff = match mark {
                SymMark::SY | SymMark::SH | SymMark::NS => alpha / g_fact,
                SymMark::AS => permutation_sign(&perm) * alpha / g_fact,
            };
            (perm, coeff)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_diag_finds_repeat() {
        let labels: Vec<char> = "ijij".chars().collect();
        let extraction = extract_diag(&labels);
        assert_eq!(extraction.labels, vec!['i', 'j']);
        assert_eq!(extraction.source_modes, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn extract_diag_no_repeat_is_identity() {
        let labels: Vec<char> = "ijk".chars().collect();
        let extraction = extract_diag(&labels);
        assert_eq!(extraction.labels, labels);
        assert_eq!(extraction.source_modes, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn extract_diag_dense_matches_manual_readout() {
        // A[3,3,3,3], C[i,j] = A[i,j,i,j]
        let edge_len = [3, 3, 3, 3];
        let total: usize = edge_len.iter().product();
        let data: Vec<f64> = (0..total).map(|i| i as f64).collect();
        let extraction = extract_diag(&['i', 'j', 'i', 'j']);
        let diag = extract_diag_dense(&data, &edge_len, &extraction);

        let strides = row_major_strides(&edge_len);
        for i in 0..3 {
            for j in 0..3 {
                let expected = data[i * strides[0] + j * strides[1] + i * strides[2] + j * strides[3]];
                assert_eq!(diag[i * 3 + j], expected);
            }
        }
    }

    #[test]
    fn overcounting_factor_matches_two_antisymmetric_pairs() {
        // contract(A, "ij", A, "ij", ...) over a single AS group of size 2
        // on each operand -> factor 2! * 2! = 4.
        assert_eq!(overcounting_factor(&[2, 2]), 4.0);
    }

    #[test]
    fn permutation_sign_matches_known_cases() {
        assert_eq!(permutation_sign(&[0, 1]), 1.0);
        assert_eq!(permutation_sign(&[1, 0]), -1.0);
        assert_eq!(permutation_sign(&[1, 2, 0]), 1.0); // 3-cycle, even
        assert_eq!(permutation_sign(&[1, 0, 2]), -1.0); // transposition, odd
    }

    #[test]
    fn unfold_broken_sym_downgrades_only_asymmetric_groups() {
        let sym = [SymMark::SY, SymMark::NS];
        // mode 0 contracted, mode 1 free -> asymmetric treatment
        let result = unfold_broken_sym(&sym, &[true, false]);
        assert_eq!(result.sym[0], SymMark::NS);
        assert!(result.symmetrize_after);
    }

    #[test]
    fn unfold_broken_sym_leaves_symmetric_use_untouched() {
        let sym = [SymMark::SY, SymMark::NS];
        let result = unfold_broken_sym(&sym, &[true, true]);
        assert_eq!(result.sym[0], SymMark::SY);
        assert!(!result.symmetrize_after);
    }

    #[test]
    fn get_sym_perms_pair_sums_to_one() {
        let perms = get_sym_perms(SymMark::SY, 2, 1.0);
        assert_eq!(perms.len(), 2);
        let total: f64 = perms.iter().map(|(_, c)| c).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn symmetrize_broken_group_averages_a_symmetric_pair() {
        // 2x2 buffer computed as if the pair were plain (NS): row-constant,
        // [[1,1],[2,2]]. Symmetrizing should average (0,1) and (1,0).
        let data = [1.0, 1.0, 2.0, 2.0];
        let out = symmetrize_broken_group(&data, &[2, 2], (0, 2, SymMark::SY));
        assert_eq!(out, vec![1.0, 1.5, 1.5, 2.0]);
    }

    #[test]
    fn symmetrize_broken_group_antisymmetrizes_with_sign() {
        let data = [0.0, 1.0, 2.0, 0.0];
        let out = symmetrize_broken_group(&data, &[2, 2], (0, 2, SymMark::AS));
        assert_eq!(out, vec![0.0, -0.5, 0.5, 0.0]);
    }

    #[test]
    fn get_sym_perms_antisymmetric_pair_has_opposite_signs() {
        let perms = get_sym_perms(SymMark::AS, 2, 1.0);
        let coeffs: Vec<f64> = perms.iter().map(|(_, c)| *c).collect();
        assert!((coeffs[0] + coeffs[1]).abs() < 1e-12);
    }
}
