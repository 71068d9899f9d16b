//! Tensor-level operations: `contract`, `sum`, `scale`, `reduce`. Wires
//! normalize -> plan -> redistribute -> execute -> restore against the
//! collaborator traits in [`crate::messaging`] and
//! [`crate::redistribute`], threading a single computation through several
//! independent components.
//!
//! This engine executes against each process's own local dense buffer.
//! Genuine cross-process data movement (bringing a tensor from its home
//! layout into the plan's chosen mapping) is the job of the
//! [`crate::redistribute::Redistributor`] collaborator; for the trivial
//! single-process topologies this crate's own tests use, that movement is
//! a no-op and the local buffer already *is* the whole tensor.

use crate::error::{Error, Result};
use crate::home::HomeGuard;
use crate::kernel::{self, OperandLayout as KernelLayout};
use crate::mapping::OperandSpec;
use crate::messaging::{MemoryReporter, ProcessGroup};
use crate::plan::{plan_contraction, Plan};
use crate::redistribute::Redistributor;
use crate::semiring::Semiring;
use crate::sum::{self, OperandLayout as SumLayout};
use crate::symmetry::{extract_diag, extract_diag_dense, get_sym_perms, symmetrize_broken_group, unfold_broken_sym};
use crate::tensor::{MappingChain, SymMark, TensorMeta};
use crate::topology::Topology;

/// A contraction/summation operand: its meta-model (mutable, so this
/// operation can track and restore its home-layout status across the
/// call), the mode labels assigned to this call, and its local dense data
/// buffer.
pub struct Operand<'a, T> {
    /// Tensor meta-model (edge lengths, symmetry, mapping, home status).
    pub meta: &'a mut TensorMeta,
    /// Mode labels, one per mode of `meta`.
    pub labels: &'a [char],
    /// Local dense data buffer, row-major over `meta.edge_len()`.
    pub data: &'a [T],
}

/// Which branch of the desymmetrize-vs-sum-of-permutations selection
/// policy to take for a broken symmetric group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymmetryStrategy {
    /// Downgrade the broken group to `NS` and contract it once.
    Desymmetrize,
    /// Sum weighted, relabeled single-term contractions over the broken
    /// group's permutations ([`get_sym_perms`]), without ever downgrading
    /// more than the minimum needed to run each term.
    PermutationSum,
}

/// Reduction operator for [`reduce`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReduceOp {
    /// Elementwise sum.
    Sum,
    /// Sum of absolute values.
    SumAbs,
    /// Euclidean (L2) norm.
    Norm2,
    /// Elementwise maximum.
    Max,
    /// Elementwise minimum.
    Min,
    /// Maximum absolute value.
    MaxAbs,
}

#[derive(Clone)]
struct Normalized<T> {
    labels: Vec<char>,
    edge_len: Vec<usize>,
    sym: Vec<SymMark>,
    data: Vec<T>,
    /// `(start, end, original_mark)` of each symmetric group that
    /// [`unfold_broken_sym`] downgraded to `NS`.
    broken_groups: Vec<(usize, usize, SymMark)>,
    /// Mirrors [`crate::symmetry::UnfoldedSym::symmetrize_after`]: `true`
    /// if this operand's result must be symmetrized back afterward to
    /// restore the invariant `broken_groups` names.
    symmetrize_after: bool,
}

impl<T> Normalized<T> {
    fn to_operand_spec(&self) -> OperandSpec {
        OperandSpec { labels: self.labels.clone(), edge_len: self.edge_len.clone(), sym: self.sym.clone() }
    }

    fn to_kernel_layout(&self) -> KernelLayout {
        KernelLayout { labels: self.labels.clone(), sym: self.sym.clone(), edge_len: self.edge_len.clone() }
    }
}

fn normalize_operand<T: Copy + Default>(
    labels: &[char],
    meta: &TensorMeta,
    data: &[T],
    other_labels: &[&[char]],
) -> Normalized<T> {
    let extraction = extract_diag(labels);
    let (ext_labels, ext_edge_len, ext_sym, ext_data) = if extraction.labels.len() == labels.len() {
        (labels.to_vec(), meta.edge_len().to_vec(), meta.sym().to_vec(), data.to_vec())
    } else {
        let edge_len: Vec<usize> = extraction.source_modes.iter().map(|m| meta.edge_len()[m[0]]).collect();
        let diag = extract_diag_dense(data, meta.edge_len(), &extraction);
        // a label that repeated already breaks whatever adjacency the
        // source tensor declared for those positions, so the reduced
        // operand carries no symmetry of its own.
        let sym = vec![SymMark::NS; extraction.labels.len()];
        (extraction.labels.clone(), edge_len, sym, diag)
    };

    let contracted: Vec<bool> = ext_labels.iter().map(|l| other_labels.iter().any(|ol| ol.contains(l))).collect();
    let unfolded = unfold_broken_sym(&ext_sym, &contracted);
    let broken_groups = detect_broken_groups(&ext_sym, &unfolded.sym);

    Normalized {
        labels: ext_labels,
        edge_len: ext_edge_len,
        sym: unfolded.sym,
        data: ext_data,
        broken_groups,
        symmetrize_after: unfolded.symmetrize_after,
    }
}

fn detect_broken_groups(before: &[SymMark], after: &[SymMark]) -> Vec<(usize, usize, SymMark)> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < before.len() {
        if before[i].is_symmetric() && after[i] == SymMark::NS {
            let mark = before[i];
            let mut j = i + 1;
            while j < before.len() && before[j - 1] == mark {
                j += 1;
            }
            groups.push((i, j, mark));
            i = j;
        } else {
            i += 1;
        }
    }
    groups
}

fn relabel_group(labels: &mut [char], start: usize, perm: &[usize]) {
    let original: Vec<char> = labels[start..start + perm.len()].to_vec();
    for (k, &p) in perm.iter().enumerate() {
        labels[start + k] = original[p];
    }
}

enum Owner {
    A,
    B,
}

/// Brings a read-only operand's local buffer to `target_mapping` and back,
/// tracked via a [`HomeGuard`]. This engine's local buffer is the whole
/// tensor under the single-process topologies it targets, so the
/// redistributor's output is only checked for success, not applied to
/// `data`; a genuinely distributed backend would instead hand the remapped
/// buffer to its own transport layer.
///
/// # Errors
///
/// Propagates [`Error::CollaboratorFailure`] from `redistributor`.
fn touch_operand_mapping<T: Clone, R: Redistributor<T>>(
    meta: &mut TensorMeta,
    data: &[T],
    target_mapping: &[MappingChain],
    redistributor: &R,
) -> Result<()> {
    let guard = HomeGuard::capture(meta.is_home(), meta.mapping());

    if target_mapping != meta.mapping() {
        redistributor.remap_tensor(data, meta.edge_len(), meta.mapping(), target_mapping)?;
        for (m, chain) in target_mapping.iter().cloned().enumerate() {
            meta.set_mapping(m, chain);
        }
        meta.mark_not_home();
    }

    if guard.needs_remap(meta.mapping()) {
        redistributor.remap_tensor(data, meta.edge_len(), meta.mapping(), guard.home_mapping())?;
        for (m, chain) in guard.home_mapping().iter().cloned().enumerate() {
            meta.set_mapping(m, chain);
        }
        meta.mark_home();
    }

    Ok(())
}

/// Like [`touch_operand_mapping`] but for an owned buffer that must actually
/// move into `target_mapping` before the caller computes against it. Returns
/// the guard capturing entry status plus the (possibly remapped) buffer; the
/// caller restores it afterward via [`HomeGuard::restore`].
///
/// # Errors
///
/// Propagates [`Error::CollaboratorFailure`] from `redistributor`.
fn enter_mapping<T: Clone, R: Redistributor<T>>(
    meta: &mut TensorMeta,
    data: Vec<T>,
    target_mapping: &[MappingChain],
    redistributor: &R,
) -> Result<(HomeGuard, Vec<T>)> {
    let guard = HomeGuard::capture(meta.is_home(), meta.mapping());
    if target_mapping == meta.mapping() {
        return Ok((guard, data));
    }
    let remapped = redistributor.remap_tensor(&data, meta.edge_len(), meta.mapping(), target_mapping)?;
    for (m, chain) in target_mapping.iter().cloned().enumerate() {
        meta.set_mapping(m, chain);
    }
    meta.mark_not_home();
    Ok((guard, remapped))
}

/// `C[idx_C] = beta * C[idx_C] + alpha * A[idx_A] * B[idx_B]`.
///
/// `strategy` overrides the desymmetrize-vs-sum-of-permutations selection
/// policy; `None` follows it: desymmetrize whenever the unfolded problem
/// admits a valid mapping, else fall back to summing permutation terms.
/// `group` drives the planner's cross-process plan-selection agreement and
/// every redistribution call this operation makes. Returns `Ok(None)` when
/// a zero-edge-length operand short-circuits the whole call, else
/// `Ok(Some(plan))`.
///
/// # Errors
///
/// Returns [`Error::NoValidMapping`] if no candidate topology admits a
/// mapping, [`Error::InsufficientMemory`] if the chosen plan's estimated
/// peak exceeds `reporter`'s budget, [`Error::InvalidArgument`] if `C`
/// repeats a label, or propagates [`Error::CollaboratorFailure`] from
/// `group`/`redistributor`.
#[allow(clippy::too_many_arguments)]
pub fn contract<T, S, G, M, R>(
    sr: &S,
    topologies: &[Topology],
    group: &G,
    reporter: &M,
    redistributor: &R,
    a: Operand<'_, T>,
    b: Operand<'_, T>,
    c_meta: &mut TensorMeta,
    c_labels: &[char],
    c_data: &mut Vec<T>,
    alpha: T,
    beta: T,
    strategy: Option<SymmetryStrategy>,
) -> Result<Option<Plan>>
where
    T: Copy + Default + std::convert::From<f64> + std::ops::Mul<Output = T> + std::ops::Add<Output = T>,
    S: Semiring<T>,
    G: ProcessGroup,
    M: MemoryReporter,
    R: Redistributor<T>,
{
    let Operand { meta: a_meta, labels: a_labels, data: a_data } = a;
    let Operand { meta: b_meta, labels: b_labels, data: b_data } = b;

    if a_meta.has_zero_edge_len() || b_meta.has_zero_edge_len() || c_meta.has_zero_edge_len() {
        if !sr.isequal(beta, sr.mulid()) && !c_meta.has_zero_edge_len() {
            for v in c_data.iter_mut() {
                *v = sr.scale_elem(beta, *v);
            }
        }
        return Ok(None);
    }

    let a_n = normalize_operand(a_labels, &*a_meta, a_data, &[b_labels, c_labels]);
    let b_n = normalize_operand(b_labels, &*b_meta, b_data, &[a_labels, c_labels]);
    let c_n = normalize_operand(c_labels, &*c_meta, c_data.as_slice(), &[a_labels, b_labels]);
    if c_n.labels.len() != c_labels.len() {
        return Err(Error::InvalidArgument("C may not repeat a label".to_string()));
    }

    let strategy = match strategy {
        Some(s) => s,
        None if !a_n.symmetrize_after && !b_n.symmetrize_after => SymmetryStrategy::Desymmetrize,
        None => {
            let desym_specs = [a_n.to_operand_spec(), b_n.to_operand_spec(), c_n.to_operand_spec()];
            if plan_contraction(topologies, &desym_specs, group).is_ok() {
                SymmetryStrategy::Desymmetrize
            } else {
                SymmetryStrategy::PermutationSum
            }
        }
    };

    let plan = match strategy {
        SymmetryStrategy::Desymmetrize => run_single_term(
            sr, topologies, group, reporter, redistributor, &a_n, &b_n, &c_n, a_meta, a_data, b_meta, b_data, c_meta, c_data, alpha, beta,
        ),
        SymmetryStrategy::PermutationSum => run_permutation_sum(
            sr, topologies, group, reporter, redistributor, &a_n, &b_n, &c_n, a_meta, a_data, b_meta, b_data, c_meta, c_data, alpha, beta,
        ),
    }?;

    if c_n.symmetrize_after {
        for &group_range in &c_n.broken_groups {
            *c_data = symmetrize_broken_group(c_data, c_meta.edge_len(), group_range);
        }
    }

    Ok(plan)
}

#[allow(clippy::too_many_arguments)]
fn run_single_term<T, S, G, M, R>(
    sr: &S,
    topologies: &[Topology],
    group: &G,
    reporter: &M,
    redistributor: &R,
    a_n: &Normalized<T>,
    b_n: &Normalized<T>,
    c_n: &Normalized<T>,
    a_meta: &mut TensorMeta,
    a_data: &[T],
    b_meta: &mut TensorMeta,
    b_data: &[T],
    c_meta: &mut TensorMeta,
    c_data: &mut Vec<T>,
    alpha: T,
    beta: T,
) -> Result<Option<Plan>>
where
    T: Copy,
    S: Semiring<T>,
    G: ProcessGroup,
    M: MemoryReporter,
    R: Redistributor<T>,
{
    let operands = [a_n.to_operand_spec(), b_n.to_operand_spec(), c_n.to_operand_spec()];
    let plan = plan_contraction(topologies, &operands, group)?;

    let needed = plan.cost.memuse;
    let available = reporter.available_bytes();
    if needed > available {
        return Err(Error::InsufficientMemory { needed, available });
    }

    // a diagonal extraction shrinks an operand's order below its meta's, at
    // which point the plan's per-mode mapping no longer lines up with the
    // original descriptor's modes one-to-one; skip tracking home status for
    // that (rare) case rather than apply a mismatched mapping.
    if a_n.labels.len() == a_meta.order() {
        touch_operand_mapping(a_meta, a_data, &plan.mappings[0].chains, redistributor)?;
    }
    if b_n.labels.len() == b_meta.order() {
        touch_operand_mapping(b_meta, b_data, &plan.mappings[1].chains, redistributor)?;
    }

    let (guard_c, mut c_owned) = enter_mapping(c_meta, std::mem::take(c_data), &plan.mappings[2].chains, redistributor)?;

    let a_layout = a_n.to_kernel_layout();
    let b_layout = b_n.to_kernel_layout();
    let c_layout = c_n.to_kernel_layout();

    kernel::contract_sequential(
        sr,
        &a_layout,
        &a_n.data,
        &b_layout,
        &b_n.data,
        &c_layout,
        c_owned.as_mut_slice(),
        alpha,
        beta,
        plan.inner_params(),
        false,
    );

    let restored = guard_c.restore(c_owned, c_meta.edge_len(), c_meta.mapping(), redistributor)?;
    if guard_c.needs_remap(c_meta.mapping()) {
        for (m, chain) in guard_c.home_mapping().iter().cloned().enumerate() {
            c_meta.set_mapping(m, chain);
        }
        c_meta.mark_home();
    }
    *c_data = restored;

    Ok(Some(plan))
}

#[allow(clippy::too_many_arguments)]
fn run_permutation_sum<T, S, G, M, R>(
    sr: &S,
    topologies: &[Topology],
    group: &G,
    reporter: &M,
    redistributor: &R,
    a_n: &Normalized<T>,
    b_n: &Normalized<T>,
    c_n: &Normalized<T>,
    a_meta: &mut TensorMeta,
    a_data: &[T],
    b_meta: &mut TensorMeta,
    b_data: &[T],
    c_meta: &mut TensorMeta,
    c_data: &mut Vec<T>,
    alpha: T,
    beta: T,
) -> Result<Option<Plan>>
where
    T: Copy + std::convert::From<f64> + std::ops::Mul<Output = T>,
    S: Semiring<T>,
    G: ProcessGroup,
    M: MemoryReporter,
    R: Redistributor<T>,
{
    let (owner, group_range) = a_n
        .broken_groups
        .first()
        .map(|g| (Owner::A, *g))
        .or_else(|| b_n.broken_groups.first().map(|g| (Owner::B, *g)))
        .ok_or_else(|| Error::InvalidArgument("no broken symmetric group to expand into permutations".to_string()))?;

    let (start, end, mark) = group_range;
    let g = end - start;
    if g != 2 {
        return Err(Error::Unsupported(
            "permutation-sum expansion is only implemented for pairwise symmetric groups".to_string(),
        ));
    }

    let perms = get_sym_perms(mark, g, 1.0);
    let mut plan_out = None;
    let mut first = true;

    for (perm, coeff) in perms {
        let mut a_term = a_n.clone();
        let mut b_term = b_n.clone();
        match owner {
            Owner::A => relabel_group(&mut a_term.labels, start, &perm),
            Owner::B => relabel_group(&mut b_term.labels, start, &perm),
        }

        let term_alpha = T::from(coeff) * alpha;
        let term_beta = if first { beta } else { sr.mulid() };
        let plan = run_single_term(
            sr, topologies, group, reporter, redistributor, &a_term, &b_term, c_n, a_meta, a_data, b_meta, b_data, c_meta, c_data, term_alpha,
            term_beta,
        )?;
        plan_out = plan.or(plan_out);
        first = false;
    }

    Ok(plan_out)
}

/// `B[idx_B] = beta * B[idx_B] + alpha * A[idx_A]`.
///
/// # Errors
///
/// Propagates [`Error::CollaboratorFailure`] from `redistributor` if `b`'s
/// home restoration requires a remap.
#[allow(clippy::too_many_arguments)]
pub fn sum<T, S, R>(
    sr: &S,
    redistributor: &R,
    a: Operand<'_, T>,
    alpha: T,
    beta: T,
    b_meta: &mut TensorMeta,
    b_labels: &[char],
    b_data: &mut Vec<T>,
) -> Result<()>
where
    T: Copy,
    S: Semiring<T>,
    R: Redistributor<T>,
{
    if a.meta.has_zero_edge_len() || b_meta.has_zero_edge_len() {
        if !sr.isequal(beta, sr.mulid()) && !b_meta.has_zero_edge_len() {
            for v in b_data.iter_mut() {
                *v = sr.scale_elem(beta, *v);
            }
        }
        return Ok(());
    }

    let guard = HomeGuard::capture(b_meta.is_home(), b_meta.mapping());

    let a_layout = SumLayout { labels: a.labels.to_vec(), sym: a.meta.sym().to_vec(), edge_len: a.meta.edge_len().to_vec() };
    let b_layout = SumLayout { labels: b_labels.to_vec(), sym: b_meta.sym().to_vec(), edge_len: b_meta.edge_len().to_vec() };

    if a_layout.labels == b_layout.labels {
        sum::axpy_stripe(sr, a.data, b_data.as_mut_slice(), alpha, beta);
    } else {
        sum::sum_sequential(sr, &a_layout, a.data, &b_layout, b_data.as_mut_slice(), alpha, beta, false);
    }

    let restored = guard.restore(std::mem::take(b_data), b_meta.edge_len(), b_meta.mapping(), redistributor)?;
    *b_data = restored;
    Ok(())
}

/// `T[idx_T] *= alpha`.
pub fn scale<T: Copy, S: Semiring<T>>(sr: &S, alpha: T, meta: &TensorMeta, data: &mut [T]) {
    if meta.has_zero_edge_len() {
        return;
    }
    sr.scal(data.len(), alpha, data, 1);
}

/// Reduces every element of a tensor's local buffer to a scalar. `group` is
/// accepted for the collective-reduction contract (a real multi-process
/// deployment all-reduces this local value across ranks after the call) but
/// is not itself invoked here.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `data` is empty for an order
/// (`Max`/`Min`/`MaxAbs`) reduction, which has no identity element.
pub fn reduce<T, S, G>(sr: &S, group: &G, meta: &TensorMeta, data: &[T], op: ReduceOp) -> Result<T>
where
    T: Copy + PartialOrd + std::ops::Neg<Output = T> + Into<f64> + From<f64>,
    S: Semiring<T>,
    G: ProcessGroup,
{
    let _ = group;
    let zero = sr.addid();
    if meta.has_zero_edge_len() {
        return Ok(zero);
    }
    let abs = |x: T| if x < zero { -x } else { x };
    let empty_err = || Error::InvalidArgument("reduce over an empty tensor has no identity for this op".to_string());

    match op {
        ReduceOp::Sum => Ok(data.iter().fold(zero, |acc, &v| sr.fma(sr.mulid(), v, sr.mulid(), sr.mulid(), acc))),
        ReduceOp::SumAbs => Ok(data.iter().fold(zero, |acc, &v| sr.fma(sr.mulid(), abs(v), sr.mulid(), sr.mulid(), acc))),
        ReduceOp::Norm2 => {
            let sum_sq = data.iter().fold(zero, |acc, &v| sr.fma(v, v, sr.mulid(), sr.mulid(), acc));
            let as_f64: f64 = sum_sq.into();
            Ok(T::from(as_f64.sqrt()))
        }
        ReduceOp::Max => data.iter().copied().reduce(|a, b| if b > a { b } else { a }).ok_or_else(empty_err),
        ReduceOp::Min => data.iter().copied().reduce(|a, b| if b < a { b } else { a }).ok_or_else(empty_err),
        ReduceOp::MaxAbs => data.iter().copied().map(abs).reduce(|a, b| if b > a { b } else { a }).ok_or_else(empty_err),
    }
}
