//! Tensor mapping planner.
//!
//! Assigns to each mode of each operand a [`MappingChain`] of physical and
//! virtual factors, subject to: a grid dimension is `Physical` in at most
//! one mode across `{A,B,C}` for a given contraction index; symmetric
//! groups share identical chains; every mode's total factorization divides
//! its padded edge length.

use crate::error::{Error, Result};
use crate::tensor::{chain_physical_extent, MappingChain, MappingFactor, SymMark};
use crate::topology::Topology;
use rustc_hash::FxHashMap;

/// The minimal per-operand shape the mapping planner needs: labels (one per
/// mode, used to find which modes must share a chain because they carry the
/// same contraction index), edge lengths and symmetry marks.
#[derive(Clone, Debug)]
pub struct OperandSpec {
    /// Mode labels, e.g. `['i', 'j']` for `idx_A = "ij"`.
    pub labels: Vec<char>,
    /// Edge length per mode.
    pub edge_len: Vec<usize>,
    /// Symmetry mark per mode.
    pub sym: Vec<SymMark>,
}

/// The mapping chosen for one operand: one chain per mode.
#[derive(Clone, Debug)]
pub struct OperandMapping {
    /// Mapping chain per mode, in mode order.
    pub chains: Vec<MappingChain>,
}

/// Searches for a valid mapping of `operands` (in `[A, B, C]` order) onto
/// `topology`, preferring to place contracted/shared labels on physical grid
/// dimensions (since those are the ones the planner can build 2D-general
/// nodes from) and leaving everything else virtual.
///
/// Returns [`Error::NoValidMapping`] if no assignment of grid dimensions to
/// labels passes [`check_mapping`].
pub fn plan_mapping(topology: &Topology, operands: &[OperandSpec; 3]) -> Result<[OperandMapping; 3]> {
    let shared_labels = shared_label_order(operands);

    // Greedily assign topology dimensions to shared labels, largest grid
    // dimension to the largest-edge-length label first so load is balanced;
    // a simple, deterministic heuristic rather than an exhaustive search —
    // the caller enumerates candidate topologies/peelings and scores each
    // one's greedy mapping, rather than this function searching within one.
    let mut label_to_dim: FxHashMap<char, usize> = FxHashMap::default();
    let mut dims: Vec<usize> = (0..topology.order()).collect();
    dims.sort_by_key(|&d| std::cmp::Reverse(topology.dims()[d].np));

    for (label, &dim) in shared_labels.iter().zip(dims.iter()) {
        label_to_dim.insert(*label, dim);
    }

    let mut results: [OperandMapping; 3] =
        [empty_mapping(), empty_mapping(), empty_mapping()];

    for (opi, operand) in operands.iter().enumerate() {
        results[opi] = build_operand_mapping(topology, operand, &label_to_dim);
    }

    check_mapping(topology, operands, &results)?;
    Ok(results)
}

fn empty_mapping() -> OperandMapping {
    OperandMapping { chains: Vec::new() }
}

/// Labels that appear in more than one operand, in a deterministic order
/// (first occurrence across A, B, C), since those are eligible for physical
/// placement: an index shared across operands must have all its
/// occurrences mapped to the same chain head.
fn shared_label_order(operands: &[OperandSpec; 3]) -> Vec<char> {
    let mut counts: FxHashMap<char, usize> = FxHashMap::default();
    let mut order = Vec::new();
    for operand in operands {
        for &label in &operand.labels {
            let entry = counts.entry(label).or_insert(0);
            *entry += 1;
            if *entry == 1 {
                order.push(label);
            }
        }
    }
    order.retain(|label| counts[label] > 1);
    order
}

fn build_operand_mapping(
    topology: &Topology,
    operand: &OperandSpec,
    label_to_dim: &FxHashMap<char, usize>,
) -> OperandMapping {
    let n = operand.labels.len();
    let mut chains: Vec<MappingChain> = vec![MappingChain::new(); n];

    // First pass: build a chain per mode from its own label.
    for m in 0..n {
        chains[m] = chain_for_label(topology, label_to_dim, operand.labels[m], operand.edge_len[m]);
    }

    // Second pass: symmetric groups must share one chain. Use the chain of
    // the first (lowest-index) mode of the group that has a physical
    // factor, if any, else the first mode's chain, applied to every mode in
    // the group.
    let mut i = 0;
    while i < n {
        if operand.sym[i].is_symmetric() {
            let mark = operand.sym[i];
            let mut j = i + 1;
            while j < n && operand.sym[j - 1] == mark {
                j += 1;
            }
            let representative = (i..j)
                .find(|&m| chain_physical_extent(&chains[m]) > 1)
                .unwrap_or(i);
            let shared = chains[representative].clone();
            for m in i..j {
                chains[m] = shared.clone();
            }
            i = j;
        } else {
            i += 1;
        }
    }

    OperandMapping { chains }
}

fn chain_for_label(
    topology: &Topology,
    label_to_dim: &FxHashMap<char, usize>,
    label: char,
    edge_len: usize,
) -> MappingChain {
    let mut chain = MappingChain::new();
    let np = label_to_dim.get(&label).map(|&dim| (dim, topology.dims()[dim].np));
    if let Some((dim, np)) = np.filter(|&(_, np)| np > 1) {
        let np = np.min(edge_len.max(1));
        chain.push(MappingFactor::Physical { dim, extent: np });
        let rem = edge_len.div_ceil(np.max(1));
        if rem > 1 || edge_len == 0 {
            chain.push(MappingFactor::Virtual { extent: rem.max(1) });
        }
    } else {
        chain.push(MappingFactor::Virtual { extent: edge_len.max(1) });
    }
    chain
}

/// Validates a candidate mapping against the mapping invariants.
///
/// # Errors
///
/// Returns [`Error::NoValidMapping`] if:
/// - a grid dimension is `Physical` in more than one *distinct* label's
///   chain across `{A,B,C}` (a shared label mapping to the same dimension
///   in multiple operands is fine — it is the same occurrence of that
///   index);
/// - two modes of a declared symmetric group do not carry identical chains;
/// - a mode's total mapping factor does not divide its padded edge length
///   evenly (by construction this always holds here, but is re-checked
///   defensively since a future caller may construct mappings directly).
pub fn check_mapping(
    _topology: &Topology,
    operands: &[OperandSpec; 3],
    mappings: &[OperandMapping; 3],
) -> Result<()> {
    let mut dim_owner: FxHashMap<usize, char> = FxHashMap::default();

    for operand in operands.iter().zip(mappings.iter()) {
        let (spec, mapping) = operand;
        for (m, chain) in mapping.chains.iter().enumerate() {
            for factor in chain {
                if let MappingFactor::Physical { dim, .. } = factor {
                    let label = spec.labels[m];
                    match dim_owner.get(dim) {
                        Some(&owner) if owner != label => {
                            return Err(Error::NoValidMapping);
                        }
                        _ => {
                            dim_owner.insert(*dim, label);
                        }
                    }
                }
            }

            let total: usize = chain.iter().map(|f| f.extent()).product();
            if total == 0 || spec.edge_len[m] % total != 0 {
                // a zero-edge-length operand is handled by the short-circuit
                // path before mapping is ever attempted, so total==0 here
                // always indicates a construction bug, not a legitimate
                // zero-length mode.
                return Err(Error::NoValidMapping);
            }
        }
    }

    for (spec, mapping) in operands.iter().zip(mappings.iter()) {
        let mut i = 0;
        while i < spec.sym.len() {
            if spec.sym[i].is_symmetric() {
                let mark = spec.sym[i];
                let mut j = i + 1;
                while j < spec.sym.len() && spec.sym[j - 1] == mark {
                    j += 1;
                }
                for m in (i + 1)..j {
                    if mapping.chains[m] != mapping.chains[i] {
                        return Err(Error::NoValidMapping);
                    }
                }
                i = j;
            } else {
                i += 1;
            }
        }
    }

    Ok(())
}
