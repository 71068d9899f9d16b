//! Contraction plan tree and planner.
//!
//! The plan node kinds form a closed set, expressed as an `#[enum_dispatch]`
//! tagged variant with a uniform capability trait rather than a trait
//! object.

use crate::error::{Error, Result};
use crate::fold::{can_fold, map_fold, FoldPlan};
use crate::mapping::{check_mapping, plan_mapping, OperandMapping, OperandSpec};
use crate::messaging::{ProcessGroup, ReduceOp};
use crate::tensor::chain_nvirt;
use crate::topology::Topology;
use enum_dispatch::enum_dispatch;

/// The three-key cost a plan is selected by: virtualization work,
/// communication volume, peak memory, each reduced to a global minimum
/// across the process group before the lexicographic comparison, so every
/// rank settles on the same candidate even if local estimates differ.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct CostTriple {
    /// Total virtualization work per process.
    pub nvirt: usize,
    /// Summed message bytes across subcommunicators.
    pub comm_vol: usize,
    /// Peak buffer bytes.
    pub memuse: usize,
}

/// Uniform capability every plan node provides. No `run` method is present
/// on this trait: execution is driven directly by
/// [`crate::kernel`]/[`crate::sum`] against the leaf's `inner_params` — a
/// plan tree in this crate is a cost-estimation and shape-description
/// artifact, not an executable closure, since actual data movement is
/// delegated to the external messaging/redistribution collaborators.
#[enum_dispatch]
pub trait PlanStep {
    /// This node's contribution to the plan's overall cost triple.
    fn estimate(&self) -> CostTriple;
}

/// Wraps a plan because some operand repeats a label that survived
/// normalization ("diagonal stripping").
#[derive(Clone, Debug)]
pub struct StripDiagonalNode {
    /// Operand index (0=A, 1=B, 2=C) whose diagonal is stripped.
    pub operand: usize,
}

impl PlanStep for StripDiagonalNode {
    fn estimate(&self) -> CostTriple {
        CostTriple::default()
    }
}

/// Wraps a plan for a grid dimension not mapped by at least one of
/// `{A,B,C}`, requiring a broadcast of the unmapped operand(s) along that
/// axis.
#[derive(Clone, Debug)]
pub struct ReplicateNode {
    /// Grid dimension being replicated along.
    pub dim: usize,
    /// Number of processes along `dim` (the broadcast fan-out).
    pub extent: usize,
    /// Approximate bytes moved per process (size of the replicated operand
    /// block times `extent - 1`, the classic broadcast-volume estimate).
    pub bytes_per_process: usize,
}

impl PlanStep for ReplicateNode {
    fn estimate(&self) -> CostTriple {
        CostTriple {
            nvirt: 0,
            comm_vol: self.bytes_per_process.saturating_mul(self.extent.saturating_sub(1)),
            memuse: self.bytes_per_process,
        }
    }
}

/// Realizes one contracted index that is `Physical` in exactly two
/// operands via Cannon/SUMMA-style rotation across two grid dimensions.
#[derive(Clone, Debug)]
pub struct General2dNode {
    /// Leading dimensions `(ctr_lda_A, ctr_lda_B, ctr_lda_C)`.
    pub ctr_lda: [usize; 3],
    /// Sub-leading dimensions `(ctr_sub_lda_A, ctr_sub_lda_B, ctr_sub_lda_C)`.
    pub ctr_sub_lda: [usize; 3],
    /// Which operands are rotated (`true`) vs. held fixed (`false`) during
    /// this node's execution.
    pub moved: [bool; 3],
    /// Number of rotation steps (equal to the contracted grid dimension's
    /// process count).
    pub steps: usize,
    /// Bytes moved per rotation step, summed to `comm_vol`.
    pub bytes_per_step: usize,
}

impl PlanStep for General2dNode {
    fn estimate(&self) -> CostTriple {
        CostTriple {
            nvirt: 0,
            comm_vol: self.bytes_per_step.saturating_mul(self.steps),
            memuse: self.bytes_per_step,
        }
    }
}

/// Wraps the sequential kernel with a loop over the Cartesian product of
/// virtual-factor indices, inserted once overall if `nvirt > 1`.
#[derive(Clone, Debug)]
pub struct VirtualNode {
    /// Total virtualization factor (product of all operands' virtual
    /// extents along contracted/replicated axes).
    pub nvirt: usize,
}

impl PlanStep for VirtualNode {
    fn estimate(&self) -> CostTriple {
        CostTriple { nvirt: self.nvirt, comm_vol: 0, memuse: 0 }
    }
}

/// Records upload/download phase indices for an offload-capable sequential
/// kernel so inner 2D-general phases can overlap transfers.
#[derive(Clone, Debug)]
pub struct OffloadNode {
    /// Phase index at which data is uploaded to the offload device.
    pub upload_phase: usize,
    /// Phase index at which results are downloaded back.
    pub download_phase: usize,
    /// Bytes transferred each way, counted once toward `memuse` (a staging
    /// buffer, not wire traffic, so it is not added to `comm_vol`).
    pub staging_bytes: usize,
}

impl PlanStep for OffloadNode {
    fn estimate(&self) -> CostTriple {
        CostTriple { nvirt: 0, comm_vol: 0, memuse: self.staging_bytes }
    }
}

/// The folded or unfolded symmetric kernel leaf.
#[derive(Clone, Debug)]
pub struct SequentialNode {
    /// Folded inner matrix-multiply parameters, if folding succeeded.
    pub inner_params: Option<FoldPlan>,
    /// Local (per-process) element counts of A, B, C after mapping.
    pub local_sizes: [usize; 3],
}

impl PlanStep for SequentialNode {
    fn estimate(&self) -> CostTriple {
        CostTriple { nvirt: 1, comm_vol: 0, memuse: self.local_sizes.iter().sum() }
    }
}

/// Tagged variant over the closed set of plan node kinds.
// WARNING: never change the order or content of this enum, only add to the end of it
#[enum_dispatch(PlanStep)]
#[derive(Clone, Debug)]
pub enum PlanNode {
    /// See [`StripDiagonalNode`].
    StripDiagonalNode,
    /// See [`ReplicateNode`].
    ReplicateNode,
    /// See [`General2dNode`].
    General2dNode,
    /// See [`VirtualNode`].
    VirtualNode,
    /// See [`OffloadNode`].
    OffloadNode,
    /// See [`SequentialNode`].
    SequentialNode,
}

/// A complete contraction plan: the node chain (outermost first, the
/// `SequentialNode` leaf last) plus its combined cost and a canonical id
/// used to force every rank to the same choice.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Nodes in wrap order, outermost (applied first during planning,
    /// innermost during execution) to the `SequentialNode` leaf.
    pub nodes: Vec<PlanNode>,
    /// Combined cost of this plan's nodes.
    pub cost: CostTriple,
    /// Canonical identifier: `(topology id, mapping hash, tree shape hash)`,
    /// used as the final tie-break in plan selection.
    pub id: (usize, u64, u64),
    /// The mapping chosen for `[A, B, C]`, for callers that need to apply it
    /// to their own tensor descriptors before executing this plan's leaf.
    pub mappings: [OperandMapping; 3],
}

impl Plan {
    fn sequential(&self) -> &SequentialNode {
        self.nodes
            .iter()
            .find_map(|n| if let PlanNode::SequentialNode(s) = n { Some(s) } else { None })
            .expect("every plan has exactly one SequentialNode leaf")
    }

    /// The folded inner-kernel parameters, if this plan's leaf folds.
    #[must_use]
    pub fn inner_params(&self) -> Option<FoldPlan> {
        self.sequential().inner_params
    }
}

/// Builds and selects a contraction plan across candidate topologies
/// (including peelings) for operand specs `[A, B, C]` labeled
/// `idx_a`/`idx_b`/`idx_c`.
///
/// Every candidate's cost triple is driven through `group`'s
/// [`ProcessGroup::all_reduce_u64`] (with [`ReduceOp::Min`]) before it is
/// compared, so every rank in the group agrees on the same winning plan
/// even when local cost estimates (e.g. memory availability) differ.
///
/// # Errors
///
/// Returns [`Error::NoValidMapping`] if no candidate topology admits a
/// valid mapping. Propagates [`crate::error::Error::CollaboratorFailure`]
/// if the underlying reduction fails.
pub fn plan_contraction<G: ProcessGroup>(
    topologies: &[Topology],
    operands: &[OperandSpec; 3],
    group: &G,
) -> Result<Plan> {
    let mut best: Option<Plan> = None;

    for (topo_id, topology) in topologies.iter().enumerate() {
        let Ok(mappings) = plan_mapping(topology, operands) else { continue };
        if check_mapping(topology, operands, &mappings).is_err() {
            continue;
        }
        let mut plan = build_plan_tree(topo_id, topology, operands, &mappings);
        plan.cost = reduce_cost(group, plan.cost)?;
        best = Some(match best {
            Some(current) if (current.cost, current.id) <= (plan.cost, plan.id) => current,
            _ => plan,
        });
    }

    best.ok_or(Error::NoValidMapping)
}

fn reduce_cost<G: ProcessGroup>(group: &G, cost: CostTriple) -> Result<CostTriple> {
    let mut buf = [cost.nvirt as u64, cost.comm_vol as u64, cost.memuse as u64];
    group.all_reduce_u64(ReduceOp::Min, &mut buf)?;
    Ok(CostTriple {
        nvirt: buf[0] as usize,
        comm_vol: buf[1] as usize,
        memuse: buf[2] as usize,
    })
}

fn build_plan_tree(
    topo_id: usize,
    topology: &Topology,
    operands: &[OperandSpec; 3],
    mappings: &[OperandMapping; 3],
) -> Plan {
    let mut nodes = Vec::new();

    for (opi, operand) in operands.iter().enumerate() {
        let mut seen = std::collections::HashSet::new();
        if operand.labels.iter().any(|l| !seen.insert(*l)) {
            nodes.push(PlanNode::StripDiagonalNode(StripDiagonalNode { operand: opi }));
        }
    }

    let mapped_dims: std::collections::HashSet<usize> = mappings
        .iter()
        .flat_map(|m| &m.chains)
        .flat_map(|chain| chain.iter())
        .filter_map(|f| if f.is_physical() { Some(dim_of(f)) } else { None })
        .collect();
    for dim in 0..topology.order() {
        if !mapped_dims.contains(&dim) {
            let extent = topology.dims()[dim].np;
            let bytes_per_process = operands
                .iter()
                .map(|o| o.edge_len.iter().product::<usize>())
                .min()
                .unwrap_or(0)
                * std::mem::size_of::<f64>();
            nodes.push(PlanNode::ReplicateNode(ReplicateNode { dim, extent, bytes_per_process }));
        }
    }

    let contracted_labels = shared_by_two(operands);
    for label in contracted_labels {
        if let Some(lda) = physical_ctr_lda(operands, mappings, label) {
            nodes.push(PlanNode::General2dNode(General2dNode {
                ctr_lda: lda,
                ctr_sub_lda: lda,
                moved: [true, true, false],
                steps: lda.iter().copied().max().unwrap_or(1),
                bytes_per_step: std::mem::size_of::<f64>() * 64,
            }));
        }
    }

    let total_nvirt: usize = mappings
        .iter()
        .flat_map(|m| &m.chains)
        .map(|chain| chain_nvirt(chain))
        .product::<usize>()
        .max(1);
    if total_nvirt > 1 {
        nodes.push(PlanNode::VirtualNode(VirtualNode { nvirt: total_nvirt }));
    }

    let fold_plan = if can_fold(&operands[0].labels, &operands[1].labels, &operands[2].labels) {
        Some(map_fold(
            &operands[0].labels,
            &operands[0].edge_len,
            &operands[1].labels,
            &operands[1].edge_len,
            &operands[2].labels,
            &operands[2].edge_len,
        ))
    } else {
        None
    };

    let local_sizes = [
        local_size(&operands[0], &mappings[0]),
        local_size(&operands[1], &mappings[1]),
        local_size(&operands[2], &mappings[2]),
    ];

    nodes.push(PlanNode::SequentialNode(SequentialNode { inner_params: fold_plan, local_sizes }));

    let cost = nodes.iter().fold(CostTriple::default(), |acc, n| {
        let c = n.estimate();
        CostTriple {
            nvirt: acc.nvirt.max(c.nvirt),
            comm_vol: acc.comm_vol + c.comm_vol,
            memuse: acc.memuse + c.memuse,
        }
    });

    let mapping_hash = hash_mappings(mappings);
    let shape_hash = hash_shape(&nodes);

    Plan {
        nodes,
        cost,
        id: (topo_id, mapping_hash, shape_hash),
        mappings: mappings.clone(),
    }
}

fn dim_of(factor: &crate::tensor::MappingFactor) -> usize {
    if let crate::tensor::MappingFactor::Physical { dim, .. } = factor {
        *dim
    } else {
        usize::MAX
    }
}

fn shared_by_two(operands: &[OperandSpec; 3]) -> Vec<char> {
    use rustc_hash::FxHashMap;
    let mut counts: FxHashMap<char, usize> = FxHashMap::default();
    let mut order = Vec::new();
    for operand in operands {
        let mut seen = std::collections::HashSet::new();
        for &label in &operand.labels {
            if seen.insert(label) {
                let entry = counts.entry(label).or_insert(0);
                *entry += 1;
                if *entry == 1 {
                    order.push(label);
                }
            }
        }
    }
    order.into_iter().filter(|l| counts[l] == 2).collect()
}

fn physical_ctr_lda(
    operands: &[OperandSpec; 3],
    mappings: &[OperandMapping; 3],
    label: char,
) -> Option<[usize; 3]> {
    let mut ldas = [0usize; 3];
    let mut any_physical = false;
    for (opi, operand) in operands.iter().enumerate() {
        if let Some(mode) = operand.labels.iter().position(|&l| l == label) {
            let chain = &mappings[opi].chains[mode];
            if let Some(crate::tensor::MappingFactor::Physical { extent, .. }) =
                chain.iter().find(|f| f.is_physical())
            {
                ldas[opi] = *extent;
                any_physical = true;
            }
        }
    }
    any_physical.then_some(ldas)
}

fn local_size(operand: &OperandSpec, mapping: &OperandMapping) -> usize {
    operand
        .edge_len
        .iter()
        .zip(&mapping.chains)
        .map(|(&len, chain)| {
            let total: usize = chain.iter().map(|f| f.extent()).product::<usize>().max(1);
            len.div_ceil(total)
        })
        .product()
}

fn hash_mappings(mappings: &[OperandMapping; 3]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    for mapping in mappings {
        for chain in &mapping.chains {
            for factor in chain {
                match factor {
                    crate::tensor::MappingFactor::Physical { dim, extent } => {
                        (0u8, *dim, *extent).hash(&mut hasher);
                    }
                    crate::tensor::MappingFactor::Virtual { extent } => {
                        (1u8, *extent).hash(&mut hasher);
                    }
                }
            }
        }
    }
    hasher.finish()
}

fn hash_shape(nodes: &[PlanNode]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    for node in nodes {
        let tag: u8 = match node {
            PlanNode::StripDiagonalNode(_) => 0,
            PlanNode::ReplicateNode(_) => 1,
            PlanNode::General2dNode(_) => 2,
            PlanNode::VirtualNode(_) => 3,
            PlanNode::OffloadNode(_) => 4,
            PlanNode::SequentialNode(_) => 5,
        };
        tag.hash(&mut hasher);
    }
    hasher.finish()
}
