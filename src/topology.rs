//! Process topology and peeling.
//!
//! A [`Topology`] is a Cartesian grid of one or more dimensions over the
//! global process group. `peel` expands the space of candidate mappings by
//! fusing adjacent dimensions; see `DESIGN.md` for why the additive (not
//! multiplicative) extent rule was kept.

use rustc_hash::FxHashSet;

/// One dimension of a [`Topology`]: its process count, this rank's
/// coordinate along it, and the leading-dimension product (stride) used to
/// decompose a global rank into per-dimension coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TopoDim {
    /// Number of processes along this dimension.
    pub np: usize,
    /// This process's coordinate along this dimension, in `0..np`.
    pub rank: usize,
    /// Product of the extents of all dimensions preceding this one (the
    /// mixed-radix stride).
    pub lda: usize,
}

/// A Cartesian process topology: an ordered list of dimension descriptors
/// whose extents multiply to the global process count.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    dims: Vec<TopoDim>,
}

/// How adjacent dimensions are combined when peeling a topology.
///
/// Fusing two dimensions by *summing* their extents does not preserve the
/// global process-count product (`[2,3]` peels to `[5]`, not `[6]`); a
/// rank valid for the unpeeled topology is not necessarily valid for the
/// fused one, so [`Topology::peel`] re-derives each fused topology's rank
/// rather than reusing the caller's. Kept literal for regression fidelity,
/// with room left for a multiplicative variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeelingRule {
    /// `fused.np = a.np + b.np` (the literal source behavior).
    Additive,
}

impl Topology {
    /// Builds a topology from per-dimension extents and a global rank.
    ///
    /// `global_rank` is taken modulo the product of `extents`, so a caller
    /// peeling a topology down to a smaller process-count product can pass
    /// its original rank through unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `extents` is empty.
    #[must_use]
    pub fn new(extents: &[usize], global_rank: usize) -> Self {
        assert!(!extents.is_empty(), "topology must have at least one dimension");
        let np: usize = extents.iter().product();
        let global_rank = global_rank % np.max(1);

        // Mixed-radix decomposition: dimension 0 is the fastest-varying.
        let mut dims = Vec::with_capacity(extents.len());
        let mut stride = 1;
        for &np_i in extents {
            let rank_i = (global_rank / stride) % np_i;
            dims.push(TopoDim {
                np: np_i,
                rank: rank_i,
                lda: stride,
            });
            stride *= np_i;
        }
        Self { dims }
    }

    /// Order (number of dimensions) of this topology.
    #[must_use]
    pub fn order(&self) -> usize {
        self.dims.len()
    }

    /// Per-dimension descriptors.
    #[must_use]
    pub fn dims(&self) -> &[TopoDim] {
        &self.dims
    }

    /// Total number of processes, the product of all dimension extents.
    #[must_use]
    pub fn np(&self) -> usize {
        self.dims.iter().map(|d| d.np).product()
    }

    fn extents(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.np).collect()
    }

    /// Builds the physical topology of `np` processes matching `kind`, for
    /// the calling process's `global_rank`.
    #[must_use]
    pub fn build_physical(kind: GridKind, np: usize, global_rank: usize) -> Self {
        let extents = match kind {
            GridKind::SingleDim => vec![np],
            GridKind::Generic => greedy_prime_factorization(np),
            GridKind::FiveDPlus => hand_tabulated_shape(np, 5),
            GridKind::ThreeDPowerOfTwo => hand_tabulated_shape(np, 3),
            GridKind::EightDPowerOfTwo => hand_tabulated_shape(np, 8),
        };
        Self::new(&extents, global_rank)
    }

    /// Returns the deduplicated set of all topologies reachable from `self`
    /// by iterated fusion of adjacent dimensions, including `self`.
    ///
    /// Deduplication is by the tuple of resulting dimension extents.
    #[must_use]
    pub fn peel(&self, rule: PeelingRule, global_rank: usize) -> Vec<Self> {
        let mut seen: FxHashSet<Vec<usize>> = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack = vec![self.extents()];
        seen.insert(self.extents());

        while let Some(extents) = stack.pop() {
            out.push(Self::new(&extents, global_rank));

            if extents.len() <= 1 {
                continue;
            }
            for i in 0..extents.len() - 1 {
                let mut fused = Vec::with_capacity(extents.len() - 1);
                fused.extend_from_slice(&extents[..i]);
                fused.push(match rule {
                    PeelingRule::Additive => extents[i] + extents[i + 1],
                });
                fused.extend_from_slice(&extents[i + 2..]);

                if seen.insert(fused.clone()) {
                    stack.push(fused);
                }
            }
        }
        out
    }
}

/// Requested shape family for [`Topology::build_physical`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GridKind {
    /// A single dimension of extent `np`.
    SingleDim,
    /// Greedy descending-prime factorization of `np`.
    Generic,
    /// Hand-tabulated shape, 5 dimensions or more, up to `np = 2^15`.
    FiveDPlus,
    /// Hand-tabulated power-of-two shape with 3 dimensions.
    ThreeDPowerOfTwo,
    /// Hand-tabulated power-of-two shape with 8 dimensions.
    EightDPowerOfTwo,
}

/// Greedy descending-prime factorization: repeatedly divide out the largest
/// prime factor first, so the returned extents are sorted descending.
fn greedy_prime_factorization(mut np: usize) -> Vec<usize> {
    assert!(np > 0);
    if np == 1 {
        return vec![1];
    }
    let mut factors = Vec::new();
    let mut divisor = 2;
    while divisor * divisor <= np {
        while np % divisor == 0 {
            factors.push(divisor);
            np /= divisor;
        }
        divisor += 1;
    }
    if np > 1 {
        factors.push(np);
    }
    factors.sort_unstable_by(|a, b| b.cmp(a));
    factors
}

/// Hand-tabulated near-isotropic shapes for power-of-two process counts,
/// targeting `dims` dimensions. Falls back to generic factorization for
/// non-power-of-two `np` or when `np` is too small to usefully split into
/// `dims` dimensions (mirroring the fallback in `get_phys_topo`).
fn hand_tabulated_shape(np: usize, dims: usize) -> Vec<usize> {
    if np <= 1 || !np.is_power_of_two() || np > (1 << 15) {
        return greedy_prime_factorization(np);
    }
    let log2 = np.trailing_zeros() as usize;
    if log2 < dims {
        return greedy_prime_factorization(np);
    }

    // Distribute the log2(np) bits as evenly as possible across `dims`
    // dimensions, largest-first.
    let base = log2 / dims;
    let extra = log2 % dims;
    let mut extents = Vec::with_capacity(dims);
    for i in 0..dims {
        let bits = base + usize::from(i < extra);
        extents.push(1usize << bits);
    }
    extents.sort_unstable_by(|a, b| b.cmp(a));
    extents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_equals_process_count() {
        for np in [1, 2, 6, 12, 60, 128] {
            for kind in [
                GridKind::SingleDim,
                GridKind::Generic,
                GridKind::ThreeDPowerOfTwo,
                GridKind::FiveDPlus,
                GridKind::EightDPowerOfTwo,
            ] {
                let topo = Topology::build_physical(kind, np, 0);
                assert_eq!(topo.np(), np, "kind {kind:?} np {np}");
            }
        }
    }

    #[test]
    fn ranks_are_consistent_mixed_radix_decomposition() {
        let extents = [2, 3, 4];
        let np: usize = extents.iter().product();
        for global_rank in 0..np {
            let topo = Topology::new(&extents, global_rank);
            let recomposed: usize = topo
                .dims()
                .iter()
                .map(|d| d.rank * d.lda)
                .sum();
            assert_eq!(recomposed, global_rank);
        }
    }

    #[test]
    fn generic_factorization_is_descending() {
        let factors = greedy_prime_factorization(60);
        assert_eq!(factors, vec![5, 3, 2, 2]);
    }

    #[test]
    fn peel_additive_dedups_and_is_literal() {
        let topo = Topology::new(&[2, 3], 0);
        let peeled = topo.peel(PeelingRule::Additive, 0);

        // self, and the single fused dim [5] (2+3); no more since order<=1 stops.
        let mut extent_sets: Vec<Vec<usize>> =
            peeled.iter().map(|t| t.dims().iter().map(|d| d.np).collect()).collect();
        extent_sets.sort();
        assert_eq!(extent_sets, vec![vec![2, 3], vec![5]]);
    }

    #[test]
    fn peel_three_dims_recurses() {
        let topo = Topology::new(&[2, 3, 4], 0);
        let peeled = topo.peel(PeelingRule::Additive, 0);
        let mut extent_sets: Vec<Vec<usize>> =
            peeled.iter().map(|t| t.dims().iter().map(|d| d.np).collect()).collect();
        extent_sets.sort();
        // self [2,3,4]; fuse(0,1)->[5,4]; fuse(1,2)->[2,7]; fuse both stages down to [9]
        assert!(extent_sets.contains(&vec![2, 3, 4]));
        assert!(extent_sets.contains(&vec![5, 4]));
        assert!(extent_sets.contains(&vec![2, 7]));
        assert!(extent_sets.contains(&vec![9]));
    }

    #[test]
    fn single_dim_peel_is_noop() {
        let topo = Topology::new(&[7], 0);
        let peeled = topo.peel(PeelingRule::Additive, 0);
        assert_eq!(peeled.len(), 1);
    }

    #[test]
    fn peel_with_nonzero_rank_does_not_panic_on_a_shrunk_fused_topology() {
        // [2,3] has np=6 and rank 5 is valid for it, but additive fusion
        // collapses it to [5] (np=5); rank 5 must still resolve (as rank 0
        // of the fused topology) rather than panic.
        let topo = Topology::new(&[2, 3], 5);
        let peeled = topo.peel(PeelingRule::Additive, 5);
        let fused = peeled.iter().find(|t| t.dims().len() == 1).unwrap();
        assert_eq!(fused.np(), 5);
        assert_eq!(fused.dims()[0].rank, 0);
    }

    #[test]
    fn new_wraps_an_out_of_range_rank_instead_of_panicking() {
        let topo = Topology::new(&[3], 5);
        assert_eq!(topo.dims()[0].rank, 2);
    }
}
