//! Tensor meta-model and mapping chain: edge lengths, symmetry marks,
//! per-mode mapping chains, and home-layout bookkeeping. A `TensorMeta`
//! describes shape only; the caller pairs it with a dense row-major data
//! buffer sized by `padded_len`.

use arrayvec::ArrayVec;

/// Maximum tensor order this crate supports without heap allocation for
/// per-mode small vectors. Chosen generously for the multilinear-algebra
/// tensors this engine targets (quantum-chemistry amplitudes rarely exceed
/// order 6-8); orders beyond this still work, just via `Vec` fallbacks where
/// noted.
pub const MAX_ORDER: usize = 8;

/// Per-adjacent-pair symmetry tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SymMark {
    /// No relation between adjacent modes.
    NS,
    /// Symmetric: entries equal under swap of the two modes.
    SY,
    /// Antisymmetric: entries negate under swap.
    AS,
    /// Symmetric-Hermitian: equal under swap (treated identically to `SY`
    /// for the real-valued traversal rules; a complex semiring would
    /// conjugate on top of this).
    SH,
}

impl SymMark {
    /// Whether this mark participates in a symmetry group (anything but
    /// `NS`).
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        !matches!(self, Self::NS)
    }
}

/// One factor of a mode's mapping chain: either a slice of a physical grid
/// dimension, or a purely virtual (per-process loop) factor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MappingFactor {
    /// Mapped onto grid dimension `dim` with `extent` physical processes.
    Physical {
        /// Grid-dimension id this factor maps onto.
        dim: usize,
        /// Number of processes along that dimension this factor claims.
        extent: usize,
    },
    /// A virtual (not physically distributed) factor of the given extent;
    /// each process iterates this many sub-blocks.
    Virtual {
        /// Virtualization extent.
        extent: usize,
    },
}

impl MappingFactor {
    /// The extent of this factor regardless of kind.
    #[must_use]
    pub const fn extent(self) -> usize {
        match self {
            Self::Physical { extent, .. } | Self::Virtual { extent } => extent,
        }
    }

    /// `true` if this factor is a [`MappingFactor::Physical`].
    #[must_use]
    pub const fn is_physical(self) -> bool {
        matches!(self, Self::Physical { .. })
    }
}

/// A mode's mapping chain: an ordered list of physical/virtual factors whose
/// product equals the padded edge length divided by a fixed block size.
pub type MappingChain = ArrayVec<MappingFactor, MAX_ORDER>;

/// Returns the total virtualization factor of a chain (product of all
/// `Virtual` extents).
#[must_use]
pub fn chain_nvirt(chain: &[MappingFactor]) -> usize {
    chain
        .iter()
        .filter(|f| !f.is_physical())
        .map(|f| f.extent())
        .product()
}

/// Returns the total physical extent of a chain (product of all `Physical`
/// extents), i.e. how many processes this mode is distributed across.
#[must_use]
pub fn chain_physical_extent(chain: &[MappingFactor]) -> usize {
    chain
        .iter()
        .filter(|f| f.is_physical())
        .map(|f| f.extent())
        .product()
}

/// A tensor's static description: order, edge lengths, symmetry marks and
/// per-mode mapping chains. Does not itself own element data — callers pair
/// a `TensorMeta` with a dense row-major `Vec<T>` buffer sized by the
/// product of [`TensorMeta::padded_len`].
#[derive(Clone, Debug)]
pub struct TensorMeta {
    edge_len: Vec<usize>,
    sym: Vec<SymMark>,
    mapping: Vec<MappingChain>,
    /// Edge lengths after padding for distribution (always >= `edge_len`).
    padded_len: Vec<usize>,
    /// `true` if this tensor began the current operation in its original
    /// (user-presented) layout.
    is_home: bool,
    /// `true` if a home buffer is currently tracked for this tensor at all
    /// (a tensor produced purely as an internal surrogate has none).
    has_home: bool,
}

impl TensorMeta {
    /// Builds a new tensor meta-model with a trivial (unmapped, order-1
    /// virtual-only) mapping chain for every mode and no padding.
    ///
    /// # Panics
    ///
    /// Panics if `edge_len.len() != sym.len()` or if the symmetry invariant
    /// (equal lengths within a symmetric run) is violated.
    #[must_use]
    pub fn new(edge_len: Vec<usize>, sym: Vec<SymMark>) -> Self {
        assert_eq!(edge_len.len(), sym.len(), "order mismatch between edge_len and sym");
        Self::check_sym_invariant(&edge_len, &sym);

        let mapping = edge_len
            .iter()
            .map(|&len| {
                let mut chain = MappingChain::new();
                chain.push(MappingFactor::Virtual { extent: len });
                chain
            })
            .collect();

        let padded_len = edge_len.clone();
        Self {
            edge_len,
            sym,
            mapping,
            padded_len,
            is_home: true,
            has_home: true,
        }
    }

    fn check_sym_invariant(edge_len: &[usize], sym: &[SymMark]) {
        for i in 0..sym.len().saturating_sub(1) {
            if sym[i].is_symmetric() {
                assert_eq!(
                    edge_len[i],
                    edge_len[i + 1],
                    "symmetric modes {i} and {} must share an edge length",
                    i + 1
                );
            }
        }
    }

    /// Tensor order (number of modes).
    #[must_use]
    pub fn order(&self) -> usize {
        self.edge_len.len()
    }

    /// Unpadded edge lengths.
    #[must_use]
    pub fn edge_len(&self) -> &[usize] {
        &self.edge_len
    }

    /// Padded edge lengths (always divisible by that mode's total mapping
    /// factor).
    #[must_use]
    pub fn padded_len(&self) -> &[usize] {
        &self.padded_len
    }

    /// Symmetry marks, one per mode.
    #[must_use]
    pub fn sym(&self) -> &[SymMark] {
        &self.sym
    }

    /// Per-mode mapping chains.
    #[must_use]
    pub fn mapping(&self) -> &[MappingChain] {
        &self.mapping
    }

    /// `true` when any mode has a zero edge length, the short-circuit
    /// condition every op checks before doing any real traversal work.
    #[must_use]
    pub fn has_zero_edge_len(&self) -> bool {
        self.edge_len.iter().any(|&l| l == 0)
    }

    /// Whether this tensor currently sits in its original (home) layout.
    #[must_use]
    pub const fn is_home(&self) -> bool {
        self.is_home
    }

    /// Whether a home buffer is tracked for this tensor at all.
    #[must_use]
    pub const fn has_home(&self) -> bool {
        self.has_home
    }

    /// Marks this tensor as no longer being in its home layout (called when
    /// a mapping is applied that differs from the entry mapping).
    pub fn mark_not_home(&mut self) {
        self.is_home = false;
    }

    /// Marks this tensor as being in its home layout again (called once a
    /// restore has moved its data back to the entry mapping).
    pub fn mark_home(&mut self) {
        self.is_home = true;
    }

    /// Sets the mapping chain for mode `m`, padding `edge_len[m]` up to a
    /// multiple of the chain's total factor if needed.
    ///
    /// # Panics
    ///
    /// Panics if `m` is out of range.
    pub fn set_mapping(&mut self, m: usize, chain: MappingChain) {
        assert!(m < self.order(), "mode {m} out of range");
        let total: usize = chain.iter().map(|f| f.extent()).product();
        let total = total.max(1);
        let rem = self.edge_len[m] % total;
        self.padded_len[m] = if rem == 0 {
            self.edge_len[m]
        } else {
            self.edge_len[m] + (total - rem)
        };
        self.mapping[m] = chain;
    }

    /// Finds the (start, end) of the maximal symmetric group starting at
    /// mode `start`, or `None` if `sym[start] == NS`.
    ///
    /// `sym[i]` marks mode `i` as symmetric with mode `i+1`; a run of `k`
    /// consecutive equal non-`NS` links starting at `start` spans a group
    /// of `k+1` modes, terminated by the first `NS` link or the tensor's
    /// last mode.
    #[must_use]
    pub fn sym_group_at(&self, start: usize) -> Option<(usize, usize)> {
        if !self.sym[start].is_symmetric() {
            return None;
        }
        let mark = self.sym[start];
        let mut end = start + 1;
        while end < self.order() && self.sym[end - 1] == mark {
            end += 1;
        }
        Some((start, end))
    }

    /// Enumerates the maximal contiguous symmetry groups of this tensor as
    /// `(start, end, mark)` triples (half-open ranges), in mode order.
    #[must_use]
    pub fn sym_groups(&self) -> Vec<(usize, usize, SymMark)> {
        let mut groups = Vec::new();
        let mut i = 0;
        while i < self.order() {
            if let Some((start, end)) = self.sym_group_at(i) {
                groups.push((start, end, self.sym[start]));
                i = end;
            } else {
                i += 1;
            }
        }
        groups
    }

}
