//! Index maps from problem-data nonzeros to KKT nonzero positions.
//!
//! Each updatable family (P entries, A entries, Aᵀ entries, Hs blocks,
//! sparse-expansion entries, and the two diagonal views) records, for every
//! source entry, the position at which it landed in K's nzval array. The
//! maps are immutable after assembly and live for the solver's lifetime.

use crate::cones::composite::hs_block_size;
use crate::cones::CompositeCone;
use crate::linalg::CscMatrix;

/// Sparse-expansion map for one second-order cone: the two dense columns
/// u/v plus their 2×2 diagonal tail. Retained for the nonzero accounting;
/// always empty in this core, where large cones are chained instead of
/// expanded (p = 0).
#[derive(Debug, Clone)]
pub struct SocExpansionMap {
    pub u: Vec<usize>,
    pub v: Vec<usize>,
    pub d: [usize; 2],
}

impl SocExpansionMap {
    pub fn pdim(&self) -> usize {
        2
    }

    pub fn nnz_vec(&self) -> usize {
        self.u.len() + self.v.len()
    }
}

/// Total extension dimension of a set of sparse-expansion maps.
pub fn pdim(maps: &[SocExpansionMap]) -> usize {
    maps.iter().map(|m| m.pdim()).sum()
}

/// Total off-diagonal entries of a set of sparse-expansion maps.
pub fn nnz_vec(maps: &[SocExpansionMap]) -> usize {
    maps.iter().map(|m| m.nnz_vec()).sum()
}

/// Position maps for every updatable region of the full KKT matrix.
#[derive(Debug, Clone)]
pub struct FullDataMap {
    /// Entries of the (internally expanded) full P block.
    pub p: Vec<usize>,
    /// Entries of the A block (lower left).
    pub a: Vec<usize>,
    /// Entries of the Aᵀ block (upper right).
    pub at: Vec<usize>,
    /// Concatenated Hessian-block entries, by cone.
    pub hsblocks: Vec<usize>,
    /// Sparse cone expansion terms (empty: expansion is disabled here).
    pub sparse_maps: Vec<SocExpansionMap>,
    /// Diagonal of the upper-left P block, structural zeros included.
    pub diag_p: Vec<usize>,
    /// Diagonal of every column of K, structural zeros included.
    pub diag_full: Vec<usize>,
}

impl FullDataMap {
    pub fn new(p_full: &CscMatrix, a: &CscMatrix, cones: &CompositeCone) -> Self {
        let (m, n) = (a.m, a.n);

        let hsblock_len: usize = cones.cones.iter().map(hs_block_size).sum();
        let sparse_maps = Vec::new();

        Self {
            p: vec![0; p_full.nnz()],
            a: vec![0; a.nnz()],
            at: vec![0; a.nnz()],
            hsblocks: vec![0; hsblock_len],
            diag_p: vec![0; n],
            diag_full: vec![0; m + n + pdim(&sparse_maps)],
            sparse_maps,
        }
    }
}

/// Expected signs of D in the LDL^T factorization: +1 on the x rows, −1 on
/// the z rows (and the sparse-expansion pattern when present).
pub fn fill_dsigns(dsigns: &mut [i8], m: usize, n: usize, map: &FullDataMap) {
    assert_eq!(dsigns.len(), m + n + pdim(&map.sparse_maps));
    for (i, sign) in dsigns.iter_mut().enumerate() {
        *sign = if i < n { 1 } else { -1 };
    }
    // sparse expansion columns alternate (-1, 1) per cone; none are
    // present when large cones are chained instead
    let mut idx = m + n;
    for smap in &map.sparse_maps {
        dsigns[idx] = -1;
        dsigns[idx + 1] = 1;
        idx += smap.pdim();
    }
}
