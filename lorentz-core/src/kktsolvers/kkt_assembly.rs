//! Two-pass assembly of the full (both triangles) KKT matrix
//!
//! ```text
//! [  P    Aᵀ ]
//! [  A  -Hs  ]
//! ```
//!
//! with Hs block-diagonal per cone (diagonal or dense depending on cone
//! kind) and structural zeros inserted on the entire diagonal so that the
//! diagonal family is contiguous and updatable. Every source entry's
//! destination is recorded in the data map.

use super::datamap::{nnz_vec, pdim, FullDataMap};
use crate::cones::composite::hs_is_diagonal;
use crate::cones::CompositeCone;
use crate::linalg::csc::MatrixShape;
use crate::linalg::CscMatrix;

/// Assemble K from the full P block, A, and the cone layout.
pub fn assemble_full_kkt(
    p_full: &CscMatrix,
    a: &CscMatrix,
    cones: &CompositeCone,
) -> (CscMatrix, FullDataMap) {
    let mut map = FullDataMap::new(p_full, a, cones);
    let (m, n) = (a.m, a.n);
    let p = pdim(&map.sparse_maps);

    let nnz_diag_p = p_full.count_diagonal_entries();
    let nnz_hsblocks = map.hsblocks.len();

    let nnz_kkt = p_full.nnz()              // P block
        + n                                  // structural diagonal zeros...
        - nnz_diag_p                         // ...minus those already in P
        + 2 * a.nnz()                        // A and Aᵀ
        + nnz_hsblocks                       // Hs blocks below Aᵀ
        + 2 * nnz_vec(&map.sparse_maps)      // sparse cone off-diagonals
        + p;                                 // sparse cone diagonal

    let dim = m + n + p;
    let mut kkt = CscMatrix::spalloc(dim, dim, nnz_kkt);

    assemble_colcounts(&mut kkt, p_full, a, cones);
    assemble_fill(&mut kkt, p_full, a, cones, &mut map);

    (kkt, map)
}

fn assemble_colcounts(kkt: &mut CscMatrix, p_full: &CscMatrix, a: &CscMatrix, cones: &CompositeCone) {
    let n = a.n;

    kkt.colptr.fill(0);

    // first n columns: P (full), its missing diagonal, and A below it
    kkt.colcount_block(p_full, 0, MatrixShape::N);
    kkt.colcount_missing_diag(p_full, 0);
    kkt.colcount_block(a, 0, MatrixShape::N);

    // columns n..n+m: Aᵀ on top, Hs blocks below
    kkt.colcount_block(a, n, MatrixShape::T);

    for (i, cone) in cones.cones.iter().enumerate() {
        let firstcol = cones.rng_cones[i].start + n;
        let blockdim = cone.dim();
        if hs_is_diagonal(cone) {
            kkt.colcount_diag(firstcol, blockdim);
        } else {
            kkt.colcount_dense_full(firstcol, blockdim);
        }
    }
}

fn assemble_fill(
    kkt: &mut CscMatrix,
    p_full: &CscMatrix,
    a: &CscMatrix,
    cones: &CompositeCone,
    map: &mut FullDataMap,
) {
    let n = a.n;

    kkt.colcount_to_colptr();

    kkt.fill_p_block_with_missing_diag_full(p_full, &mut map.p);
    kkt.fill_block(a, &mut map.a, n, 0, MatrixShape::N);
    kkt.fill_block(a, &mut map.at, 0, n, MatrixShape::T);

    for (i, cone) in cones.cones.iter().enumerate() {
        let firstcol = cones.rng_cones[i].start + n;
        let blockdim = cone.dim();
        let block = &mut map.hsblocks[cones.rng_blocks[i].clone()];
        if hs_is_diagonal(cone) {
            kkt.fill_diag(block, firstcol, blockdim);
        } else {
            kkt.fill_dense_full(block, firstcol, blockdim);
        }
    }

    kkt.backshift_colptrs();

    // structural zeros were inserted on the whole diagonal, so its index
    // can now be recovered for every column
    kkt.map_diag_full(&mut map.diag_full);
    map.diag_p.copy_from_slice(&map.diag_full[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;
    use crate::problem::ConeSpec;

    fn test_matrices() -> (CscMatrix, CscMatrix) {
        // P (upper triangle input)
        // [1 2 4]
        // [. 3 5]
        // [. . 6]
        let p = sparse::from_triplets_symmetric(
            3,
            vec![
                (0, 0, 1.0),
                (0, 1, 2.0),
                (1, 1, 3.0),
                (0, 2, 4.0),
                (1, 2, 5.0),
                (2, 2, 6.0),
            ],
        );
        // A
        // [7  0  8]
        // [0  9 10]
        // [1  2  3]
        let a = sparse::from_triplets(
            3,
            3,
            vec![
                (0, 0, 7.0),
                (0, 2, 8.0),
                (1, 1, 9.0),
                (1, 2, 10.0),
                (2, 0, 1.0),
                (2, 1, 2.0),
                (2, 2, 3.0),
            ],
        );
        (CscMatrix::full_from_triu(&p), CscMatrix::from_sprs(&a))
    }

    #[test]
    fn test_assembly_diagonal_block() {
        let (p_full, a) = test_matrices();
        let cones = CompositeCone::new(&[ConeSpec::NonNeg { dim: 3 }]);

        let (mut kkt, map) = assemble_full_kkt(&p_full, &a, &cones);
        assert!(kkt.is_well_formed());

        // closed-form nonzero count
        assert_eq!(
            kkt.nnz(),
            p_full.nnz() + 3 - p_full.count_diagonal_entries() + 2 * a.nnz() + 3
        );

        for &idx in &map.hsblocks {
            kkt.nzval[idx] = -1.0;
        }

        let expected = [
            [1.0, 2.0, 4.0, 7.0, 0.0, 1.0],
            [2.0, 3.0, 5.0, 0.0, 9.0, 2.0],
            [4.0, 5.0, 6.0, 8.0, 10.0, 3.0],
            [7.0, 0.0, 8.0, -1.0, 0.0, 0.0],
            [0.0, 9.0, 10.0, 0.0, -1.0, 0.0],
            [1.0, 2.0, 3.0, 0.0, 0.0, -1.0],
        ];
        for (r, row) in expected.iter().enumerate() {
            for (c, &val) in row.iter().enumerate() {
                assert_eq!(kkt.get(r, c), val, "mismatch at ({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_assembly_dense_block() {
        let (p_full, a) = test_matrices();
        let cones = CompositeCone::new(&[ConeSpec::Exp3]);

        let (mut kkt, map) = assemble_full_kkt(&p_full, &a, &cones);
        assert!(kkt.is_well_formed());
        assert_eq!(
            kkt.nnz(),
            p_full.nnz() + 3 - p_full.count_diagonal_entries() + 2 * a.nnz() + 9
        );

        for &idx in &map.hsblocks {
            kkt.nzval[idx] = -1.0;
        }

        // lower-right block is fully dense
        for r in 3..6 {
            for c in 3..6 {
                assert_eq!(kkt.get(r, c), -1.0);
            }
        }
    }

    #[test]
    fn test_assembly_structural_zero_diagonal_for_lp() {
        // empty P still produces a full structural diagonal
        let p = sparse::from_triplets_symmetric(2, Vec::<(usize, usize, f64)>::new());
        let p_full = CscMatrix::full_from_triu(&p);
        let a = CscMatrix::from_sprs(&sparse::from_triplets(
            1,
            2,
            vec![(0, 0, 1.0), (0, 1, 1.0)],
        ));
        let cones = CompositeCone::new(&[ConeSpec::Zero { dim: 1 }]);

        let (kkt, map) = assemble_full_kkt(&p_full, &a, &cones);
        assert!(kkt.is_well_formed());
        assert_eq!(kkt.nnz(), 2 + 2 * 2 + 1);
        assert_eq!(map.diag_full.len(), 3);
        for (j, &idx) in map.diag_full.iter().enumerate() {
            assert_eq!(kkt.rowval[idx], j);
        }
    }

    #[test]
    fn test_data_map_families_are_disjoint_and_reproduce_writes() {
        let (p_full, a) = test_matrices();
        let cones = CompositeCone::new(&[ConeSpec::NonNeg { dim: 1 }, ConeSpec::Soc { dim: 2 }]);
        let (mut kkt, map) = assemble_full_kkt(&p_full, &a, &cones);

        // all mapped indices across families are distinct
        let mut seen = std::collections::HashSet::new();
        for &idx in map
            .p
            .iter()
            .chain(&map.a)
            .chain(&map.at)
            .chain(&map.hsblocks)
        {
            assert!(seen.insert(idx), "families overlap at index {}", idx);
        }

        // write through each family and read back bit-for-bit
        for (k, &idx) in map.hsblocks.iter().enumerate() {
            kkt.nzval[idx] = -(k as f64 + 0.5);
        }
        for (k, &idx) in map.hsblocks.iter().enumerate() {
            assert_eq!(kkt.nzval[idx].to_bits(), (-(k as f64 + 0.5)).to_bits());
        }

        // diag_full points at the true diagonal everywhere
        for (j, &idx) in map.diag_full.iter().enumerate() {
            assert_eq!(kkt.rowval[idx], j);
        }
    }
}
