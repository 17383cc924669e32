//! Raw CSC matrix storage and the column-count / fill primitives used to
//! assemble the KKT matrix.
//!
//! The assembly workflow is two-pass: a column-count pass accumulates the
//! number of nonzeros each KKT column will receive, `colcount_to_colptr`
//! converts counts to offsets, the fill passes write row indices and values
//! while recording destination positions into the data map, and
//! `backshift_colptrs` recovers the canonical column pointers.

use crate::problem::{SparseCsc, SparseSymmetricCsc};

/// Orientation of a block being counted or filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixShape {
    /// Block is placed as-is.
    N,
    /// Block is placed transposed.
    T,
}

/// Sparse matrix in raw CSC form.
///
/// Invariants: `colptr` is monotone with `colptr[n] == nnz`; row indices are
/// strictly increasing within each column (no duplicates).
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    /// Number of rows.
    pub m: usize,
    /// Number of columns.
    pub n: usize,
    /// Column pointers (length n + 1).
    pub colptr: Vec<usize>,
    /// Row indices.
    pub rowval: Vec<usize>,
    /// Nonzero values.
    pub nzval: Vec<f64>,
}

impl CscMatrix {
    /// Allocate an (m × n) matrix with space for `nnz` nonzeros.
    pub fn spalloc(m: usize, n: usize, nnz: usize) -> Self {
        Self {
            m,
            n,
            colptr: vec![0; n + 1],
            rowval: vec![0; nnz],
            nzval: vec![0.0; nnz],
        }
    }

    /// Number of stored nonzeros.
    pub fn nnz(&self) -> usize {
        self.colptr[self.n]
    }

    /// Copy an `sprs` matrix into raw CSC form.
    pub fn from_sprs(mat: &SparseCsc) -> Self {
        let indptr = mat.indptr();
        Self {
            m: mat.rows(),
            n: mat.cols(),
            colptr: indptr.raw_storage().to_vec(),
            rowval: mat.indices().to_vec(),
            nzval: mat.data().to_vec(),
        }
    }

    /// Expand an upper-triangle symmetric matrix to its full (both
    /// triangles) form.
    pub fn full_from_triu(triu: &SparseSymmetricCsc) -> Self {
        let n = triu.cols();
        let indptr = triu.indptr();
        let colptr = indptr.raw_storage();
        let rowval = triu.indices();
        let nzval = triu.data();

        // column counts of the full pattern
        let mut counts = vec![0usize; n];
        for j in 0..n {
            for p in colptr[j]..colptr[j + 1] {
                let i = rowval[p];
                counts[j] += 1;
                if i != j {
                    counts[i] += 1;
                }
            }
        }

        let mut full = CscMatrix::spalloc(n, n, counts.iter().sum());
        for j in 0..n {
            full.colptr[j + 1] = full.colptr[j] + counts[j];
        }

        let mut cursor = full.colptr[..n].to_vec();
        // walking source columns in order keeps destination rows sorted:
        // the mirrored entry (j, i) lands in column i with row j > i after
        // all of column i's upper entries, in increasing j
        for j in 0..n {
            for p in colptr[j]..colptr[j + 1] {
                let i = rowval[p];
                let dst = cursor[j];
                full.rowval[dst] = i;
                full.nzval[dst] = nzval[p];
                cursor[j] += 1;
            }
        }
        for j in 0..n {
            for p in colptr[j]..colptr[j + 1] {
                let i = rowval[p];
                if i != j {
                    let dst = cursor[i];
                    full.rowval[dst] = j;
                    full.nzval[dst] = nzval[p];
                    cursor[i] += 1;
                }
            }
        }
        full
    }

    /// Number of structurally present diagonal entries.
    pub fn count_diagonal_entries(&self) -> usize {
        let mut count = 0;
        for j in 0..self.n {
            for p in self.colptr[j]..self.colptr[j + 1] {
                if self.rowval[p] == j {
                    count += 1;
                }
            }
        }
        count
    }

    /// Value at (row, col); zero if not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        for p in self.colptr[col]..self.colptr[col + 1] {
            if self.rowval[p] == row {
                return self.nzval[p];
            }
        }
        0.0
    }

    /// y = A x.
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.n);
        assert_eq!(y.len(), self.m);
        y.fill(0.0);
        for j in 0..self.n {
            let xj = x[j];
            for p in self.colptr[j]..self.colptr[j + 1] {
                y[self.rowval[p]] += self.nzval[p] * xj;
            }
        }
    }

    /// Extract the upper triangle, returning the triangle and a map from
    /// this matrix's nonzero positions to the triangle's positions
    /// (`usize::MAX` for strictly-lower entries).
    pub fn triu_with_map(&self) -> (CscMatrix, Vec<usize>) {
        let mut map = vec![usize::MAX; self.nnz()];
        let mut counts = vec![0usize; self.n];
        for j in 0..self.n {
            for p in self.colptr[j]..self.colptr[j + 1] {
                if self.rowval[p] <= j {
                    counts[j] += 1;
                }
            }
        }

        let mut triu = CscMatrix::spalloc(self.m, self.n, counts.iter().sum());
        for j in 0..self.n {
            triu.colptr[j + 1] = triu.colptr[j] + counts[j];
        }

        let mut cursor = triu.colptr[..self.n].to_vec();
        for j in 0..self.n {
            for p in self.colptr[j]..self.colptr[j + 1] {
                if self.rowval[p] <= j {
                    let dst = cursor[j];
                    triu.rowval[dst] = self.rowval[p];
                    triu.nzval[dst] = self.nzval[p];
                    map[p] = dst;
                    cursor[j] += 1;
                }
            }
        }
        (triu, map)
    }

    // ------------------------------------------------------------------
    // column-count pass
    // ------------------------------------------------------------------

    /// Count a sparse block placed at column offset `firstcol`.
    pub fn colcount_block(&mut self, block: &CscMatrix, firstcol: usize, shape: MatrixShape) {
        match shape {
            MatrixShape::N => {
                for j in 0..block.n {
                    self.colptr[firstcol + j] += block.colptr[j + 1] - block.colptr[j];
                }
            }
            MatrixShape::T => {
                for &i in &block.rowval {
                    self.colptr[firstcol + i] += 1;
                }
            }
        }
    }

    /// Count structural-zero diagonal entries for the columns of `block`
    /// that have no stored diagonal.
    pub fn colcount_missing_diag(&mut self, block: &CscMatrix, firstcol: usize) {
        for j in 0..block.n {
            let mut found = false;
            for p in block.colptr[j]..block.colptr[j + 1] {
                if block.rowval[p] == j {
                    found = true;
                    break;
                }
            }
            if !found {
                self.colptr[firstcol + j] += 1;
            }
        }
    }

    /// Count a diagonal block of size `blockdim` starting at `firstcol`.
    pub fn colcount_diag(&mut self, firstcol: usize, blockdim: usize) {
        for j in 0..blockdim {
            self.colptr[firstcol + j] += 1;
        }
    }

    /// Count a dense (both triangles) square block of size `blockdim`.
    pub fn colcount_dense_full(&mut self, firstcol: usize, blockdim: usize) {
        for j in 0..blockdim {
            self.colptr[firstcol + j] += blockdim;
        }
    }

    /// Convert per-column counts (stored in `colptr[j]`) to offsets.
    pub fn colcount_to_colptr(&mut self) {
        let mut current = 0;
        for j in 0..=self.n {
            let count = self.colptr[j];
            self.colptr[j] = current;
            current += count;
        }
    }

    // ------------------------------------------------------------------
    // fill pass (colptr entries act as write cursors)
    // ------------------------------------------------------------------

    /// Fill a sparse block at (firstrow, firstcol), recording destination
    /// positions into `map` (in the source's storage order).
    pub fn fill_block(
        &mut self,
        block: &CscMatrix,
        map: &mut [usize],
        firstrow: usize,
        firstcol: usize,
        shape: MatrixShape,
    ) {
        assert_eq!(map.len(), block.nnz());
        for j in 0..block.n {
            for p in block.colptr[j]..block.colptr[j + 1] {
                let i = block.rowval[p];
                let (row, col) = match shape {
                    MatrixShape::N => (firstrow + i, firstcol + j),
                    MatrixShape::T => (firstrow + j, firstcol + i),
                };
                let dst = self.colptr[col];
                self.rowval[dst] = row;
                self.nzval[dst] = block.nzval[p];
                map[p] = dst;
                self.colptr[col] += 1;
            }
        }
    }

    /// Fill the full P block at the origin, inserting a structural zero on
    /// the diagonal of every column that lacks one, and recording the
    /// destination of every P entry.
    pub fn fill_p_block_with_missing_diag_full(&mut self, p_full: &CscMatrix, map: &mut [usize]) {
        assert_eq!(map.len(), p_full.nnz());
        for j in 0..p_full.n {
            let mut have_diag = false;
            let mut pending_diag = true;
            for p in p_full.colptr[j]..p_full.colptr[j + 1] {
                let i = p_full.rowval[p];
                if i == j {
                    have_diag = true;
                } else if i > j && pending_diag && !have_diag {
                    // diagonal slot goes before the first strictly-lower row
                    let dst = self.colptr[j];
                    self.rowval[dst] = j;
                    self.nzval[dst] = 0.0;
                    self.colptr[j] += 1;
                    pending_diag = false;
                }
                let dst = self.colptr[j];
                self.rowval[dst] = i;
                self.nzval[dst] = p_full.nzval[p];
                map[p] = dst;
                self.colptr[j] += 1;
            }
            if !have_diag && pending_diag {
                let dst = self.colptr[j];
                self.rowval[dst] = j;
                self.nzval[dst] = 0.0;
                self.colptr[j] += 1;
            }
        }
    }

    /// Fill a structural-zero diagonal block, recording positions.
    pub fn fill_diag(&mut self, map: &mut [usize], firstcol: usize, blockdim: usize) {
        assert_eq!(map.len(), blockdim);
        for j in 0..blockdim {
            let col = firstcol + j;
            let dst = self.colptr[col];
            self.rowval[dst] = col;
            self.nzval[dst] = 0.0;
            map[j] = dst;
            self.colptr[col] += 1;
        }
    }

    /// Fill a dense square block (both triangles) at (firstcol, firstcol),
    /// column-major, recording positions.
    pub fn fill_dense_full(&mut self, map: &mut [usize], firstcol: usize, blockdim: usize) {
        assert_eq!(map.len(), blockdim * blockdim);
        for j in 0..blockdim {
            let col = firstcol + j;
            for i in 0..blockdim {
                let dst = self.colptr[col];
                self.rowval[dst] = firstcol + i;
                self.nzval[dst] = 0.0;
                map[j * blockdim + i] = dst;
                self.colptr[col] += 1;
            }
        }
    }

    /// Undo the cursor advancement of the fill pass, recovering the
    /// canonical column pointers.
    pub fn backshift_colptrs(&mut self) {
        for j in (1..=self.n).rev() {
            self.colptr[j] = self.colptr[j - 1];
        }
        self.colptr[0] = 0;
    }

    /// Record the position of the diagonal entry of every column.
    /// Every diagonal entry must be structurally present.
    pub fn map_diag_full(&self, diag: &mut [usize]) {
        assert_eq!(diag.len(), self.n);
        for j in 0..self.n {
            let mut found = false;
            for p in self.colptr[j]..self.colptr[j + 1] {
                if self.rowval[p] == j {
                    diag[j] = p;
                    found = true;
                    break;
                }
            }
            assert!(found, "column {} has no diagonal entry", j);
        }
    }

    /// Check the CSC invariant (sorted, duplicate-free columns).
    pub fn is_well_formed(&self) -> bool {
        if self.colptr.len() != self.n + 1 || self.colptr[self.n] != self.rowval.len() {
            return false;
        }
        for j in 0..self.n {
            if self.colptr[j] > self.colptr[j + 1] {
                return false;
            }
            for p in self.colptr[j]..self.colptr[j + 1] {
                if self.rowval[p] >= self.m {
                    return false;
                }
                if p > self.colptr[j] && self.rowval[p] <= self.rowval[p - 1] {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    #[test]
    fn test_full_from_triu() {
        // [[4, 1], [1, 2]]
        let p = sparse::from_triplets_symmetric(2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 2.0)]);
        let full = CscMatrix::full_from_triu(&p);
        assert!(full.is_well_formed());
        assert_eq!(full.nnz(), 4);
        assert_eq!(full.get(0, 0), 4.0);
        assert_eq!(full.get(1, 0), 1.0);
        assert_eq!(full.get(0, 1), 1.0);
        assert_eq!(full.get(1, 1), 2.0);
        assert_eq!(full.count_diagonal_entries(), 2);
    }

    #[test]
    fn test_triu_with_map() {
        let p = sparse::from_triplets_symmetric(2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 2.0)]);
        let full = CscMatrix::full_from_triu(&p);
        let (triu, map) = full.triu_with_map();

        assert!(triu.is_well_formed());
        assert_eq!(triu.nnz(), 3);
        assert_eq!(triu.get(0, 1), 1.0);
        assert_eq!(triu.get(1, 0), 0.0);

        // every upper entry of the full matrix maps to the same value
        for p in 0..full.nnz() {
            if map[p] != usize::MAX {
                assert_eq!(full.nzval[p], triu.nzval[map[p]]);
            }
        }
        assert_eq!(map.iter().filter(|&&x| x == usize::MAX).count(), 1);
    }

    #[test]
    fn test_mul_vec() {
        let a = CscMatrix::from_sprs(&sparse::from_triplets(
            2,
            2,
            vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 4.0)],
        ));
        let mut y = vec![0.0; 2];
        a.mul_vec(&[1.0, 2.0], &mut y);
        assert_eq!(y, vec![5.0, 11.0]);
    }

    #[test]
    fn test_colcount_fill_roundtrip() {
        // assemble [[B, 0], [0, D]] with B 2x2 sparse and D a 2x2 diagonal
        let b = CscMatrix::from_sprs(&sparse::from_triplets(
            2,
            2,
            vec![(0, 0, 1.0), (1, 0, 2.0), (1, 1, 3.0)],
        ));

        let mut k = CscMatrix::spalloc(4, 4, b.nnz() + 2);
        k.colcount_block(&b, 0, MatrixShape::N);
        k.colcount_diag(2, 2);
        k.colcount_to_colptr();

        let mut bmap = vec![0usize; b.nnz()];
        let mut dmap = vec![0usize; 2];
        k.fill_block(&b, &mut bmap, 0, 0, MatrixShape::N);
        k.fill_diag(&mut dmap, 2, 2);
        k.backshift_colptrs();

        assert!(k.is_well_formed());
        assert_eq!(k.nnz(), 5);
        assert_eq!(k.get(1, 0), 2.0);
        for (src, &dst) in bmap.iter().enumerate() {
            assert_eq!(k.nzval[dst], b.nzval[src]);
        }
        assert_eq!(k.rowval[dmap[0]], 2);
        assert_eq!(k.rowval[dmap[1]], 3);
    }
}
