//! LDL^T factorization of symmetric quasidefinite matrices.
//!
//! Takes the upper triangle in CSC form, applies an AMD fill-reducing
//! ordering, and factors P A P^T = L D L^T with a signed dynamic
//! regularization of small pivots. Values can be updated in place through
//! the recorded input-to-permuted-matrix map and refactored without
//! repeating the symbolic analysis.

use super::csc::CscMatrix;
use thiserror::Error;

/// Errors returned by factor operations.
#[derive(Debug, Error)]
pub enum QdldlError {
    #[error("matrix dimension fields are incompatible")]
    IncompatibleDimension,
    #[error("matrix has an empty column")]
    EmptyColumn,
    #[error("matrix is not upper triangular")]
    NotUpperTriangular,
    #[error("factorization produced a zero pivot")]
    ZeroPivot,
    #[error("fill-reducing ordering failed: {0}")]
    OrderingFailed(String),
}

/// Settings for [`QdldlFactorization`].
#[derive(Debug, Clone)]
pub struct QdldlSettings {
    /// Scale on the AMD dense-column threshold.
    pub amd_dense_scale: f64,
    /// User-supplied permutation; AMD is used when `None`.
    pub perm: Option<Vec<usize>>,
    /// Expected signs of D, used by the dynamic regularization.
    pub dsigns: Option<Vec<i8>>,
    /// Dynamic regularization of small pivots.
    pub regularize_enable: bool,
    pub regularize_eps: f64,
    pub regularize_delta: f64,
}

impl Default for QdldlSettings {
    fn default() -> Self {
        Self {
            amd_dense_scale: 1.0,
            perm: None,
            dsigns: None,
            regularize_enable: true,
            regularize_eps: 1e-13,
            regularize_delta: 1e-7,
        }
    }
}

const UNKNOWN: usize = usize::MAX;

/// LDL^T factorization of a symmetric quasidefinite matrix.
pub struct QdldlFactorization {
    /// Fill-reducing permutation.
    pub perm: Vec<usize>,
    /// Lower triangular factor (unit diagonal implied).
    l: CscMatrix,
    /// Diagonal of D and its inverse.
    d: Vec<f64>,
    dinv: Vec<f64>,
    /// Permuted upper-triangle working matrix.
    triu_a: CscMatrix,
    /// Map from input entries to `triu_a` entries.
    a_to_papt: Vec<usize>,
    /// Permuted expected signs of D.
    dsigns: Vec<i8>,
    /// Symbolic data.
    etree: Vec<usize>,
    lnz: Vec<usize>,
    /// Workspace.
    iwork: Vec<usize>,
    bwork: Vec<bool>,
    fwork: Vec<f64>,
    /// Regularization parameters and counters.
    regularize_enable: bool,
    regularize_eps: f64,
    regularize_delta: f64,
    regularize_count: usize,
    positive_inertia: usize,
}

impl QdldlFactorization {
    /// Analyze and factor the upper-triangle matrix `a`.
    pub fn new(a: &CscMatrix, settings: QdldlSettings) -> Result<Self, QdldlError> {
        check_structure(a)?;
        let n = a.n;

        let (perm, iperm) = match &settings.perm {
            Some(p) => {
                let ip = invperm(p);
                (p.clone(), ip)
            }
            None => amd_ordering(a, settings.amd_dense_scale)?,
        };

        let (triu_a, a_to_papt) = permute_symmetric(a, &iperm);

        let mut dsigns = vec![1i8; n];
        if let Some(ds) = &settings.dsigns {
            for (i, &p) in perm.iter().enumerate() {
                dsigns[i] = ds[p];
            }
        }

        let mut etree = vec![UNKNOWN; n];
        let mut lnz = vec![0usize; n];
        let mut iwork = vec![0usize; 3 * n];
        etree_and_counts(&triu_a, &mut iwork, &mut lnz, &mut etree)?;

        let sum_lnz: usize = lnz.iter().sum();
        let l = CscMatrix::spalloc(n, n, sum_lnz);

        let mut fact = Self {
            perm,
            l,
            d: vec![0.0; n],
            dinv: vec![0.0; n],
            triu_a,
            a_to_papt,
            dsigns,
            etree,
            lnz,
            iwork,
            bwork: vec![false; n],
            fwork: vec![0.0; n],
            regularize_enable: settings.regularize_enable,
            regularize_eps: settings.regularize_eps,
            regularize_delta: settings.regularize_delta,
            regularize_count: 0,
            positive_inertia: 0,
        };
        fact.refactor()?;
        Ok(fact)
    }

    /// Number of positive entries in D from the last factorization.
    pub fn positive_inertia(&self) -> usize {
        self.positive_inertia
    }

    /// Number of dynamically regularized pivots from the last factorization.
    pub fn regularize_count(&self) -> usize {
        self.regularize_count
    }

    /// Overwrite entries of the (pre-permutation) input matrix.
    pub fn update_values(&mut self, indices: &[usize], values: &[f64]) {
        for (&idx, &val) in indices.iter().zip(values) {
            self.triu_a.nzval[self.a_to_papt[idx]] = val;
        }
    }

    /// Refactor with the current values.
    pub fn refactor(&mut self) -> Result<(), QdldlError> {
        factor_inner(
            &self.triu_a,
            &mut self.l,
            &mut self.d,
            &mut self.dinv,
            &self.lnz,
            &self.etree,
            &mut self.bwork,
            &mut self.iwork,
            &mut self.fwork,
            &self.dsigns,
            self.regularize_enable,
            self.regularize_eps,
            self.regularize_delta,
            &mut self.regularize_count,
            &mut self.positive_inertia,
        )
    }

    /// Solve A x = b in place (x replaces b).
    pub fn solve(&mut self, b: &mut [f64]) {
        assert_eq!(b.len(), self.d.len());

        let tmp = &mut self.fwork;
        for (i, &p) in self.perm.iter().enumerate() {
            tmp[i] = b[p];
        }

        lsolve(&self.l, tmp);
        for (t, &di) in tmp.iter_mut().zip(&self.dinv) {
            *t *= di;
        }
        ltsolve(&self.l, tmp);

        for (i, &p) in self.perm.iter().enumerate() {
            b[p] = tmp[i];
        }
    }
}

fn check_structure(a: &CscMatrix) -> Result<(), QdldlError> {
    if a.m != a.n {
        return Err(QdldlError::IncompatibleDimension);
    }
    for j in 0..a.n {
        for p in a.colptr[j]..a.colptr[j + 1] {
            if a.rowval[p] > j {
                return Err(QdldlError::NotUpperTriangular);
            }
        }
    }
    if !a.colptr.windows(2).all(|c| c[0] < c[1]) {
        return Err(QdldlError::EmptyColumn);
    }
    Ok(())
}

fn invperm(p: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; p.len()];
    for (i, &j) in p.iter().enumerate() {
        inv[j] = i;
    }
    inv
}

fn amd_ordering(a: &CscMatrix, dense_scale: f64) -> Result<(Vec<usize>, Vec<usize>), QdldlError> {
    let mut control = amd::Control::default();
    control.dense *= dense_scale;
    let (perm, iperm, _info) = amd::order(a.n, &a.colptr, &a.rowval, &control)
        .map_err(|e| QdldlError::OrderingFailed(format!("{:?}", e)))?;
    Ok((perm, iperm))
}

/// Permute the upper-triangle matrix symmetrically, returning the permuted
/// upper triangle and a map from input entries to permuted entries.
/// Follows the construction in Davis, "Direct Methods for Sparse Linear
/// Systems".
fn permute_symmetric(a: &CscMatrix, iperm: &[usize]) -> (CscMatrix, Vec<usize>) {
    let n = a.n;
    let mut counts = vec![0usize; n];
    for col_a in 0..n {
        let col_p = iperm[col_a];
        for p in a.colptr[col_a]..a.colptr[col_a + 1] {
            let row_p = iperm[a.rowval[p]];
            counts[row_p.max(col_p)] += 1;
        }
    }

    let mut out = CscMatrix::spalloc(n, n, a.nnz());
    for j in 0..n {
        out.colptr[j + 1] = out.colptr[j] + counts[j];
    }

    let mut cursor = out.colptr[..n].to_vec();
    let mut a_to_papt = vec![0usize; a.nnz()];
    for col_a in 0..n {
        let col_p = iperm[col_a];
        for p in a.colptr[col_a]..a.colptr[col_a + 1] {
            let row_p = iperm[a.rowval[p]];
            let dst_col = row_p.max(col_p);
            let dst = cursor[dst_col];
            out.rowval[dst] = row_p.min(col_p);
            out.nzval[dst] = a.nzval[p];
            a_to_papt[p] = dst;
            cursor[dst_col] += 1;
        }
    }

    // columns come out unsorted; sort each column and remap
    let mut relocation = vec![0usize; a.nnz()];
    for j in 0..n {
        let lo = out.colptr[j];
        let hi = out.colptr[j + 1];
        let mut order: Vec<usize> = (lo..hi).collect();
        order.sort_by_key(|&p| out.rowval[p]);
        let rows: Vec<usize> = order.iter().map(|&p| out.rowval[p]).collect();
        let vals: Vec<f64> = order.iter().map(|&p| out.nzval[p]).collect();
        for (offset, &src) in order.iter().enumerate() {
            relocation[src] = lo + offset;
        }
        out.rowval[lo..hi].copy_from_slice(&rows);
        out.nzval[lo..hi].copy_from_slice(&vals);
    }
    for idx in a_to_papt.iter_mut() {
        *idx = relocation[*idx];
    }

    (out, a_to_papt)
}

/// Elimination tree and per-column L nonzero counts for an upper-triangle
/// CSC matrix.
fn etree_and_counts(
    a: &CscMatrix,
    work: &mut [usize],
    lnz: &mut [usize],
    etree: &mut [usize],
) -> Result<(), QdldlError> {
    let n = a.n;
    work[..n].fill(0);
    lnz.fill(0);
    etree.fill(UNKNOWN);

    for j in 0..n {
        work[j] = j;
        for p in a.colptr[j]..a.colptr[j + 1] {
            let mut i = a.rowval[p];
            while work[i] != j {
                if etree[i] == UNKNOWN {
                    etree[i] = j;
                }
                lnz[i] += 1;
                work[i] = j;
                i = etree[i];
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn factor_inner(
    a: &CscMatrix,
    l: &mut CscMatrix,
    d: &mut [f64],
    dinv: &mut [f64],
    lnz: &[usize],
    etree: &[usize],
    bwork: &mut [bool],
    iwork: &mut [usize],
    fwork: &mut [f64],
    dsigns: &[i8],
    regularize_enable: bool,
    regularize_eps: f64,
    regularize_delta: f64,
    regularize_count: &mut usize,
    positive_inertia: &mut usize,
) -> Result<(), QdldlError> {
    let n = a.n;
    *regularize_count = 0;
    *positive_inertia = 0;

    let y_markers = bwork;
    let (y_idx, rest) = iwork.split_at_mut(n);
    let (elim_buffer, next_colspace) = rest.split_at_mut(n);
    let y_vals = fwork;

    l.colptr[0] = 0;
    for j in 0..n {
        l.colptr[j + 1] = l.colptr[j] + lnz[j];
    }

    y_markers.fill(false);
    y_vals.fill(0.0);
    d.fill(0.0);
    next_colspace.copy_from_slice(&l.colptr[..n]);

    // first pivot
    if a.rowval[a.colptr[0]] == 0 {
        d[0] = a.nzval[a.colptr[0]];
    }
    apply_pivot_regularization(
        &mut d[0],
        dsigns[0],
        regularize_enable,
        regularize_eps,
        regularize_delta,
        regularize_count,
    );
    if d[0] == 0.0 {
        return Err(QdldlError::ZeroPivot);
    }
    if d[0] > 0.0 {
        *positive_inertia += 1;
    }
    dinv[0] = 1.0 / d[0];

    for k in 1..n {
        // Solve y = L(0:k-1, 0:k-1) \ b with b the k-th column of A above
        // the diagonal; y becomes the k-th row of L.
        let mut nnz_y = 0;

        for p in a.colptr[k]..a.colptr[k + 1] {
            let bidx = a.rowval[p];
            if bidx == k {
                d[k] = a.nzval[p];
                continue;
            }
            y_vals[bidx] = a.nzval[p];

            if !y_markers[bidx] {
                y_markers[bidx] = true;
                elim_buffer[0] = bidx;
                let mut nnz_e = 1;

                let mut next = etree[bidx];
                while next != UNKNOWN && next < k {
                    if y_markers[next] {
                        break;
                    }
                    y_markers[next] = true;
                    elim_buffer[nnz_e] = next;
                    next = etree[next];
                    nnz_e += 1;
                }

                while nnz_e != 0 {
                    nnz_e -= 1;
                    y_idx[nnz_y] = elim_buffer[nnz_e];
                    nnz_y += 1;
                }
            }
        }

        for i in (0..nnz_y).rev() {
            let cidx = y_idx[i];
            let tmp_idx = next_colspace[cidx];

            let y_vals_cidx = y_vals[cidx];
            for p in l.colptr[cidx]..tmp_idx {
                y_vals[l.rowval[p]] -= l.nzval[p] * y_vals_cidx;
            }

            l.nzval[tmp_idx] = y_vals_cidx * dinv[cidx];
            d[k] -= y_vals_cidx * l.nzval[tmp_idx];

            l.rowval[tmp_idx] = k;
            next_colspace[cidx] += 1;

            y_vals[cidx] = 0.0;
            y_markers[cidx] = false;
        }

        apply_pivot_regularization(
            &mut d[k],
            dsigns[k],
            regularize_enable,
            regularize_eps,
            regularize_delta,
            regularize_count,
        );
        if d[k] == 0.0 {
            return Err(QdldlError::ZeroPivot);
        }
        if d[k] > 0.0 {
            *positive_inertia += 1;
        }
        dinv[k] = 1.0 / d[k];
    }

    Ok(())
}

fn apply_pivot_regularization(
    d: &mut f64,
    sign: i8,
    enable: bool,
    eps: f64,
    delta: f64,
    count: &mut usize,
) {
    if enable {
        let sign = sign as f64;
        if *d * sign < eps {
            *d = delta * sign;
            *count += 1;
        }
    }
}

/// Solves (L + I) x = b in place.
fn lsolve(l: &CscMatrix, x: &mut [f64]) {
    for i in 0..x.len() {
        let xi = x[i];
        for p in l.colptr[i]..l.colptr[i + 1] {
            x[l.rowval[p]] -= l.nzval[p] * xi;
        }
    }
}

/// Solves (L + I)^T x = b in place.
fn ltsolve(l: &CscMatrix, x: &mut [f64]) {
    for i in (0..x.len()).rev() {
        let mut s = 0.0;
        for p in l.colptr[i]..l.colptr[i + 1] {
            s += l.nzval[p] * x[l.rowval[p]];
        }
        x[i] -= s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    fn factor(triplets: Vec<(usize, usize, f64)>, n: usize) -> QdldlFactorization {
        let a = CscMatrix::from_sprs(&sparse::from_triplets_symmetric(n, triplets));
        QdldlFactorization::new(&a, QdldlSettings::default()).unwrap()
    }

    fn residual_ok(triplets: &[(usize, usize, f64)], n: usize, x: &[f64], b: &[f64]) {
        // symmetric matvec from the upper triangle
        let mut ax = vec![0.0; n];
        for &(i, j, v) in triplets {
            ax[i] += v * x[j];
            if i != j {
                ax[j] += v * x[i];
            }
        }
        for i in 0..n {
            assert!((ax[i] - b[i]).abs() < 1e-8, "residual at {}: {}", i, ax[i] - b[i]);
        }
    }

    #[test]
    fn test_spd_solve() {
        // [[4, 1], [1, 3]]
        let triplets = vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 3.0)];
        let mut f = factor(triplets.clone(), 2);
        let mut b = vec![5.0, 4.0];
        f.solve(&mut b);
        assert!((b[0] - 1.0).abs() < 1e-10);
        assert!((b[1] - 1.0).abs() < 1e-10);
        assert_eq!(f.positive_inertia(), 2);
    }

    #[test]
    fn test_indefinite_kkt_like() {
        // [[2, 1, 1], [1, 2, 0], [1, 0, -1]]
        let triplets = vec![
            (0, 0, 2.0),
            (0, 1, 1.0),
            (1, 1, 2.0),
            (0, 2, 1.0),
            (2, 2, -1.0),
        ];
        let mut f = factor(triplets.clone(), 3);
        let b = vec![4.0, 3.0, 0.0];
        let mut x = b.clone();
        f.solve(&mut x);
        residual_ok(&triplets, 3, &x, &b);
        assert_eq!(f.positive_inertia(), 2);
    }

    #[test]
    fn test_update_values_and_refactor() {
        let triplets = vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 3.0)];
        let a = CscMatrix::from_sprs(&sparse::from_triplets_symmetric(2, triplets));
        let mut f = QdldlFactorization::new(&a, QdldlSettings::default()).unwrap();

        // switch to [[2, 0.5], [0.5, 2]]; entry order follows the input CSC
        f.update_values(&[0, 1, 2], &[2.0, 0.5, 2.0]);
        f.refactor().unwrap();

        let mut b = vec![2.5, 2.5];
        f.solve(&mut b);
        assert!((b[0] - 1.0).abs() < 1e-10);
        assert!((b[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_dynamic_regularization_zero_pivot() {
        // structurally zero diagonal in the (2,2) block, sign -1
        let triplets = vec![(0, 0, 1.0), (1, 1, 0.0)];
        let a = CscMatrix::from_sprs(&sparse::from_triplets_symmetric(2, triplets));
        let settings = QdldlSettings {
            dsigns: Some(vec![1, -1]),
            ..Default::default()
        };
        let mut f = QdldlFactorization::new(&a, settings).unwrap();
        assert!(f.regularize_count() > 0);

        let mut b = vec![1.0, 1.0];
        f.solve(&mut b);
        assert!(b.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rejects_lower_triangle() {
        let mut a = CscMatrix::spalloc(2, 2, 3);
        a.colptr = vec![0, 2, 3];
        a.rowval = vec![0, 1, 1];
        a.nzval = vec![4.0, 1.0, 3.0];
        assert!(matches!(
            QdldlFactorization::new(&a, QdldlSettings::default()),
            Err(QdldlError::NotUpperTriangular)
        ));
    }

    #[test]
    fn test_larger_tridiagonal() {
        let n = 10;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 3.0));
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        let mut f = factor(triplets.clone(), n);
        let b = vec![1.0; n];
        let mut x = b.clone();
        f.solve(&mut x);
        residual_ok(&triplets, n, &x, &b);
    }
}
