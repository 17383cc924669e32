//! Direct LDL^T KKT solver: per-iteration cone-driven updates, static
//! regularization, refactorization, and a residual-driven iterative
//! refinement loop.

use super::datamap::{fill_dsigns, pdim, FullDataMap};
use super::kkt_assembly::assemble_full_kkt;
use super::{lookup_backend, DirectLdlSolver};
use crate::cones::CompositeCone;
use crate::linalg::{norm_inf, CscMatrix};
use crate::problem::{SolverError, SolverSettings, SparseCsc, SparseSymmetricCsc};

/// KKT solver over a pluggable direct LDL^T backend.
pub struct DirectLdlKktSolver {
    m: usize,
    n: usize,

    /// Left and right hand sides for solves.
    x: Vec<f64>,
    b: Vec<f64>,

    /// Workspace for the refinement scheme and the static diagonal offset.
    work1: Vec<f64>,
    work2: Vec<f64>,

    /// KKT index maps from problem data to K.
    map: FullDataMap,

    /// Expected signs of D in K = LDL^T.
    dsigns: Vec<i8>,

    /// Staging for the (negated) Hs blocks on the KKT block diagonal.
    hsblocks: Vec<f64>,

    /// Unpermuted host copy of the KKT matrix.
    kkt: CscMatrix,

    /// The direct linear solver backend.
    solver: Box<dyn DirectLdlSolver>,

    /// The diagonal regularizer currently applied.
    pub diagonal_regularizer: f64,

    settings: SolverSettings,
}

impl DirectLdlKktSolver {
    #[allow(non_snake_case)]
    pub fn new(
        P: Option<&SparseSymmetricCsc>,
        A: &SparseCsc,
        cones: &CompositeCone,
        m: usize,
        n: usize,
        settings: &SolverSettings,
    ) -> Result<Self, SolverError> {
        // which LDL solver should we use, and which matrix shape does it
        // want? this assembly only produces the full form
        let descriptor = lookup_backend(&settings.direct_solve_method)?;
        if descriptor.kkt_shape != "full" {
            return Err(SolverError::BackendUnavailable(format!(
                "backend {} requires kkt shape {:?}, only \"full\" is assembled",
                descriptor.name, descriptor.kkt_shape
            )));
        }

        let p_full = match P {
            Some(p) => CscMatrix::full_from_triu(p),
            None => CscMatrix::spalloc(n, n, 0),
        };
        let a_csc = CscMatrix::from_sprs(A);

        let (kkt, map) = assemble_full_kkt(&p_full, &a_csc, cones);

        // sparse expansion is disabled; large cones arrive pre-chained
        debug_assert_eq!(pdim(&map.sparse_maps), 0);

        let dim = m + n;
        let mut dsigns = vec![0i8; dim];
        fill_dsigns(&mut dsigns, m, n, &map);

        let solver = (descriptor.build)(&kkt, &dsigns, settings)?;

        Ok(Self {
            m,
            n,
            x: vec![0.0; dim],
            b: vec![0.0; dim],
            work1: vec![0.0; dim],
            work2: vec![0.0; dim],
            map,
            dsigns,
            hsblocks: cones.allocate_hsblocks(),
            kkt,
            solver,
            diagonal_regularizer: 0.0,
            settings: settings.clone(),
        })
    }

    /// Refresh the Hs blocks from the current cone scalings, apply static
    /// regularization, and refactor. Returns false on factorization
    /// failure.
    pub fn update(&mut self, cones: &CompositeCone) -> bool {
        cones.get_hs(&mut self.hsblocks);

        // the KKT sign convention stores the negated Hessian
        for v in self.hsblocks.iter_mut() {
            *v = -*v;
        }

        for (&idx, &val) in self.map.hsblocks.iter().zip(&self.hsblocks) {
            self.kkt.nzval[idx] = val;
        }
        self.solver.update_values(&self.map.hsblocks, &self.hsblocks);

        self.regularize_and_refactor()
    }

    fn regularize_and_refactor(&mut self) -> bool {
        if self.settings.static_regularization_enable {
            // hold a copy of the true KKT diagonal
            for (i, &idx) in self.map.diag_full.iter().enumerate() {
                self.work1[i] = self.kkt.nzval[idx];
            }
            let eps = self.compute_regularizer();

            // offset version, accounting for signs
            for i in 0..self.work1.len() {
                self.work2[i] = self.work1[i] + self.dsigns[i] as f64 * eps;
            }

            for (i, &idx) in self.map.diag_full.iter().enumerate() {
                self.kkt.nzval[idx] = self.work2[i];
            }
            self.solver.update_values(&self.map.diag_full, &self.work2);

            self.diagonal_regularizer = eps;
        }

        let is_success = self.solver.refactor();

        if self.settings.static_regularization_enable {
            // put the host copy of K back the way it was; the factor has
            // already absorbed the shift, and the refinement scheme wants
            // the unregularized residual
            for (i, &idx) in self.map.diag_full.iter().enumerate() {
                self.kkt.nzval[idx] = self.work1[i];
            }
        }

        is_success
    }

    /// ε derived from the scale of the current diagonal.
    fn compute_regularizer(&self) -> f64 {
        self.settings.static_regularization_constant
            + self.settings.static_regularization_proportional * norm_inf(&self.work1)
    }

    /// Write the concatenated [rhsx; rhsz] right-hand side.
    pub fn set_rhs(&mut self, rhsx: &[f64], rhsz: &[f64]) {
        self.b[..self.n].copy_from_slice(rhsx);
        self.b[self.n..].copy_from_slice(rhsz);
    }

    fn get_lhs(&self, lhsx: Option<&mut [f64]>, lhsz: Option<&mut [f64]>) {
        if let Some(lhsx) = lhsx {
            lhsx.copy_from_slice(&self.x[..self.n]);
        }
        if let Some(lhsz) = lhsz {
            lhsz.copy_from_slice(&self.x[self.n..]);
        }
    }

    /// Triangular solve with optional iterative refinement. Returns true
    /// iff the final iterate is finite and (when refinement is enabled)
    /// meets its tolerance.
    pub fn solve(&mut self, lhsx: Option<&mut [f64]>, lhsz: Option<&mut [f64]>) -> bool {
        if !self.solver.solve(&mut self.x, &self.b) {
            return false;
        }

        let is_success = if self.settings.iterative_refinement_enable {
            self.iterative_refinement()
        } else {
            self.x.iter().all(|v| v.is_finite())
        };

        if is_success {
            self.get_lhs(lhsx, lhsz);
        }
        is_success
    }

    fn iterative_refinement(&mut self) -> bool {
        let abstol = self.settings.iterative_refinement_abstol;
        let reltol = self.settings.iterative_refinement_reltol;
        let stop_ratio = self.settings.iterative_refinement_stop_ratio;

        let normb = norm_inf(&self.b);

        // initial error
        let mut norme = refine_error(&self.kkt, &self.b, &self.x, &mut self.work1);
        if !norme.is_finite() {
            return false;
        }

        for _ in 0..self.settings.iterative_refinement_max_iter {
            if norme <= abstol + reltol * normb {
                break;
            }
            let lastnorme = norme;

            // refinement step: K dx = e
            if !self.solver.solve(&mut self.work2, &self.work1) {
                return false;
            }

            // prospective solution x + dx, checked before committing
            for (w, &xi) in self.work2.iter_mut().zip(&self.x) {
                *w += xi;
            }
            norme = refine_error(&self.kkt, &self.b, &self.work2, &mut self.work1);
            if !norme.is_finite() {
                return false;
            }

            let improved_ratio = lastnorme / norme;
            if improved_ratio < stop_ratio {
                // insufficient improvement; keep whichever is better
                if improved_ratio > 1.0 {
                    std::mem::swap(&mut self.x, &mut self.work2);
                }
                break;
            }
            std::mem::swap(&mut self.x, &mut self.work2);
        }

        true
    }
}

/// e = b − Kξ, overwriting `e` and returning ‖e‖∞.
fn refine_error(kkt: &CscMatrix, b: &[f64], xi: &[f64], e: &mut [f64]) -> f64 {
    kkt.mul_vec(xi, e);
    for (ei, &bi) in e.iter_mut().zip(b) {
        *ei = bi - *ei;
    }
    norm_inf(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;
    use crate::problem::ConeSpec;

    fn qdldl_settings() -> SolverSettings {
        SolverSettings {
            direct_solve_method: "qdldl".into(),
            ..Default::default()
        }
    }

    /// Build a solver for K = [[P, I], [I, -I]] with identity cone scaling.
    fn diagonal_solver(p_diag: &[f64], settings: &SolverSettings) -> (DirectLdlKktSolver, CompositeCone) {
        let n = p_diag.len();
        let p = sparse::from_triplets_symmetric(
            n,
            p_diag.iter().enumerate().map(|(i, &v)| (i, i, v)),
        );
        let a = sparse::from_triplets(n, n, (0..n).map(|i| (i, i, 1.0)));
        let mut cones = CompositeCone::new(&[ConeSpec::NonNeg { dim: n }]);
        cones.set_identity_scaling();

        let mut solver =
            DirectLdlKktSolver::new(Some(&p), &a, &cones, n, n, settings).unwrap();
        assert!(solver.update(&cones));
        (solver, cones)
    }

    #[test]
    fn test_sign_structured_roundtrip() {
        // P = 2I, identity scaling: K = [[2I, I], [I, -I]]
        let settings = qdldl_settings();
        let (mut solver, _) = diagonal_solver(&[2.0, 2.0], &settings);

        let rhsx = vec![1.0, -2.0];
        let rhsz = vec![0.5, 3.0];
        solver.set_rhs(&rhsx, &rhsz);

        let mut lhsx = vec![0.0; 2];
        let mut lhsz = vec![0.0; 2];
        assert!(solver.solve(Some(&mut lhsx), Some(&mut lhsz)));

        // analytic solve of the 2x2 per-index system
        // [2 1; 1 -1] [x; z] = [rx; rz]
        for i in 0..2 {
            let det: f64 = -3.0;
            let x = (-rhsx[i] - rhsz[i]) / det;
            let z = (-rhsx[i] + 2.0 * rhsz[i]) / det;
            assert!((lhsx[i] - x).abs() < 1e-7);
            assert!((lhsz[i] - z).abs() < 1e-7);
        }
    }

    #[test]
    fn test_iterative_refinement_ill_conditioned() {
        // condition number ~1e10 in the P block
        let mut settings = qdldl_settings();
        settings.iterative_refinement_reltol = 1e-10;
        settings.iterative_refinement_abstol = 1e-12;
        settings.iterative_refinement_max_iter = 5;

        let (mut solver, _) = diagonal_solver(&[1e10, 1.0, 1e5], &settings);

        let rhsx = vec![3.0, -1.0, 2.0];
        let rhsz = vec![1.0, 4.0, -2.0];
        solver.set_rhs(&rhsx, &rhsz);

        let mut lhsx = vec![0.0; 3];
        let mut lhsz = vec![0.0; 3];
        assert!(solver.solve(Some(&mut lhsx), Some(&mut lhsz)));

        // residual meets the refinement tolerance
        let mut full_x = lhsx.clone();
        full_x.extend_from_slice(&lhsz);
        let mut e = vec![0.0; 6];
        let norme = refine_error(&solver.kkt, &solver.b, &full_x, &mut e);
        let normb = norm_inf(&solver.b);
        assert!(
            norme <= settings.iterative_refinement_abstol
                + settings.iterative_refinement_reltol * normb,
            "refinement residual too large: {}",
            norme
        );
    }

    #[test]
    fn test_static_regularization_restores_diagonal() {
        let settings = qdldl_settings();
        let (mut solver, cones) = diagonal_solver(&[2.0, 2.0], &settings);

        // the host copy holds the unregularized diagonal after update
        for (i, &idx) in solver.map.diag_full.iter().enumerate() {
            let expected = if i < 2 { 2.0 } else { -1.0 };
            assert!((solver.kkt.nzval[idx] - expected).abs() < 1e-12);
        }
        assert!(solver.diagonal_regularizer > 0.0);

        // updating again leaves the true diagonal unchanged
        assert!(solver.update(&cones));
        for (i, &idx) in solver.map.diag_full.iter().enumerate() {
            let expected = if i < 2 { 2.0 } else { -1.0 };
            assert!((solver.kkt.nzval[idx] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unknown_backend_is_fatal() {
        let p = sparse::from_triplets_symmetric(1, vec![(0, 0, 1.0)]);
        let a = sparse::from_triplets(1, 1, vec![(0, 0, 1.0)]);
        let cones = CompositeCone::new(&[ConeSpec::NonNeg { dim: 1 }]);
        let settings = SolverSettings {
            direct_solve_method: "nosuch".into(),
            ..Default::default()
        };
        assert!(matches!(
            DirectLdlKktSolver::new(Some(&p), &a, &cones, 1, 1, &settings),
            Err(SolverError::UnknownSolveMethod(_))
        ));
    }
}
