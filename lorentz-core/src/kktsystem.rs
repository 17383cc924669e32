//! KKT system façade for the homogeneous self-dual embedding.
//!
//! Wraps the direct LDL^T solver with the constant- and step-dependent
//! right-hand sides, performs the τ/κ elimination, and reconstructs Δs
//! from Δz.

use crate::cones::CompositeCone;
use crate::ipm::variables::Variables;
use crate::kktsolvers::directldl::DirectLdlKktSolver;
use crate::linalg::{dot, sparse};
use crate::problem::{ProblemData, SolverError, SolverSettings};

/// Which step of the predictor-corrector pair is being solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Affine,
    Combined,
}

pub struct DefaultKktSystem {
    kktsolver: DirectLdlKktSolver,

    // solution vectors for the constant-rhs part of the reduced solves
    x2: Vec<f64>,
    z2: Vec<f64>,

    // solution vectors for the step-dependent solves
    x1: Vec<f64>,
    z1: Vec<f64>,

    // work vectors for assembling/disassembling vectors
    workx: Vec<f64>,
    workz: Vec<f64>,
    work_conic: Vec<f64>,
}

impl DefaultKktSystem {
    pub fn new(
        data: &ProblemData,
        cones: &CompositeCone,
        settings: &SolverSettings,
    ) -> Result<Self, SolverError> {
        let (m, n) = (data.num_constraints(), data.num_vars());
        let kktsolver =
            DirectLdlKktSolver::new(data.P.as_ref(), &data.A, cones, m, n, settings)?;

        Ok(Self {
            kktsolver,
            x1: vec![0.0; n],
            z1: vec![0.0; m],
            x2: vec![0.0; n],
            z2: vec![0.0; m],
            workx: vec![0.0; n],
            workz: vec![0.0; m],
            work_conic: vec![0.0; m],
        })
    }

    /// Static regularizer applied at the last factorization.
    pub fn diagonal_regularizer(&self) -> f64 {
        self.kktsolver.diagonal_regularizer
    }

    /// Refactor with the current cone scalings and refresh the
    /// constant-rhs solution. Returns false on factorization failure.
    pub fn update(&mut self, data: &ProblemData, cones: &CompositeCone) -> bool {
        if !self.kktsolver.update(cones) {
            return false;
        }
        self.solve_constant_rhs(data)
    }

    /// Constant solve once per outer iteration: (x₂, z₂) from RHS [−q; b].
    fn solve_constant_rhs(&mut self, data: &ProblemData) -> bool {
        for (w, &qi) in self.workx.iter_mut().zip(&data.q) {
            *w = -qi;
        }
        self.kktsolver.set_rhs(&self.workx, &data.b);
        self.kktsolver
            .solve(Some(&mut self.x2), Some(&mut self.z2))
    }

    /// Solve for the step direction `lhs` given the assembled `rhs`.
    pub fn solve(
        &mut self,
        lhs: &mut Variables,
        rhs: &Variables,
        data: &ProblemData,
        variables: &Variables,
        cones: &CompositeCone,
        step_direction: StepDirection,
    ) -> bool {
        self.workx.copy_from_slice(&rhs.x);

        // the vector c in the step equation HₛΔz + Δs = −c, with a
        // shortcut in the affine case where it is just the current s
        let ds_const_term = &mut self.work_conic;
        match step_direction {
            StepDirection::Affine => {
                ds_const_term.copy_from_slice(&variables.s);
            }
            StepDirection::Combined => {
                cones.ds_from_dz_offset(ds_const_term, &rhs.s, &variables.z);
            }
        }

        for i in 0..self.workz.len() {
            self.workz[i] = ds_const_term[i] - rhs.z[i];
        }

        // variable part of the reduced KKT system
        self.kktsolver.set_rhs(&self.workx, &self.workz);
        if !self
            .kktsolver
            .solve(Some(&mut self.x1), Some(&mut self.z1))
        {
            return false;
        }

        // τ elimination: numerator first
        let xi = &mut self.workx; // ξ = x/τ
        for (w, &xv) in xi.iter_mut().zip(&variables.x) {
            *w = xv / variables.tau;
        }

        let tau_num = rhs.tau - rhs.kappa / variables.tau
            + dot(&data.q, &self.x1)
            + dot(&data.b, &self.z1)
            + 2.0 * quad_form(data, &self.workx, &self.x1);

        // offset ξ for the quadratic forms in the denominator
        for (w, &x2i) in self.workx.iter_mut().zip(&self.x2) {
            *w -= x2i;
        }
        let mut tau_den =
            variables.kappa / variables.tau - dot(&data.q, &self.x2) - dot(&data.b, &self.z2);
        tau_den += quad_form(data, &self.workx, &self.workx) - quad_form(data, &self.x2, &self.x2);

        // (Δx, Δz, Δτ)
        lhs.tau = tau_num / tau_den;
        for i in 0..lhs.x.len() {
            lhs.x[i] = self.x1[i] + lhs.tau * self.x2[i];
        }
        for i in 0..lhs.z.len() {
            lhs.z[i] = self.z1[i] + lhs.tau * self.z2[i];
        }

        // Δs = −(HₛΔz + c)
        cones.mul_hs(&mut lhs.s, &lhs.z);
        for (si, &ci) in lhs.s.iter_mut().zip(ds_const_term.iter()) {
            *si = -(*si + ci);
        }

        // Δκ
        lhs.kappa = -(rhs.kappa + variables.kappa * lhs.tau) / variables.tau;

        true
    }

    /// Initial-point solves for symmetric problems.
    pub fn solve_initial_point(&mut self, variables: &mut Variables, data: &ProblemData) -> bool {
        let p_is_empty = data.P.as_ref().map_or(true, |p| p.nnz() == 0);

        if p_is_empty {
            // LP initialization: solve with [0; b] for (x, -s)
            self.workx.fill(0.0);
            self.workz.copy_from_slice(&data.b);
            self.kktsolver.set_rhs(&self.workx, &self.workz);
            if !self
                .kktsolver
                .solve(Some(&mut variables.x), Some(&mut variables.s))
            {
                return false;
            }
            for si in variables.s.iter_mut() {
                *si = -*si;
            }

            // then with [-q; 0] for z
            for (w, &qi) in self.workx.iter_mut().zip(&data.q) {
                *w = -qi;
            }
            self.workz.fill(0.0);
            self.kktsolver.set_rhs(&self.workx, &self.workz);
            self.kktsolver.solve(None, Some(&mut variables.z))
        } else {
            // QP initialization: one solve with [-q; b] for (x, z), s = -z
            for (w, &qi) in self.workx.iter_mut().zip(&data.q) {
                *w = -qi;
            }
            self.workz.copy_from_slice(&data.b);
            self.kktsolver.set_rhs(&self.workx, &self.workz);
            if !self
                .kktsolver
                .solve(Some(&mut variables.x), Some(&mut variables.z))
            {
                return false;
            }
            for (si, &zi) in variables.s.iter_mut().zip(&variables.z) {
                *si = -zi;
            }
            true
        }
    }
}

fn quad_form(data: &ProblemData, x: &[f64], y: &[f64]) -> f64 {
    match &data.P {
        Some(p) => sparse::quad_form(p, x, y),
        None => 0.0,
    }
}
