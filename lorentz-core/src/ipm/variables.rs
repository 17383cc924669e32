//! Homogeneous-embedding variables (x, z, s, τ, κ) and the step algebra
//! of the predictor-corrector scheme.

use crate::cones::{CompositeCone, PrimalOrDualCone};
use crate::ipm::residuals::Residuals;
use crate::problem::SolverSettings;

pub struct Variables {
    pub x: Vec<f64>,
    pub s: Vec<f64>,
    pub z: Vec<f64>,
    pub tau: f64,
    pub kappa: f64,
}

impl Variables {
    pub fn new(n: usize, m: usize) -> Self {
        Self {
            x: vec![0.0; n],
            s: vec![0.0; m],
            z: vec![0.0; m],
            tau: 1.0,
            kappa: 1.0,
        }
    }

    /// Complementarity measure μ = (⟨s,z⟩ + τκ)/(ν + 1).
    pub fn calc_mu(&self, residuals: &Residuals, cones: &CompositeCone) -> f64 {
        (residuals.dot_sz + self.tau * self.kappa) / (cones.degree() + 1) as f64
    }

    /// Affine right-hand side: (rx, rz, λ∘λ, rτ, τκ).
    pub fn affine_step_rhs(
        &mut self,
        residuals: &Residuals,
        variables: &Variables,
        cones: &CompositeCone,
    ) {
        self.x.copy_from_slice(&residuals.rx);
        self.z.copy_from_slice(&residuals.rz);
        cones.affine_ds(&mut self.s, &variables.s);
        self.tau = residuals.rtau;
        self.kappa = variables.tau * variables.kappa;
    }

    /// Combined (corrector) right-hand side. Consumes the affine step in
    /// `step`: the SOC blocks of step.z/step.s are rotated in place by the
    /// cone shift computation.
    #[allow(clippy::too_many_arguments)]
    pub fn combined_step_rhs(
        &mut self,
        residuals: &Residuals,
        variables: &Variables,
        cones: &CompositeCone,
        step: &mut Variables,
        sigma: f64,
        mu: f64,
        work: &mut [f64],
    ) {
        let one_minus_sigma = 1.0 - sigma;
        for (d, &r) in self.x.iter_mut().zip(&residuals.rx) {
            *d = one_minus_sigma * r;
        }
        self.tau = one_minus_sigma * residuals.rtau;
        self.kappa =
            -sigma * mu + step.tau * step.kappa + variables.tau * variables.kappa;

        // self.s still holds λ∘λ from the affine rhs; add the
        // Mehrotra shift W⁻¹Δs ∘ WΔz − σμe (and the nonsymmetric
        // higher-order correction)
        cones.combined_ds_shift(work, &mut step.z, &mut step.s, &variables.z, sigma * mu);
        for (d, &w) in self.s.iter_mut().zip(work.iter()) {
            *d += w;
        }

        for (d, &r) in self.z.iter_mut().zip(&residuals.rz) {
            *d = one_minus_sigma * r;
        }
    }

    /// Largest feasible step along `step`, capped at 1.
    pub fn calc_step_length(
        &self,
        step: &Variables,
        cones: &CompositeCone,
        settings: &SolverSettings,
    ) -> f64 {
        let mut alpha_max = 1.0_f64;
        if step.tau < 0.0 {
            alpha_max = alpha_max.min(-self.tau / step.tau);
        }
        if step.kappa < 0.0 {
            alpha_max = alpha_max.min(-self.kappa / step.kappa);
        }
        cones.step_length(&step.z, &step.s, &self.z, &self.s, settings, alpha_max)
    }

    pub fn add_step(&mut self, step: &Variables, alpha: f64) {
        for (v, &d) in self.x.iter_mut().zip(&step.x) {
            *v += alpha * d;
        }
        for (v, &d) in self.s.iter_mut().zip(&step.s) {
            *v += alpha * d;
        }
        for (v, &d) in self.z.iter_mut().zip(&step.z) {
            *v += alpha * d;
        }
        self.tau += alpha * step.tau;
        self.kappa += alpha * step.kappa;
    }

    /// Cone-specific unit start for nonsymmetric problems.
    pub fn unit_initialization(&mut self, cones: &CompositeCone) {
        self.x.fill(0.0);
        cones.unit_initialization(&mut self.z, &mut self.s);
        self.tau = 1.0;
        self.kappa = 1.0;
    }

    /// Push (s, z) into their cone interiors after the symmetric
    /// initial-point solve.
    pub fn shift_to_cone_interior(&mut self, cones: &CompositeCone) {
        cones.shift_to_cone(&mut self.s, PrimalOrDualCone::Primal);
        cones.shift_to_cone(&mut self.z, PrimalOrDualCone::Dual);
        self.tau = 1.0;
        self.kappa = 1.0;
    }

    /// Central-path proximity barrier at the shifted point; values below 1
    /// accept the step in the nonsymmetric line search.
    pub fn barrier(&self, step: &Variables, alpha: f64, cones: &CompositeCone) -> f64 {
        let central_coef = (cones.degree() + 1) as f64;

        let cur_tau = self.tau + alpha * step.tau;
        let cur_kappa = self.kappa + alpha * step.kappa;
        if cur_tau <= 0.0 || cur_kappa <= 0.0 {
            return f64::INFINITY;
        }

        let mut dot_sz = 0.0;
        for i in 0..self.s.len() {
            dot_sz += (self.s[i] + alpha * step.s[i]) * (self.z[i] + alpha * step.z[i]);
        }

        let mu = (dot_sz + cur_tau * cur_kappa) / central_coef;
        if mu <= 0.0 {
            return f64::INFINITY;
        }

        let mut barrier = central_coef * mu.ln() - cur_tau.ln() - cur_kappa.ln();
        barrier += cones.compute_barrier(&self.z, &self.s, &step.z, &step.s, alpha);
        barrier
    }
}
