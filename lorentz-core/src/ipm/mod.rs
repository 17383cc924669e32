//! Homogeneous self-dual interior-point loop with Mehrotra
//! predictor-corrector steps.

pub mod residuals;
pub mod variables;

use crate::cones::augment::{expand_soc_cones, SocAugmentation};
use crate::cones::CompositeCone;
use crate::kktsystem::{DefaultKktSystem, StepDirection};
use crate::linalg::{dot, norm_inf, sparse};
use crate::presolve::{self, Equilibration};
use crate::problem::{
    ProblemData, SolveInfo, SolveResult, SolveStatus, SolverError, SolverSettings,
};
use residuals::Residuals;
use std::time::Instant;
use variables::Variables;

/// Maximum backtracking steps in the nonsymmetric centrality line search.
const MAX_CENTRALITY_BACKTRACKS: usize = 40;

pub struct Solver {
    /// Working problem: augmented and equilibrated.
    data: ProblemData,
    /// Original problem, kept for reporting in user units.
    orig: ProblemData,

    cones: CompositeCone,
    variables: Variables,
    residuals: Residuals,
    kktsystem: DefaultKktSystem,

    step_lhs: Variables,
    step_rhs: Variables,
    work_shift: Vec<f64>,

    equil: Option<Equilibration>,
    augmentation: Option<SocAugmentation>,

    settings: SolverSettings,
    info: SolveInfo,
}

impl Solver {
    pub fn new(prob: &ProblemData, settings: &SolverSettings) -> Result<Self, SolverError> {
        prob.validate()?;
        if settings.soc_reduction_size < 3 {
            return Err(SolverError::InvalidProblem(
                "soc_reduction_size must be at least 3".into(),
            ));
        }

        let orig = prob.clone();

        // chain oversized second-order cones before anything else sees the
        // problem
        let (mut data, augmentation) = match expand_soc_cones(prob, settings.soc_reduction_size) {
            Some((aug, record)) => (aug, Some(record)),
            None => (prob.clone(), None),
        };

        let equil = if settings.equilibrate_enable {
            Some(presolve::equilibrate(&mut data, settings))
        } else {
            None
        };

        let cones = CompositeCone::new(&data.cones);
        let (n, m) = (data.num_vars(), data.num_constraints());

        let kktsystem = DefaultKktSystem::new(&data, &cones, settings)?;

        Ok(Self {
            data,
            orig,
            cones,
            variables: Variables::new(n, m),
            residuals: Residuals::new(n, m),
            kktsystem,
            step_lhs: Variables::new(n, m),
            step_rhs: Variables::new(n, m),
            work_shift: vec![0.0; m],
            equil,
            augmentation,
            settings: settings.clone(),
            info: SolveInfo::default(),
        })
    }

    pub fn solve(&mut self) -> SolveResult {
        let start = Instant::now();
        let mut iterations = 0;

        let mut status = if self.default_start() {
            self.run_iterations(start, &mut iterations)
        } else {
            SolveStatus::NumericalError
        };

        // a stalled step at an already-accurate iterate is a solve
        if status == SolveStatus::InsufficientProgress && self.near_optimal() {
            status = SolveStatus::Solved;
        }

        self.finalize(status, iterations, start)
    }

    fn run_iterations(&mut self, start: Instant, iterations: &mut usize) -> SolveStatus {
        for iter in 0..=self.settings.max_iter {
            *iterations = iter;

            self.residuals.update(&self.variables, &self.data);
            let mu = self.variables.calc_mu(&self.residuals, &self.cones);
            self.info.mu = mu;

            if let Some(status) = self.check_termination(mu) {
                return status;
            }
            if iter == self.settings.max_iter {
                return SolveStatus::MaxIterations;
            }
            if let Some(limit) = self.settings.time_limit_ms {
                if start.elapsed().as_millis() as u64 >= limit {
                    return SolveStatus::TimeLimit;
                }
            }

            if !self.cones.update_scaling(
                &self.variables.s,
                &self.variables.z,
                mu,
                self.settings.scaling_strategy,
            ) {
                return SolveStatus::NumericalError;
            }
            if !self.kktsystem.update(&self.data, &self.cones) {
                return SolveStatus::NumericalError;
            }

            // predictor
            self.step_rhs
                .affine_step_rhs(&self.residuals, &self.variables, &self.cones);
            if !self.kktsystem.solve(
                &mut self.step_lhs,
                &self.step_rhs,
                &self.data,
                &self.variables,
                &self.cones,
                StepDirection::Affine,
            ) {
                return SolveStatus::NumericalError;
            }
            let alpha_affine =
                self.variables
                    .calc_step_length(&self.step_lhs, &self.cones, &self.settings);
            let sigma = (1.0 - alpha_affine).powi(3).clamp(0.0, 1.0);

            // corrector
            self.step_rhs.combined_step_rhs(
                &self.residuals,
                &self.variables,
                &self.cones,
                &mut self.step_lhs,
                sigma,
                mu,
                &mut self.work_shift,
            );
            if !self.kktsystem.solve(
                &mut self.step_lhs,
                &self.step_rhs,
                &self.data,
                &self.variables,
                &self.cones,
                StepDirection::Combined,
            ) {
                return SolveStatus::NumericalError;
            }

            let mut alpha = self.settings.max_step_fraction
                * self
                    .variables
                    .calc_step_length(&self.step_lhs, &self.cones, &self.settings);

            if !self.cones.is_symmetric() {
                // keep nonsymmetric iterates near the central path
                let mut backtracks = 0;
                while self.variables.barrier(&self.step_lhs, alpha, &self.cones) > 1.0
                    && backtracks < MAX_CENTRALITY_BACKTRACKS
                {
                    alpha *= self.settings.linesearch_backtrack_step;
                    backtracks += 1;
                }
            }

            if alpha <= self.settings.min_terminate_step_length {
                return SolveStatus::InsufficientProgress;
            }

            self.variables.add_step(&self.step_lhs, alpha);

            if self.settings.verbose {
                println!(
                    "iter {:3}  mu {:9.2e}  res_p {:9.2e}  res_d {:9.2e}  tau {:9.2e}  alpha {:9.2e}  sigma {:9.2e}",
                    iter, mu, self.info.res_primal, self.info.res_dual, self.variables.tau, alpha, sigma
                );
            }
        }

        SolveStatus::MaxIterations
    }

    fn default_start(&mut self) -> bool {
        if self.cones.is_symmetric() {
            // interior starting point from the data-driven solves
            self.cones.set_identity_scaling();
            if !self.kktsystem.update(&self.data, &self.cones) {
                return false;
            }
            if !self
                .kktsystem
                .solve_initial_point(&mut self.variables, &self.data)
            {
                return false;
            }
            self.variables.shift_to_cone_interior(&self.cones);
        } else {
            self.variables.unit_initialization(&self.cones);
        }
        true
    }

    /// Optimality and infeasibility tests; records the residual norms in
    /// the solve info as a side effect.
    fn check_termination(&mut self, mu: f64) -> Option<SolveStatus> {
        let tau = self.variables.tau;
        let r = &self.residuals;

        if !mu.is_finite() || !tau.is_finite() || tau <= 0.0 {
            return Some(SolveStatus::NumericalError);
        }

        let norm_q = norm_inf(&self.data.q);
        let norm_b = norm_inf(&self.data.b);

        let obj_p = (0.5 * r.dot_xpx / tau + r.dot_qx) / tau;
        let obj_d = (-0.5 * r.dot_xpx / tau - r.dot_bz) / tau;

        let res_primal = norm_inf(&r.rz) / (tau * norm_b.max(1.0));
        let res_dual = norm_inf(&r.rx) / (tau * norm_q.max(1.0));
        self.info.res_primal = res_primal;
        self.info.res_dual = res_dual;

        let gap_ok = (obj_p - obj_d).abs()
            <= self.settings.tol_gap * obj_p.abs().min(obj_d.abs()).max(1.0);
        if res_primal <= self.settings.tol_feas && res_dual <= self.settings.tol_feas && gap_ok {
            return Some(SolveStatus::Solved);
        }

        // certificates are rays: normalize by the separating product
        if r.dot_bz < 0.0 {
            let scale = -1.0 / r.dot_bz;
            if norm_inf(&r.rx_inf) * scale <= self.settings.tol_infeas {
                return Some(SolveStatus::PrimalInfeasible);
            }
        }
        if r.dot_qx < 0.0 {
            let scale = -1.0 / r.dot_qx;
            if norm_inf(&r.rz_inf) * scale <= self.settings.tol_infeas
                && norm_inf(&r.px) * scale <= self.settings.tol_infeas
            {
                return Some(SolveStatus::DualInfeasible);
            }
        }

        None
    }

    /// Loose version of the optimality test used when the line search
    /// stalls at an essentially converged iterate.
    fn near_optimal(&self) -> bool {
        let loose = 1e-4_f64;
        self.info.res_primal <= loose
            && self.info.res_dual <= loose
            && self.info.mu <= loose * (1.0 + self.residuals.dot_sz.abs())
    }

    fn finalize(&mut self, status: SolveStatus, iterations: usize, start: Instant) -> SolveResult {
        let tau = self.variables.tau;
        let kappa = self.variables.kappa;

        let mut x = self.variables.x.clone();
        let mut z = self.variables.z.clone();
        let mut s = self.variables.s.clone();

        match status {
            SolveStatus::PrimalInfeasible => {
                // b'z is invariant under the row/column scalings
                let scale = -1.0 / self.residuals.dot_bz;
                for zi in z.iter_mut() {
                    *zi *= scale;
                }
            }
            SolveStatus::DualInfeasible => {
                let scale = -1.0 / self.residuals.dot_qx;
                for xi in x.iter_mut() {
                    *xi *= scale;
                }
            }
            _ => {
                if tau > 0.0 && tau.is_finite() {
                    for v in x.iter_mut().chain(z.iter_mut()).chain(s.iter_mut()) {
                        *v /= tau;
                    }
                }
            }
        }

        if let Some(eq) = &self.equil {
            presolve::ruiz::unscale_solution(eq, &mut x, &mut z, &mut s);
        }

        if let Some(aug) = &self.augmentation {
            x.truncate(aug.orig_n);
            let mut z_orig = vec![0.0; aug.orig_m];
            let mut s_orig = vec![0.0; aug.orig_m];
            for (orig_row, &new_row) in aug.row_map.iter().enumerate() {
                z_orig[orig_row] = z[new_row];
                s_orig[orig_row] = s[new_row];
            }
            z = z_orig;
            s = s_orig;
        }

        let infeasible = matches!(
            status,
            SolveStatus::PrimalInfeasible | SolveStatus::DualInfeasible
        );
        let (obj_val, obj_val_dual) = if infeasible {
            (f64::NAN, f64::NAN)
        } else {
            let qf = match &self.orig.P {
                Some(p) => sparse::quad_form(p, &x, &x),
                None => 0.0,
            };
            (
                0.5 * qf + dot(&self.orig.q, &x),
                -0.5 * qf - dot(&self.orig.b, &z),
            )
        };

        match status {
            SolveStatus::PrimalInfeasible => {
                x.fill(f64::NAN);
                s.fill(f64::NAN);
            }
            SolveStatus::DualInfeasible => {
                z.fill(f64::NAN);
                s.fill(f64::NAN);
            }
            _ => {}
        }

        self.info.iterations = iterations;
        self.info.solve_time_ms = start.elapsed().as_millis() as u64;
        self.info.static_regularizer = self.kktsystem.diagonal_regularizer();

        if self.settings.verbose {
            println!("status: {}  iterations: {}", status, iterations);
        }

        SolveResult {
            status,
            x,
            s,
            z,
            tau,
            kappa,
            obj_val,
            obj_val_dual,
            info: self.info.clone(),
        }
    }
}
