//! Problem data structures, settings, and result types.
//!
//! The solver works with the canonical conic formulation
//!
//! ```text
//! minimize    (1/2) x^T P x + q^T x
//! subject to  A x + s = b
//!             s ∈ K
//! ```
//!
//! where K is a Cartesian product of supported cones.

use std::fmt;
use thiserror::Error;

/// Sparse matrix in CSC format.
pub type SparseCsc = sprs::CsMatI<f64, usize>;

/// Sparse symmetric matrix in CSC format (upper triangle only).
pub type SparseSymmetricCsc = sprs::CsMatI<f64, usize>;

/// Solver errors surfaced at construction time.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Problem data failed shape or structure validation.
    #[error("invalid problem data: {0}")]
    InvalidProblem(String),

    /// `direct_solve_method` names no registered backend.
    #[error("unknown direct solve method: {0}")]
    UnknownSolveMethod(String),

    /// A backend was found but could not be constructed.
    #[error("linear solver backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Cone specification.
///
/// Each entry corresponds to a block in the product K = K₁ × K₂ × ... × Kₚ
/// partitioning the m-dimensional slack/dual space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConeSpec {
    /// Zero cone {0}^dim (equality constraints).
    Zero { dim: usize },

    /// Nonnegative orthant ℝ₊^dim.
    NonNeg { dim: usize },

    /// Second-order (Lorentz) cone {(t, x) : t ≥ ||x||₂}, dim ≥ 2.
    Soc { dim: usize },

    /// Three-dimensional exponential cone
    /// cl{(x,y,z) : y > 0, y·exp(x/y) ≤ z}.
    Exp3,
}

impl ConeSpec {
    /// Dimension of this cone in the slack/dual space.
    pub fn dim(&self) -> usize {
        match self {
            ConeSpec::Zero { dim } | ConeSpec::NonNeg { dim } | ConeSpec::Soc { dim } => *dim,
            ConeSpec::Exp3 => 3,
        }
    }

    /// Barrier degree ν (used in the μ calculation).
    pub fn degree(&self) -> usize {
        match self {
            ConeSpec::Zero { .. } => 0,
            ConeSpec::NonNeg { dim } => *dim,
            ConeSpec::Soc { .. } => 2,
            ConeSpec::Exp3 => 3,
        }
    }

    /// Is the cone symmetric (self-scaled)?
    pub fn is_symmetric(&self) -> bool {
        !matches!(self, ConeSpec::Exp3)
    }

    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        match self {
            ConeSpec::Soc { dim } if *dim < 2 => Err(SolverError::InvalidProblem(format!(
                "second-order cone must have dimension >= 2, got {}",
                dim
            ))),
            _ => Ok(()),
        }
    }
}

/// Optimization problem in canonical form.
#[derive(Debug, Clone)]
#[allow(non_snake_case)] // P and A are standard mathematical notation
pub struct ProblemData {
    /// Quadratic cost P (n × n, PSD, upper triangle in CSC).
    /// `None` for linear programs.
    pub P: Option<SparseSymmetricCsc>,

    /// Linear cost q (length n).
    pub q: Vec<f64>,

    /// Constraint matrix A (m × n, CSC).
    pub A: SparseCsc,

    /// Constraint right-hand side b (length m).
    pub b: Vec<f64>,

    /// Cone blocks partitioning the m-dimensional slack space.
    pub cones: Vec<ConeSpec>,
}

impl ProblemData {
    /// Number of primal variables n.
    pub fn num_vars(&self) -> usize {
        self.q.len()
    }

    /// Number of constraints m.
    pub fn num_constraints(&self) -> usize {
        self.b.len()
    }

    /// Validate dimensions, cone partitioning, and CSC structure.
    pub fn validate(&self) -> Result<(), SolverError> {
        let n = self.num_vars();
        let m = self.num_constraints();

        if let Some(p) = &self.P {
            if p.rows() != n || p.cols() != n {
                return Err(SolverError::InvalidProblem(format!(
                    "P has shape {}x{}, expected {}x{}",
                    p.rows(),
                    p.cols(),
                    n,
                    n
                )));
            }
            check_csc_structure(p, "P")?;
            for (_, (row, col)) in p.iter() {
                if row > col {
                    return Err(SolverError::InvalidProblem(
                        "P must contain only its upper triangle".into(),
                    ));
                }
            }
        }

        if self.A.rows() != m || self.A.cols() != n {
            return Err(SolverError::InvalidProblem(format!(
                "A has shape {}x{}, expected {}x{}",
                self.A.rows(),
                self.A.cols(),
                m,
                n
            )));
        }
        check_csc_structure(&self.A, "A")?;

        let cone_dim: usize = self.cones.iter().map(|c| c.dim()).sum();
        if cone_dim != m {
            return Err(SolverError::InvalidProblem(format!(
                "cone dimensions sum to {}, expected {}",
                cone_dim, m
            )));
        }
        for cone in &self.cones {
            cone.validate()?;
        }

        Ok(())
    }
}

/// Reject malformed or duplicate-bearing CSC data.
fn check_csc_structure(mat: &SparseCsc, name: &str) -> Result<(), SolverError> {
    let indptr = mat.indptr();
    let colptr = indptr.raw_storage();
    let rows = mat.indices();

    for j in 0..mat.cols() {
        if colptr[j] > colptr[j + 1] {
            return Err(SolverError::InvalidProblem(format!(
                "{}: column pointers are not monotone",
                name
            )));
        }
        for p in colptr[j]..colptr[j + 1] {
            if p > colptr[j] && rows[p] <= rows[p - 1] {
                return Err(SolverError::InvalidProblem(format!(
                    "{}: duplicate or unsorted row index in column {}",
                    name, j
                )));
            }
        }
    }
    Ok(())
}

/// Hessian scaling strategy for nonsymmetric cones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingStrategy {
    /// Hs = μ·H_dual(z).
    Dual,
    /// Secant-corrected primal-dual scaling, with fallback to `Dual`.
    PrimalDual,
}

/// Solver settings.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    /// Maximum number of IPM iterations.
    pub max_iter: usize,

    /// Time limit in milliseconds (None = no limit).
    pub time_limit_ms: Option<u64>,

    /// Per-iteration progress printing.
    pub verbose: bool,

    /// Primal/dual feasibility tolerance.
    pub tol_feas: f64,

    /// Duality gap tolerance.
    pub tol_gap: f64,

    /// Infeasibility certificate tolerance.
    pub tol_infeas: f64,

    /// Fraction of the distance to the cone boundary taken per step.
    pub max_step_fraction: f64,

    /// Backtracking multiplier for the centrality line search.
    pub linesearch_backtrack_step: f64,

    /// Steps shorter than this terminate the solve with the current status.
    pub min_terminate_step_length: f64,

    /// Smallest step returned by per-cone backtracking searches.
    pub backtrack_min_step: f64,

    /// Ruiz equilibration of the problem data.
    pub equilibrate_enable: bool,
    pub equilibrate_max_iter: usize,
    pub equilibrate_min_scaling: f64,
    pub equilibrate_max_scaling: f64,

    /// Direct LDL^T backend identifier: "cudss", "qdldl", or "auto"
    /// (cudss when the CUDA libraries load, otherwise qdldl).
    pub direct_solve_method: String,

    /// Static regularization of the KKT diagonal.
    pub static_regularization_enable: bool,
    pub static_regularization_constant: f64,
    pub static_regularization_proportional: f64,

    /// Dynamic regularization in the CPU LDL^T factorization.
    pub dynamic_regularization_enable: bool,
    pub dynamic_regularization_eps: f64,
    pub dynamic_regularization_delta: f64,

    /// Iterative refinement of KKT solves.
    pub iterative_refinement_enable: bool,
    pub iterative_refinement_max_iter: usize,
    pub iterative_refinement_abstol: f64,
    pub iterative_refinement_reltol: f64,
    pub iterative_refinement_stop_ratio: f64,

    /// Second-order cones larger than this are chained into smaller ones.
    pub soc_reduction_size: usize,

    /// Scaling strategy for nonsymmetric cones.
    pub scaling_strategy: ScalingStrategy,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 100,
            time_limit_ms: None,
            verbose: false,
            tol_feas: 1e-8,
            tol_gap: 1e-8,
            tol_infeas: 1e-8,
            max_step_fraction: 0.99,
            linesearch_backtrack_step: 0.8,
            min_terminate_step_length: 1e-4,
            backtrack_min_step: 1e-10,
            equilibrate_enable: true,
            equilibrate_max_iter: 10,
            equilibrate_min_scaling: 1e-4,
            equilibrate_max_scaling: 1e4,
            direct_solve_method: "auto".into(),
            static_regularization_enable: true,
            static_regularization_constant: 1e-8,
            static_regularization_proportional: f64::EPSILON * f64::EPSILON,
            dynamic_regularization_enable: true,
            dynamic_regularization_eps: 1e-13,
            dynamic_regularization_delta: 2e-7,
            iterative_refinement_enable: true,
            iterative_refinement_max_iter: 10,
            iterative_refinement_abstol: 1e-12,
            iterative_refinement_reltol: 1e-12,
            iterative_refinement_stop_ratio: 5.0,
            soc_reduction_size: 64,
            scaling_strategy: ScalingStrategy::Dual,
        }
    }
}

/// Solution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Optimal solution found.
    Solved,

    /// Primal problem is infeasible (certificate in z).
    PrimalInfeasible,

    /// Dual problem is infeasible / primal unbounded (certificate in x).
    DualInfeasible,

    /// Maximum iterations reached.
    MaxIterations,

    /// Time limit reached.
    TimeLimit,

    /// Numerical error encountered.
    NumericalError,

    /// Progress stalled before reaching tolerances.
    InsufficientProgress,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolveStatus::Solved => "Solved",
            SolveStatus::PrimalInfeasible => "PrimalInfeasible",
            SolveStatus::DualInfeasible => "DualInfeasible",
            SolveStatus::MaxIterations => "MaxIterations",
            SolveStatus::TimeLimit => "TimeLimit",
            SolveStatus::NumericalError => "NumericalError",
            SolveStatus::InsufficientProgress => "InsufficientProgress",
        };
        write!(f, "{}", s)
    }
}

/// Solve result with solution and diagnostics.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Solution status.
    pub status: SolveStatus,

    /// Primal solution x (length n, original geometry).
    pub x: Vec<f64>,

    /// Slack variables s (length m, original geometry).
    pub s: Vec<f64>,

    /// Dual variables z (length m, original geometry).
    pub z: Vec<f64>,

    /// Homogenization scalars at termination.
    pub tau: f64,
    pub kappa: f64,

    /// Primal objective value (NaN for infeasible problems).
    pub obj_val: f64,

    /// Dual objective value (NaN for infeasible problems).
    pub obj_val_dual: f64,

    /// Diagnostics.
    pub info: SolveInfo,
}

/// Solve diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SolveInfo {
    /// IPM iterations completed.
    pub iterations: usize,

    /// Total solve time in milliseconds.
    pub solve_time_ms: u64,

    /// Final primal residual (equilibrated data).
    pub res_primal: f64,

    /// Final dual residual (equilibrated data).
    pub res_dual: f64,

    /// Final complementarity measure μ.
    pub mu: f64,

    /// Static regularizer applied at the last factorization.
    pub static_regularizer: f64,
}
