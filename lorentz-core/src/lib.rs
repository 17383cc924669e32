//! Lorentz: a convex conic quadratic solver with a GPU-direct sparse
//! LDL^T core.
//!
//! Solves problems of the form
//!
//! ```text
//! minimize    (1/2) x^T P x + q^T x
//! subject to  A x + s = b,  s ∈ K
//! ```
//!
//! where K is a Cartesian product of zero cones, nonnegative orthants,
//! second-order cones, and three-dimensional exponential cones.
//!
//! # Algorithm
//!
//! A primal-dual interior-point method with Mehrotra predictor-corrector
//! steps and a homogeneous self-dual embedding. Per iteration, a single
//! sparse symmetric indefinite KKT matrix is refreshed in place through
//! precomputed index maps and refactored with a direct LDL^T backend:
//!
//! - **"cudss"**: NVIDIA cuDSS, loaded dynamically, with the KKT matrix
//!   resident on the device in CSR form.
//! - **"qdldl"**: a CPU quasidefinite LDL^T reference.
//! - **"auto"** (default): cudss when the CUDA libraries load, qdldl
//!   otherwise.
//!
//! Nesterov-Todd scalings handle the symmetric cones; the exponential
//! cone uses closed-form dual Hessians with an optional primal-dual
//! scaling and Wright-ω barrier evaluations. Second-order cones larger
//! than `soc_reduction_size` are chained into linked small cones to keep
//! the KKT factors sparse.
//!
//! # Example
//!
//! ```
//! use lorentz_core::{solve, ConeSpec, ProblemData, SolverSettings};
//! use lorentz_core::linalg::sparse;
//!
//! // min x1 + x2  s.t.  x1 + x2 = 1, x >= 0
//! let prob = ProblemData {
//!     P: None,
//!     q: vec![1.0, 1.0],
//!     A: sparse::from_triplets(
//!         3,
//!         2,
//!         vec![(0, 0, 1.0), (0, 1, 1.0), (1, 0, -1.0), (2, 1, -1.0)],
//!     ),
//!     b: vec![1.0, 0.0, 0.0],
//!     cones: vec![ConeSpec::Zero { dim: 1 }, ConeSpec::NonNeg { dim: 2 }],
//! };
//!
//! let settings = SolverSettings {
//!     direct_solve_method: "qdldl".into(),
//!     ..Default::default()
//! };
//! let result = solve(&prob, &settings).unwrap();
//! println!("status: {}, objective: {}", result.status, result.obj_val);
//! ```

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]

pub mod cones;
pub mod ipm;
pub mod kktsolvers;
pub mod kktsystem;
pub mod linalg;
pub mod presolve;
pub mod problem;

pub use ipm::Solver;
pub use problem::{
    ConeSpec, ProblemData, ScalingStrategy, SolveInfo, SolveResult, SolveStatus, SolverError,
    SolverSettings, SparseCsc, SparseSymmetricCsc,
};

/// Solve a conic quadratic program.
pub fn solve(
    problem: &ProblemData,
    settings: &SolverSettings,
) -> Result<SolveResult, SolverError> {
    let mut solver = Solver::new(problem, settings)?;
    Ok(solver.solve())
}
