//! Direct LDL^T solvers for the assembled KKT system.
//!
//! Backends implement [`DirectLdlSolver`] and are registered in an
//! immutable process-wide table keyed by identifier. The table is a static
//! function-pointer table: registration happens at compile time and never
//! changes at runtime.

pub mod cudss;
pub mod datamap;
pub mod directldl;
pub mod kkt_assembly;
pub mod qdldl_backend;

use crate::linalg::CscMatrix;
use crate::problem::{SolverError, SolverSettings};

/// Interface every direct LDL^T backend provides.
///
/// The backend receives the full KKT matrix at construction, mirrors value
/// updates addressed by positions in K's nzval array, refactors on demand,
/// and performs the triangular solves.
pub trait DirectLdlSolver {
    /// Overwrite K values at the given nzval positions.
    fn update_values(&mut self, indices: &[usize], values: &[f64]);

    /// Recompute the numeric factorization. Returns false on failure
    /// (zero pivot, device error).
    fn refactor(&mut self) -> bool;

    /// Solve K x = b. Returns false on backend failure.
    fn solve(&mut self, x: &mut [f64], b: &[f64]) -> bool;
}

/// Constructor signature for backend builders.
pub type BackendBuildFn =
    fn(&CscMatrix, &[i8], &SolverSettings) -> Result<Box<dyn DirectLdlSolver>, SolverError>;

/// A registered LDL^T backend.
pub struct BackendDescriptor {
    /// Identifier matched against `settings.direct_solve_method`.
    pub name: &'static str,
    /// Required KKT matrix shape; this assembly path only produces "full".
    pub kkt_shape: &'static str,
    /// Builder.
    pub build: BackendBuildFn,
}

static BACKENDS: &[BackendDescriptor] = &[
    BackendDescriptor {
        name: "qdldl",
        kkt_shape: "full",
        build: qdldl_backend::build,
    },
    BackendDescriptor {
        name: "cudss",
        kkt_shape: "full",
        build: cudss::build,
    },
];

/// Resolve a backend by name. `"auto"` prefers cudss when the CUDA
/// libraries load and falls back to the CPU reference backend.
pub fn lookup_backend(name: &str) -> Result<&'static BackendDescriptor, SolverError> {
    if name == "auto" {
        let resolved = if cudss::is_available() { "cudss" } else { "qdldl" };
        return lookup_backend(resolved);
    }
    BACKENDS
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| SolverError::UnknownSolveMethod(name.to_string()))
}
