//! CPU reference backend: quasidefinite LDL^T of the upper triangle of the
//! full KKT matrix.
//!
//! The backend keeps a map from full-matrix nzval positions to
//! upper-triangle positions; strictly-lower updates are dropped since the
//! mirrored upper entry receives the same value through its own index.

use super::{DirectLdlSolver, SolverError, SolverSettings};
use crate::linalg::csc::CscMatrix;
use crate::linalg::qdldl::{QdldlFactorization, QdldlSettings};

pub(crate) struct QdldlBackend {
    fact: QdldlFactorization,
    full_to_triu: Vec<usize>,
}

pub(crate) fn build(
    kkt: &CscMatrix,
    dsigns: &[i8],
    settings: &SolverSettings,
) -> Result<Box<dyn DirectLdlSolver>, SolverError> {
    let (triu, full_to_triu) = kkt.triu_with_map();

    let qdldl_settings = QdldlSettings {
        dsigns: Some(dsigns.to_vec()),
        regularize_enable: settings.dynamic_regularization_enable,
        regularize_eps: settings.dynamic_regularization_eps,
        regularize_delta: settings.dynamic_regularization_delta,
        ..Default::default()
    };

    let fact = QdldlFactorization::new(&triu, qdldl_settings)
        .map_err(|e| SolverError::BackendUnavailable(format!("qdldl: {}", e)))?;

    Ok(Box::new(QdldlBackend { fact, full_to_triu }))
}

impl DirectLdlSolver for QdldlBackend {
    fn update_values(&mut self, indices: &[usize], values: &[f64]) {
        for (&idx, &val) in indices.iter().zip(values) {
            let triu_idx = self.full_to_triu[idx];
            if triu_idx != usize::MAX {
                self.fact.update_values(&[triu_idx], &[val]);
            }
        }
    }

    fn refactor(&mut self) -> bool {
        self.fact.refactor().is_ok()
    }

    fn solve(&mut self, x: &mut [f64], b: &[f64]) -> bool {
        x.copy_from_slice(b);
        self.fact.solve(x);
        x.iter().all(|v| v.is_finite())
    }
}
