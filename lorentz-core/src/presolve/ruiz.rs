//! Ruiz equilibration of the problem data.
//!
//! Iteratively scales the rows and columns of [P Aᵀ; A 0] towards unit
//! infinity norm: x-column scalings D and constraint-row scalings E, with
//! rows belonging to one SOC or exponential cone sharing a common scale
//! (a per-row scale would destroy the cone geometry). The scaled problem
//! is P ← DPD, q ← Dq, A ← EAD, b ← Eb; solutions map back as x = Dx̄,
//! z = Ez̄, s = E⁻¹s̄.

use crate::problem::{ConeSpec, ProblemData, SolverSettings};

/// Accumulated scalings, kept for unscaling the solution.
#[derive(Debug, Clone)]
pub struct Equilibration {
    pub d: Vec<f64>,
    pub e: Vec<f64>,
}

pub fn equilibrate(data: &mut ProblemData, settings: &SolverSettings) -> Equilibration {
    let n = data.num_vars();
    let m = data.num_constraints();

    let mut d = vec![1.0; n];
    let mut e = vec![1.0; m];

    let (lo, hi) = (
        settings.equilibrate_min_scaling,
        settings.equilibrate_max_scaling,
    );

    // raw CSC views, cloned once so the value arrays can be scaled in place
    let a_colptr = data.A.indptr().raw_storage().to_vec();
    let a_rowval = data.A.indices().to_vec();
    let p_pattern = data.P.as_ref().map(|p| {
        (
            p.indptr().raw_storage().to_vec(),
            p.indices().to_vec(),
        )
    });

    // constraint-row cone blocks that must share one scale
    let mut block_of_row = vec![usize::MAX; m];
    let mut blocks = Vec::new();
    {
        let mut row = 0;
        for cone in &data.cones {
            let dim = cone.dim();
            if matches!(cone, ConeSpec::Soc { .. } | ConeSpec::Exp3) {
                for r in row..row + dim {
                    block_of_row[r] = blocks.len();
                }
                blocks.push(row..row + dim);
            }
            row += dim;
        }
    }

    for _ in 0..settings.equilibrate_max_iter {
        let mut cnorm = vec![0.0_f64; n];
        let mut rnorm = vec![0.0_f64; m];

        if let (Some(p), Some((colptr, rowval))) = (&data.P, &p_pattern) {
            let vals = p.data();
            for j in 0..n {
                for k in colptr[j]..colptr[j + 1] {
                    let i = rowval[k];
                    let v = vals[k].abs();
                    cnorm[j] = cnorm[j].max(v);
                    cnorm[i] = cnorm[i].max(v);
                }
            }
        }
        {
            let vals = data.A.data();
            for j in 0..n {
                for k in a_colptr[j]..a_colptr[j + 1] {
                    let i = a_rowval[k];
                    let v = vals[k].abs();
                    cnorm[j] = cnorm[j].max(v);
                    rnorm[i] = rnorm[i].max(v);
                }
            }
        }

        // cone blocks equilibrate with their worst row
        for block in &blocks {
            let block_norm = rnorm[block.clone()]
                .iter()
                .fold(0.0_f64, |acc, &v| acc.max(v));
            for r in block.clone() {
                rnorm[r] = block_norm;
            }
        }

        let mut delta_d = vec![1.0_f64; n];
        let mut delta_e = vec![1.0_f64; m];
        for j in 0..n {
            if cnorm[j] > 0.0 {
                let target = (d[j] / cnorm[j].sqrt()).clamp(lo, hi);
                delta_d[j] = target / d[j];
                d[j] = target;
            }
        }
        for i in 0..m {
            if rnorm[i] > 0.0 {
                let target = (e[i] / rnorm[i].sqrt()).clamp(lo, hi);
                delta_e[i] = target / e[i];
                e[i] = target;
            }
        }

        // apply this sweep's increments in place
        if let (Some(p), Some((colptr, rowval))) = (&mut data.P, &p_pattern) {
            let vals = p.data_mut();
            for j in 0..n {
                for k in colptr[j]..colptr[j + 1] {
                    vals[k] *= delta_d[rowval[k]] * delta_d[j];
                }
            }
        }
        {
            let vals = data.A.data_mut();
            for j in 0..n {
                for k in a_colptr[j]..a_colptr[j + 1] {
                    vals[k] *= delta_e[a_rowval[k]] * delta_d[j];
                }
            }
        }
    }

    for (qi, &dj) in data.q.iter_mut().zip(&d) {
        *qi *= dj;
    }
    for (bi, &ei) in data.b.iter_mut().zip(&e) {
        *bi *= ei;
    }

    Equilibration { d, e }
}

/// Map a solution of the equilibrated problem back to original units.
pub fn unscale_solution(equil: &Equilibration, x: &mut [f64], z: &mut [f64], s: &mut [f64]) {
    for (xi, &di) in x.iter_mut().zip(&equil.d) {
        *xi *= di;
    }
    for (zi, &ei) in z.iter_mut().zip(&equil.e) {
        *zi *= ei;
    }
    for (si, &ei) in s.iter_mut().zip(&equil.e) {
        *si /= ei;
    }
}
