//! Reference SOCP with a dense 3×3 positive definite cost, two
//! nonnegative blocks, and one second-order cone, plus its infeasible
//! variant.

use lorentz_core::linalg::sparse;
use lorentz_core::{solve, ConeSpec, ProblemData, SolveStatus, SolverSettings};

fn cpu_settings() -> SolverSettings {
    SolverSettings {
        direct_solve_method: "qdldl".into(),
        ..Default::default()
    }
}

#[allow(clippy::excessive_precision)]
fn basic_socp_data() -> ProblemData {
    // 3x3 positive definite cost matrix (upper triangle)
    let p = sparse::from_triplets_symmetric(
        3,
        vec![
            (0, 0, 1.4652521089139698),
            (0, 1, 0.6137176286085666),
            (1, 1, 2.219109946678485),
            (0, 2, -1.1527861771130112),
            (1, 2, -1.4400420548730628),
            (2, 2, 1.6014483534926371),
        ],
    );

    // A = [2I; -2I; I]
    let mut triplets = Vec::new();
    for i in 0..3 {
        triplets.push((i, i, 2.0));
        triplets.push((3 + i, i, -2.0));
        triplets.push((6 + i, i, 1.0));
    }
    let a = sparse::from_triplets(9, 3, triplets);

    ProblemData {
        P: Some(p),
        q: vec![0.1, -2.0, 1.0],
        A: a,
        b: vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        cones: vec![
            ConeSpec::NonNeg { dim: 3 },
            ConeSpec::NonNeg { dim: 3 },
            ConeSpec::Soc { dim: 3 },
        ],
    }
}

#[test]
fn test_socp_feasible() {
    let prob = basic_socp_data();
    let result = solve(&prob, &cpu_settings()).unwrap();

    assert_eq!(result.status, SolveStatus::Solved);

    let refsol = [-0.5, 0.435603, -0.245459];
    for i in 0..3 {
        assert!(
            (result.x[i] - refsol[i]).abs() < 1e-3,
            "x[{}] = {}",
            i,
            result.x[i]
        );
    }

    let refobj = -8.4590e-01;
    assert!((result.obj_val - refobj).abs() < 1e-3);
    assert!((result.obj_val_dual - refobj).abs() < 1e-3);

    // the returned slacks satisfy the cone constraints
    let t = result.s[6];
    let tail = (result.s[7].powi(2) + result.s[8].powi(2)).sqrt();
    assert!(t >= tail - 1e-8);
}

#[test]
fn test_socp_feasible_single_cone() {
    // same data regrouped into one larger second-order cone
    let mut prob = basic_socp_data();
    prob.cones = vec![ConeSpec::NonNeg { dim: 3 }, ConeSpec::Soc { dim: 6 }];
    let result = solve(&prob, &cpu_settings()).unwrap();
    assert_eq!(result.status, SolveStatus::Solved);
}

#[test]
fn test_socp_infeasible() {
    let mut prob = basic_socp_data();
    // make the cone constraint unsatisfiable
    prob.b[6] = -10.0;

    let result = solve(&prob, &cpu_settings()).unwrap();

    assert_eq!(result.status, SolveStatus::PrimalInfeasible);
    assert!(result.obj_val.is_nan());
    assert!(result.obj_val_dual.is_nan());
}
