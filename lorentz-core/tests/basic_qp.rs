//! Reference QP: the equality/box problem with known solution
//! x = (0.3, 0.7) and objective 1.88.

use lorentz_core::linalg::sparse;
use lorentz_core::{solve, ConeSpec, ProblemData, SolveStatus, SolverSettings};

fn cpu_settings() -> SolverSettings {
    SolverSettings {
        direct_solve_method: "qdldl".into(),
        ..Default::default()
    }
}

fn basic_qp_data() -> ProblemData {
    // min 1/2 x' [4 1; 1 2] x + x1 + x2
    // s.t. x1 + x2 = 1, x1 <= 0.7, x2 <= 0.7
    let p = sparse::from_triplets_symmetric(2, vec![(0, 0, 4.0), (0, 1, 1.0), (1, 1, 2.0)]);
    let a = sparse::from_triplets(
        3,
        2,
        vec![(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0), (2, 1, 1.0)],
    );
    ProblemData {
        P: Some(p),
        q: vec![1.0, 1.0],
        A: a,
        b: vec![1.0, 0.7, 0.7],
        cones: vec![ConeSpec::Zero { dim: 1 }, ConeSpec::NonNeg { dim: 2 }],
    }
}

#[test]
fn test_qp_feasible() {
    let prob = basic_qp_data();
    let result = solve(&prob, &cpu_settings()).unwrap();

    assert_eq!(result.status, SolveStatus::Solved);
    assert!((result.x[0] - 0.3).abs() < 1e-3, "x0 = {}", result.x[0]);
    assert!((result.x[1] - 0.7).abs() < 1e-3, "x1 = {}", result.x[1]);

    let refobj = 1.8800000298331538;
    assert!((result.obj_val - refobj).abs() < 1e-3);
    assert!((result.obj_val_dual - refobj).abs() < 1e-3);
}

#[test]
fn test_qp_without_equilibration() {
    let prob = basic_qp_data();
    let mut settings = cpu_settings();
    settings.equilibrate_enable = false;
    let result = solve(&prob, &settings).unwrap();

    assert_eq!(result.status, SolveStatus::Solved);
    assert!((result.x[0] - 0.3).abs() < 1e-3);
    assert!((result.x[1] - 0.7).abs() < 1e-3);
}

#[test]
fn test_simple_lp() {
    // min x1 + x2 s.t. x1 + x2 = 1, x >= 0; optimum value 1
    let prob = ProblemData {
        P: None,
        q: vec![1.0, 1.0],
        A: sparse::from_triplets(
            3,
            2,
            vec![(0, 0, 1.0), (0, 1, 1.0), (1, 0, -1.0), (2, 1, -1.0)],
        ),
        b: vec![1.0, 0.0, 0.0],
        cones: vec![ConeSpec::Zero { dim: 1 }, ConeSpec::NonNeg { dim: 2 }],
    };
    let result = solve(&prob, &cpu_settings()).unwrap();

    assert_eq!(result.status, SolveStatus::Solved);
    assert!((result.obj_val - 1.0).abs() < 1e-6);
    assert!((result.x[0] + result.x[1] - 1.0).abs() < 1e-6);
}

#[test]
fn test_lp_dual_infeasible() {
    // min -x1 with only x1 >= 0: unbounded below
    let prob = ProblemData {
        P: None,
        q: vec![-1.0],
        A: sparse::from_triplets(1, 1, vec![(0, 0, -1.0)]),
        b: vec![0.0],
        cones: vec![ConeSpec::NonNeg { dim: 1 }],
    };
    let result = solve(&prob, &cpu_settings()).unwrap();

    assert_eq!(result.status, SolveStatus::DualInfeasible);
    assert!(result.obj_val.is_nan());
    assert!(result.obj_val_dual.is_nan());
}

#[test]
fn test_invalid_problem_rejected() {
    let mut prob = basic_qp_data();
    prob.b.pop();
    assert!(solve(&prob, &cpu_settings()).is_err());
}
