//! Large-SOC chaining exercised through full solves: the reduced problem
//! must reproduce the unreduced optimum.

use lorentz_core::linalg::sparse;
use lorentz_core::{solve, ConeSpec, ProblemData, SolveStatus, SolverSettings};

fn cpu_settings() -> SolverSettings {
    SolverSettings {
        direct_solve_method: "qdldl".into(),
        ..Default::default()
    }
}

/// max Σ x̄ over the unit ball ‖x̄‖ ≤ 1 with the cone head pinned to 1,
/// i.e. minimize −Σ x̄; optimum −sqrt(dim − 1).
fn ball_problem(dim: usize) -> ProblemData {
    let mut q = vec![0.0; dim];
    for qi in q.iter_mut().skip(1) {
        *qi = -1.0;
    }

    // row 0: x0 = 1 (zero cone); rows 1..=dim: s = x in the SOC
    let mut triplets = vec![(0usize, 0usize, 1.0)];
    for i in 0..dim {
        triplets.push((1 + i, i, -1.0));
    }
    let mut b = vec![0.0; dim + 1];
    b[0] = 1.0;

    ProblemData {
        P: None,
        q,
        A: sparse::from_triplets(dim + 1, dim, triplets),
        b,
        cones: vec![ConeSpec::Zero { dim: 1 }, ConeSpec::Soc { dim }],
    }
}

#[test]
fn test_soc30_reduced_matches_dense() {
    let prob = ball_problem(30);
    let expected = -(29.0_f64).sqrt();

    // dense path: the cone stays a single block
    let dense = solve(&prob, &cpu_settings()).unwrap();
    assert_eq!(dense.status, SolveStatus::Solved);
    assert!(
        (dense.obj_val - expected).abs() < 1e-5,
        "dense obj = {}",
        dense.obj_val
    );

    // reduced path: chained into Soc(5) links
    let mut settings = cpu_settings();
    settings.soc_reduction_size = 5;
    let reduced = solve(&prob, &settings).unwrap();
    assert_eq!(reduced.status, SolveStatus::Solved);
    assert!(
        (reduced.obj_val - expected).abs() < 1e-5,
        "reduced obj = {}",
        reduced.obj_val
    );

    // solutions agree in the original geometry
    assert_eq!(reduced.x.len(), 30);
    assert_eq!(reduced.s.len(), 31);
    for i in 0..30 {
        assert!(
            (dense.x[i] - reduced.x[i]).abs() < 1e-4,
            "x[{}] differs: {} vs {}",
            i,
            dense.x[i],
            reduced.x[i]
        );
    }
}

#[test]
fn test_soc6_reduction() {
    let prob = ball_problem(6);
    let expected = -(5.0_f64).sqrt();

    let mut settings = cpu_settings();
    settings.soc_reduction_size = 5;
    let result = solve(&prob, &settings).unwrap();

    assert_eq!(result.status, SolveStatus::Solved);
    assert!((result.obj_val - expected).abs() < 1e-5);

    // returned slacks live on the original cone
    let t = result.s[1];
    let tail: f64 = result.s[2..].iter().map(|v| v * v).sum::<f64>().sqrt();
    assert!(t >= tail - 1e-6);
}
