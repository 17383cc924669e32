//! Three-dimensional exponential cone primitives.
//!
//! Primal cone: s ∈ Kexp iff s₃ > 0, s₂ > 0, s₂·log(s₃/s₂) − s₁ > 0.
//! Dual cone:   z ∈ Kexp* iff z₃ > 0, z₁ < 0, z₂ − z₁ − z₁·log(−z₃/z₁) > 0.
//!
//! The dual barrier gradient and Hessian are closed-form; the primal
//! barrier and gradient go through the Wright-ω function. The scaled
//! Hessian Hs is either μ·H_dual or a secant-corrected primal-dual variant.

use crate::problem::ScalingStrategy;
use nalgebra::{Matrix3, Vector3};
use std::ops::Range;

/// Central-ray initialization point for (s, z).
const UNIT_INIT: [f64; 3] = [
    -1.051383945322714,
    0.556409619469370,
    1.258967884768947,
];

pub(crate) fn is_primal_feasible(s: &[f64]) -> bool {
    if s[2] > 0.0 && s[1] > 0.0 {
        let res = s[1] * (s[2] / s[1]).ln() - s[0];
        if res.is_finite() && res > 0.0 {
            return true;
        }
    }
    false
}

pub(crate) fn is_dual_feasible(z: &[f64]) -> bool {
    if z[2] > 0.0 && z[0] < 0.0 {
        let res = z[1] - z[0] - z[0] * (-z[2] / z[0]).ln();
        if res.is_finite() && res > 0.0 {
            return true;
        }
    }
    false
}

pub(crate) fn barrier_dual(z: &[f64]) -> f64 {
    if !is_dual_feasible(z) {
        return f64::INFINITY;
    }
    let l = (-z[2] / z[0]).ln();
    -(-z[2] * z[0]).ln() - (z[1] - z[0] - z[0] * l).ln()
}

pub(crate) fn barrier_primal(s: &[f64]) -> f64 {
    if !is_primal_feasible(s) {
        return f64::INFINITY;
    }
    let mut omega = wright_omega(1.0 - s[0] / s[1] - (s[1] / s[2]).ln());
    omega = (omega - 1.0) * (omega - 1.0) / omega;
    -omega.ln() - 2.0 * s[1].ln() - s[2].ln() - 3.0
}

/// Gradient of the primal barrier (via Wright-ω).
pub(crate) fn gradient_primal(s: &[f64], grad: &mut [f64; 3]) {
    let omega = wright_omega(1.0 - s[0] / s[1] - (s[1] / s[2]).ln());
    grad[0] = 1.0 / ((omega - 1.0) * s[1]);
    grad[1] = grad[0] + grad[0] * (omega * s[1] / s[2]).ln() - 1.0 / s[1];
    grad[2] = omega / ((1.0 - omega) * s[2]);
}

/// Closed-form dual barrier gradient and Hessian at z (row-major 3×3).
pub(crate) fn update_dual_grad_h(grad: &mut [f64], h: &mut [f64], z: &[f64]) -> bool {
    if !is_dual_feasible(z) {
        return false;
    }
    let l = (-z[2] / z[0]).ln();
    let r = -z[0] * l - z[0] + z[1];

    let c2 = 1.0 / r;

    grad[0] = c2 * l - 1.0 / z[0];
    grad[1] = -c2;
    grad[2] = (c2 * z[0] - 1.0) / z[2];

    let r2 = r * r;
    h[0] = (r2 - z[0] * r + l * l * z[0] * z[0]) / (r2 * z[0] * z[0]);
    h[1] = -l / r2;
    h[3] = h[1];
    h[4] = 1.0 / r2;
    h[2] = (z[1] - z[0]) / (r2 * z[2]);
    h[6] = h[2];
    h[5] = -z[0] / (r2 * z[2]);
    h[7] = h[5];
    h[8] = (r2 - z[0] * r + z[0] * z[0]) / (r2 * z[2] * z[2]);

    grad.iter().all(|v| v.is_finite()) && h.iter().all(|v| v.is_finite())
}

/// Explicit Cholesky factor of a 3×3 symmetric matrix (row-major).
/// Returns false when the matrix is not positive definite.
pub(crate) fn cholesky_3x3_factor(l: &mut [f64; 9], h: &[f64]) -> bool {
    if h[0] <= 0.0 {
        return false;
    }
    let l00 = h[0].sqrt();
    let l10 = h[3] / l00;
    let l20 = h[6] / l00;

    let d1 = h[4] - l10 * l10;
    if d1 <= 0.0 {
        return false;
    }
    let l11 = d1.sqrt();
    let l21 = (h[7] - l20 * l10) / l11;

    let d2 = h[8] - l20 * l20 - l21 * l21;
    if d2 <= 0.0 {
        return false;
    }
    let l22 = d2.sqrt();

    *l = [l00, 0.0, 0.0, l10, l11, 0.0, l20, l21, l22];
    true
}

/// Solve H x = b given the Cholesky factor from [`cholesky_3x3_factor`].
pub(crate) fn cholesky_3x3_solve(l: &[f64; 9], b: &[f64], x: &mut [f64; 3]) {
    let y0 = b[0] / l[0];
    let y1 = (b[1] - l[3] * y0) / l[4];
    let y2 = (b[2] - l[6] * y0 - l[7] * y1) / l[8];

    x[2] = y2 / l[8];
    x[1] = (y1 - l[7] * x[2]) / l[4];
    x[0] = (y0 - l[3] * x[1] - l[6] * x[2]) / l[0];
}

/// Third-derivative correction term of the exponential barrier.
///
/// Solves H u = ds, then evaluates the standard third-order term at (u, v)
/// into `eta`.
pub(crate) fn higher_correction(h: &[f64], z: &[f64], eta: &mut [f64; 3], ds: &[f64], v: &[f64]) {
    let mut chol = [0.0; 9];
    if !cholesky_3x3_factor(&mut chol, h) {
        eta.fill(0.0);
        return;
    }

    let mut u = [0.0; 3];
    cholesky_3x3_solve(&chol, ds, &mut u);

    eta[1] = 1.0;
    eta[2] = -z[0] / z[2];
    eta[0] = eta[2].ln();

    let psi = z[0] * eta[0] - z[0] + z[1];

    let dot_psi_u = eta[0] * u[0] + eta[1] * u[1] + eta[2] * u[2];
    let dot_psi_v = eta[0] * v[0] + eta[1] * v[1] + eta[2] * v[2];

    let coef = ((u[0] * (v[0] / z[0] - v[2] / z[2])
        + u[2] * (z[0] * v[2] / z[2] - v[0]) / z[2])
        * psi
        - 2.0 * dot_psi_u * dot_psi_v)
        / (psi * psi * psi);
    for e in eta.iter_mut() {
        *e *= coef;
    }

    let inv_psi2 = 1.0 / (psi * psi);

    eta[0] += (1.0 / psi - 2.0 / z[0]) * u[0] * v[0] / (z[0] * z[0])
        - u[2] * v[2] / (z[2] * z[2]) / psi
        + dot_psi_u * inv_psi2 * (v[0] / z[0] - v[2] / z[2])
        + dot_psi_v * inv_psi2 * (u[0] / z[0] - u[2] / z[2]);
    eta[2] += 2.0 * (z[0] / psi - 1.0) * u[2] * v[2] / (z[2] * z[2] * z[2])
        - (u[2] * v[0] + u[0] * v[2]) / (z[2] * z[2]) / psi
        + dot_psi_u * inv_psi2 * (z[0] * v[2] / (z[2] * z[2]) - v[0] / z[2])
        + dot_psi_v * inv_psi2 * (z[0] * u[2] / (z[2] * z[2]) - u[0] / z[2]);

    for e in eta.iter_mut() {
        *e /= 2.0;
    }
}

/// Wright-ω: the inverse of w ↦ w + log w on the principal branch.
///
/// Degree-5 series around z = 1 + π, logarithmic asymptotic expansion for
/// larger arguments, then two Halley corrections. Returns +∞ for z < 0
/// (out-of-domain sentinel).
pub(crate) fn wright_omega(z: f64) -> f64 {
    if z < 0.0 {
        return f64::INFINITY;
    }

    let mut w;
    if z < 1.0 + std::f64::consts::PI {
        let zm1 = z - 1.0;
        let mut p = zm1;
        w = 1.0 + 0.5 * p;
        p *= zm1;
        w += p / 16.0;
        p *= zm1;
        w -= p / 192.0;
        p *= zm1;
        w -= p / 3072.0;
        p *= zm1;
        w += 13.0 * p / 61440.0;
    } else {
        let logz = z.ln();
        let zinv = 1.0 / z;
        w = z - logz;

        let mut q = logz * zinv;
        w += q;

        q *= zinv;
        w += q * (logz / 2.0 - 1.0);

        q *= zinv;
        w += q * (logz * logz / 3.0 - 1.5 * logz + 1.0);
    }

    let mut r = z - w - w.ln();
    for _ in 0..2 {
        let wp1 = w + 1.0;
        let t = wp1 * (wp1 + (2.0 * r) / 3.0);
        w *= 1.0 + (r / wp1) * (t - 0.5 * r) / (t - r);
        r = (2.0 * w * w - 8.0 * w - 1.0) / (72.0 * wp1.powi(6)) * r.powi(4);
    }

    w
}

// ----------------------------------------------------------------------
// grouped operations over all Exp3 blocks
// ----------------------------------------------------------------------

pub(crate) fn unit_initialization(
    z: &mut [f64],
    s: &mut [f64],
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) {
    for &i in idx_exp {
        let start = rng_cones[i].start;
        s[start..start + 3].copy_from_slice(&UNIT_INIT);
        z[start..start + 3].copy_from_slice(&UNIT_INIT);
    }
}

/// Refresh the dual gradient/Hessian and the scaled Hessian Hs for every
/// exponential cone. Returns false if any z leaves the dual interior.
#[allow(clippy::too_many_arguments)]
pub(crate) fn update_scaling(
    s: &[f64],
    z: &[f64],
    grad: &mut [f64],
    h_dual: &mut [f64],
    hs: &mut [f64],
    mu: f64,
    strategy: ScalingStrategy,
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) -> bool {
    for (k, &i) in idx_exp.iter().enumerate() {
        let start = rng_cones[i].start;
        let si = &s[start..start + 3];
        let zi = &z[start..start + 3];
        let gradi = &mut grad[3 * k..3 * k + 3];
        let hi = &mut h_dual[9 * k..9 * k + 9];

        if !update_dual_grad_h(gradi, hi, zi) {
            return false;
        }

        let hsi = &mut hs[9 * k..9 * k + 9];
        match strategy {
            ScalingStrategy::Dual => use_dual_scaling(hsi, hi, mu),
            ScalingStrategy::PrimalDual => {
                if !use_primal_dual_scaling(si, zi, gradi, hi, hsi) {
                    use_dual_scaling(hsi, hi, mu);
                }
            }
        }
    }
    true
}

fn use_dual_scaling(hs: &mut [f64], h_dual: &[f64], mu: f64) {
    for (dst, &src) in hs.iter_mut().zip(h_dual) {
        *dst = mu * src;
    }
}

/// Primal-dual scaling: two BFGS secant updates of μ·H_dual, first towards
/// the shadow pair z̃ = −∇f(s), s̃ = −∇f*(z) (the primal gradient goes
/// through Wright-ω), then towards the true pair so that Hs·z = s holds
/// exactly. Each update keeps the matrix positive definite when its
/// curvature products are positive; returns false (caller falls back to
/// dual scaling) otherwise.
fn use_primal_dual_scaling(
    s: &[f64],
    z: &[f64],
    grad: &[f64],
    h_dual: &[f64],
    hs: &mut [f64],
) -> bool {
    let mu = (s[0] * z[0] + s[1] * z[1] + s[2] * z[2]) / 3.0;
    if mu <= 0.0 {
        return false;
    }

    let mut zt = [0.0; 3];
    gradient_primal(s, &mut zt);
    if !zt.iter().all(|v| v.is_finite()) {
        return false;
    }

    let sv = Vector3::new(s[0], s[1], s[2]);
    let zv = Vector3::new(z[0], z[1], z[2]);
    let s_shadow = -Vector3::new(grad[0], grad[1], grad[2]);
    let z_shadow = -Vector3::new(zt[0], zt[1], zt[2]);

    let mut b = Matrix3::from_row_slice(h_dual) * mu;
    if !bfgs_secant_update(&mut b, &z_shadow, &s_shadow) {
        return false;
    }
    if !bfgs_secant_update(&mut b, &zv, &sv) {
        return false;
    }

    let mut candidate = [0.0; 9];
    for r in 0..3 {
        for c in 0..3 {
            candidate[3 * r + c] = b[(r, c)];
        }
    }

    let mut chol = [0.0; 9];
    if !cholesky_3x3_factor(&mut chol, &candidate) {
        return false;
    }

    hs.copy_from_slice(&candidate);
    true
}

/// BFGS update B ← B − (Bz)(Bz)ᵀ/zᵀBz + ssᵀ/⟨s,z⟩, which enforces B z = s
/// and preserves positive definiteness for positive curvature products.
fn bfgs_secant_update(b: &mut Matrix3<f64>, z: &Vector3<f64>, s: &Vector3<f64>) -> bool {
    let bz = *b * z;
    let zbz = z.dot(&bz);
    let sz = s.dot(z);
    if !(zbz > 0.0 && sz > 0.0) || !zbz.is_finite() || !sz.is_finite() {
        return false;
    }
    *b -= bz * bz.transpose() / zbz;
    *b += s * s.transpose() / sz;
    true
}

pub(crate) fn get_hs(
    hsblocks: &mut [f64],
    hs: &[f64],
    rng_blocks: &[Range<usize>],
    idx_exp: &[usize],
) {
    for (k, &i) in idx_exp.iter().enumerate() {
        // symmetric block, so the row-major store matches the
        // column-major block layout
        hsblocks[rng_blocks[i].clone()].copy_from_slice(&hs[9 * k..9 * k + 9]);
    }
}

pub(crate) fn mul_hs(
    y: &mut [f64],
    x: &[f64],
    hs: &[f64],
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) {
    for (k, &i) in idx_exp.iter().enumerate() {
        let start = rng_cones[i].start;
        let hsi = &hs[9 * k..9 * k + 9];
        let xi = &x[start..start + 3];
        let yi = &mut y[start..start + 3];
        for r in 0..3 {
            yi[r] = hsi[3 * r] * xi[0] + hsi[3 * r + 1] * xi[1] + hsi[3 * r + 2] * xi[2];
        }
    }
}

pub(crate) fn affine_ds(ds: &mut [f64], s: &[f64], rng_cones: &[Range<usize>], idx_exp: &[usize]) {
    for &i in idx_exp {
        let rng = rng_cones[i].clone();
        ds[rng.clone()].copy_from_slice(&s[rng]);
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn combined_ds_shift(
    shift: &mut [f64],
    step_z: &[f64],
    step_s: &[f64],
    z: &[f64],
    grad: &[f64],
    h_dual: &[f64],
    sigma_mu: f64,
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) {
    for (k, &i) in idx_exp.iter().enumerate() {
        let start = rng_cones[i].start;
        let zi = &z[start..start + 3];
        let hi = &h_dual[9 * k..9 * k + 9];
        let gradi = &grad[3 * k..3 * k + 3];

        let mut eta = [0.0; 3];
        higher_correction(
            hi,
            zi,
            &mut eta,
            &step_s[start..start + 3],
            &step_z[start..start + 3],
        );

        for j in 0..3 {
            shift[start + j] = gradi[j] * sigma_mu - eta[j];
        }
    }
}

pub(crate) fn ds_from_dz_offset(
    out: &mut [f64],
    ds: &[f64],
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) {
    for &i in idx_exp {
        let rng = rng_cones[i].clone();
        out[rng.clone()].copy_from_slice(&ds[rng]);
    }
}

/// Backtracking feasibility search: shrink α by `step` until both shifted
/// points are interior, or give up at `alpha_min`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn step_length(
    dz: &[f64],
    ds: &[f64],
    z: &[f64],
    s: &[f64],
    alpha_max: f64,
    alpha_min: f64,
    step: f64,
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) -> f64 {
    let mut alpha = alpha_max;
    for &i in idx_exp {
        let start = rng_cones[i].start;
        alpha = backtrack_search(
            &dz[start..start + 3],
            &z[start..start + 3],
            &ds[start..start + 3],
            &s[start..start + 3],
            alpha,
            alpha_min,
            step,
        );
        if alpha == 0.0 {
            break;
        }
    }
    alpha
}

fn backtrack_search(
    dz: &[f64],
    z: &[f64],
    ds: &[f64],
    s: &[f64],
    alpha_init: f64,
    alpha_min: f64,
    step: f64,
) -> f64 {
    let mut alpha = alpha_init;
    let mut work = [0.0; 3];

    loop {
        for j in 0..3 {
            work[j] = s[j] + alpha * ds[j];
        }
        if is_primal_feasible(&work) {
            break;
        }
        alpha *= step;
        if alpha < alpha_min {
            return 0.0;
        }
    }

    loop {
        for j in 0..3 {
            work[j] = z[j] + alpha * dz[j];
        }
        if is_dual_feasible(&work) {
            break;
        }
        alpha *= step;
        if alpha < alpha_min {
            return 0.0;
        }
    }

    alpha
}

pub(crate) fn compute_barrier(
    z: &[f64],
    s: &[f64],
    dz: &[f64],
    ds: &[f64],
    alpha: f64,
    rng_cones: &[Range<usize>],
    idx_exp: &[usize],
) -> f64 {
    let mut barrier = 0.0;
    for &i in idx_exp {
        let start = rng_cones[i].start;
        let mut cur_z = [0.0; 3];
        let mut cur_s = [0.0; 3];
        for j in 0..3 {
            cur_z[j] = z[start + j] + alpha * dz[start + j];
            cur_s[j] = s[start + j] + alpha * ds[start + j];
        }
        barrier += barrier_dual(&cur_z) + barrier_primal(&cur_s);
    }
    barrier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wright_omega_inverse_property() {
        // ω + log ω = z on the principal branch
        for &z in &[0.1, 0.5, 1.0, 2.0, 1.0 + std::f64::consts::PI, 10.0, 100.0] {
            let w = wright_omega(z);
            assert!(w > 0.0);
            assert!(
                (w + w.ln() - z).abs() < 1e-10,
                "wright omega residual too large at z = {}",
                z
            );
        }
        assert!(wright_omega(-1.0).is_infinite());
    }

    #[test]
    fn test_feasibility_predicates() {
        // z = y e^{x/y}: (0, 1, 2) is strictly inside, (0, 1, 0.5) outside
        assert!(is_primal_feasible(&[0.0, 1.0, 2.0]));
        assert!(!is_primal_feasible(&[0.0, 1.0, 0.5]));
        assert!(!is_primal_feasible(&[0.0, 1.0, 1.0]));

        assert!(is_dual_feasible(&[-1.0, 0.0, 1.0]));
        assert!(!is_dual_feasible(&[1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_feasible_implies_finite_barrier() {
        let s = [-0.5, 1.0, 2.0];
        assert!(is_primal_feasible(&s));
        assert!(barrier_primal(&s).is_finite());

        let z = [-1.0, 0.5, 1.5];
        assert!(is_dual_feasible(&z));
        assert!(barrier_dual(&z).is_finite());

        // and infeasible points hit the +inf sentinel
        assert!(barrier_primal(&[1.0, 1.0, 1.0]).is_infinite());
        assert!(barrier_dual(&[1.0, 1.0, 1.0]).is_infinite());
    }

    #[test]
    fn test_central_ray_scaling_update() {
        // unit initialization point, one scaling update, both predicates hold
        let rng = vec![0..3usize];
        let idx = vec![0usize];
        let mut z = vec![0.0; 3];
        let mut s = vec![0.0; 3];
        unit_initialization(&mut z, &mut s, &rng, &idx);

        assert!(is_primal_feasible(&s));
        assert!(is_dual_feasible(&z));

        let mut grad = vec![0.0; 3];
        let mut h_dual = vec![0.0; 9];
        let mut hs = vec![0.0; 9];
        let mu = (s[0] * z[0] + s[1] * z[1] + s[2] * z[2]) / 3.0;
        assert!(update_scaling(
            &s,
            &z,
            &mut grad,
            &mut h_dual,
            &mut hs,
            mu,
            ScalingStrategy::Dual,
            &rng,
            &idx
        ));

        assert!(is_primal_feasible(&s));
        assert!(is_dual_feasible(&z));
        assert!(hs.iter().all(|v| v.is_finite()));

        // dual Hessian is positive definite at an interior point
        let mut chol = [0.0; 9];
        assert!(cholesky_3x3_factor(&mut chol, &h_dual));
    }

    #[test]
    fn test_dual_grad_is_negated_shadow() {
        // -∇f*(z) must be primal feasible
        let z = [-1.0, 0.5, 1.5];
        let mut grad = [0.0; 3];
        let mut h = [0.0; 9];
        assert!(update_dual_grad_h(&mut grad, &mut h, &z));
        let shadow = [-grad[0], -grad[1], -grad[2]];
        assert!(is_primal_feasible(&shadow));
    }

    #[test]
    fn test_primal_dual_scaling_secant() {
        let s = [-0.8, 0.9, 1.9];
        let z = [-1.1, 0.4, 1.3];
        assert!(is_primal_feasible(&s));
        assert!(is_dual_feasible(&z));

        let mut grad = [0.0; 3];
        let mut h = [0.0; 9];
        assert!(update_dual_grad_h(&mut grad, &mut h, &z));

        let mut hs = [0.0; 9];
        assert!(use_primal_dual_scaling(&s, &z, &grad, &h, &mut hs));

        // Hs z = s to machine precision
        for r in 0..3 {
            let hz = hs[3 * r] * z[0] + hs[3 * r + 1] * z[1] + hs[3 * r + 2] * z[2];
            assert!((hz - s[r]).abs() < 1e-9, "secant violated in row {}", r);
        }
    }

    #[test]
    fn test_cholesky_3x3_roundtrip() {
        let h = [4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0];
        let mut l = [0.0; 9];
        assert!(cholesky_3x3_factor(&mut l, &h));
        let b = [1.0, 2.0, 3.0];
        let mut x = [0.0; 3];
        cholesky_3x3_solve(&l, &b, &mut x);
        for r in 0..3 {
            let hx = h[3 * r] * x[0] + h[3 * r + 1] * x[1] + h[3 * r + 2] * x[2];
            assert!((hx - b[r]).abs() < 1e-12);
        }

        let indefinite = [1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        assert!(!cholesky_3x3_factor(&mut l, &indefinite));
    }

    #[test]
    fn test_backtracking_step_length() {
        let rng = vec![0..3usize];
        let idx = vec![0usize];
        let s = [-0.5, 1.0, 2.0];
        let z = [-1.0, 0.5, 1.5];
        // a direction that leaves both cones at full step
        let ds = [10.0, 0.0, 0.0];
        let dz = [10.0, 0.0, 0.0];
        let alpha = step_length(&dz, &ds, &z, &s, 1.0, 1e-10, 0.5, &rng, &idx);
        assert!(alpha > 0.0 && alpha < 1.0);

        // interior direction keeps the full step
        let ds = [0.0, 0.0, 0.1];
        let dz = [0.0, 0.1, 0.0];
        let alpha = step_length(&dz, &ds, &z, &s, 1.0, 1e-10, 0.5, &rng, &idx);
        assert!((alpha - 1.0).abs() < 1e-14);
    }
}
