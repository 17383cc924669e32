//! Second-order cone primitives over the flat cone buffers.
//!
//! Each operation runs once for all SOC blocks: the k-th SOC reads its
//! (start, len) range from `rng_cones[idx_soc[k]]` and works on its slice of
//! the global z/s/w/λ vectors. The scaled point satisfies λ = W z = W⁻¹ s
//! with W² = η²(2wwᵀ − J), J = diag(1, −1, ..., −1).

use std::ops::Range;

fn soc_residual(z: &[f64]) -> f64 {
    let mut res = z[0] * z[0];
    for &zj in &z[1..] {
        res -= zj * zj;
    }
    res
}

fn sqrt_soc_residual(z: &[f64]) -> f64 {
    let res = soc_residual(z);
    if res > 0.0 {
        res.sqrt()
    } else {
        0.0
    }
}

/// Residual of the shifted point x + α·dx.
fn soc_residual_shifted(x: &[f64], dx: &[f64], alpha: f64) -> f64 {
    let t = x[0] + alpha * dx[0];
    let mut res = t * t;
    for (xj, dxj) in x[1..].iter().zip(&dx[1..]) {
        let v = xj + alpha * dxj;
        res -= v * v;
    }
    res
}

fn dot_tail(x: &[f64], y: &[f64]) -> f64 {
    x[1..].iter().zip(&y[1..]).map(|(a, b)| a * b).sum()
}

pub(crate) fn margins(z: &[f64], rng_cones: &[Range<usize>], idx_soc: &[usize]) -> (f64, f64) {
    let mut min_margin = f64::MAX;
    let mut pos_sum = 0.0;
    for &i in idx_soc {
        let zi = &z[rng_cones[i].clone()];
        let tail: f64 = dot_tail(zi, zi);
        let margin = zi[0] - tail.sqrt();
        min_margin = min_margin.min(margin);
        pos_sum += margin.max(0.0);
    }
    (min_margin, pos_sum)
}

pub(crate) fn scaled_unit_shift(
    z: &mut [f64],
    alpha: f64,
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for &i in idx_soc {
        z[rng_cones[i].start] += alpha;
    }
}

pub(crate) fn unit_initialization(
    z: &mut [f64],
    s: &mut [f64],
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for &i in idx_soc {
        let rng = rng_cones[i].clone();
        z[rng.clone()].fill(0.0);
        s[rng.clone()].fill(0.0);
        z[rng.start] = 1.0;
        s[rng.start] = 1.0;
    }
}

pub(crate) fn set_identity_scaling(
    w: &mut [f64],
    eta: &mut [f64],
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for (k, &i) in idx_soc.iter().enumerate() {
        let rng = rng_cones[i].clone();
        w[rng.clone()].fill(0.0);
        // identity W² has the hyperbolic normalization w = e₁
        w[rng.start] = 1.0;
        eta[k] = 1.0;
    }
}

/// Nesterov-Todd scaling update from the current (s, z) pair.
pub(crate) fn update_scaling(
    s: &[f64],
    z: &[f64],
    w: &mut [f64],
    lambda: &mut [f64],
    eta: &mut [f64],
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) -> bool {
    for (k, &i) in idx_soc.iter().enumerate() {
        let rng = rng_cones[i].clone();
        let si = &s[rng.clone()];
        let zi = &z[rng.clone()];

        let zscale = sqrt_soc_residual(zi);
        let sscale = sqrt_soc_residual(si);
        if zscale <= 0.0 || sscale <= 0.0 {
            return false;
        }

        eta[k] = (sscale / zscale).sqrt();

        // unnormalized w = s/ss + J z/zs
        let wi = &mut w[rng.clone()];
        for (wj, sj) in wi.iter_mut().zip(si) {
            *wj = sj / sscale;
        }
        wi[0] += zi[0] / zscale;
        for (wj, zj) in wi[1..].iter_mut().zip(&zi[1..]) {
            *wj -= zj / zscale;
        }

        let wscale = sqrt_soc_residual(wi);
        if wscale <= 0.0 {
            return false;
        }
        for wj in wi.iter_mut() {
            *wj /= wscale;
        }

        // hyperbolic normalization of the leading component
        let w1sq = dot_tail(wi, wi);
        wi[0] = (1.0 + w1sq).sqrt();

        let gamma = 0.5 * wscale;

        let li = &mut lambda[rng];
        li[0] = gamma;
        let coef = 1.0 / (si[0] / sscale + zi[0] / zscale + 2.0 * gamma);
        let c1 = (gamma + zi[0] / zscale) / sscale;
        let c2 = (gamma + si[0] / sscale) / zscale;
        for j in 1..li.len() {
            li[j] = coef * (c1 * si[j] + c2 * zi[j]);
        }
        let scale = (sscale * zscale).sqrt();
        for lj in li.iter_mut() {
            *lj *= scale;
        }
    }
    true
}

/// Assemble the dense W² block, column-major: η²(2wwᵀ − J).
pub(crate) fn get_hs(
    hsblocks: &mut [f64],
    w: &[f64],
    eta: &[f64],
    rng_cones: &[Range<usize>],
    rng_blocks: &[Range<usize>],
    idx_soc: &[usize],
) {
    for (k, &i) in idx_soc.iter().enumerate() {
        let cone = rng_cones[i].clone();
        let dim = cone.len();
        let wi = &w[cone];
        let block = &mut hsblocks[rng_blocks[i].clone()];

        let mut hidx = 0;
        for col in 0..dim {
            let wcol = wi[col];
            for row in 0..dim {
                block[hidx] = 2.0 * wi[row] * wcol;
                hidx += 1;
            }
        }
        block[0] -= 1.0;
        for ind in 1..dim {
            block[ind * dim + ind] += 1.0;
        }
        let eta2 = eta[k] * eta[k];
        for v in block.iter_mut() {
            *v *= eta2;
        }
    }
}

/// y = W² x = η²(2⟨w,x⟩w − Jx).
pub(crate) fn mul_hs(
    y: &mut [f64],
    x: &[f64],
    w: &[f64],
    eta: &[f64],
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for (k, &i) in idx_soc.iter().enumerate() {
        let rng = rng_cones[i].clone();
        let wi = &w[rng.clone()];
        let xi = &x[rng.clone()];

        let c = 2.0 * (wi[0] * xi[0] + dot_tail(wi, xi));
        let eta2 = eta[k] * eta[k];

        let yi = &mut y[rng];
        yi[0] = eta2 * (-xi[0] + c * wi[0]);
        for j in 1..yi.len() {
            yi[j] = eta2 * (xi[j] + c * wi[j]);
        }
    }
}

/// Affine right-hand side term λ ∘ λ.
pub(crate) fn affine_ds(
    ds: &mut [f64],
    lambda: &[f64],
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for &i in idx_soc {
        let rng = rng_cones[i].clone();
        let li = &lambda[rng.clone()];
        let dsi = &mut ds[rng];

        dsi[0] = li.iter().map(|v| v * v).sum();
        let l0 = li[0];
        for j in 1..dsi.len() {
            dsi[j] = 2.0 * l0 * li[j];
        }
    }
}

/// Combined-step shift W⁻¹Δs ∘ WΔz − σμ·e.
///
/// Rotates `step_z` to WΔz and `step_s` to W⁻¹Δs in place (the affine step
/// is no longer needed by the caller).
pub(crate) fn combined_ds_shift(
    shift: &mut [f64],
    step_z: &mut [f64],
    step_s: &mut [f64],
    w: &[f64],
    eta: &[f64],
    sigma_mu: f64,
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for (k, &i) in idx_soc.iter().enumerate() {
        let rng = rng_cones[i].clone();
        let dim = rng.len();
        let wi = &w[rng.clone()];

        // Δz ← WΔz
        {
            let tmp = &mut shift[rng.clone()];
            tmp.copy_from_slice(&step_z[rng.clone()]);
            let zeta = dot_tail(wi, tmp);
            let c = tmp[0] + zeta / (1.0 + wi[0]);

            let zi = &mut step_z[rng.clone()];
            zi[0] = eta[k] * (wi[0] * tmp[0] + zeta);
            for j in 1..dim {
                zi[j] = eta[k] * (tmp[j] + c * wi[j]);
            }
        }

        // Δs ← W⁻¹Δs
        {
            let tmp = &mut shift[rng.clone()];
            tmp.copy_from_slice(&step_s[rng.clone()]);
            let zeta = dot_tail(wi, tmp);
            let c = -tmp[0] + zeta / (1.0 + wi[0]);

            let si = &mut step_s[rng.clone()];
            si[0] = (wi[0] * tmp[0] - zeta) / eta[k];
            for j in 1..dim {
                si[j] = (tmp[j] + c * wi[j]) / eta[k];
            }
        }

        let zi = &step_z[rng.clone()];
        let si = &step_s[rng.clone()];
        let shifti = &mut shift[rng];

        shifti[0] = zi.iter().zip(si).map(|(a, b)| a * b).sum::<f64>() - sigma_mu;
        let s0 = si[0];
        let z0 = zi[0];
        for j in 1..dim {
            shifti[j] = s0 * zi[j] + z0 * si[j];
        }
    }
}

/// Offset term c = W(λ \ ds) in the combined-step equation
/// HₛΔz + Δs = −c.
pub(crate) fn ds_from_dz_offset(
    out: &mut [f64],
    ds: &[f64],
    z: &[f64],
    w: &[f64],
    lambda: &[f64],
    eta: &[f64],
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) {
    for (k, &i) in idx_soc.iter().enumerate() {
        let rng = rng_cones[i].clone();
        let dim = rng.len();
        let dsi = &ds[rng.clone()];
        let zi = &z[rng.clone()];
        let wi = &w[rng.clone()];
        let li = &lambda[rng.clone()];

        let resz = soc_residual(zi);
        let lambda1ds1 = dot_tail(li, dsi);
        let w1ds1 = dot_tail(wi, dsi);

        let outi = &mut out[rng];
        outi[0] = zi[0];
        for j in 1..dim {
            outi[j] = -zi[j];
        }

        let c = li[0] * dsi[0] - lambda1ds1;
        for v in outi.iter_mut() {
            *v *= c / resz;
        }

        outi[0] += eta[k] * w1ds1;
        for j in 1..dim {
            outi[j] += eta[k] * (dsi[j] + w1ds1 / (1.0 + wi[0]) * wi[j]);
        }

        for v in outi.iter_mut() {
            *v /= li[0];
        }
    }
}

pub(crate) fn step_length(
    dz: &[f64],
    ds: &[f64],
    z: &[f64],
    s: &[f64],
    alpha_max: f64,
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) -> f64 {
    let mut alpha = alpha_max;
    for &i in idx_soc {
        let rng = rng_cones[i].clone();
        let az = step_length_component(&z[rng.clone()], &dz[rng.clone()], alpha_max);
        let a_s = step_length_component(&s[rng.clone()], &ds[rng], alpha_max);
        alpha = alpha.min(az).min(a_s);
    }
    alpha.max(0.0)
}

/// Maximum α with x + α·y on or inside the cone, found from the roots of
/// the residual quadratic aα² + bα + c.
fn step_length_component(x: &[f64], y: &[f64], alpha_max: f64) -> f64 {
    let a = soc_residual(y);
    let b = 2.0 * (x[0] * y[0] - dot_tail(x, y));
    let c_raw = soc_residual(x);
    if c_raw < 0.0 {
        // current point outside the cone
        return f64::NEG_INFINITY;
    }
    let c = c_raw.max(0.0);
    let d = b * b - 4.0 * a * c;

    if (a > 0.0 && b > 0.0) || d < 0.0 {
        return alpha_max;
    }
    if a == 0.0 {
        if b < 0.0 {
            return alpha_max.min(-c / b);
        }
        return alpha_max;
    }
    if c == 0.0 {
        return if a >= 0.0 { alpha_max } else { 0.0 };
    }

    // stable root pairing: t carries no cancellation, the partner root
    // comes from the product c/a
    let t = if b >= 0.0 {
        -b - d.sqrt()
    } else {
        -b + d.sqrt()
    };

    let mut r1 = (2.0 * c) / t;
    let mut r2 = t / (2.0 * a);
    if r1 < 0.0 {
        r1 = f64::MAX;
    }
    if r2 < 0.0 {
        r2 = f64::MAX;
    }

    alpha_max.min(r1.min(r2))
}

pub(crate) fn compute_barrier(
    z: &[f64],
    s: &[f64],
    dz: &[f64],
    ds: &[f64],
    alpha: f64,
    rng_cones: &[Range<usize>],
    idx_soc: &[usize],
) -> f64 {
    let mut barrier = 0.0;
    for &i in idx_soc {
        let rng = rng_cones[i].clone();
        let res_s = soc_residual_shifted(&s[rng.clone()], &ds[rng.clone()], alpha);
        let res_z = soc_residual_shifted(&z[rng.clone()], &dz[rng], alpha);
        if res_s > 0.0 && res_z > 0.0 {
            barrier -= (res_s * res_z).ln() / 2.0;
        } else {
            return f64::INFINITY;
        }
    }
    barrier
}
