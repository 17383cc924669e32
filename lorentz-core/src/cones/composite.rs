//! Composite cone: ordered cone sequence with precomputed range and ordinal
//! arrays, flat scaling state, and grouped dispatch of every cone primitive.

use super::{exp_ops, nonneg_ops, soc_ops, zero_ops};
use crate::problem::{ConeSpec, ScalingStrategy, SolverSettings};
use std::ops::Range;

/// Which side of the cone pair a vector lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimalOrDualCone {
    Primal,
    Dual,
}

/// Ordered cone sequence plus the parallel arrays the kernels index by.
///
/// `rng_cones[i]` is cone i's range within the length-m conic vector and
/// `rng_blocks[i]` its range within the concatenated Hessian-block storage
/// (d for diagonal blocks, d·d for dense SOC blocks, 9 for Exp3). The
/// concatenation of cone ranges tiles [0, m) contiguously.
pub struct CompositeCone {
    pub cones: Vec<ConeSpec>,
    pub rng_cones: Vec<Range<usize>>,
    pub rng_blocks: Vec<Range<usize>>,

    /// Ordinals of the zero cones.
    pub idx_eq: Vec<usize>,
    /// Ordinals of the nonnegative cones.
    pub idx_nonneg: Vec<usize>,
    /// Ordinals of the second-order cones.
    pub idx_soc: Vec<usize>,
    /// Ordinals of the exponential cones.
    pub idx_exp: Vec<usize>,

    numel: usize,
    degree: usize,

    // flat scaling state
    w: Vec<f64>,
    lambda: Vec<f64>,
    eta: Vec<f64>,
    exp_grad: Vec<f64>,
    exp_h_dual: Vec<f64>,
    exp_hs: Vec<f64>,
}

impl CompositeCone {
    pub fn new(cones: &[ConeSpec]) -> Self {
        let mut rng_cones = Vec::with_capacity(cones.len());
        let mut rng_blocks = Vec::with_capacity(cones.len());
        let mut idx_eq = Vec::new();
        let mut idx_nonneg = Vec::new();
        let mut idx_soc = Vec::new();
        let mut idx_exp = Vec::new();

        let mut offset = 0;
        let mut block_offset = 0;
        for (i, cone) in cones.iter().enumerate() {
            let dim = cone.dim();
            rng_cones.push(offset..offset + dim);
            offset += dim;

            let blockdim = hs_block_size(cone);
            rng_blocks.push(block_offset..block_offset + blockdim);
            block_offset += blockdim;

            match cone {
                ConeSpec::Zero { .. } => idx_eq.push(i),
                ConeSpec::NonNeg { .. } => idx_nonneg.push(i),
                ConeSpec::Soc { .. } => idx_soc.push(i),
                ConeSpec::Exp3 => idx_exp.push(i),
            }
        }

        let numel = offset;
        let degree = cones.iter().map(|c| c.degree()).sum();
        let n_soc = idx_soc.len();
        let n_exp = idx_exp.len();

        Self {
            cones: cones.to_vec(),
            rng_cones,
            rng_blocks,
            idx_eq,
            idx_nonneg,
            idx_soc,
            idx_exp,
            numel,
            degree,
            w: vec![0.0; numel],
            lambda: vec![0.0; numel],
            eta: vec![0.0; n_soc],
            exp_grad: vec![0.0; 3 * n_exp],
            exp_h_dual: vec![0.0; 9 * n_exp],
            exp_hs: vec![0.0; 9 * n_exp],
        }
    }

    /// Total conic dimension m.
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Total barrier degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn len(&self) -> usize {
        self.cones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cones.is_empty()
    }

    /// True when every cone is symmetric (no exponential cones).
    pub fn is_symmetric(&self) -> bool {
        self.idx_exp.is_empty()
    }

    /// Storage for the concatenated (negated-on-update) Hessian blocks.
    pub fn allocate_hsblocks(&self) -> Vec<f64> {
        let nnz = self.rng_blocks.last().map_or(0, |r| r.end);
        vec![0.0; nnz]
    }

    /// Unit initialization of (z, s) per cone kind.
    pub fn unit_initialization(&self, z: &mut [f64], s: &mut [f64]) {
        zero_ops::unit_initialization(z, s, &self.rng_cones, &self.idx_eq);
        nonneg_ops::unit_initialization(z, s, &self.rng_cones, &self.idx_nonneg);
        soc_ops::unit_initialization(z, s, &self.rng_cones, &self.idx_soc);
        exp_ops::unit_initialization(z, s, &self.rng_cones, &self.idx_exp);
    }

    /// Identity scaling (used before the first factorization of symmetric
    /// problems).
    pub fn set_identity_scaling(&mut self) {
        nonneg_ops::set_identity_scaling(&mut self.w, &self.rng_cones, &self.idx_nonneg);
        soc_ops::set_identity_scaling(&mut self.w, &mut self.eta, &self.rng_cones, &self.idx_soc);
        for (k, _) in self.idx_exp.iter().enumerate() {
            let hs = &mut self.exp_hs[9 * k..9 * k + 9];
            hs.fill(0.0);
            hs[0] = 1.0;
            hs[4] = 1.0;
            hs[8] = 1.0;
        }
    }

    /// Minimum margin and clamped positive-margin sum over the symmetric
    /// cones.
    pub fn margins(&self, z: &[f64]) -> (f64, f64) {
        let (mut min_margin, mut pos_sum) =
            nonneg_ops::margins(z, &self.rng_cones, &self.idx_nonneg);
        let (soc_min, soc_sum) = soc_ops::margins(z, &self.rng_cones, &self.idx_soc);
        min_margin = min_margin.min(soc_min);
        pos_sum += soc_sum;
        (min_margin, pos_sum)
    }

    /// Push a vector into the cone interior. Zero-cone slacks are pinned to
    /// zero; zero-cone duals are free.
    pub fn shift_to_cone(&self, v: &mut [f64], pd: PrimalOrDualCone) {
        if pd == PrimalOrDualCone::Primal {
            zero_ops::scaled_unit_shift(v, &self.rng_cones, &self.idx_eq);
        }

        let (min_margin, _) = self.margins(v);
        if min_margin < f64::EPSILON {
            let shift = 1.0 - min_margin;
            nonneg_ops::scaled_unit_shift(v, shift, &self.rng_cones, &self.idx_nonneg);
            soc_ops::scaled_unit_shift(v, shift, &self.rng_cones, &self.idx_soc);
        }
    }

    /// Update all cone scalings from the current (s, z). Returns false if
    /// any iterate left its cone interior.
    pub fn update_scaling(
        &mut self,
        s: &[f64],
        z: &[f64],
        mu: f64,
        strategy: ScalingStrategy,
    ) -> bool {
        if !nonneg_ops::update_scaling(
            s,
            z,
            &mut self.w,
            &mut self.lambda,
            &self.rng_cones,
            &self.idx_nonneg,
        ) {
            return false;
        }
        if !soc_ops::update_scaling(
            s,
            z,
            &mut self.w,
            &mut self.lambda,
            &mut self.eta,
            &self.rng_cones,
            &self.idx_soc,
        ) {
            return false;
        }
        exp_ops::update_scaling(
            s,
            z,
            &mut self.exp_grad,
            &mut self.exp_h_dual,
            &mut self.exp_hs,
            mu,
            strategy,
            &self.rng_cones,
            &self.idx_exp,
        )
    }

    /// Write the (positive) scaled Hessian blocks into `hsblocks`.
    pub fn get_hs(&self, hsblocks: &mut [f64]) {
        zero_ops::get_hs(hsblocks, &self.rng_blocks, &self.idx_eq);
        nonneg_ops::get_hs(
            hsblocks,
            &self.w,
            &self.rng_cones,
            &self.rng_blocks,
            &self.idx_nonneg,
        );
        soc_ops::get_hs(
            hsblocks,
            &self.w,
            &self.eta,
            &self.rng_cones,
            &self.rng_blocks,
            &self.idx_soc,
        );
        exp_ops::get_hs(hsblocks, &self.exp_hs, &self.rng_blocks, &self.idx_exp);
    }

    /// y = Hs x.
    pub fn mul_hs(&self, y: &mut [f64], x: &[f64]) {
        zero_ops::mul_hs(y, &self.rng_cones, &self.idx_eq);
        nonneg_ops::mul_hs(y, x, &self.w, &self.rng_cones, &self.idx_nonneg);
        soc_ops::mul_hs(y, x, &self.w, &self.eta, &self.rng_cones, &self.idx_soc);
        exp_ops::mul_hs(y, x, &self.exp_hs, &self.rng_cones, &self.idx_exp);
    }

    /// Affine right-hand-side term: λ∘λ for symmetric cones, s for
    /// exponential cones, zero for equalities.
    pub fn affine_ds(&self, ds: &mut [f64], s: &[f64]) {
        zero_ops::affine_ds(ds, &self.rng_cones, &self.idx_eq);
        nonneg_ops::affine_ds(ds, &self.lambda, &self.rng_cones, &self.idx_nonneg);
        soc_ops::affine_ds(ds, &self.lambda, &self.rng_cones, &self.idx_soc);
        exp_ops::affine_ds(ds, s, &self.rng_cones, &self.idx_exp);
    }

    /// Mehrotra correction shift for the combined step. Overwrites
    /// `step_z`/`step_s` (the affine step) with their scaled rotations for
    /// the SOC blocks.
    pub fn combined_ds_shift(
        &self,
        shift: &mut [f64],
        step_z: &mut [f64],
        step_s: &mut [f64],
        z: &[f64],
        sigma_mu: f64,
    ) {
        zero_ops::combined_ds_shift(shift, &self.rng_cones, &self.idx_eq);
        nonneg_ops::combined_ds_shift(
            shift,
            step_z,
            step_s,
            sigma_mu,
            &self.rng_cones,
            &self.idx_nonneg,
        );
        soc_ops::combined_ds_shift(
            shift,
            step_z,
            step_s,
            &self.w,
            &self.eta,
            sigma_mu,
            &self.rng_cones,
            &self.idx_soc,
        );
        exp_ops::combined_ds_shift(
            shift,
            step_z,
            step_s,
            z,
            &self.exp_grad,
            &self.exp_h_dual,
            sigma_mu,
            &self.rng_cones,
            &self.idx_exp,
        );
    }

    /// Constant term c in the step equation HₛΔz + Δs = −c.
    pub fn ds_from_dz_offset(&self, out: &mut [f64], ds: &[f64], z: &[f64]) {
        zero_ops::ds_from_dz_offset(out, &self.rng_cones, &self.idx_eq);
        nonneg_ops::ds_from_dz_offset(out, ds, z, &self.rng_cones, &self.idx_nonneg);
        soc_ops::ds_from_dz_offset(
            out,
            ds,
            z,
            &self.w,
            &self.lambda,
            &self.eta,
            &self.rng_cones,
            &self.idx_soc,
        );
        exp_ops::ds_from_dz_offset(out, ds, &self.rng_cones, &self.idx_exp);
    }

    /// Largest step keeping (z + αdz, s + αds) inside the cone pair,
    /// capped at `alpha_max`.
    pub fn step_length(
        &self,
        dz: &[f64],
        ds: &[f64],
        z: &[f64],
        s: &[f64],
        settings: &SolverSettings,
        alpha_max: f64,
    ) -> f64 {
        let mut alpha = nonneg_ops::step_length(
            dz,
            ds,
            z,
            s,
            alpha_max,
            &self.rng_cones,
            &self.idx_nonneg,
        );
        alpha = soc_ops::step_length(dz, ds, z, s, alpha, &self.rng_cones, &self.idx_soc);
        alpha = exp_ops::step_length(
            dz,
            ds,
            z,
            s,
            alpha,
            settings.backtrack_min_step,
            settings.linesearch_backtrack_step,
            &self.rng_cones,
            &self.idx_exp,
        );
        alpha
    }

    /// Total cone barrier at the shifted iterates; +∞ when infeasible.
    pub fn compute_barrier(
        &self,
        z: &[f64],
        s: &[f64],
        dz: &[f64],
        ds: &[f64],
        alpha: f64,
    ) -> f64 {
        let mut barrier = nonneg_ops::compute_barrier(
            z,
            s,
            dz,
            ds,
            alpha,
            &self.rng_cones,
            &self.idx_nonneg,
        );
        barrier += soc_ops::compute_barrier(z, s, dz, ds, alpha, &self.rng_cones, &self.idx_soc);
        barrier += exp_ops::compute_barrier(z, s, dz, ds, alpha, &self.rng_cones, &self.idx_exp);
        barrier
    }
}

/// Hessian-block storage size per cone kind: d for diagonal blocks, d·d
/// for the dense SOC block, 9 for Exp3.
pub(crate) fn hs_block_size(cone: &ConeSpec) -> usize {
    match cone {
        ConeSpec::Zero { dim } | ConeSpec::NonNeg { dim } => *dim,
        ConeSpec::Soc { dim } => dim * dim,
        ConeSpec::Exp3 => 9,
    }
}

/// Does the cone contribute a diagonal (rather than dense) Hessian block?
pub(crate) fn hs_is_diagonal(cone: &ConeSpec) -> bool {
    matches!(cone, ConeSpec::Zero { .. } | ConeSpec::NonNeg { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_cones() -> CompositeCone {
        CompositeCone::new(&[
            ConeSpec::Zero { dim: 2 },
            ConeSpec::NonNeg { dim: 3 },
            ConeSpec::Soc { dim: 3 },
            ConeSpec::Exp3,
        ])
    }

    #[test]
    fn test_ranges_tile_contiguously() {
        let cones = mixed_cones();
        assert_eq!(cones.numel(), 11);
        assert_eq!(cones.degree(), 0 + 3 + 2 + 3);

        let mut expected = 0;
        for rng in &cones.rng_cones {
            assert_eq!(rng.start, expected);
            expected = rng.end;
        }
        assert_eq!(expected, 11);

        // block sizes: 2 diag, 3 diag, 9 dense, 9 exp
        assert_eq!(cones.rng_blocks[0].len(), 2);
        assert_eq!(cones.rng_blocks[1].len(), 3);
        assert_eq!(cones.rng_blocks[2].len(), 9);
        assert_eq!(cones.rng_blocks[3].len(), 9);
        assert_eq!(cones.allocate_hsblocks().len(), 23);
    }

    #[test]
    fn test_index_arrays() {
        let cones = mixed_cones();
        assert_eq!(cones.idx_eq, vec![0]);
        assert_eq!(cones.idx_nonneg, vec![1]);
        assert_eq!(cones.idx_soc, vec![2]);
        assert_eq!(cones.idx_exp, vec![3]);
        assert!(!cones.is_symmetric());
    }

    #[test]
    fn test_unit_initialization_is_interior() {
        let cones = mixed_cones();
        let m = cones.numel();
        let mut z = vec![-1.0; m];
        let mut s = vec![-1.0; m];
        cones.unit_initialization(&mut z, &mut s);

        // zero cone slices zeroed
        assert_eq!(&s[0..2], &[0.0, 0.0]);
        // nonneg at ones
        assert_eq!(&s[2..5], &[1.0, 1.0, 1.0]);
        // soc at e1
        assert_eq!(&s[5..8], &[1.0, 0.0, 0.0]);
        // exp at the central ray
        assert!(s[9] > 0.0 && s[10] > 0.0 && s[8] < 0.0);
        assert_eq!(&z[8..11], &s[8..11]);
    }

    #[test]
    fn test_update_scaling_and_hs_roundtrip() {
        let mut cones = CompositeCone::new(&[
            ConeSpec::NonNeg { dim: 2 },
            ConeSpec::Soc { dim: 3 },
        ]);
        let s = vec![1.0, 2.0, 2.0, 0.5, -0.3];
        let z = vec![2.0, 1.0, 1.5, -0.2, 0.4];
        assert!(cones.update_scaling(&s, &z, 1.0, ScalingStrategy::Dual));

        let mut hsblocks = cones.allocate_hsblocks();
        cones.get_hs(&mut hsblocks);

        // mul_hs agrees with the assembled blocks
        let x = vec![0.7, -0.4, 0.3, 0.2, 0.1];
        let mut y = vec![0.0; 5];
        cones.mul_hs(&mut y, &x);

        // nonneg diag block
        assert!((y[0] - hsblocks[0] * x[0]).abs() < 1e-12);
        assert!((y[1] - hsblocks[1] * x[1]).abs() < 1e-12);

        // soc dense block (column-major)
        for r in 0..3 {
            let mut acc = 0.0;
            for c in 0..3 {
                acc += hsblocks[2 + c * 3 + r] * x[2 + c];
            }
            assert!((y[2 + r] - acc).abs() < 1e-12);
        }
    }

    #[test]
    fn test_shift_to_cone() {
        let cones = CompositeCone::new(&[ConeSpec::Zero { dim: 1 }, ConeSpec::NonNeg { dim: 2 }]);
        let mut s = vec![5.0, -2.0, 3.0];
        cones.shift_to_cone(&mut s, PrimalOrDualCone::Primal);
        assert_eq!(s[0], 0.0);
        assert!(s[1] > 0.0 && s[2] > 0.0);

        let mut z = vec![5.0, 1.0, 3.0];
        cones.shift_to_cone(&mut z, PrimalOrDualCone::Dual);
        // dual zero-cone entries are free, positives untouched
        assert_eq!(z, vec![5.0, 1.0, 3.0]);
    }
}
