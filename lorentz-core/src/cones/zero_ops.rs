//! Zero-cone (equality constraint) primitives.
//!
//! Every primitive zeroes its output slice; equality rows carry no barrier
//! and no scaling. Each function iterates the equality-cone ordinals from
//! the composite index arrays.

use std::ops::Range;

pub(crate) fn unit_initialization(
    z: &mut [f64],
    s: &mut [f64],
    rng_cones: &[Range<usize>],
    idx_eq: &[usize],
) {
    for &i in idx_eq {
        let rng = rng_cones[i].clone();
        z[rng.clone()].fill(0.0);
        s[rng].fill(0.0);
    }
}

pub(crate) fn scaled_unit_shift(z: &mut [f64], rng_cones: &[Range<usize>], idx_eq: &[usize]) {
    for &i in idx_eq {
        z[rng_cones[i].clone()].fill(0.0);
    }
}

pub(crate) fn get_hs(
    hsblocks: &mut [f64],
    rng_blocks: &[Range<usize>],
    idx_eq: &[usize],
) {
    for &i in idx_eq {
        hsblocks[rng_blocks[i].clone()].fill(0.0);
    }
}

pub(crate) fn mul_hs(y: &mut [f64], rng_cones: &[Range<usize>], idx_eq: &[usize]) {
    for &i in idx_eq {
        y[rng_cones[i].clone()].fill(0.0);
    }
}

pub(crate) fn affine_ds(ds: &mut [f64], rng_cones: &[Range<usize>], idx_eq: &[usize]) {
    for &i in idx_eq {
        ds[rng_cones[i].clone()].fill(0.0);
    }
}

pub(crate) fn combined_ds_shift(
    shift: &mut [f64],
    rng_cones: &[Range<usize>],
    idx_eq: &[usize],
) {
    for &i in idx_eq {
        shift[rng_cones[i].clone()].fill(0.0);
    }
}

pub(crate) fn ds_from_dz_offset(out: &mut [f64], rng_cones: &[Range<usize>], idx_eq: &[usize]) {
    for &i in idx_eq {
        out[rng_cones[i].clone()].fill(0.0);
    }
}
