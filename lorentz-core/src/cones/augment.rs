//! Reduction of large second-order cones into chains of small ones.
//!
//! A direct LDL^T becomes inefficient for a single large SOC because its
//! Nesterov-Todd Hessian is a dense block. Each SOC of dimension
//! d > size_soc is split into a chain of cones of at most `size_soc`
//! entries, linked by auxiliary scalars: per link, one auxiliary variable
//! appears (with value −1 in A) in two adjacent rows, closing one cone and
//! opening the next. The rewritten problem has `extra_dim` extra columns
//! and `2·extra_dim` extra rows.

use crate::linalg::sparse::SparseTriMat;
use crate::problem::{ConeSpec, ProblemData};

/// Bookkeeping for mapping augmented results back to the original geometry.
#[derive(Debug, Clone)]
pub struct SocAugmentation {
    /// Original row index → augmented row index.
    pub row_map: Vec<usize>,
    /// Number of auxiliary variables appended to x.
    pub extra_dim: usize,
    /// Original variable count.
    pub orig_n: usize,
    /// Original constraint count.
    pub orig_m: usize,
}

/// Chain sizing for one oversized cone: the number of cones in the chain
/// and the dimension of the tail cone.
///
/// The chain consumes the d original coordinates as
/// `1 + (num_soc − 1)·(size_soc − 2) + (last_size − 1)` and has total
/// length `d + 2·(num_soc − 1)`.
pub fn count_soc(dim: usize, size_soc: usize) -> (usize, usize) {
    assert!(dim > size_soc);

    let mut numel = dim;
    let mut num_socs = 1;
    numel -= size_soc - 1;

    while numel > size_soc - 2 {
        numel -= size_soc - 2;
        num_socs += 1;
    }
    num_socs += 1;

    (num_socs, numel + 1)
}

/// Rewrite (P, q, A, b, cones), chaining every SOC larger than `size_soc`.
/// Returns `None` when no cone needs reduction.
pub fn expand_soc_cones(
    prob: &ProblemData,
    size_soc: usize,
) -> Option<(ProblemData, SocAugmentation)> {
    assert!(size_soc >= 3, "soc reduction size must be at least 3");

    let needs_reduction = prob
        .cones
        .iter()
        .any(|c| matches!(c, ConeSpec::Soc { dim } if *dim > size_soc));
    if !needs_reduction {
        return None;
    }

    let n = prob.num_vars();
    let m = prob.num_constraints();

    // chain sizing per cone, and the totals
    let mut extra_dim = 0;
    for cone in &prob.cones {
        if let ConeSpec::Soc { dim } = cone {
            if *dim > size_soc {
                let (num_soc, _) = count_soc(*dim, size_soc);
                extra_dim += num_soc - 1;
            }
        }
    }

    let new_n = n + extra_dim;
    let new_m = m + 2 * extra_dim;

    // lay out the augmented rows: original rows interleaved with the two
    // rows of each chain link
    let mut row_map = vec![0usize; m];
    let mut aux_rows = Vec::with_capacity(extra_dim); // (row_a, row_b) per aux var
    let mut cones_new = Vec::new();

    let mut orig_row = 0;
    let mut new_row = 0;
    for cone in &prob.cones {
        match cone {
            ConeSpec::Soc { dim } if *dim > size_soc => {
                let (num_soc, last_size) = count_soc(*dim, size_soc);
                let reduce_soc = size_soc - 2;

                // cone head
                row_map[orig_row] = new_row;
                orig_row += 1;
                new_row += 1;

                for block in 1..=num_soc {
                    if block == num_soc {
                        for _ in 0..(last_size - 1) {
                            row_map[orig_row] = new_row;
                            orig_row += 1;
                            new_row += 1;
                        }
                        cones_new.push(ConeSpec::Soc { dim: last_size });
                    } else {
                        for _ in 0..reduce_soc {
                            row_map[orig_row] = new_row;
                            orig_row += 1;
                            new_row += 1;
                        }
                        // link rows: close this cone, open the next
                        aux_rows.push((new_row, new_row + 1));
                        new_row += 2;
                        cones_new.push(ConeSpec::Soc { dim: size_soc });
                    }
                }
            }
            other => {
                for _ in 0..other.dim() {
                    row_map[orig_row] = new_row;
                    orig_row += 1;
                    new_row += 1;
                }
                cones_new.push(*other);
            }
        }
    }
    debug_assert_eq!(orig_row, m);
    debug_assert_eq!(new_row, new_m);

    // rewrite A with remapped rows and the auxiliary -1 entries
    let mut tri = SparseTriMat::new((new_m, new_n));
    for (val, (row, col)) in prob.A.iter() {
        tri.add_triplet(row_map[row], col, *val);
    }
    for (k, &(row_a, row_b)) in aux_rows.iter().enumerate() {
        tri.add_triplet(row_a, n + k, -1.0);
        tri.add_triplet(row_b, n + k, -1.0);
    }
    let a_new = tri.to_csc();

    let mut b_new = vec![0.0; new_m];
    for (row, &bi) in prob.b.iter().enumerate() {
        b_new[row_map[row]] = bi;
    }

    // P gains zero rows/columns for the auxiliary variables
    let p_new = prob.P.as_ref().map(|p| {
        let mut tri = SparseTriMat::new((new_n, new_n));
        for (val, (row, col)) in p.iter() {
            tri.add_triplet(row, col, *val);
        }
        tri.to_csc()
    });

    let mut q_new = prob.q.clone();
    q_new.resize(new_n, 0.0);

    let augmented = ProblemData {
        P: p_new,
        q: q_new,
        A: a_new,
        b: b_new,
        cones: cones_new,
    };

    let record = SocAugmentation {
        row_map,
        extra_dim,
        orig_n: n,
        orig_m: m,
    };

    Some((augmented, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    #[test]
    fn test_count_soc_chain_sizing() {
        let (num_soc, last_size) = count_soc(30, 5);
        assert_eq!(num_soc, 10);
        assert_eq!(last_size, 3);

        // chain length d + 2(num_soc - 1), coordinates conserved
        assert_eq!((num_soc - 1) * 5 + last_size, 30 + 2 * (num_soc - 1));
        assert_eq!(1 + (num_soc - 1) * 3 + (last_size - 1), 30);

        let (num_soc, last_size) = count_soc(6, 5);
        assert_eq!(num_soc, 2);
        assert_eq!(last_size, 3);
    }

    fn soc30_problem() -> ProblemData {
        // s = b - x with one SOC(30) block
        let m = 30;
        let triplets: Vec<_> = (0..m).map(|i| (i, i, 1.0)).collect();
        let mut b = vec![0.0; m];
        b[0] = 10.0;
        ProblemData {
            P: None,
            q: vec![0.0; m],
            A: sparse::from_triplets(m, m, triplets),
            b,
            cones: vec![ConeSpec::Soc { dim: 30 }],
        }
    }

    #[test]
    fn test_expand_soc30() {
        let prob = soc30_problem();
        let (aug, record) = expand_soc_cones(&prob, 5).unwrap();

        assert_eq!(record.extra_dim, 9);
        assert_eq!(aug.num_vars(), 30 + 9);
        assert_eq!(aug.num_constraints(), 30 + 18);

        // nine Soc(5) then one Soc(3)
        assert_eq!(aug.cones.len(), 10);
        for cone in &aug.cones[..9] {
            assert_eq!(*cone, ConeSpec::Soc { dim: 5 });
        }
        assert_eq!(aug.cones[9], ConeSpec::Soc { dim: 3 });

        // exactly 2 * extra_dim new entries, all -1
        assert_eq!(aug.A.nnz(), prob.A.nnz() + 18);
        let mut minus_ones = 0;
        for (val, (_, col)) in aug.A.iter() {
            if col >= 30 {
                assert_eq!(*val, -1.0);
                minus_ones += 1;
            }
        }
        assert_eq!(minus_ones, 18);

        // b moves with the rows
        assert_eq!(aug.b[record.row_map[0]], 10.0);
        assert_eq!(aug.b.iter().filter(|&&v| v != 0.0).count(), 1);

        assert!(aug.validate().is_ok());
    }

    #[test]
    fn test_expand_preserves_feasibility() {
        // a feasible s of the original cone maps to a feasible chain with
        // the tail norms as auxiliary values
        let prob = soc30_problem();
        let (aug, record) = expand_soc_cones(&prob, 5).unwrap();

        // original slack: t = 10, tail = ones -> interior since 10 > sqrt(29)
        let mut s_orig = vec![1.0; 30];
        s_orig[0] = 10.0;

        // distribute over augmented rows
        let mut s_aug = vec![0.0; aug.num_constraints()];
        for (orig, &new) in record.row_map.iter().enumerate() {
            s_aug[new] = s_orig[orig];
        }
        // fill the link values back-to-front: each aux pair carries the
        // norm of everything after it in the chain
        let mut ranges = Vec::new();
        let mut offset = 0;
        for cone in &aug.cones {
            ranges.push(offset..offset + cone.dim());
            offset += cone.dim();
        }
        for k in (0..aug.cones.len() - 1).rev() {
            let next = ranges[k + 1].clone();
            let tail_norm: f64 = s_aug[next.start + 1..next.end]
                .iter()
                .map(|v| v * v)
                .sum::<f64>()
                .sqrt();
            // shared value in the closing and opening rows
            s_aug[next.start] = tail_norm;
            s_aug[ranges[k].end - 1] = tail_norm;
        }

        // every chain cone now satisfies t >= ||tail||
        for rng in &ranges {
            let t = s_aug[rng.start];
            let tail: f64 = s_aug[rng.start + 1..rng.end]
                .iter()
                .map(|v| v * v)
                .sum::<f64>()
                .sqrt();
            assert!(t >= tail - 1e-12, "chain cone violated: {} < {}", t, tail);
        }

        // head value unchanged, so the objective (which never sees the
        // auxiliaries) is unchanged
        assert_eq!(s_aug[0], 10.0);
    }

    #[test]
    fn test_small_cones_pass_through() {
        let prob = ProblemData {
            P: None,
            q: vec![0.0; 3],
            A: sparse::from_triplets(3, 3, vec![(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)]),
            b: vec![1.0, 0.0, 0.0],
            cones: vec![ConeSpec::Soc { dim: 3 }],
        };
        assert!(expand_soc_cones(&prob, 5).is_none());
    }
}
