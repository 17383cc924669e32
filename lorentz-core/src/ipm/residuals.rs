//! Residuals of the homogeneous self-dual embedding.

use crate::ipm::variables::Variables;
use crate::linalg::{dot, sparse};
use crate::problem::ProblemData;

pub struct Residuals {
    /// rx = −Aᵀz − Px − qτ.
    pub rx: Vec<f64>,
    /// rz = Ax + s − bτ.
    pub rz: Vec<f64>,
    /// rτ = qᵀx + bᵀz + κ + xᵀPx/τ.
    pub rtau: f64,

    /// Infeasibility parts: rx_inf = −Aᵀz, rz_inf = Ax + s.
    pub rx_inf: Vec<f64>,
    pub rz_inf: Vec<f64>,

    /// P x, kept for the dual infeasibility certificate.
    pub px: Vec<f64>,

    /// Cached products.
    pub dot_qx: f64,
    pub dot_bz: f64,
    pub dot_sz: f64,
    pub dot_xpx: f64,
}

impl Residuals {
    pub fn new(n: usize, m: usize) -> Self {
        Self {
            rx: vec![0.0; n],
            rz: vec![0.0; m],
            rtau: 0.0,
            rx_inf: vec![0.0; n],
            rz_inf: vec![0.0; m],
            px: vec![0.0; n],
            dot_qx: 0.0,
            dot_bz: 0.0,
            dot_sz: 0.0,
            dot_xpx: 0.0,
        }
    }

    pub fn update(&mut self, variables: &Variables, data: &ProblemData) {
        let tau = variables.tau;

        // infeasibility parts first, so the certificates can reuse them
        sparse::spmv_transpose(&data.A, &variables.z, &mut self.rx_inf, -1.0, 0.0);
        sparse::spmv(&data.A, &variables.x, &mut self.rz_inf, 1.0, 0.0);
        for (r, &si) in self.rz_inf.iter_mut().zip(&variables.s) {
            *r += si;
        }

        match &data.P {
            Some(p) => sparse::symm_spmv_triu(p, &variables.x, &mut self.px),
            None => self.px.fill(0.0),
        }

        self.dot_qx = dot(&data.q, &variables.x);
        self.dot_bz = dot(&data.b, &variables.z);
        self.dot_sz = dot(&variables.s, &variables.z);
        self.dot_xpx = dot(&variables.x, &self.px);

        for i in 0..self.rx.len() {
            self.rx[i] = self.rx_inf[i] - self.px[i] - data.q[i] * tau;
        }
        for i in 0..self.rz.len() {
            self.rz[i] = self.rz_inf[i] - data.b[i] * tau;
        }
        self.rtau = self.dot_qx + self.dot_bz + variables.kappa + self.dot_xpx / tau;
    }
}
