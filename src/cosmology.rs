//! Flat wCDM background with modified gravitational-wave propagation.
//!
//! The gravitational-wave luminosity distance differs from the
//! electromagnetic one by the factor `Ξ(z) = Xi0 + (1 - Xi0) (1 + z)^-n`.
//! Distances are tabulated once per hyper-parameter vector in a
//! [`DistanceGrid`], which also provides the inverse `z(dL)`.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::math::interp;
use crate::params::{DistUnit, ParamTable};

/// Speed of light in km/s.
pub const CLIGHT_KM_S: f64 = 299_792.458;

/// Default upper redshift of the distance tables.
pub const DEFAULT_Z_MAX: f64 = 20.;

const DEFAULT_GRID_POINTS: usize = 4000;

/// Number of cosmological hyper-parameters, `H0, Om0, w0, Xi0, n`.
pub const N_COSMO_PARAMS: usize = 5;

/// Values of the cosmological hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Background {
    pub h0: f64,
    pub om0: f64,
    pub w0: f64,
    pub xi0: f64,
    pub n: f64,
}

impl Background {
    pub fn from_lambda(lambda_cosmo: &[f64]) -> Self {
        assert!(lambda_cosmo.len() == N_COSMO_PARAMS);
        Self {
            h0: lambda_cosmo[0],
            om0: lambda_cosmo[1],
            w0: lambda_cosmo[2],
            xi0: lambda_cosmo[3],
            n: lambda_cosmo[4],
        }
    }

    /// `E(z)^2 = H(z)^2 / H0^2`. May be negative for unphysical parameters.
    pub fn e2(&self, z: f64) -> f64 {
        let zp1 = 1. + z;
        self.om0 * zp1.powi(3) + (1. - self.om0) * zp1.powf(3. * (1. + self.w0))
    }

    /// `c / H0` in the requested unit.
    pub fn hubble_distance(&self, unit: DistUnit) -> f64 {
        CLIGHT_KM_S / self.h0 * unit.per_mpc()
    }

    pub fn xi(&self, z: f64) -> f64 {
        self.xi0 + (1. - self.xi0) * (1. + z).powf(-self.n)
    }

    pub fn dxi_dz(&self, z: f64) -> f64 {
        -self.n * (1. - self.xi0) * (1. + z).powf(-self.n - 1.)
    }

    /// Comoving distance by composite Simpson integration. Slow, used to
    /// validate the tabulated version.
    pub fn comoving_distance(&self, z: f64, unit: DistUnit) -> f64 {
        const INTERVALS: usize = 2048;
        if z == 0. {
            return 0.;
        }
        let h = z / INTERVALS as f64;
        let f = |x: f64| 1. / self.e2(x).sqrt();
        let mut acc = f(0.) + f(z);
        for i in 1..INTERVALS {
            let w = if i % 2 == 1 { 4. } else { 2. };
            acc += w * f(h * i as f64);
        }
        self.hubble_distance(unit) * acc * h / 3.
    }
}

/// Cosmology component of the population registry.
#[derive(Debug, Clone)]
pub struct FlrwCosmology {
    table: ParamTable,
    unit: DistUnit,
    z_max: f64,
    grid_points: usize,
}

impl FlrwCosmology {
    pub fn new(unit: DistUnit) -> Self {
        let table = ParamTable::new()
            .with("H0", 67.74, r"$H_0$")
            .with("Om0", 0.3075, r"$\Omega_{\rm {m,0}}$")
            .with("w0", -1., r"$w_{0}$")
            .with("Xi0", 1., r"$\Xi_0$")
            .with("n", 1.91, r"$n$");
        Self {
            table,
            unit,
            z_max: DEFAULT_Z_MAX,
            grid_points: DEFAULT_GRID_POINTS,
        }
    }

    pub fn with_grid(mut self, z_max: f64, grid_points: usize) -> Self {
        assert!(z_max > 0.);
        assert!(grid_points >= 16);
        self.z_max = z_max;
        self.grid_points = grid_points;
        self
    }

    pub fn params(&self) -> &ParamTable {
        &self.table
    }

    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, f64>) -> usize {
        self.table.apply_overrides(overrides)
    }

    pub fn unit(&self) -> DistUnit {
        self.unit
    }

    pub fn z_max(&self) -> f64 {
        self.z_max
    }

    /// Tabulate the distances for one set of cosmological parameters.
    pub fn grid(&self, lambda_cosmo: &[f64]) -> DistanceGrid {
        self.grid_to(lambda_cosmo, self.z_max)
    }

    pub fn grid_to(&self, lambda_cosmo: &[f64], z_max: f64) -> DistanceGrid {
        DistanceGrid::new(
            Background::from_lambda(lambda_cosmo),
            self.unit,
            z_max,
            self.grid_points,
        )
    }
}

/// Distances tabulated on a redshift grid that is denser at low redshift.
#[derive(Debug, Clone)]
pub struct DistanceGrid {
    background: Background,
    d_h: f64,
    z: Vec<f64>,
    d_c: Vec<f64>,
    dl_gw: Vec<f64>,
    monotonic: bool,
}

impl DistanceGrid {
    pub fn new(background: Background, unit: DistUnit, z_max: f64, points: usize) -> Self {
        let d_h = background.hubble_distance(unit);
        let last = (points - 1) as f64;
        let z: Vec<f64> = (0..points)
            .map(|i| {
                let t = i as f64 / last;
                z_max * t * t
            })
            .collect();

        let inv_e: Vec<f64> = z.iter().map(|&z| 1. / background.e2(z).sqrt()).collect();
        let mut d_c = Vec::with_capacity(points);
        let mut acc = 0f64;
        d_c.push(0.);
        for (zs, fs) in z.windows(2).zip(inv_e.windows(2)) {
            acc += 0.5 * (zs[1] - zs[0]) * (fs[0] + fs[1]);
            d_c.push(d_h * acc);
        }

        let dl_gw: Vec<f64> = z
            .iter()
            .zip(d_c.iter())
            .map(|(&z, &dc)| (1. + z) * dc * background.xi(z))
            .collect();
        let monotonic = dl_gw.windows(2).all(|w| w[1] > w[0]);

        Self {
            background,
            d_h,
            z,
            d_c,
            dl_gw,
            monotonic,
        }
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn z_max(&self) -> f64 {
        self.z[self.z.len() - 1]
    }

    /// Whether `dL_GW(z)` is strictly increasing on the grid, so that it can
    /// be inverted.
    pub fn is_invertible(&self) -> bool {
        self.monotonic
    }

    pub fn comoving_distance(&self, z: f64) -> f64 {
        interp(z, &self.z, &self.d_c, f64::NAN, f64::NAN)
    }

    pub fn dl_em(&self, z: f64) -> f64 {
        (1. + z) * self.comoving_distance(z)
    }

    pub fn dl_gw(&self, z: f64) -> f64 {
        self.dl_em(z) * self.background.xi(z)
    }

    /// Redshift of a gravitational-wave luminosity distance. NaN outside of
    /// the tabulated range or if the distance relation is not invertible.
    pub fn z_at_dl(&self, dl: f64) -> f64 {
        if !self.monotonic || !(dl >= 0.) {
            return f64::NAN;
        }
        interp(dl, &self.dl_gw, &self.z, f64::NAN, f64::NAN)
    }

    /// `log dV_c/dz` for the full sky. `-inf` at `z = 0`.
    pub fn log_dv_dz(&self, z: f64) -> f64 {
        let d_c = self.comoving_distance(z);
        (4. * PI * self.d_h).ln() + 2. * d_c.ln() - 0.5 * self.background.e2(z).ln()
    }

    /// `log d(dL_GW)/dz`.
    pub fn log_ddl_dz(&self, z: f64) -> f64 {
        let bg = &self.background;
        let d_c = self.comoving_distance(z);
        let ddl_em = d_c + (1. + z) * self.d_h / bg.e2(z).sqrt();
        let ddl_gw = ddl_em * bg.xi(z) + (1. + z) * d_c * bg.dxi_dz(z);
        ddl_gw.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn fiducial() -> Vec<f64> {
        FlrwCosmology::new(DistUnit::Gpc).params().values().to_vec()
    }

    #[test]
    fn einstein_de_sitter_distance() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let grid = cosmo.grid(&[70., 1., -1., 1., 1.91]);
        let d_h = CLIGHT_KM_S / 70. / 1000.;
        for z in [0.01, 0.5, 1., 3., 10.] {
            let expected = 2. * d_h * (1. - 1. / (1f64 + z).sqrt());
            assert_relative_eq!(grid.comoving_distance(z), expected, max_relative = 1e-5);
        }
    }

    #[test]
    fn fiducial_luminosity_distance() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let lambda = fiducial();
        let grid = cosmo.grid(&lambda);
        let dl = grid.dl_gw(1.);
        assert!(dl > 6.6 && dl < 6.85, "dL(z=1) = {dl}");
        let reference = (1. + 1.) * grid.background().comoving_distance(1., DistUnit::Gpc);
        assert_relative_eq!(dl, reference, max_relative = 1e-5);

        let grid_mpc = FlrwCosmology::new(DistUnit::Mpc).grid(&lambda);
        assert_relative_eq!(grid_mpc.dl_gw(1.), 1000. * dl, max_relative = 1e-12);
    }

    #[test]
    fn modified_propagation() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let mut lambda = fiducial();
        lambda[3] = 1.8;
        let grid = cosmo.grid(&lambda);
        let z = 2.;
        let xi = 1.8 + (1. - 1.8) * 3f64.powf(-1.91);
        assert_relative_eq!(grid.dl_gw(z), grid.dl_em(z) * xi, max_relative = 1e-12);
    }

    #[test]
    fn dl_derivative_matches_finite_difference() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let mut lambda = fiducial();
        lambda[3] = 0.6;
        let grid = cosmo.grid(&lambda);
        let bg = *grid.background();
        for z in [0.2, 1., 4.] {
            let h = 1e-4;
            let up = (1. + z + h) * bg.comoving_distance(z + h, DistUnit::Gpc) * bg.xi(z + h);
            let down = (1. + z - h) * bg.comoving_distance(z - h, DistUnit::Gpc) * bg.xi(z - h);
            let numeric = (up - down) / (2. * h);
            assert_relative_eq!(grid.log_ddl_dz(z).exp(), numeric, max_relative = 1e-4);
        }
    }

    #[test]
    fn volume_element_edges() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let grid = cosmo.grid(&fiducial());
        assert_eq!(grid.log_dv_dz(0.), f64::NEG_INFINITY);
        assert!(grid.log_dv_dz(0.5).is_finite());
        assert!(grid.log_dv_dz(DEFAULT_Z_MAX + 1.).is_nan());
    }

    #[test]
    fn inverse_out_of_range() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let grid = cosmo.grid(&fiducial());
        assert!(grid.z_at_dl(1e6).is_nan());
        assert!(grid.z_at_dl(-1.).is_nan());
        assert!(grid.z_at_dl(f64::NAN).is_nan());
        assert_eq!(grid.z_at_dl(0.), 0.);
    }

    #[test]
    fn unphysical_parameters_do_not_panic() {
        let cosmo = FlrwCosmology::new(DistUnit::Gpc);
        let grid = cosmo.grid(&[67.74, 1.5, -0.1, 1., 1.91]);
        let _ = grid.z_at_dl(3.);
        let _ = grid.log_dv_dz(5.);
        let _ = grid.log_ddl_dz(5.);
    }

    proptest! {
        #[test]
        fn inversion_round_trip(
            z in 0.001f64..15.,
            h0 in 20f64..140.,
            om0 in 0.05f64..1.,
            xi0 in 0.5f64..3.,
        ) {
            let cosmo = FlrwCosmology::new(DistUnit::Gpc);
            let grid = cosmo.grid(&[h0, om0, -1., xi0, 1.91]);
            prop_assume!(grid.is_invertible());
            let back = grid.z_at_dl(grid.dl_gw(z));
            prop_assert!((back - z).abs() < 1e-4 * (1. + z));
        }
    }
}
