use itertools::izip;
use multiversion::multiversion;
use statrs::function::erf::erfc;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

/// First and second moments of `exp(values)`, scaled by `exp(-max)`.
///
/// Returns `(max, Σ exp(v - max), Σ exp(2 (v - max)))`. The scaling keeps the
/// sums representable for log-weights far from zero. If every value is
/// `-inf` the sums are zero and `max` is `-inf`.
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn weight_moments(values: &[f64]) -> (f64, f64, f64) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return (max, 0., 0.);
    }

    let (s1, s2) = values.iter().fold((0f64, 0f64), |(s1, s2), &v| {
        let w = (v - max).exp();
        (s1 + w, s2 + w * w)
    });
    (max, s1, s2)
}

/// `log Σ exp(values)`, `-inf` for an empty slice or all `-inf` values.
pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    let (max, s1, _) = weight_moments(values);
    if !max.is_finite() {
        return max;
    }
    max + s1.ln()
}

/// Linear interpolation with `numpy.interp` semantics.
///
/// `xp` must be non-decreasing. Values outside of `[xp[0], xp[n-1]]` map to
/// `left` and `right`.
pub(crate) fn interp(x: f64, xp: &[f64], fp: &[f64], left: f64, right: f64) -> f64 {
    assert!(xp.len() == fp.len());
    assert!(!xp.is_empty());
    let n = xp.len();
    if x.is_nan() {
        return f64::NAN;
    }
    if x < xp[0] {
        return left;
    }
    if x > xp[n - 1] {
        return right;
    }
    let idx = xp.partition_point(|&v| v < x);
    if idx == 0 {
        return fp[0];
    }
    let (x0, x1) = (xp[idx - 1], xp[idx]);
    let (f0, f1) = (fp[idx - 1], fp[idx]);
    if x1 == x0 {
        return f1;
    }
    f0 + (x - x0) * (f1 - f0) / (x1 - x0)
}

/// Cumulative trapezoid integral of `y(x)`, starting at zero.
pub(crate) fn cumulative_trapezoid(x: &[f64], y: &[f64]) -> Vec<f64> {
    assert!(x.len() == y.len());
    let mut out = Vec::with_capacity(x.len());
    let mut acc = 0f64;
    if !x.is_empty() {
        out.push(0.);
    }
    for (xs, ys) in x.windows(2).zip(y.windows(2)) {
        acc += 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]);
        out.push(acc);
    }
    out
}

/// Trapezoid integral of `exp(log_y(x))`, returned in log space.
pub(crate) fn log_trapezoid(x: &[f64], log_y: &[f64]) -> f64 {
    assert!(x.len() == log_y.len());
    let shift = log_y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !shift.is_finite() {
        return f64::NEG_INFINITY;
    }
    let total: f64 = izip!(x.windows(2), log_y.windows(2))
        .map(|(xs, ls)| 0.5 * (xs[1] - xs[0]) * ((ls[0] - shift).exp() + (ls[1] - shift).exp()))
        .sum();
    total.ln() + shift
}

/// Logarithmically spaced points between `start` and `stop`, both included.
pub(crate) fn geomspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    assert!(num >= 2);
    assert!(start > 0. && stop > start);
    let (a, b) = (start.ln(), stop.ln());
    let step = (b - a) / (num - 1) as f64;
    let mut out: Vec<f64> = (0..num).map(|i| (a + step * i as f64).exp()).collect();
    out[0] = start;
    out[num - 1] = stop;
    out
}

/// Linearly spaced points between `start` and `stop`, both included.
pub(crate) fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    assert!(num >= 2);
    let step = (stop - start) / (num - 1) as f64;
    let mut out: Vec<f64> = (0..num).map(|i| start + step * i as f64).collect();
    out[num - 1] = stop;
    out
}

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Standard normal CDF.
#[inline]
pub(crate) fn ndtr(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Logarithm of the standard normal CDF. Underflows to `-inf` far in the
/// left tail.
#[inline]
pub(crate) fn log_ndtr(x: f64) -> f64 {
    ndtr(x).ln()
}

/// Log density of a normal distribution.
#[inline]
pub(crate) fn normal_logpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let t = (x - mu) / sigma;
    -0.5 * t * t - sigma.ln() - LN_SQRT_2PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn check_logaddexp(x in -10f64..10f64, y in -10f64..10f64) {
            let a = (x.exp() + y.exp()).ln();
            let b = logaddexp(x, y);
            let neginf = f64::NEG_INFINITY;
            let nan = f64::NAN;
            prop_assert!((a - b).abs() < 1e-10);
            prop_assert_eq!(b, logaddexp(y, x));
            prop_assert_eq!(x, logaddexp(x, neginf));
            prop_assert_eq!(logaddexp(neginf, neginf), neginf);
            prop_assert!(logaddexp(nan, x).is_nan());
        }

        #[test]
        fn check_logsumexp(values in prop::collection::vec(-50f64..50f64, 1..64)) {
            let expected = values.iter().map(|v| v.exp()).sum::<f64>().ln();
            let got = logsumexp(&values);
            prop_assert!((expected - got).abs() < 1e-9 * expected.abs().max(1.));
        }

        #[test]
        fn check_interp_bounds(x in -1f64..11f64) {
            let xp = linspace(0., 10., 11);
            let fp: Vec<f64> = xp.iter().map(|v| 2. * v).collect();
            let y = interp(x, &xp, &fp, -1., -2.);
            if x < 0. {
                prop_assert_eq!(y, -1.);
            } else if x > 10. {
                prop_assert_eq!(y, -2.);
            } else {
                prop_assert!((y - 2. * x).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn check_neginf() {
        assert_eq!(logaddexp(f64::NEG_INFINITY, 2.), 2.);
        assert_eq!(logaddexp(2., f64::NEG_INFINITY), 2.);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY; 4]), f64::NEG_INFINITY);
    }

    #[test]
    fn equal_weights_moments() {
        let (max, s1, s2) = weight_moments(&[-3.5; 1000]);
        assert_eq!(max, -3.5);
        assert_eq!(s1, 1000.);
        assert_eq!(s2, 1000.);
    }

    #[test]
    fn trapezoid_matches_analytic() {
        let x = linspace(0., 1., 1001);
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let cum = cumulative_trapezoid(&x, &y);
        assert_eq!(cum.len(), x.len());
        assert_eq!(cum[0], 0.);
        assert_relative_eq!(cum[1000], 1. / 3., epsilon = 1e-6);

        let log_y: Vec<f64> = y.iter().map(|v| v.ln()).collect();
        assert_relative_eq!(log_trapezoid(&x, &log_y).exp(), 1. / 3., epsilon = 1e-6);
    }

    #[test]
    fn normal_helpers() {
        assert_relative_eq!(ndtr(0.), 0.5, epsilon = 1e-14);
        assert_relative_eq!(ndtr(1.959963984540054), 0.975, epsilon = 1e-9);
        assert_relative_eq!(log_ndtr(0.), 0.5f64.ln(), epsilon = 1e-14);
        assert_relative_eq!(
            normal_logpdf(1., 0., 1.),
            -0.5 - LN_SQRT_2PI,
            epsilon = 1e-14
        );
    }

    #[test]
    fn spacing_endpoints() {
        let g = geomspace(0.1, 1000., 50);
        assert_relative_eq!(g[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(g[49], 1000., epsilon = 1e-9);
        let l = linspace(0., 3., 4);
        assert_eq!(l, vec![0., 1., 2., 3.]);
    }
}
