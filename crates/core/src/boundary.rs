//! Boundary enforcement for extrapolated simplex vertices.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::config::BoundaryPolicy;

const PERIODIC_MAX_ITERS: u32 = 100;
const REFLECTIVE_MAX_ITERS: u32 = 1000;

/// Applies `policy` to every coordinate of `params` that falls outside
/// `[lower[i], upper[i]]`, in place.
///
/// `Periodic` and `Reflective` fold the coordinate back in with a bounded
/// number of iterations; if the cap is exceeded the last computed value is
/// kept even if it is still out of bounds. This is a known quirk of the
/// original algorithm, preserved here rather than "fixed".
pub fn apply(
    params: &mut [f64],
    lower: &[f64],
    upper: &[f64],
    policy: BoundaryPolicy,
    rng: &mut ChaCha8Rng,
) {
    for i in 0..params.len() {
        let (lo, hi) = (lower[i], upper[i]);
        if params[i] >= lo && params[i] <= hi {
            continue;
        }
        params[i] = match policy {
            BoundaryPolicy::Sticky => params[i].clamp(lo, hi),
            BoundaryPolicy::Random => rng.random_range(lo..=hi),
            BoundaryPolicy::Periodic => fold_periodic(params[i], lo, hi),
            BoundaryPolicy::Reflective => fold_reflective(params[i], lo, hi),
        };
    }
}

fn fold_periodic(mut x: f64, lo: f64, hi: f64) -> f64 {
    let span = hi - lo;
    for _ in 0..PERIODIC_MAX_ITERS {
        if x >= lo && x <= hi {
            break;
        }
        if x > hi {
            x -= span;
        } else {
            x += span;
        }
    }
    x
}

fn fold_reflective(mut x: f64, lo: f64, hi: f64) -> f64 {
    for _ in 0..REFLECTIVE_MAX_ITERS {
        if x >= lo && x <= hi {
            break;
        }
        if x > hi {
            x = 2.0 * hi - x;
        } else {
            x = 2.0 * lo - x;
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::get_rng;

    #[test]
    fn sticky_clamps_to_violated_bound() {
        let mut p = vec![1.5, -3.0];
        apply(&mut p, &[0.0, 0.0], &[1.0, 1.0], BoundaryPolicy::Sticky, &mut get_rng(0));
        assert_eq!(p, vec![1.0, 0.0]);
    }

    #[test]
    fn random_resamples_within_bounds() {
        let mut rng = get_rng(1);
        for _ in 0..50 {
            let mut p = vec![5.0];
            apply(&mut p, &[0.0], &[1.0], BoundaryPolicy::Random, &mut rng);
            assert!((0.0..=1.0).contains(&p[0]));
        }
    }

    #[test]
    fn periodic_wraps_within_bounds() {
        let mut p = vec![2.3];
        apply(&mut p, &[0.0], &[1.0], BoundaryPolicy::Periodic, &mut get_rng(0));
        assert!((0.0..=1.0).contains(&p[0]));
    }

    #[test]
    fn reflective_folds_within_bounds() {
        let mut p = vec![-0.7];
        apply(&mut p, &[0.0], &[1.0], BoundaryPolicy::Reflective, &mut get_rng(0));
        assert!((0.0..=1.0).contains(&p[0]));
    }

    #[test]
    fn in_bounds_values_are_left_untouched() {
        let mut p = vec![0.5];
        apply(&mut p, &[0.0], &[1.0], BoundaryPolicy::Sticky, &mut get_rng(0));
        assert_eq!(p[0], 0.5);
    }
}
