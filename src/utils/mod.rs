//! Shared numeric utilities
//!
//! Order statistics (percentile, median, MAD) used by the motion estimator,
//! ROI builder and detrending engine.

/// Linear-interpolated percentile of a sample
///
/// Matches the numpy default ('linear' interpolation between closest ranks).
/// Non-finite values are excluded before ranking.
///
/// # Arguments
/// * `data` - Input sample
/// * `p` - Percentile in [0, 100]
///
/// # Returns
/// The p-th percentile, or 0.0 for an empty sample
pub fn percentile(data: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = data.iter().cloned().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = p.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Median of a sample (even-length samples average the middle pair)
pub fn median(data: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = data.iter().cloned().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Robust noise-scale estimate from zero-centered residuals
///
/// median(|x|) scaled by 1.4826 so the estimate is consistent with the
/// standard deviation of a Gaussian sample. Insensitive to sparse outliers.
pub fn mad_sigma(residuals: &[f64]) -> f64 {
    let abs_res: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
    median(&abs_res) * 1.4826
}

/// Solve a dense linear system A x = b by Gaussian elimination
///
/// Partial pivoting; `a` is row-major n x n. Returns `None` when the system
/// is singular to working precision.
pub(crate) fn solve_linear_system(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);

    let mut m = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        // Pivot on the largest remaining entry in this column
        let mut pivot_row = col;
        let mut pivot_val = m[col * n + col].abs();
        for row in (col + 1)..n {
            let v = m[row * n + col].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val < 1e-14 {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                m.swap(col * n + j, pivot_row * n + j);
            }
            rhs.swap(col, pivot_row);
        }

        for row in (col + 1)..n {
            let factor = m[row * n + col] / m[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                m[row * n + j] -= factor * m[col * n + j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = rhs[row];
        for j in (row + 1)..n {
            sum -= m[row * n + j] * x[j];
        }
        x[row] = sum / m[row * n + row];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_endpoints() {
        let data = vec![3.0, 1.0, 2.0, 5.0, 4.0];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 5.0);
        assert_eq!(percentile(&data, 50.0), 3.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        // 0..=9: the 99th percentile interpolates between 8 and 9
        let data: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let p99 = percentile(&data, 99.0);
        assert!((p99 - 8.91).abs() < 1e-12, "p99 = {}", p99);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_median_even_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_mad_sigma_gaussian_consistency() {
        // Symmetric sample: median(|x|) = 1.0, sigma = 1.4826
        let res = vec![-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0];
        let sigma = mad_sigma(&res);
        assert!((sigma - 1.4826).abs() < 1e-12, "sigma = {}", sigma);
    }

    #[test]
    fn test_solve_linear_identity() {
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let b = vec![3.0, -2.0];
        let x = solve_linear_system(&a, &b, 2).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-12);
        assert!((x[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_linear_general() {
        // [2 1; 1 3] x = [5; 10] -> x = [1, 3]
        let a = vec![2.0, 1.0, 1.0, 3.0];
        let b = vec![5.0, 10.0];
        let x = solve_linear_system(&a, &b, 2).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12, "x0 = {}", x[0]);
        assert!((x[1] - 3.0).abs() < 1e-12, "x1 = {}", x[1]);
    }

    #[test]
    fn test_solve_linear_singular() {
        let a = vec![1.0, 2.0, 2.0, 4.0];
        let b = vec![1.0, 2.0];
        assert!(solve_linear_system(&a, &b, 2).is_none());
    }

    #[test]
    fn test_mad_sigma_ignores_outlier() {
        let mut res = vec![0.1, -0.1, 0.2, -0.2, 0.0];
        let sigma_clean = mad_sigma(&res);
        res.push(100.0);
        let sigma_spiked = mad_sigma(&res);
        assert!(
            (sigma_spiked - sigma_clean).abs() < 0.1,
            "MAD scale should barely move: {} vs {}",
            sigma_clean,
            sigma_spiked
        );
    }
}
