//! Digital filtering for motion traces
//!
//! Butterworth low-pass design via bilinear transform with frequency
//! prewarping, and zero-phase (forward-backward) application with
//! odd-extension padding and steady-state initial conditions. Used to remove
//! respiration- and cardiac-band contamination from framewise displacement
//! traces without introducing phase lag.

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::utils::solve_linear_system;

/// Design a low-pass Butterworth filter as transfer-function coefficients
///
/// The analog Butterworth prototype is scaled to the prewarped cutoff and
/// mapped to the z-domain with the bilinear transform; all zeros land at
/// z = -1 and the gain is normalized to unity at DC. If the cutoff reaches
/// the Nyquist frequency the filter degenerates to the identity.
///
/// # Arguments
/// * `order` - Filter order (number of poles)
/// * `cutoff_hz` - Cutoff frequency in Hz
/// * `fs_hz` - Sampling rate in Hz
///
/// # Returns
/// Numerator and denominator coefficients (b, a), a[0] = 1
pub fn butter_lowpass(order: usize, cutoff_hz: f64, fs_hz: f64) -> (Vec<f64>, Vec<f64>) {
    if order == 0 || cutoff_hz >= 0.5 * fs_hz {
        return (vec![1.0], vec![1.0]);
    }

    let fs2 = 2.0 * fs_hz;
    let warped = fs2 * (PI * cutoff_hz / fs_hz).tan();

    // Left-half-plane prototype poles scaled to the warped cutoff, then
    // mapped with z = (2fs + s) / (2fs - s)
    let mut z_poles = Vec::with_capacity(order);
    for k in 0..order {
        let theta = PI * (2 * k + 1 + order) as f64 / (2 * order) as f64;
        let s = Complex64::from_polar(warped, theta);
        z_poles.push((Complex64::new(fs2, 0.0) + s) / (Complex64::new(fs2, 0.0) - s));
    }

    // a(z) = prod(1 - p z^-1), real after conjugate pairing
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for p in &z_poles {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, &c) in coeffs.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c * p;
        }
        coeffs = next;
    }
    let a: Vec<f64> = coeffs.iter().map(|c| c.re).collect();

    // b(z) = K (1 + z^-1)^order with K fixing unit DC gain
    let mut b = vec![0.0; order + 1];
    b[0] = 1.0;
    for _ in 0..order {
        for i in (1..b.len()).rev() {
            b[i] += b[i - 1];
        }
    }
    let k_dc = a.iter().sum::<f64>() / 2f64.powi(order as i32);
    for v in b.iter_mut() {
        *v *= k_dc;
    }

    (b, a)
}

/// Apply a transfer-function filter (direct form II transposed)
///
/// # Arguments
/// * `b`, `a` - Coefficients with a[0] = 1
/// * `x` - Input signal
/// * `zi` - Initial filter state (length max(len(a), len(b)) - 1)
///
/// # Returns
/// Filtered signal
fn lfilter(b: &[f64], a: &[f64], x: &[f64], zi: &[f64]) -> Vec<f64> {
    let n = b.len().max(a.len());
    let mut bp = b.to_vec();
    let mut ap = a.to_vec();
    bp.resize(n, 0.0);
    ap.resize(n, 0.0);

    let m = n - 1;
    let mut z = zi.to_vec();
    z.resize(m, 0.0);

    let mut y = Vec::with_capacity(x.len());
    for &xi in x {
        let yi = bp[0] * xi + if m > 0 { z[0] } else { 0.0 };
        for i in 0..m {
            let z_next = if i + 1 < m { z[i + 1] } else { 0.0 };
            z[i] = bp[i + 1] * xi + z_next - ap[i + 1] * yi;
        }
        y.push(yi);
    }
    y
}

/// Steady-state initial filter state for a unit-amplitude step
///
/// Solving (I - A^T) zi = B for the companion-form state matrix gives the
/// state that makes the filter start in steady state, suppressing the
/// startup transient of each filtfilt pass.
fn lfilter_zi(b: &[f64], a: &[f64]) -> Vec<f64> {
    let n = b.len().max(a.len());
    let m = n - 1;
    if m == 0 {
        return Vec::new();
    }

    let mut bp = b.to_vec();
    let mut ap = a.to_vec();
    bp.resize(n, 0.0);
    ap.resize(n, 0.0);

    // IminusA[i][j] = delta(i,j) - companion(a)^T[i][j]
    let mut mat = vec![0.0; m * m];
    for i in 0..m {
        mat[i * m] += ap[i + 1];
        mat[i * m + i] += 1.0;
        if i + 1 < m {
            mat[i * m + i + 1] -= 1.0;
        }
    }

    let rhs: Vec<f64> = (0..m).map(|i| bp[i + 1] - ap[i + 1] * bp[0]).collect();

    solve_linear_system(&mat, &rhs, m).unwrap_or_else(|| vec![0.0; m])
}

/// Zero-phase forward-backward filtering
///
/// The input is odd-extended at both ends by 3x the filter length, filtered
/// forward and backward with steady-state initial conditions, and trimmed
/// back to its original length. The result has no phase lag and the squared
/// magnitude response of the single-pass filter.
///
/// # Arguments
/// * `b`, `a` - Transfer-function coefficients, a[0] = 1
/// * `x` - Input signal
///
/// # Returns
/// Filtered signal, same length as the input
pub fn filtfilt(b: &[f64], a: &[f64], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n <= 1 || (b.len() <= 1 && a.len() <= 1) {
        return x.to_vec();
    }

    let ntaps = b.len().max(a.len());
    let padlen = (3 * ntaps).min(n - 1);

    // Odd extension about the endpoints
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    for i in (1..=padlen).rev() {
        ext.push(2.0 * x[0] - x[i]);
    }
    ext.extend_from_slice(x);
    for i in 1..=padlen {
        ext.push(2.0 * x[n - 1] - x[n - 1 - i]);
    }

    let zi = lfilter_zi(b, a);

    // Forward pass
    let zi_fwd: Vec<f64> = zi.iter().map(|&z| z * ext[0]).collect();
    let fwd = lfilter(b, a, &ext, &zi_fwd);

    // Backward pass
    let mut rev: Vec<f64> = fwd.into_iter().rev().collect();
    let zi_bwd: Vec<f64> = zi.iter().map(|&z| z * rev[0]).collect();
    rev = lfilter(b, a, &rev, &zi_bwd);
    rev.reverse();

    rev[padlen..padlen + n].to_vec()
}
