//! Shared synthetic-series builders for integration tests

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use qc_core::volume::{scaled_identity_affine, Volume4D};

/// Standard-normal sample via Box-Muller
pub fn gauss(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Static bright-sphere phantom series with magnitude (Rician-style) noise
///
/// The sphere is centered with radius nx/4 at the given intensity; every
/// voxel value is the magnitude of a complex Gaussian channel pair, so air
/// voxels follow a Rayleigh distribution with a strictly positive mean, as
/// in real scanner magnitude images. Zero rotation and zero translation
/// across all frames.
pub fn phantom_series(
    dims: (usize, usize, usize),
    nt: usize,
    signal: f64,
    noise_sigma: f64,
    seed: u64,
) -> Volume4D {
    let (nx, ny, nz) = dims;
    let radius = nx as f64 / 4.0;
    let (cx, cy, cz) = (nx as f64 / 2.0, ny as f64 / 2.0, nz as f64 / 2.0);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(nx * ny * nz * nt);

    for _t in 0..nt {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let dx = i as f64 - cx;
                    let dy = j as f64 - cy;
                    let dz = k as f64 - cz;
                    let inside = dx * dx + dy * dy + dz * dz <= radius * radius;
                    let s = if inside { signal } else { 0.0 };
                    let re = s + noise_sigma * gauss(&mut rng);
                    let im = noise_sigma * gauss(&mut rng);
                    data.push((re * re + im * im).sqrt());
                }
            }
        }
    }

    Volume4D::new(
        data,
        dims,
        nt,
        (1.0, 1.0, 1.0),
        scaled_identity_affine((1.0, 1.0, 1.0)),
    )
}

/// All-zero series (corrupt/blank acquisition)
pub fn zero_series(dims: (usize, usize, usize), nt: usize) -> Volume4D {
    let (nx, ny, nz) = dims;
    Volume4D::new(
        vec![0.0; nx * ny * nz * nt],
        dims,
        nt,
        (1.0, 1.0, 1.0),
        scaled_identity_affine((1.0, 1.0, 1.0)),
    )
}
