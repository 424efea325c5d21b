//! 3D binary morphology
//!
//! Erosion and dilation over flat Fortran-order masks with an explicit
//! structuring element, plus the circular roll used to place the Nyquist
//! ghost region. The structuring element is a face+edge (18-connectivity)
//! neighborhood grown to a given radius, matching the element produced by
//! iterating the base 18-connectivity structure.

use crate::volume::idx3d;

/// Structuring element offsets for an iterated face+edge neighborhood
///
/// Contains all offsets reachable in `radius` steps of 18-connectivity
/// moves: max(|dx|,|dy|,|dz|) <= radius and |dx|+|dy|+|dz| <= 2*radius.
///
/// # Arguments
/// * `radius` - Iteration count of the base element (element spans 2r+1 voxels)
///
/// # Returns
/// Offset list (dx, dy, dz), center included
pub fn face_edge_element(radius: i32) -> Vec<(i32, i32, i32)> {
    let mut offsets = Vec::new();
    for dz in -radius..=radius {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx.abs() + dy.abs() + dz.abs() <= 2 * radius {
                    offsets.push((dx, dy, dz));
                }
            }
        }
    }
    offsets
}

/// Binary erosion with an explicit structuring element
///
/// A voxel survives only if every element offset lands on a set voxel.
/// Out-of-bounds neighbors count as background, so the mask is eroded at
/// the volume border.
///
/// # Arguments
/// * `mask` - Input binary mask (non-zero = set), Fortran order
/// * `nx`, `ny`, `nz` - Dimensions
/// * `element` - Structuring element offsets
///
/// # Returns
/// Eroded mask
pub fn binary_erode(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    element: &[(i32, i32, i32)],
) -> Vec<u8> {
    let mut out = vec![0u8; mask.len()];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if mask[idx3d(i, j, k, nx, ny)] == 0 {
                    continue;
                }

                let mut all_inside = true;

                for &(dx, dy, dz) in element {
                    let ni = i as i32 + dx;
                    let nj = j as i32 + dy;
                    let nk = k as i32 + dz;

                    if ni < 0
                        || ni >= nx as i32
                        || nj < 0
                        || nj >= ny as i32
                        || nk < 0
                        || nk >= nz as i32
                    {
                        all_inside = false;
                        break;
                    }

                    if mask[idx3d(ni as usize, nj as usize, nk as usize, nx, ny)] == 0 {
                        all_inside = false;
                        break;
                    }
                }

                if all_inside {
                    out[idx3d(i, j, k, nx, ny)] = 1;
                }
            }
        }
    }

    out
}

/// Binary dilation with an explicit structuring element
///
/// Every set voxel paints the element footprint around itself; offsets that
/// fall outside the volume are dropped.
pub fn binary_dilate(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    element: &[(i32, i32, i32)],
) -> Vec<u8> {
    let mut out = vec![0u8; mask.len()];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if mask[idx3d(i, j, k, nx, ny)] == 0 {
                    continue;
                }

                for &(dx, dy, dz) in element {
                    let ni = i as i32 + dx;
                    let nj = j as i32 + dy;
                    let nk = k as i32 + dz;

                    if ni >= 0
                        && ni < nx as i32
                        && nj >= 0
                        && nj < ny as i32
                        && nk >= 0
                        && nk < nz as i32
                    {
                        out[idx3d(ni as usize, nj as usize, nk as usize, nx, ny)] = 1;
                    }
                }
            }
        }
    }

    out
}

/// Repeated binary dilation
pub fn binary_dilate_iter(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    element: &[(i32, i32, i32)],
    iterations: usize,
) -> Vec<u8> {
    let mut out = mask.to_vec();
    for _ in 0..iterations {
        out = binary_dilate(&out, nx, ny, nz, element);
    }
    out
}

/// Circular roll along the second (phase-encode) axis
///
/// out[x, (y + shift) mod ny, z] = in[x, y, z], wrapping around the volume
/// rather than zero-padding.
pub fn roll_phase_axis(mask: &[u8], nx: usize, ny: usize, nz: usize, shift: usize) -> Vec<u8> {
    let mut out = vec![0u8; mask.len()];

    for k in 0..nz {
        for j in 0..ny {
            let j_dst = (j + shift) % ny;
            for i in 0..nx {
                out[idx3d(i, j_dst, k, nx, ny)] = mask[idx3d(i, j, k, nx, ny)];
            }
        }
    }

    out
}
