//! Volume containers for 3D and 4D MRI data
//!
//! Data is stored as flat `Vec<f64>` in Fortran (column-major) order to match
//! the NIfTI convention: index = x + y*nx + z*nx*ny (+ t*nx*ny*nz for 4D).
//! Volumes carry the voxel-to-physical affine and voxel sizes in mm.

/// A single 3D volume with spatial metadata
#[derive(Clone, Debug)]
pub struct Volume3D {
    /// Voxel intensities, Fortran order
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-physical affine (4x4, row-major)
    pub affine: [f64; 16],
}

/// A 4D volume time-series with spatial metadata
#[derive(Clone, Debug)]
pub struct Volume4D {
    /// Voxel intensities, Fortran order, frame-major last
    pub data: Vec<f64>,
    /// Spatial dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Number of frames
    pub nt: usize,
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Voxel-to-physical affine (4x4, row-major)
    pub affine: [f64; 16],
}

/// Index into a 3D Fortran-order array
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

impl Volume3D {
    /// Number of voxels
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the volume holds no voxels
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Volume4D {
    /// Construct from flat data, checking the element count
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        nt: usize,
        voxel_size: (f64, f64, f64),
        affine: [f64; 16],
    ) -> Self {
        let (nx, ny, nz) = dims;
        assert_eq!(
            data.len(),
            nx * ny * nz * nt,
            "data length does not match dims {:?} x {} frames",
            dims,
            nt
        );
        Volume4D {
            data,
            dims,
            nt,
            voxel_size,
            affine,
        }
    }

    /// Voxels per frame
    #[inline]
    pub fn frame_len(&self) -> usize {
        let (nx, ny, nz) = self.dims;
        nx * ny * nz
    }

    /// Borrow one frame as a 3D slice
    #[inline]
    pub fn frame(&self, t: usize) -> &[f64] {
        let n = self.frame_len();
        &self.data[t * n..(t + 1) * n]
    }

    /// Mutably borrow one frame
    #[inline]
    pub fn frame_mut(&mut self, t: usize) -> &mut [f64] {
        let n = self.frame_len();
        &mut self.data[t * n..(t + 1) * n]
    }

    /// Temporal mean over all frames
    ///
    /// # Returns
    /// A `Volume3D` with each voxel averaged across the time axis
    pub fn temporal_mean(&self) -> Volume3D {
        let n = self.frame_len();
        let mut mean = vec![0.0; n];

        for t in 0..self.nt {
            let frame = self.frame(t);
            for i in 0..n {
                mean[i] += frame[i];
            }
        }

        let scale = 1.0 / self.nt as f64;
        for v in mean.iter_mut() {
            *v *= scale;
        }

        Volume3D {
            data: mean,
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine: self.affine,
        }
    }

    /// Temporal standard deviation over all frames (population SD)
    pub fn temporal_sd(&self) -> Volume3D {
        let n = self.frame_len();
        let mean = self.temporal_mean();
        let mut var = vec![0.0; n];

        for t in 0..self.nt {
            let frame = self.frame(t);
            for i in 0..n {
                let d = frame[i] - mean.data[i];
                var[i] += d * d;
            }
        }

        let scale = 1.0 / self.nt as f64;
        let sd: Vec<f64> = var.iter().map(|v| (v * scale).sqrt()).collect();

        Volume3D {
            data: sd,
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine: self.affine,
        }
    }
}

/// Identity affine scaled by voxel size
pub fn scaled_identity_affine(voxel_size: (f64, f64, f64)) -> [f64; 16] {
    let (vsx, vsy, vsz) = voxel_size;
    [
        vsx, 0.0, 0.0, 0.0,
        0.0, vsy, 0.0, 0.0,
        0.0, 0.0, vsz, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_series(nx: usize, ny: usize, nz: usize, nt: usize) -> Volume4D {
        // Frame t holds the constant value t
        let n = nx * ny * nz;
        let mut data = Vec::with_capacity(n * nt);
        for t in 0..nt {
            data.extend(std::iter::repeat(t as f64).take(n));
        }
        Volume4D::new(
            data,
            (nx, ny, nz),
            nt,
            (1.0, 1.0, 1.0),
            scaled_identity_affine((1.0, 1.0, 1.0)),
        )
    }

    #[test]
    fn test_temporal_mean_of_ramp() {
        let vol = ramp_series(4, 3, 2, 5);
        let tmean = vol.temporal_mean();
        // mean of 0..5 = 2.0
        for (i, &v) in tmean.data.iter().enumerate() {
            assert!((v - 2.0).abs() < 1e-12, "voxel {} mean = {}", i, v);
        }
    }

    #[test]
    fn test_temporal_sd_of_ramp() {
        let vol = ramp_series(2, 2, 2, 5);
        let tsd = vol.temporal_sd();
        // population SD of {0,1,2,3,4} = sqrt(2)
        let expected = 2.0_f64.sqrt();
        for &v in tsd.data.iter() {
            assert!((v - expected).abs() < 1e-12, "sd = {}", v);
        }
    }

    #[test]
    fn test_frame_access() {
        let mut vol = ramp_series(2, 2, 1, 3);
        assert_eq!(vol.frame(1), &[1.0, 1.0, 1.0, 1.0]);
        vol.frame_mut(2)[0] = 9.0;
        assert_eq!(vol.frame(2)[0], 9.0);
    }

    #[test]
    fn test_idx3d_fortran_order() {
        // x varies fastest
        assert_eq!(idx3d(1, 0, 0, 4, 3), 1);
        assert_eq!(idx3d(0, 1, 0, 4, 3), 4);
        assert_eq!(idx3d(0, 0, 1, 4, 3), 12);
    }
}
