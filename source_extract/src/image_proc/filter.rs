//! Kernel filtering of windowed rows.
//!
//! Two producers of the detection row:
//! - [`Filter::convolve`]: plain correlation of the image with the kernel
//!   (the kernel is not flipped).
//! - [`Filter::matched_filter`]: noise-weighted correlation normalised to a
//!   significance, `Σ k·I/σ² / sqrt(Σ k²/σ²)`.
//!
//! Kernel row `i` is applied to image row `y + i - rows/2`, kernel column `j`
//! to image column `x + j - cols/2`.

use ndarray::{arr2, Array2};
use serde::{Deserialize, Serialize};

use super::row_window::{RowSource, RowWindow};
use crate::error::{ExtractError, Result};

/// Edge handling for kernel taps outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EdgeMode {
    /// Uses a constant value for pixels outside image bounds
    Constant(f32),

    /// Reflects the image at the edges (the edge pixel is repeated)
    Reflect,

    /// Extends the edge pixels outward
    Extend,
}

impl Default for EdgeMode {
    fn default() -> Self {
        EdgeMode::Constant(0.0)
    }
}

/// How the noise map is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoiseKind {
    /// Per-pixel standard deviation
    #[default]
    StdDev,
    /// Per-pixel variance
    Variance,
}

impl NoiseKind {
    #[inline]
    pub fn to_variance(self, noise: f32) -> f32 {
        match self {
            NoiseKind::StdDev => noise * noise,
            NoiseKind::Variance => noise,
        }
    }
}

/// A finite 2-D kernel plus its boundary policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    kernel: Array2<f32>,
    edge_mode: EdgeMode,
}

impl Filter {
    /// Kernel dimensions must be odd so the kernel has a centre pixel.
    pub fn new(kernel: Array2<f32>, edge_mode: EdgeMode) -> Result<Self> {
        let (rows, cols) = kernel.dim();
        if rows == 0 || cols == 0 || rows % 2 == 0 || cols % 2 == 0 {
            return Err(ExtractError::InvalidKernel { rows, cols });
        }
        Ok(Self { kernel, edge_mode })
    }

    pub fn kernel(&self) -> &Array2<f32> {
        &self.kernel
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.edge_mode
    }

    /// Rows the window must hold to filter one row.
    pub fn window_height(&self) -> usize {
        self.kernel.nrows()
    }

    /// Rows needed on either side of the filtered row.
    pub fn half_height(&self) -> usize {
        self.kernel.nrows() / 2
    }

    /// Correlate row `y` of the windowed image with the kernel.
    ///
    /// The window must already hold the rows within `half_height` of `y`
    /// (see [`RowWindow::ensure`]).
    pub fn convolve<S: RowSource>(&self, window: &RowWindow<S>, y: usize, out: &mut [f32]) {
        let (kr, kc) = (self.kernel.nrows() / 2, self.kernel.ncols() / 2);
        for (x, o) in out.iter_mut().enumerate().take(window.width()) {
            let mut sum = 0.0;
            for ((ki, kj), &k) in self.kernel.indexed_iter() {
                let yy = y as isize + ki as isize - kr as isize;
                let xx = x as isize + kj as isize - kc as isize;
                if let Some(v) = self.tap(window, xx, yy) {
                    sum += k * v;
                }
            }
            *o = sum;
        }
    }

    /// Detection significance of row `y`.
    ///
    /// Taps outside the image, and pixels whose variance is zero or not
    /// finite, contribute nothing. A pixel with no contributing tap gets 0.
    /// `work` is scratch of the same length as `out`.
    pub fn matched_filter<S: RowSource, N: RowSource>(
        &self,
        image: &RowWindow<S>,
        noise: &RowWindow<N>,
        kind: NoiseKind,
        y: usize,
        out: &mut [f32],
        work: &mut [f32],
    ) {
        let (kr, kc) = (self.kernel.nrows() / 2, self.kernel.ncols() / 2);
        let (width, height) = (image.width() as isize, image.height() as isize);
        let n = out.len().min(work.len()).min(image.width());

        for x in 0..n {
            let mut num = 0.0f32;
            let mut den = 0.0f32;
            for ((ki, kj), &k) in self.kernel.indexed_iter() {
                let yy = y as isize + ki as isize - kr as isize;
                let xx = x as isize + kj as isize - kc as isize;
                if xx < 0 || xx >= width || yy < 0 || yy >= height {
                    continue;
                }
                let (xx, yy) = (xx as usize, yy as usize);
                let (Some(value), Some(sigma)) = (image.get(xx, yy), noise.get(xx, yy)) else {
                    continue;
                };
                let var = kind.to_variance(sigma);
                if var == 0.0 || !var.is_finite() {
                    continue;
                }
                num += k * value / var;
                den += k * k / var;
            }
            out[x] = num;
            work[x] = den;
        }

        for (o, &den) in out.iter_mut().zip(work.iter()).take(n) {
            *o = if den > 0.0 { *o / den.sqrt() } else { 0.0 };
        }
    }

    fn tap<S: RowSource>(&self, window: &RowWindow<S>, x: isize, y: isize) -> Option<f32> {
        let (w, h) = (window.width() as isize, window.height() as isize);
        if x >= 0 && x < w && y >= 0 && y < h {
            return window.get(x as usize, y as usize);
        }
        match self.edge_mode {
            EdgeMode::Constant(value) => Some(value),
            EdgeMode::Reflect => {
                let rx = clamp(reflect_index(x, w), 0, w - 1);
                let ry = clamp(reflect_index(y, h), 0, h - 1);
                window.get(rx as usize, ry as usize)
            }
            EdgeMode::Extend => {
                window.get(clamp(x, 0, w - 1) as usize, clamp(y, 0, h - 1) as usize)
            }
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            kernel: default_kernel(),
            edge_mode: EdgeMode::default(),
        }
    }
}

// Reflect indices for edge handling
fn reflect_index(idx: isize, size: isize) -> isize {
    if idx < 0 {
        -idx - 1
    } else if idx >= size {
        2 * size - idx - 1
    } else {
        idx
    }
}

fn clamp(idx: isize, min: isize, max: isize) -> isize {
    idx.max(min).min(max)
}

/// The 3x3 pyramidal kernel used when no kernel is configured.
pub fn default_kernel() -> Array2<f32> {
    arr2(&[[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]])
}

/// Create a normalised Gaussian kernel
///
/// # Arguments
///
/// * `size` - Kernel size (must be odd)
/// * `sigma` - Standard deviation of the Gaussian in pixels
pub fn gaussian_kernel(size: usize, sigma: f32) -> Result<Array2<f32>> {
    if size % 2 == 0 {
        return Err(ExtractError::InvalidKernel {
            rows: size,
            cols: size,
        });
    }
    if sigma.is_nan() || sigma <= 0.0 {
        return Err(ExtractError::InvalidConfig(format!(
            "gaussian sigma must be positive, got {sigma}"
        )));
    }

    let center = (size / 2) as f32;
    let mut kernel = Array2::from_shape_fn((size, size), |(i, j)| {
        let dy = i as f32 - center;
        let dx = j as f32 - center;
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    });
    let sum = kernel.sum();
    kernel.mapv_inplace(|v| v / sum);
    Ok(kernel)
}
