//! Synthetic images.
//!
//! Every builder returns an `Array2<f32>` indexed `[y, x]` with a zero
//! background, so a threshold just above zero recovers the drawn shapes.

use ndarray::{s, Array2};

/// Image from rows of `#` (1.0) and anything else (0.0).
///
/// The first string is row 0. All rows must have the same length.
pub fn mask(rows: &[&str]) -> Array2<f32> {
    let height = rows.len();
    let width = rows.first().map_or(0, |r| r.len());
    Array2::from_shape_fn((height, width), |(y, x)| {
        if rows[y].as_bytes()[x] == b'#' {
            1.0
        } else {
            0.0
        }
    })
}

/// A `w` x `h` block of `value` with its lower-left pixel at `(x0, y0)`.
pub fn rectangle(
    width: usize,
    height: usize,
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    value: f32,
) -> Array2<f32> {
    let mut image = Array2::zeros((height, width));
    image.slice_mut(s![y0..y0 + h, x0..x0 + w]).fill(value);
    image
}

/// A 4x3 block and a 3x5 block, far enough apart to stay separate under
/// 8-connectivity.
pub fn two_rectangles() -> Array2<f32> {
    let mut image = rectangle(16, 10, 1, 1, 4, 3, 2.0);
    image.slice_mut(s![3..8, 9..12]).fill(3.0);
    image
}

/// Two diagonal arms that meet only in the last row scanned.
pub fn v_shape() -> Array2<f32> {
    mask(&[
        "...#...", //
        "..#.#..",
        ".#...#.",
        "#.....#",
    ])
}

/// Two vertical arms joined by a bar along the first row scanned.
pub fn u_shape() -> Array2<f32> {
    mask(&[
        "#######", //
        "##...##",
        "##...##",
        "##...##",
    ])
}

/// Circular Gaussian of peak `amplitude` centred on `(cx, cy)`.
pub fn gaussian_blob(
    width: usize,
    height: usize,
    cx: f32,
    cy: f32,
    sigma: f32,
    amplitude: f32,
) -> Array2<f32> {
    let two_s2 = 2.0 * sigma * sigma;
    Array2::from_shape_fn((height, width), |(y, x)| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        amplitude * (-(dx * dx + dy * dy) / two_s2).exp()
    })
}

/// Two equal Gaussians `separation` pixels apart on the middle row,
/// joined by a ridge of at least `bridge` along that row.
///
/// Peaks sit at `(width/2 ± separation/2, height/2)`. A threshold below
/// `bridge` sees one object, a ladder reaching above it sees two.
pub fn dumbbell(
    width: usize,
    height: usize,
    separation: f32,
    sigma: f32,
    amplitude: f32,
    bridge: f32,
) -> Array2<f32> {
    let cy = (height / 2) as f32;
    let left = (width / 2) as f32 - separation / 2.0;
    let right = (width / 2) as f32 + separation / 2.0;

    let mut image = gaussian_blob(width, height, left, cy, sigma, amplitude);
    image += &gaussian_blob(width, height, right, cy, sigma, amplitude);

    let row = height / 2;
    let x_from = left.max(0.0).round() as usize;
    let x_to = (right.round() as usize).min(width.saturating_sub(1));
    for x in x_from..=x_to {
        let v = &mut image[[row, x]];
        *v = v.max(bridge);
    }
    image
}
