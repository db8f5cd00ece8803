//! Row sources and the sliding row window fed to the filter front-end.
//!
//! The window keeps `bh` consecutive image rows in a fixed `bh x width`
//! buffer. Row `y` always lives in slot `y % bh`, so advancing overwrites the
//! oldest row in place and nothing is reallocated during a scan.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Zip};
use num_traits::AsPrimitive;

use crate::error::{ExtractError, Result};

/// Producer of image rows converted to `f32`.
///
/// Rows are requested in increasing order, each exactly once per window.
pub trait RowSource {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Write row `y` into `out` (length [`RowSource::width`]).
    fn read_row(&mut self, y: usize, out: ArrayViewMut1<f32>);
}

/// Default per-type conversion.
pub fn as_f32<T: AsPrimitive<f32>>(value: T) -> f32 {
    value.as_()
}

/// Row source over an in-memory array of any element type.
///
/// Array axis 0 is the row (`y`) and axis 1 the column (`x`).
pub struct ArrayRows<'a, T> {
    data: ArrayView2<'a, T>,
    convert: fn(T) -> f32,
}

impl<'a, T> ArrayRows<'a, T>
where
    T: AsPrimitive<f32>,
{
    pub fn new(data: ArrayView2<'a, T>) -> Self {
        Self {
            data,
            convert: as_f32::<T>,
        }
    }
}

impl<'a, T: Copy> ArrayRows<'a, T> {
    /// Adapt an array whose element type needs a custom conversion
    /// (scaled integers, packed formats).
    pub fn with_converter(data: ArrayView2<'a, T>, convert: fn(T) -> f32) -> Self {
        Self { data, convert }
    }
}

impl<'a, T: Copy> RowSource for ArrayRows<'a, T> {
    fn width(&self) -> usize {
        self.data.ncols()
    }

    fn height(&self) -> usize {
        self.data.nrows()
    }

    fn read_row(&mut self, y: usize, out: ArrayViewMut1<f32>) {
        let convert = self.convert;
        Zip::from(out)
            .and(self.data.row(y))
            .for_each(|o, &v| *o = convert(v));
    }
}

/// A row source returning the same value everywhere (scalar noise).
#[derive(Debug, Clone, Copy)]
pub struct ConstantRows {
    pub width: usize,
    pub height: usize,
    pub value: f32,
}

impl RowSource for ConstantRows {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn read_row(&mut self, _y: usize, mut out: ArrayViewMut1<f32>) {
        out.fill(self.value);
    }
}

/// Row source with masked pixels replaced by `fill`.
///
/// The mask shares the source's shape; `true` marks a pixel to ignore.
/// Without a mask rows pass through untouched.
pub struct MaskedRows<'a, S> {
    inner: S,
    mask: Option<ArrayView2<'a, bool>>,
    fill: f32,
}

impl<'a, S: RowSource> MaskedRows<'a, S> {
    pub fn new(inner: S, mask: Option<ArrayView2<'a, bool>>, fill: f32) -> Self {
        Self { inner, mask, fill }
    }
}

impl<S: RowSource> RowSource for MaskedRows<'_, S> {
    fn width(&self) -> usize {
        self.inner.width()
    }

    fn height(&self) -> usize {
        self.inner.height()
    }

    fn read_row(&mut self, y: usize, mut out: ArrayViewMut1<f32>) {
        self.inner.read_row(y, out.view_mut());
        if let Some(mask) = &self.mask {
            let fill = self.fill;
            Zip::from(out)
                .and(mask.row(y))
                .for_each(|o, &masked| {
                    if masked {
                        *o = fill;
                    }
                });
        }
    }
}

/// Sliding buffer of the `bh` most recently read rows.
pub struct RowWindow<S> {
    source: S,
    rows: Array2<f32>,
    /// Oldest resident row.
    first: usize,
    /// Next row to be read.
    next: usize,
}

impl<S: RowSource> RowWindow<S> {
    /// Window of `bh` rows positioned before row `start`.
    pub fn new(source: S, bh: usize, start: usize) -> Result<Self> {
        if bh == 0 {
            return Err(ExtractError::InvalidConfig(
                "row window needs at least one row".to_string(),
            ));
        }
        let start = start.min(source.height());
        let rows = Array2::zeros((bh, source.width()));
        Ok(Self {
            source,
            rows,
            first: start,
            next: start,
        })
    }

    pub fn width(&self) -> usize {
        self.source.width()
    }

    pub fn height(&self) -> usize {
        self.source.height()
    }

    /// Number of buffered rows.
    pub fn depth(&self) -> usize {
        self.rows.nrows()
    }

    /// Read the next row, evicting the oldest once the window is full.
    ///
    /// Returns `false` at the end of the source.
    pub fn advance(&mut self) -> bool {
        if self.next >= self.source.height() {
            return false;
        }
        let bh = self.depth();
        let y = self.next;
        self.source.read_row(y, self.rows.row_mut(y % bh));
        self.next += 1;
        if self.next - self.first > bh {
            self.first = self.next - bh;
        }
        true
    }

    /// Advance until every image row within `half` of row `y` that exists
    /// has been read.
    pub fn ensure(&mut self, y: usize, half: usize) {
        let height = self.source.height();
        if height == 0 {
            return;
        }
        let last = (y + half).min(height - 1);
        while self.next <= last {
            if !self.advance() {
                break;
            }
        }
    }

    /// Row `y`, if resident.
    pub fn row(&self, y: usize) -> Option<ArrayView1<'_, f32>> {
        (y >= self.first && y < self.next).then(|| self.rows.row(y % self.depth()))
    }

    /// Single pixel, if its row is resident.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if y < self.first || y >= self.next || x >= self.rows.ncols() {
            return None;
        }
        Some(self.rows[[y % self.depth(), x]])
    }
}
