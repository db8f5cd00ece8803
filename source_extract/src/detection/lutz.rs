//! Single-pass connected-component labeling (Lutz scan).
//!
//! Rows are fed bottom to top. Each row is swept left to right with one
//! extra blank column at the end; [`LutzScan::finish`] sweeps one extra blank
//! row so every open component closes. Working state is O(width):
//!
//! - `marker[x]`: event left at column `x` by the previous row (a segment
//!   starts here, continues a segment, or ends here).
//! - `store[x]`: pixels and flags of a component whose leftmost open segment
//!   started at column `x` in the previous row.
//! - a stack of open-component frames and a stack of pixel statuses, both
//!   bounded by the number of segments in two consecutive rows.
//!
//! Merging two open components splices their pixel spans with
//! [`PixelArena::concat`], so every pixel is counted exactly once. Pixels
//! are 8-connected: a segment that only touches another diagonally joins it.

use ndarray::ArrayView2;

use super::object::ObjectFlags;
use crate::error::{ExtractError, Resource, Result};
use crate::image_proc::SubRegion;
use crate::pixel_list::{PixelArena, PixelExtras, PixelNode, PixelSample, PixelSpan};

/// A closed component handed out by the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutzComponent {
    pub span: PixelSpan,
    pub flags: ObjectFlags,
}

impl LutzComponent {
    pub fn npix(&self) -> usize {
        self.span.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Complete,
    Incomplete,
    NonObject,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    /// A segment starts here.
    Start,
    /// A segment starts here but belongs to an already started component.
    StartCont,
    /// A segment of a still-open component ends here.
    Fragment,
    /// The last segment of a component ends here.
    Final,
}

/// Pixels and flags accumulated for one open component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Info {
    span: PixelSpan,
    flags: ObjectFlags,
}

impl Info {
    const EMPTY: Info = Info {
        span: PixelSpan::EMPTY,
        flags: ObjectFlags::empty(),
    };
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    info: Info,
    /// Column where the component's first segment in the current row
    /// started, if any yet.
    start: Option<usize>,
    /// Column just past its last fragment in the current row.
    end: usize,
}

impl Frame {
    const BOTTOM: Frame = Frame {
        info: Info::EMPTY,
        start: None,
        end: 0,
    };
}

/// Working memory of the labeling engine, reusable across scans.
#[derive(Debug, Clone)]
pub struct LutzBuffers {
    max_width: usize,
    marker: Vec<Marker>,
    store: Vec<Info>,
    frames: Vec<Frame>,
    psstack: Vec<Status>,
}

impl LutzBuffers {
    /// Buffers for regions up to `max_width` columns wide.
    pub fn new(max_width: usize) -> Self {
        let mut buffers = Self {
            max_width: 0,
            marker: Vec::new(),
            store: Vec::new(),
            frames: Vec::new(),
            psstack: Vec::new(),
        };
        buffers.resize_for(max_width);
        buffers
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    /// Grow the buffers to hold regions `width` columns wide.
    ///
    /// Never shrinks, so a session sized for its widest region reuses the
    /// same allocation for every scan.
    pub fn resize_for(&mut self, width: usize) {
        if width <= self.max_width && !self.marker.is_empty() {
            return;
        }
        self.max_width = self.max_width.max(width);
        let columns = self.max_width + 1;
        self.marker.resize(columns, Marker::None);
        self.store.resize(columns, Info::EMPTY);
        self.frames.reserve(columns + 1);
        self.psstack.reserve(2 * columns + 2);
    }

    fn reset(&mut self, width: usize) {
        self.marker[..=width].fill(Marker::None);
        self.frames.clear();
        self.frames.push(Frame::BOTTOM);
        self.psstack.clear();
    }

    fn top(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::BOTTOM);
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn pop_frame(&mut self) -> Frame {
        debug_assert!(self.frames.len() > 1, "popped the bottom frame");
        if self.frames.len() > 1 {
            self.frames.pop().unwrap_or(Frame::BOTTOM)
        } else {
            Frame::BOTTOM
        }
    }

    fn pop_status(&mut self) -> Status {
        debug_assert!(!self.psstack.is_empty(), "pixel status stack underflow");
        self.psstack.pop().unwrap_or(Status::Complete)
    }
}

/// One labeling pass over a sub-region.
///
/// Borrowing the buffers mutably for the whole pass keeps a second scan
/// from interleaving with this one. Dropping the scan at any row boundary
/// abandons it; the pixels it allocated stay in the arena until the arena is
/// cleared.
pub struct LutzScan<'b> {
    buffers: &'b mut LutzBuffers,
    region: SubRegion,
    min_area: usize,
    rows_done: usize,
}

impl<'b> LutzScan<'b> {
    /// Start a scan of `region`, keeping components of at least `min_area`
    /// pixels.
    pub fn begin(buffers: &'b mut LutzBuffers, region: SubRegion, min_area: usize) -> Result<Self> {
        region.validate()?;
        if region.width > buffers.max_width {
            return Err(ExtractError::OutOfCapacity {
                resource: Resource::LabelingBuffers,
                requested: region.width,
                capacity: buffers.max_width,
            });
        }
        buffers.reset(region.width);
        Ok(Self {
            buffers,
            region,
            min_area: min_area.max(1),
            rows_done: 0,
        })
    }

    pub fn region(&self) -> &SubRegion {
        &self.region
    }

    /// Image row the next call to [`LutzScan::scan_row`] consumes.
    pub fn next_row(&self) -> usize {
        self.region.y0 + self.rows_done
    }

    /// Sweep the next row of the region.
    ///
    /// `sample(x, y)` returns the pixel node when pixel `(x, y)` (image
    /// coordinates) is above its threshold and `None` otherwise. Components
    /// closed by this row are appended to `closed`.
    pub fn scan_row<E, F>(
        &mut self,
        arena: &mut PixelArena<E>,
        sample: F,
        closed: &mut Vec<LutzComponent>,
    ) -> Result<()>
    where
        E: PixelExtras,
        F: FnMut(u32, u32) -> Option<PixelNode<E>>,
    {
        if self.rows_done >= self.region.height {
            return Err(ExtractError::MalformedSubRegion(format!(
                "row {} is past the end of region {}",
                self.next_row(),
                self.region
            )));
        }
        let y = self.next_row();
        self.sweep(arena, Some(y), sample, closed)?;
        self.rows_done += 1;
        Ok(())
    }

    /// Sweep the virtual blank row above the region, closing everything
    /// still open.
    pub fn finish<E: PixelExtras>(
        mut self,
        arena: &mut PixelArena<E>,
        closed: &mut Vec<LutzComponent>,
    ) -> Result<()> {
        self.sweep(arena, None, |_, _| None, closed)
    }

    fn sweep<E, F>(
        &mut self,
        arena: &mut PixelArena<E>,
        y: Option<usize>,
        mut sample: F,
        closed: &mut Vec<LutzComponent>,
    ) -> Result<()>
    where
        E: PixelExtras,
        F: FnMut(u32, u32) -> Option<PixelNode<E>>,
    {
        let width = self.region.width;
        let x0 = self.region.x0;
        let region = self.region;
        let min_area = self.min_area;
        let b = &mut *self.buffers;

        let mut ps = Status::Complete;
        let mut cs = Status::NonObject;

        for xl in 0..=width {
            let newmarker = std::mem::replace(&mut b.marker[xl], Marker::None);

            let pixel = match y {
                Some(y) if xl < width => sample((x0 + xl) as u32, y as u32),
                _ => None,
            };

            let current = match (pixel, y) {
                (Some(node), Some(y)) => {
                    let span = arena.alloc(node)?;
                    if cs != Status::Object {
                        // Start segment
                        cs = Status::Object;
                        if ps == Status::Object {
                            let top = b.top();
                            if top.start.is_none() {
                                top.start = Some(xl);
                                b.marker[xl] = Marker::Start;
                            } else {
                                b.marker[xl] = Marker::StartCont;
                            }
                        } else {
                            b.psstack.push(ps);
                            b.marker[xl] = Marker::Start;
                            b.frames.push(Frame {
                                info: Info::EMPTY,
                                start: Some(xl),
                                end: 0,
                            });
                            ps = Status::Complete;
                        }
                    }
                    Some(Info {
                        span,
                        flags: region.pixel_flags(xl, y),
                    })
                }
                _ => None,
            };

            match newmarker {
                Marker::None => {}
                Marker::Start => {
                    b.psstack.push(ps);
                    let stored = b.store[xl];
                    if cs == Status::NonObject {
                        b.psstack.push(Status::Complete);
                        b.frames.push(Frame {
                            info: stored,
                            start: None,
                            end: 0,
                        });
                    } else {
                        merge(arena, &mut b.top().info, stored);
                    }
                    ps = Status::Object;
                }
                Marker::StartCont => {
                    if cs == Status::Object && ps == Status::Complete {
                        b.pop_status();
                        let inner = b.pop_frame();
                        let outer = b.top();
                        merge(arena, &mut outer.info, inner.info);
                        if outer.start.is_none() {
                            outer.start = inner.start;
                        } else if let Some(inner_start) = inner.start {
                            b.marker[inner_start] = Marker::StartCont;
                        }
                    }
                    ps = Status::Object;
                }
                Marker::Fragment => ps = Status::Incomplete,
                Marker::Final => {
                    ps = b.pop_status();
                    if cs == Status::NonObject && ps == Status::Complete {
                        let frame = b.pop_frame();
                        match frame.start {
                            None => {
                                if frame.info.span.len() >= min_area {
                                    closed.push(LutzComponent {
                                        span: frame.info.span,
                                        flags: frame.info.flags,
                                    });
                                }
                            }
                            Some(start) => {
                                b.marker[frame.end] = Marker::Final;
                                b.store[start] = frame.info;
                            }
                        }
                        ps = b.pop_status();
                    }
                }
            }

            if let Some(info) = current {
                merge(arena, &mut b.top().info, info);
            } else if cs == Status::Object {
                // End segment
                cs = Status::NonObject;
                if ps != Status::Complete {
                    b.marker[xl] = Marker::Fragment;
                    b.top().end = xl;
                } else {
                    ps = b.pop_status();
                    let frame = b.pop_frame();
                    b.marker[xl] = Marker::Final;
                    if let Some(start) = frame.start {
                        b.store[start] = frame.info;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fold `tail` into `head`: splice the pixels and combine the flags.
#[inline]
fn merge<E: PixelExtras>(arena: &mut PixelArena<E>, head: &mut Info, tail: Info) {
    arena.concat(&mut head.span, tail.span);
    head.flags |= tail.flags;
}

/// Label every pixel of `region` whose value in `data` exceeds `thresh`.
///
/// The array value is used as both raw and filtered value. Returns the
/// closed components in the order they closed.
pub fn label_image<E: PixelExtras>(
    data: ArrayView2<f32>,
    region: SubRegion,
    thresh: f32,
    min_area: usize,
    buffers: &mut LutzBuffers,
    arena: &mut PixelArena<E>,
) -> Result<Vec<LutzComponent>> {
    let (rows, cols) = data.dim();
    if region.x_end() > cols || region.y_end() > rows {
        return Err(ExtractError::MalformedSubRegion(format!(
            "region {region} exceeds image {cols}x{rows}"
        )));
    }

    let mut closed = Vec::new();
    let mut scan = LutzScan::begin(buffers, region, min_area)?;
    for _ in 0..region.height {
        scan.scan_row(
            arena,
            |x, y| {
                let value = data[[y as usize, x as usize]];
                (value > thresh).then(|| {
                    PixelNode::capture(
                        x,
                        y,
                        &PixelSample {
                            value,
                            cdvalue: value,
                            var: 0.0,
                            thresh,
                        },
                    )
                })
            },
            &mut closed,
        )?;
    }
    scan.finish(arena, &mut closed)?;
    Ok(closed)
}
