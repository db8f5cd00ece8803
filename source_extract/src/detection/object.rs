//! Object records and the lists that own their pixels.

use bitflags::bitflags;

use crate::image_proc::BoundingBox;
use crate::pixel_list::{
    Bare, Filtered, Full, Noisy, PixelArena, PixelExtras, PixelSchema, PixelSpan, SpanDefect,
    SpanIter,
};

bitflags! {
    /// Extraction conditions recorded on an object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u16 {
        /// Produced by splitting a blended detection
        const MERGED = 1 << 0;
        /// Touches a true image edge
        const TRUNCATED = 1 << 1;
        /// Touches an internal tiling boundary; the caller stitches tiles
        const TILE_EDGE = 1 << 2;
        /// x and y fully correlated, second moments regularised
        const SINGULAR = 1 << 3;
        /// At least one pixel at or above the saturation level
        const SATURATED = 1 << 4;
        /// Deblending ran out of scratch; the detection was kept whole
        const DEBLEND_OVERFLOW = 1 << 5;

        /// Flags that describe where the object sits relative to region edges
        const BOUNDARY = Self::TRUNCATED.bits() | Self::TILE_EDGE.bits();
    }
}

/// One detected (or deblended) source.
///
/// Positions are in full-image pixel coordinates. Flux and peak are kept at
/// three stages: extraction (`fd*`, on the filtered image), detection
/// (`d*`, on the raw image above threshold) and measurement (`flux`,
/// `fluxerr`, `peak`, over every pixel of the object).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Object {
    /// Detection threshold the object was extracted at.
    pub thresh: f32,
    /// Threshold above which fewer than the minimum child area remains.
    pub mthresh: f32,

    /// Pixels in the extracted list.
    pub fdnpix: usize,
    /// Pixels whose raw value exceeds `thresh`.
    pub dnpix: usize,
    /// Pixels used for measurement.
    pub npix: usize,
    /// Masked pixels bordering the object.
    pub nzdwpix: usize,
    /// Masked pixels inside the object.
    pub nzwpix: usize,

    pub bbox: BoundingBox,

    /// Barycenter.
    pub mx: f64,
    pub my: f64,
    /// Second moments about the barycenter.
    pub mx2: f64,
    pub my2: f64,
    pub mxy: f64,
    /// Variances of the barycenter.
    pub errx2: f64,
    pub erry2: f64,
    pub errxy: f64,

    /// Ellipse semi-axes and position angle (radians, counter-clockwise from +x).
    pub a: f32,
    pub b: f32,
    pub theta: f32,
    /// Ellipse coefficients: `cxx·dx² + cyy·dy² + cxy·dx·dy = 1` at the isophote.
    pub cxx: f32,
    pub cyy: f32,
    pub cxy: f32,
    /// Isophotal area correction used by the deblending profile model.
    pub abcor: f32,

    pub fdflux: f32,
    pub fdpeak: f32,
    pub dflux: f32,
    pub dpeak: f32,
    pub flux: f32,
    pub fluxerr: f32,
    pub peak: f32,

    /// Raw-image peak position.
    pub xpeak: u32,
    pub ypeak: u32,
    /// Filtered-image peak position.
    pub xcpeak: u32,
    pub ycpeak: u32,

    pub flags: ObjectFlags,

    /// Pixels in the owning arena.
    pub span: PixelSpan,
}

impl Object {
    /// Freshly closed component; statistics are filled by the summarizer.
    pub fn new(span: PixelSpan, thresh: f32, flags: ObjectFlags) -> Self {
        Self {
            thresh,
            mthresh: thresh,
            fdnpix: span.len(),
            flags,
            span,
            ..Default::default()
        }
    }

    pub fn is_merged(&self) -> bool {
        self.flags.contains(ObjectFlags::MERGED)
    }
}

/// Objects together with the arena holding their pixels.
#[derive(Debug, Clone)]
pub struct ObjectList<E> {
    objects: Vec<Object>,
    arena: PixelArena<E>,
    thresh: f32,
}

impl<E: PixelExtras> ObjectList<E> {
    pub fn new(arena: PixelArena<E>, thresh: f32) -> Self {
        Self {
            objects: Vec::new(),
            arena,
            thresh,
        }
    }

    pub fn push(&mut self, object: Object) {
        self.objects.push(object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Object> {
        self.objects.iter()
    }

    pub fn arena(&self) -> &PixelArena<E> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut PixelArena<E> {
        &mut self.arena
    }

    /// Threshold the list was produced under.
    pub fn thresh(&self) -> f32 {
        self.thresh
    }

    pub fn pixels(&self, object: &Object) -> SpanIter<'_, E> {
        self.arena.iter(object.span)
    }

    /// Check every object's chain, and that its measured pixel count
    /// matches the chain length.
    pub fn verify(&self) -> Result<(), SpanDefect> {
        self.objects.iter().try_for_each(|object| {
            self.arena.verify_span(object.span)?;
            if object.npix != object.span.len() {
                return Err(SpanDefect::CountMismatch {
                    recorded: object.npix,
                    span: object.span.len(),
                });
            }
            Ok(())
        })
    }

    pub fn into_parts(self) -> (Vec<Object>, PixelArena<E>) {
        (self.objects, self.arena)
    }
}

/// An [`ObjectList`] of whichever pixel schema the session selected.
#[derive(Debug, Clone)]
pub enum AnyObjectList {
    Bare(ObjectList<Bare>),
    Filtered(ObjectList<Filtered>),
    Noisy(ObjectList<Noisy>),
    Full(ObjectList<Full>),
}

macro_rules! each_list {
    ($self:expr, $list:ident => $body:expr) => {
        match $self {
            AnyObjectList::Bare($list) => $body,
            AnyObjectList::Filtered($list) => $body,
            AnyObjectList::Noisy($list) => $body,
            AnyObjectList::Full($list) => $body,
        }
    };
}

impl AnyObjectList {
    pub fn schema(&self) -> PixelSchema {
        match self {
            AnyObjectList::Bare(_) => PixelSchema::Bare,
            AnyObjectList::Filtered(_) => PixelSchema::Filtered,
            AnyObjectList::Noisy(_) => PixelSchema::Noisy,
            AnyObjectList::Full(_) => PixelSchema::Full,
        }
    }

    pub fn objects(&self) -> &[Object] {
        each_list!(self, list => list.objects())
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    pub fn thresh(&self) -> f32 {
        each_list!(self, list => list.thresh())
    }

    pub fn verify(&self) -> Result<(), SpanDefect> {
        each_list!(self, list => list.verify())
    }

    /// `(x, y, value)` of every pixel of `object`, in list order.
    pub fn pixel_values(&self, object: &Object) -> Vec<(u32, u32, f32)> {
        each_list!(self, list => list.pixels(object).map(|p| (p.x, p.y, p.value)).collect())
    }

    /// `(x, y)` of every pixel of `object`, in list order.
    pub fn pixel_coords(&self, object: &Object) -> Vec<(u32, u32)> {
        each_list!(self, list => list.pixels(object).map(|p| (p.x, p.y)).collect())
    }
}
