//! Extraction driver.
//!
//! One run has two stages:
//!
//! 1. Detection: rows are filtered through a sliding window and fed to a
//!    single Lutz scan over the region. Every closed component is a root.
//! 2. Measurement: each root is deblended and analysed on its own. Roots
//!    are independent, so this stage runs on the rayon pool with one
//!    [`DeblendSession`] per worker. Results are gathered in scan order,
//!    dropping objects that cleaning attributes to a brighter neighbour.
//!
//! Masked pixels read as zero with infinite noise and are never detected.
//!
//! The pixel schema is chosen once per run from the filter, noise and
//! threshold settings and fixed for every arena in the run.

use std::time::Instant;

use ndarray::{ArrayView2, ArrayViewMut1};
use num_traits::AsPrimitive;
use rayon::prelude::*;

use super::analyse::{analyse, analyse_mthresh, mean_threshold, preanalyse, MthreshDecision};
use super::clean::clean;
use super::deblend::{DeblendOutcome, DeblendSession};
use super::lutz::{LutzBuffers, LutzComponent, LutzScan};
use super::object::{AnyObjectList, Object, ObjectFlags, ObjectList};
use crate::config::{ExtractionConfig, FilterConfig, ThresholdMode};
use crate::error::{ExtractError, Result};
use crate::image_proc::{
    ArrayRows, ConstantRows, Filter, MaskedRows, NoiseKind, RowSource, RowWindow, SubRegion,
};
use crate::pixel_list::{
    Bare, Filtered, Full, Noisy, PixelArena, PixelExtras, PixelNode, PixelSample, PixelSchema,
};

/// Noise model accompanying the image.
///
/// Values are standard deviations or variances according to
/// [`ExtractionConfig::noise_kind`].
#[derive(Debug, Clone, Copy)]
pub enum Noise<'a> {
    None,
    /// The same noise everywhere.
    Constant(f32),
    /// Per-pixel noise with the image's shape.
    Map(ArrayView2<'a, f32>),
}

impl Noise<'_> {
    pub fn is_none(&self) -> bool {
        matches!(self, Noise::None)
    }
}

enum NoiseRows<'a> {
    Constant(ConstantRows),
    Map(ArrayRows<'a, f32>),
}

impl RowSource for NoiseRows<'_> {
    fn width(&self) -> usize {
        match self {
            NoiseRows::Constant(rows) => rows.width(),
            NoiseRows::Map(rows) => rows.width(),
        }
    }

    fn height(&self) -> usize {
        match self {
            NoiseRows::Constant(rows) => rows.height(),
            NoiseRows::Map(rows) => rows.height(),
        }
    }

    fn read_row(&mut self, y: usize, out: ArrayViewMut1<f32>) {
        match self {
            NoiseRows::Constant(rows) => rows.read_row(y, out),
            NoiseRows::Map(rows) => rows.read_row(y, out),
        }
    }
}

/// Decisions fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLayout {
    pub schema: PixelSchema,
    pub region: SubRegion,
    /// Threshold on the filtered image. When `per_pixel` is set this is
    /// the relative threshold in sigma units instead.
    pub thresh: f32,
    /// Each pixel carries its own threshold, `relative · σ(x, y)`.
    pub per_pixel: bool,
    /// Detection compares the matched-filter significance with `relative`.
    pub matched: bool,
    /// Threshold in sigma units.
    pub relative: f32,
    pub noise_kind: NoiseKind,
}

impl SessionLayout {
    /// Resolve the threshold mode against the noise model and pick the
    /// smallest pixel schema that holds what the run produces.
    pub fn new(config: &ExtractionConfig, noise: &Noise, region: SubRegion) -> Result<Self> {
        let relative = config.threshold_mode == ThresholdMode::Relative;
        let matched = config.matched_filter();
        if noise.is_none() && (relative || matched) {
            return Err(ExtractError::InvalidConfig(
                "relative thresholds and matched filtering need a noise model".to_string(),
            ));
        }

        let (thresh, per_pixel) = match *noise {
            Noise::None => (config.thresh, false),
            Noise::Constant(level) if relative || matched => {
                let sigma = config.noise_kind.to_variance(level).max(0.0).sqrt();
                (config.thresh * sigma, false)
            }
            Noise::Constant(_) => (config.thresh, false),
            Noise::Map(_) => (config.thresh, relative || matched),
        };

        Ok(Self {
            schema: PixelSchema::select(config.filter.is_some(), !noise.is_none(), per_pixel),
            region,
            thresh,
            per_pixel,
            matched,
            relative: config.thresh,
            noise_kind: config.noise_kind,
        })
    }

    /// Threshold on the filtered value for a pixel with noise variance `var`.
    #[inline]
    pub fn pixel_threshold(&self, var: f32) -> f32 {
        if self.per_pixel {
            self.relative * var.max(0.0).sqrt()
        } else {
            self.thresh
        }
    }
}

/// Extract objects from the whole of `image`.
///
/// Array axis 0 is `y`. Any element type convertible to `f32` is accepted;
/// see [`extract_rows`] for custom conversions.
pub fn extract<T>(image: ArrayView2<T>, noise: Noise, config: &ExtractionConfig) -> Result<AnyObjectList>
where
    T: AsPrimitive<f32>,
{
    let (height, width) = image.dim();
    let region = SubRegion::full_frame(width, height)?;
    extract_rows(ArrayRows::new(image), noise, region, config)
}

/// Extract objects from one region (usually a tile) of `image`.
pub fn extract_region<T>(
    image: ArrayView2<T>,
    noise: Noise,
    region: SubRegion,
    config: &ExtractionConfig,
) -> Result<AnyObjectList>
where
    T: AsPrimitive<f32>,
{
    extract_rows(ArrayRows::new(image), noise, region, config)
}

/// Extract objects from the whole of `image`, ignoring pixels where `mask`
/// is `true`.
///
/// Each object counts the masked pixels in its bounding box
/// ([`Object::nzwpix`]) and those bordering its pixels ([`Object::nzdwpix`]).
pub fn extract_masked<T>(
    image: ArrayView2<T>,
    noise: Noise,
    mask: ArrayView2<bool>,
    config: &ExtractionConfig,
) -> Result<AnyObjectList>
where
    T: AsPrimitive<f32>,
{
    let (height, width) = image.dim();
    let region = SubRegion::full_frame(width, height)?;
    extract_rows_masked(ArrayRows::new(image), noise, Some(mask), region, config)
}

/// Extract objects from `region` of an arbitrary row source.
pub fn extract_rows<S: RowSource>(
    source: S,
    noise: Noise,
    region: SubRegion,
    config: &ExtractionConfig,
) -> Result<AnyObjectList> {
    extract_rows_masked(source, noise, None, region, config)
}

/// [`extract_rows`] with an optional pixel mask of the source's shape.
pub fn extract_rows_masked<S: RowSource>(
    source: S,
    noise: Noise,
    mask: Option<ArrayView2<bool>>,
    region: SubRegion,
    config: &ExtractionConfig,
) -> Result<AnyObjectList> {
    config.validate()?;
    region.validate()?;

    let (width, height) = (source.width(), source.height());
    if region.x_end() > width || region.y_end() > height {
        return Err(ExtractError::MalformedSubRegion(format!(
            "region {region} exceeds image {width}x{height}"
        )));
    }
    if let Noise::Map(map) = noise {
        if map.dim() != (height, width) {
            return Err(ExtractError::MalformedSubRegion(format!(
                "noise map is {}x{}, image is {width}x{height}",
                map.ncols(),
                map.nrows()
            )));
        }
    }
    if let Some(mask) = mask {
        if mask.dim() != (height, width) {
            return Err(ExtractError::MalformedSubRegion(format!(
                "mask is {}x{}, image is {width}x{height}",
                mask.ncols(),
                mask.nrows()
            )));
        }
    }

    let layout = SessionLayout::new(config, &noise, region)?;
    let noise_rows = match noise {
        Noise::None => None,
        Noise::Constant(value) => Some(NoiseRows::Constant(ConstantRows {
            width,
            height,
            value,
        })),
        Noise::Map(map) => Some(NoiseRows::Map(ArrayRows::new(map))),
    };

    let source = MaskedRows::new(source, mask, 0.0);
    let noise_rows = noise_rows.map(|rows| MaskedRows::new(rows, mask, f32::INFINITY));
    Ok(match layout.schema {
        PixelSchema::Bare => AnyObjectList::Bare(run::<Bare, _, _>(source, noise_rows, mask, &layout, config)?),
        PixelSchema::Filtered => {
            AnyObjectList::Filtered(run::<Filtered, _, _>(source, noise_rows, mask, &layout, config)?)
        }
        PixelSchema::Noisy => {
            AnyObjectList::Noisy(run::<Noisy, _, _>(source, noise_rows, mask, &layout, config)?)
        }
        PixelSchema::Full => AnyObjectList::Full(run::<Full, _, _>(source, noise_rows, mask, &layout, config)?),
    })
}

fn run<E: PixelExtras, S: RowSource, N: RowSource>(
    source: S,
    noise: Option<N>,
    mask: Option<ArrayView2<bool>>,
    layout: &SessionLayout,
    config: &ExtractionConfig,
) -> Result<ObjectList<E>> {
    let started = Instant::now();
    let filter = config.filter.as_ref().map(FilterConfig::build).transpose()?;
    let (arena, roots) = detect::<E, S, N>(source, noise, mask, filter.as_ref(), layout, config)?;
    let detected = started.elapsed();

    let scratch = config.deblend.scratch_capacity(config.arena_capacity);
    let width = layout.region.width;
    let lists: Vec<ObjectList<E>> = if config.parallel {
        roots
            .par_iter()
            .enumerate()
            .map_init(
                || DeblendSession::new(scratch, width),
                |session, (index, root)| {
                    measure_root(index, root, &arena, mask, layout, config, session)
                },
            )
            .collect::<Result<Vec<_>>>()?
    } else {
        let mut session = DeblendSession::new(scratch, width);
        roots
            .iter()
            .enumerate()
            .map(|(index, root)| measure_root(index, root, &arena, mask, layout, config, &mut session))
            .collect::<Result<Vec<_>>>()?
    };

    let measured: Vec<Object> = lists
        .iter()
        .flat_map(|list| list.objects().iter().copied())
        .collect();
    let survivors = if config.clean {
        clean(&measured, config.clean_param)
    } else {
        vec![true; measured.len()]
    };

    let list = gather_lists(lists, &survivors, layout.thresh)?;
    log::debug!(
        "extracted {} objects from {} detections in {} ({:?} schema, {} pixels): detection {:.2?}, total {:.2?}",
        list.len(),
        roots.len(),
        layout.region,
        E::SCHEMA,
        arena.len(),
        detected,
        started.elapsed()
    );
    Ok(list)
}

/// First pass: filter each row of the region and label it.
fn detect<E: PixelExtras, S: RowSource, N: RowSource>(
    source: S,
    noise: Option<N>,
    mask: Option<ArrayView2<bool>>,
    filter: Option<&Filter>,
    layout: &SessionLayout,
    config: &ExtractionConfig,
) -> Result<(PixelArena<E>, Vec<LutzComponent>)> {
    let region = layout.region;
    let width = source.width();
    let (depth, half) = filter.map_or((1, 0), |f| (f.window_height(), f.half_height()));
    let start = region.y0.saturating_sub(half);

    let mut image = RowWindow::new(source, depth, start)?;
    let mut noise = noise.map(|rows| RowWindow::new(rows, depth, start)).transpose()?;
    let mut cdrow = vec![0.0f32; width];
    let mut sigrow = vec![0.0f32; width];
    let mut work = vec![0.0f32; width];

    let mut arena = PixelArena::with_capacity(config.arena_capacity);
    let mut buffers = LutzBuffers::new(region.width);
    let mut closed = Vec::new();
    let mut scan = LutzScan::begin(&mut buffers, region, config.min_area)?;

    for y in region.y0..region.y_end() {
        image.ensure(y, half);
        if let Some(noise) = noise.as_mut() {
            noise.ensure(y, half);
        }
        if let Some(filter) = filter {
            filter.convolve(&image, y, &mut cdrow);
            if let (true, Some(noise)) = (layout.matched, noise.as_ref()) {
                filter.matched_filter(&image, noise, layout.noise_kind, y, &mut sigrow, &mut work);
            }
        }

        let image = &image;
        let noise = noise.as_ref();
        let (cdrow, sigrow) = (&cdrow, &sigrow);
        scan.scan_row(
            &mut arena,
            |x, y| {
                let (xi, yi) = (x as usize, y as usize);
                if mask.map_or(false, |m| m[[yi, xi]]) {
                    return None;
                }
                let value = image.get(xi, yi)?;
                let cdvalue = if filter.is_some() { cdrow[xi] } else { value };
                let var = noise
                    .and_then(|n| n.get(xi, yi))
                    .map_or(0.0, |n| layout.noise_kind.to_variance(n));
                let thresh = layout.pixel_threshold(var);
                let detected = if layout.matched {
                    sigrow[xi] > layout.relative
                } else {
                    cdvalue > thresh
                };
                detected.then(|| {
                    PixelNode::capture(
                        x,
                        y,
                        &PixelSample {
                            value,
                            cdvalue,
                            var,
                            thresh,
                        },
                    )
                })
            },
            &mut closed,
        )?;
    }
    scan.finish(&mut arena, &mut closed)?;
    Ok((arena, closed))
}

/// Deblend and analyse one root, returning its objects in a list of their
/// own.
///
/// A root whose deblending runs out of scratch is kept whole and flagged
/// [`ObjectFlags::DEBLEND_OVERFLOW`]; other errors abort the run.
fn measure_root<E: PixelExtras>(
    index: usize,
    component: &LutzComponent,
    source: &PixelArena<E>,
    mask: Option<ArrayView2<bool>>,
    layout: &SessionLayout,
    config: &ExtractionConfig,
    session: &mut DeblendSession<E>,
) -> Result<ObjectList<E>> {
    let thresh = mean_threshold(source, component.span).unwrap_or(layout.thresh);
    let mut root = Object::new(component.span, thresh, component.flags);
    preanalyse(&mut root, source);

    let deblend = &config.deblend;
    let min_child_area = deblend.min_child_area_for(config.min_area);
    let outcome = if deblend.enabled {
        let ladder = deblend.spacing.levels(deblend.nthresh, root.thresh, root.fdpeak);
        match analyse_mthresh(&mut root, source, min_child_area, &ladder) {
            MthreshDecision::Levels(levels) => match session.deblend(
                &root,
                source,
                &ladder[..levels],
                deblend,
                min_child_area,
                index,
            ) {
                Ok(outcome) => outcome,
                Err(ExtractError::OutOfCapacity {
                    resource,
                    requested,
                    capacity,
                }) => {
                    log::warn!(
                        "kept object at ({}, {}) whole: {resource} exhausted deblending {} pixels ({requested} requested, capacity {capacity})",
                        root.xcpeak,
                        root.ycpeak,
                        root.fdnpix
                    );
                    root.flags |= ObjectFlags::DEBLEND_OVERFLOW;
                    DeblendOutcome::Unchanged
                }
                Err(err) => return Err(err),
            },
            MthreshDecision::Skip(reason) => {
                log::trace!(
                    "not deblending object at ({}, {}): {reason:?}",
                    root.xcpeak,
                    root.ycpeak
                );
                DeblendOutcome::Unchanged
            }
        }
    } else {
        analyse_mthresh(&mut root, source, min_child_area, &[]);
        DeblendOutcome::Unchanged
    };

    match outcome {
        DeblendOutcome::Unchanged => {
            let mut list = ObjectList::new(PixelArena::with_capacity(root.fdnpix), layout.thresh);
            let mut object = root;
            object.span = list.arena_mut().copy_span(source, root.span)?;
            finish_object(object, &mut list, mask, layout, config);
            Ok(list)
        }
        DeblendOutcome::Split(leaves) => {
            let needed = leaves.iter().map(|leaf| leaf.span.len()).sum();
            let mut list = ObjectList::new(PixelArena::with_capacity(needed), layout.thresh);
            for leaf in leaves {
                let mut object = leaf;
                object.thresh = root.thresh;
                object.mthresh = root.mthresh;
                object.span = list.arena_mut().copy_span(session.arena(), leaf.span)?;
                finish_object(object, &mut list, mask, layout, config);
            }
            Ok(list)
        }
    }
}

fn finish_object<E: PixelExtras>(
    mut object: Object,
    list: &mut ObjectList<E>,
    mask: Option<ArrayView2<bool>>,
    layout: &SessionLayout,
    config: &ExtractionConfig,
) {
    analyse(&mut object, list.arena(), config.robust, config.gain, config.saturation);
    object.flags.remove(ObjectFlags::BOUNDARY);
    object.flags |= layout.region.boundary_flags(&object.bbox);
    if let Some(mask) = mask {
        let (inside, bordering) = masked_counts(&object, list.arena(), mask);
        object.nzwpix = inside;
        object.nzdwpix = bordering;
    }
    list.push(object);
}

/// Masked pixels inside the bounding box of `object`, and masked pixels
/// 8-adjacent to one of its pixels.
fn masked_counts<E: PixelExtras>(
    object: &Object,
    arena: &PixelArena<E>,
    mask: ArrayView2<bool>,
) -> (usize, usize) {
    let bbox = object.bbox;
    if bbox.is_empty() {
        return (0, 0);
    }
    let (height, width) = mask.dim();
    let x0 = (bbox.xmin as usize).saturating_sub(1);
    let y0 = (bbox.ymin as usize).saturating_sub(1);
    let x1 = (bbox.xmax as usize + 1).min(width - 1);
    let y1 = (bbox.ymax as usize + 1).min(height - 1);
    let stride = x1 - x0 + 1;

    let mut member = vec![false; stride * (y1 - y0 + 1)];
    for pixel in arena.iter(object.span) {
        member[(pixel.y as usize - y0) * stride + (pixel.x as usize - x0)] = true;
    }
    let is_member = |x: usize, y: usize| member[(y - y0) * stride + (x - x0)];

    let mut inside = 0;
    let mut bordering = 0;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if !mask[[y, x]] {
                continue;
            }
            if bbox.contains(x as u32, y as u32) {
                inside += 1;
            }
            let touches = (y.saturating_sub(1).max(y0)..=(y + 1).min(y1)).any(|ny| {
                (x.saturating_sub(1).max(x0)..=(x + 1).min(x1)).any(|nx| is_member(nx, ny))
            });
            if touches {
                bordering += 1;
            }
        }
    }
    (inside, bordering)
}

/// Concatenate per-root lists into one list and one arena, in order,
/// keeping the objects whose flag in `survivors` is set.
fn gather_lists<E: PixelExtras>(
    lists: Vec<ObjectList<E>>,
    survivors: &[bool],
    thresh: f32,
) -> Result<ObjectList<E>> {
    let mut kept = survivors.iter().copied();
    let total = lists
        .iter()
        .flat_map(|list| list.objects())
        .zip(survivors)
        .filter(|(_, keep)| **keep)
        .map(|(object, _)| object.span.len())
        .sum();
    let mut out = ObjectList::new(PixelArena::with_capacity(total), thresh);
    for list in lists {
        let (objects, arena) = list.into_parts();
        for mut object in objects {
            if !kept.next().unwrap_or(true) {
                continue;
            }
            object.span = out.arena_mut().copy_span(&arena, object.span)?;
            out.push(object);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeblendConfig;
    use crate::detection::ladder::LadderSpacing;
    use crate::error::Resource;
    use crate::image_proc::ImageEdges;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn plain(thresh: f32) -> ExtractionConfig {
        ExtractionConfig {
            filter: None,
            min_area: 1,
            ..ExtractionConfig::absolute(thresh)
        }
    }

    fn rectangle() -> Array2<f32> {
        let mut image = Array2::zeros((10, 12));
        image.slice_mut(ndarray::s![2..5, 3..7]).fill(5.0);
        image
    }

    #[test]
    fn test_single_rectangle() {
        let objects = extract(rectangle().view(), Noise::None, &plain(1.0)).unwrap();
        assert_eq!(objects.schema(), PixelSchema::Bare);
        assert_eq!(objects.len(), 1);
        let object = &objects.objects()[0];
        assert_eq!(object.npix, 12);
        assert_relative_eq!(object.flux, 60.0);
        assert_relative_eq!(object.mx, 4.5);
        assert_relative_eq!(object.my, 3.0);
        assert!(object.flags.is_empty());
        objects.verify().unwrap();
    }

    #[test]
    fn test_integer_image() {
        let image = rectangle().mapv(|v| v as u16);
        let objects = extract(image.view(), Noise::None, &plain(1.0)).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects.objects()[0].npix, 12);
    }

    #[test]
    fn test_schema_selection() {
        let image = rectangle();
        let noise = Array2::from_elem(image.dim(), 1.0f32);

        let mut config = plain(1.0);
        config.filter = Some(FilterConfig::default());
        let filtered = extract(image.view(), Noise::None, &config).unwrap();
        assert_eq!(filtered.schema(), PixelSchema::Filtered);

        let noisy = extract(image.view(), Noise::Constant(1.0), &config).unwrap();
        assert_eq!(noisy.schema(), PixelSchema::Noisy);

        config.threshold_mode = ThresholdMode::Relative;
        let full = extract(image.view(), Noise::Map(noise.view()), &config).unwrap();
        assert_eq!(full.schema(), PixelSchema::Full);
        assert_eq!(full.len(), 1);
    }

    #[test]
    fn test_relative_threshold_scales_with_noise() {
        let image = rectangle();
        let mut config = plain(2.0);
        config.threshold_mode = ThresholdMode::Relative;
        // 2σ with σ = 2 is 4, below the rectangle.
        let found = extract(image.view(), Noise::Constant(2.0), &config).unwrap();
        assert_eq!(found.len(), 1);
        assert_relative_eq!(found.thresh(), 4.0);
        // 2σ with σ = 3 is 6, above it.
        let none = extract(image.view(), Noise::Constant(3.0), &config).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_relative_without_noise_rejected() {
        let mut config = plain(2.0);
        config.threshold_mode = ThresholdMode::Relative;
        let err = extract(rectangle().view(), Noise::None, &config).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn test_noise_shape_mismatch() {
        let image = rectangle();
        let noise = Array2::from_elem((3, 3), 1.0f32);
        let err = extract(image.view(), Noise::Map(noise.view()), &plain(1.0)).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedSubRegion(_)));
    }

    #[test]
    fn test_region_outside_image() {
        let image = rectangle();
        let region = SubRegion::new(8, 0, 8, 4, ImageEdges::all()).unwrap();
        let err = extract_region(image.view(), Noise::None, region, &plain(1.0)).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedSubRegion(_)));
    }

    #[test]
    fn test_tile_flags() {
        let image = rectangle();
        // Left tile cuts through the rectangle at x = 5.
        let region = SubRegion::tile(0, 0, 5, 10, 12, 10).unwrap();
        let objects = extract_region(image.view(), Noise::None, region, &plain(1.0)).unwrap();
        assert_eq!(objects.len(), 1);
        let object = &objects.objects()[0];
        assert_eq!(object.npix, 6);
        assert!(object.flags.contains(ObjectFlags::TILE_EDGE));
        assert!(!object.flags.contains(ObjectFlags::TRUNCATED));
    }

    #[test]
    fn test_matched_filter_detects_in_sigma_units() {
        let image = rectangle();
        let mut config = plain(3.0);
        config.filter = Some(FilterConfig {
            matched: true,
            ..FilterConfig::default()
        });
        let objects = extract(image.view(), Noise::Constant(1.0), &config).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects.schema(), PixelSchema::Noisy);
    }

    #[test]
    fn test_dumbbell_deblends_in_parallel_and_serially() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let mut config = plain(1.0);
        config.min_area = 3;
        let parallel = extract(image.view(), Noise::None, &config).unwrap();
        config.parallel = false;
        let serial = extract(image.view(), Noise::None, &config).unwrap();

        assert_eq!(parallel.len(), 2);
        assert_eq!(parallel.objects(), serial.objects());
        assert!(parallel.objects().iter().all(|o| o.is_merged()));
        parallel.verify().unwrap();
    }

    #[test]
    fn test_deblending_disabled() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let mut config = plain(1.0);
        config.deblend = DeblendConfig {
            enabled: false,
            ..DeblendConfig::default()
        };
        let objects = extract(image.view(), Noise::None, &config).unwrap();
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn test_saturation_flag() {
        let mut config = plain(1.0);
        config.saturation = Some(5.0);
        let objects = extract(rectangle().view(), Noise::None, &config).unwrap();
        assert!(objects.objects()[0].flags.contains(ObjectFlags::SATURATED));
    }

    #[test]
    fn test_arena_too_small() {
        let mut config = plain(1.0);
        config.arena_capacity = 5;
        let err = extract(rectangle().view(), Noise::None, &config).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::OutOfCapacity {
                resource: Resource::PixelArena,
                ..
            }
        ));
    }

    #[test]
    fn test_explicit_ladder() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let mut config = plain(1.0);
        config.deblend.spacing = LadderSpacing::Explicit(vec![10.0, 50.0]);
        let objects = extract(image.view(), Noise::None, &config).unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_large_source_fits_default_scratch() {
        // About 69 000 pixels above threshold; each ladder level re-labels
        // all of them.
        let mut image = test_helpers::scenes::gaussian_blob(400, 400, 200.0, 200.0, 40.0, 1000.0);
        image += &test_helpers::scenes::gaussian_blob(400, 400, 10.0, 10.0, 1.5, 20.0);
        let objects = extract(image.view(), Noise::None, &plain(1.0)).unwrap();

        assert_eq!(objects.len(), 2);
        let mut centres: Vec<(f64, f64)> = objects.objects().iter().map(|o| (o.mx, o.my)).collect();
        centres.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_relative_eq!(centres[0].0, 10.0, epsilon = 0.1);
        assert_relative_eq!(centres[1].0, 200.0, epsilon = 0.1);
        assert_relative_eq!(centres[1].1, 200.0, epsilon = 0.1);
        assert!(objects
            .objects()
            .iter()
            .all(|o| !o.flags.contains(ObjectFlags::DEBLEND_OVERFLOW)));
        objects.verify().unwrap();
    }

    #[test]
    fn test_deblend_overflow_keeps_object_whole() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let mut config = plain(1.0);
        config.min_area = 3;
        let whole = {
            let mut disabled = config.clone();
            disabled.deblend.enabled = false;
            extract(image.view(), Noise::None, &disabled).unwrap()
        };

        config.deblend.arena_capacity = Some(10);
        let objects = extract(image.view(), Noise::None, &config).unwrap();
        assert_eq!(objects.len(), 1);
        let object = &objects.objects()[0];
        assert!(object.flags.contains(ObjectFlags::DEBLEND_OVERFLOW));
        assert!(!object.is_merged());
        assert_eq!(object.npix, whole.objects()[0].npix);
        objects.verify().unwrap();
    }

    /// Flat ring of radii 4 to 8 around (16, 16) with a faint pixel in the
    /// hole, one column right of centre.
    fn ring_with_faint_centre() -> Array2<f32> {
        let mut image = Array2::from_shape_fn((32, 32), |(y, x)| {
            let dx = x as f32 - 16.0;
            let dy = y as f32 - 16.0;
            let r2 = dx * dx + dy * dy;
            if (16.0..=64.0).contains(&r2) {
                100.0
            } else {
                0.0
            }
        });
        image[[16, 17]] = 5.0;
        image
    }

    #[test]
    fn test_clean_removes_detection_inside_brighter_profile() {
        let image = ring_with_faint_centre();
        let mut config = plain(1.0);

        let cleaned = extract(image.view(), Noise::None, &config).unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_relative_eq!(cleaned.objects()[0].mx, 16.0, epsilon = 1e-6);
        assert!(cleaned.objects()[0].npix > 100);
        cleaned.verify().unwrap();

        config.clean = false;
        let kept = extract(image.view(), Noise::None, &config).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.objects().iter().any(|o| o.npix == 1 && o.xpeak == 17));
    }

    #[test]
    fn test_mask_excludes_pixels_and_counts_them() {
        let mut image = rectangle();
        image[[8, 10]] = 50.0;
        let mut mask = Array2::from_elem(image.dim(), false);
        // Right column of the rectangle, its centre pixel and the lone spike.
        for y in 2..5 {
            mask[[y, 6]] = true;
        }
        mask[[3, 4]] = true;
        mask[[8, 10]] = true;

        let objects = extract_masked(image.view(), Noise::None, mask.view(), &plain(1.0)).unwrap();
        assert_eq!(objects.len(), 1);
        let object = &objects.objects()[0];
        assert_eq!(object.npix, 8);
        assert_relative_eq!(object.flux, 40.0);
        assert_relative_eq!(object.mx, 4.0);
        assert_relative_eq!(object.my, 3.0);
        assert_eq!((object.bbox.xmin, object.bbox.xmax), (3, 5));
        assert_eq!(object.nzwpix, 1);
        assert_eq!(object.nzdwpix, 4);
        objects.verify().unwrap();

        let unmasked = extract(image.view(), Noise::None, &plain(1.0)).unwrap();
        assert_eq!(unmasked.len(), 2);
        assert!(unmasked.objects().iter().all(|o| o.nzwpix == 0 && o.nzdwpix == 0));
    }

    #[test]
    fn test_masked_noise_is_ignored_by_matched_filter() {
        let image = rectangle();
        let mut mask = Array2::from_elem(image.dim(), false);
        mask.slice_mut(ndarray::s![2..5, 3..7]).fill(true);
        let mut config = plain(3.0);
        config.filter = Some(FilterConfig {
            matched: true,
            ..FilterConfig::default()
        });
        let objects = extract_masked(image.view(), Noise::Constant(1.0), mask.view(), &config).unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let mask = Array2::from_elem((3, 3), false);
        let err = extract_masked(rectangle().view(), Noise::None, mask.view(), &plain(1.0)).unwrap_err();
        assert!(matches!(err, ExtractError::MalformedSubRegion(_)));
    }
}
