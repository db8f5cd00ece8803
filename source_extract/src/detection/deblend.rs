//! Multi-threshold deblending.
//!
//! An object is re-labeled over its own pixels at each level of a
//! threshold ladder. Every component found at level `k` under a node of
//! level `k-1` becomes a child of that node, so the result is an explicit
//! tree rooted at the original detection. The tree is then cut bottom-up:
//! a node with two or more significant children splits, its significant
//! children whose own subtrees did not split are accepted, and the node
//! and all its ancestors are no longer candidates for pass-through.
//!
//! Accepted nodes only hold the pixels above their own level. The parent
//! pixels below that level are handed out afterwards, one child per pixel,
//! using each child's elliptical profile, so the children's pixel counts
//! add up to the parent's.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::analyse::{analyse, preanalyse};
use super::lutz::{LutzBuffers, LutzComponent, LutzScan};
use super::object::{Object, ObjectFlags};
use crate::config::DeblendConfig;
use crate::error::{ExtractError, Resource, Result};
use crate::image_proc::{BoundingBox, ImageEdges, SubRegion};
use crate::pixel_list::{PixelArena, PixelExtras};

/// Grid cell not covered by the root object.
const OUTSIDE: u32 = u32::MAX;

/// Profile distances beyond this contribute nothing.
const MAX_PROFILE_DIST: f64 = 70.0;

/// Flux a child must carry, beyond its own threshold, is measured against
/// this reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContrastReference {
    /// Filtered flux of the original detection.
    #[default]
    Root,
    /// Combined filtered flux of the candidates sharing the same parent.
    Siblings,
}

/// How parent pixels below the children's levels are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelAllocation {
    /// Each pixel goes to the child whose profile is largest there.
    #[default]
    MostLikely,
    /// Each pixel goes to a child drawn with probability proportional to
    /// its profile. The generator for object `i` is seeded with `seed + i`.
    Sampled { seed: u64 },
}

/// One node of the deblending tree.
#[derive(Debug, Clone)]
pub struct DeblendNode {
    /// Component statistics; `object.thresh` is the level it was found at.
    pub object: Object,
    /// Ladder position; 0 is the original detection.
    pub level: usize,
    pub children: Vec<DeblendNode>,
    /// No split happened anywhere below this node.
    pub ok: bool,
    /// Kept as a distinct source.
    pub accepted: bool,
}

impl DeblendNode {
    fn new(object: Object, level: usize) -> Self {
        Self {
            object,
            level,
            children: Vec::new(),
            ok: true,
            accepted: false,
        }
    }

    /// Nodes in the subtree, this one included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(DeblendNode::count).sum::<usize>()
    }

    /// Deepest level reached below this node.
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(DeblendNode::depth)
            .max()
            .unwrap_or(self.level)
    }

    /// Accepted nodes in depth-first order.
    pub fn accepted(&self) -> Vec<&DeblendNode> {
        let mut out = Vec::new();
        self.collect_accepted(&mut out);
        out
    }

    fn collect_accepted<'a>(&'a self, out: &mut Vec<&'a DeblendNode>) {
        if self.accepted {
            out.push(self);
        }
        for child in &self.children {
            child.collect_accepted(out);
        }
    }
}

/// Result of deblending one object.
#[derive(Debug, Clone, PartialEq)]
pub enum DeblendOutcome {
    /// The object passes through as it is.
    Unchanged,
    /// Leaf objects whose spans live in the session arena.
    Split(Vec<Object>),
}

/// Scratch state for deblending, owned by one worker and reused for every
/// object it processes.
pub struct DeblendSession<E> {
    scratch: PixelArena<E>,
    buffers: LutzBuffers,
    /// Source arena index of the root pixel in each cell of the root's
    /// bounding box.
    submap: Vec<u32>,
    /// Cell membership of the node being scanned: cells stamped with the
    /// current generation belong to it.
    stamps: Vec<u32>,
    generation: u32,
    bbox: BoundingBox,
    closed: Vec<LutzComponent>,
    level_counts: Vec<usize>,
}

impl<E: PixelExtras> DeblendSession<E> {
    /// Session whose scratch arena holds `capacity` pixel nodes and whose
    /// labeling buffers start sized for `width` columns.
    pub fn new(capacity: usize, width: usize) -> Self {
        Self {
            scratch: PixelArena::with_capacity(capacity),
            buffers: LutzBuffers::new(width),
            submap: Vec::new(),
            stamps: Vec::new(),
            generation: 0,
            bbox: BoundingBox::new(),
            closed: Vec::new(),
            level_counts: Vec::new(),
        }
    }

    /// Arena holding the pixels of the most recent tree and outcome.
    pub fn arena(&self) -> &PixelArena<E> {
        &self.scratch
    }

    /// Split `root` if the ladder reveals several significant sources.
    ///
    /// `root` must carry `preanalyse` statistics and its pixels must live in
    /// `source`. `object_index` seeds [`PixelAllocation::Sampled`]. Spans in
    /// a [`DeblendOutcome::Split`] refer to [`DeblendSession::arena`] and
    /// stay valid until the next call.
    pub fn deblend(
        &mut self,
        root: &Object,
        source: &PixelArena<E>,
        ladder: &[f32],
        config: &DeblendConfig,
        min_child_area: usize,
        object_index: usize,
    ) -> Result<DeblendOutcome> {
        if ladder.is_empty() || root.fdnpix < 2 * min_child_area.max(1) {
            return Ok(DeblendOutcome::Unchanged);
        }

        let mut tree = self.build_tree(root, source, ladder, config, min_child_area)?;
        cut_tree(&mut tree, config, min_child_area);
        if tree.ok {
            return Ok(DeblendOutcome::Unchanged);
        }

        let mut leaves: Vec<Object> = tree.accepted().iter().map(|node| node.object).collect();
        log::trace!(
            "object at ({}, {}) split into {} across {} tree nodes",
            root.xcpeak,
            root.ycpeak,
            leaves.len(),
            tree.count()
        );

        let seed = match config.allocation {
            PixelAllocation::MostLikely => None,
            PixelAllocation::Sampled { seed } => Some(seed.wrapping_add(object_index as u64)),
        };
        self.gather(root, source, &mut leaves, seed)?;
        Ok(DeblendOutcome::Split(leaves))
    }

    /// Re-label `root` at every ladder level and return the tree.
    ///
    /// The scratch arena is cleared first; node spans refer to it, except
    /// the root's, which still refers to `source`.
    pub fn build_tree(
        &mut self,
        root: &Object,
        source: &PixelArena<E>,
        ladder: &[f32],
        config: &DeblendConfig,
        min_child_area: usize,
    ) -> Result<DeblendNode> {
        self.scratch.clear();
        self.prepare_grid(root, source);
        self.level_counts.clear();
        self.level_counts.resize(ladder.len(), 0);

        let mut tree = DeblendNode::new(*root, 0);
        self.grow(&mut tree, source, ladder, config.max_candidates, min_child_area)?;
        Ok(tree)
    }

    fn prepare_grid(&mut self, root: &Object, source: &PixelArena<E>) {
        let bbox = root.bbox;
        let cells = bbox.area();
        self.bbox = bbox;
        self.submap.clear();
        self.submap.resize(cells, OUTSIDE);
        self.stamps.clear();
        self.stamps.resize(cells, 0);
        self.generation = 0;
        for (index, pixel) in source.iter_indexed(root.span) {
            if let Some(offset) = bbox.offset_of(pixel.x, pixel.y) {
                self.submap[offset] = index;
            }
        }
        self.buffers.resize_for(bbox.width());
    }

    fn next_generation(&mut self) -> u32 {
        if self.generation == u32::MAX {
            self.stamps.fill(0);
            self.generation = 0;
        }
        self.generation += 1;
        self.generation
    }

    /// Scan `node` at the next ladder level and recurse into the children.
    fn grow(
        &mut self,
        node: &mut DeblendNode,
        source: &PixelArena<E>,
        ladder: &[f32],
        max_candidates: usize,
        min_child_area: usize,
    ) -> Result<()> {
        let Some(&level_thresh) = ladder.get(node.level) else {
            return Ok(());
        };
        if node.object.bbox.is_empty() {
            return Ok(());
        }

        let generation = self.next_generation();
        let span = node.object.span;
        let bbox = self.bbox;
        if node.level == 0 {
            stamp(&mut self.stamps, &bbox, generation, source.iter(span).map(|p| (p.x, p.y)));
        } else {
            stamp(
                &mut self.stamps,
                &bbox,
                generation,
                self.scratch.iter(span).map(|p| (p.x, p.y)),
            );
        }

        let node_box = node.object.bbox;
        let region = SubRegion::new(
            node_box.xmin as usize,
            node_box.ymin as usize,
            node_box.width(),
            node_box.height(),
            ImageEdges::empty(),
        )?;

        self.closed.clear();
        {
            let submap = &self.submap;
            let stamps = &self.stamps;
            let mut scan = LutzScan::begin(&mut self.buffers, region, min_child_area)?;
            for _ in 0..region.height {
                scan.scan_row(
                    &mut self.scratch,
                    |x, y| {
                        let offset = bbox.offset_of(x, y)?;
                        if stamps[offset] != generation {
                            return None;
                        }
                        let pixel = source.get(submap[offset])?;
                        (pixel.cdvalue() > level_thresh).then_some(*pixel)
                    },
                    &mut self.closed,
                )?;
            }
            scan.finish(&mut self.scratch, &mut self.closed)?;
        }

        let count = &mut self.level_counts[node.level];
        *count += self.closed.len();
        if *count > max_candidates {
            return Err(ExtractError::OutOfCapacity {
                resource: Resource::DeblendCandidates,
                requested: *count,
                capacity: max_candidates,
            });
        }

        let components: Vec<LutzComponent> = self.closed.drain(..).collect();
        let mut children = Vec::with_capacity(components.len());
        for component in components {
            let mut object = Object::new(component.span, level_thresh, ObjectFlags::empty());
            preanalyse(&mut object, &self.scratch);
            children.push(DeblendNode::new(object, node.level + 1));
        }
        for child in &mut children {
            self.grow(child, source, ladder, max_candidates, min_child_area)?;
        }
        node.children = children;
        Ok(())
    }

    /// Hand every root pixel not held by a leaf to one leaf.
    fn gather(
        &mut self,
        root: &Object,
        source: &PixelArena<E>,
        leaves: &mut [Object],
        seed: Option<u64>,
    ) -> Result<()> {
        for leaf in leaves.iter_mut() {
            analyse(leaf, &self.scratch, false, 0.0, None);
        }
        let profiles: Vec<Profile> = leaves.iter().map(Profile::new).collect();

        let generation = self.next_generation();
        let bbox = self.bbox;
        for leaf in leaves.iter() {
            stamp(
                &mut self.stamps,
                &bbox,
                generation,
                self.scratch.iter(leaf.span).map(|p| (p.x, p.y)),
            );
        }

        let mut rng = seed.map(StdRng::seed_from_u64);
        let mut likelihood = vec![0.0f64; profiles.len()];
        for pixel in source.iter(root.span) {
            let owned = bbox
                .offset_of(pixel.x, pixel.y)
                .map_or(false, |offset| self.stamps[offset] == generation);
            if owned {
                continue;
            }
            let target = choose(&profiles, pixel.x, pixel.y, &mut likelihood, rng.as_mut());
            self.scratch.append(&mut leaves[target].span, *pixel)?;
        }
        Ok(())
    }
}

fn stamp(
    stamps: &mut [u32],
    bbox: &BoundingBox,
    generation: u32,
    cells: impl Iterator<Item = (u32, u32)>,
) {
    for (x, y) in cells {
        if let Some(offset) = bbox.offset_of(x, y) {
            stamps[offset] = generation;
        }
    }
}

/// Cut the tree bottom-up, marking accepted nodes and clearing `ok` on
/// every node with a split below it.
pub fn cut_tree(root: &mut DeblendNode, config: &DeblendConfig, min_child_area: usize) {
    let root_flux = root.object.fdflux;
    cut_node(root, root_flux, config, min_child_area);
}

fn cut_node(node: &mut DeblendNode, root_flux: f32, config: &DeblendConfig, min_child_area: usize) {
    for child in &mut node.children {
        cut_node(child, root_flux, config, min_child_area);
    }

    let reference = match config.contrast_reference {
        ContrastReference::Root => root_flux,
        ContrastReference::Siblings => node.children.iter().map(|c| c.object.fdflux).sum(),
    };
    let floor = config.contrast * reference;
    let significant = |child: &DeblendNode| {
        let o = &child.object;
        o.fdnpix >= min_child_area && o.fdflux - o.thresh * o.fdnpix as f32 > floor
    };

    node.ok = node.children.iter().all(|c| c.ok);
    let splits = node.children.iter().filter(|c| significant(c)).count();
    if splits > 1 {
        for child in &mut node.children {
            if child.ok && significant(child) {
                child.accepted = true;
                child.object.flags |= ObjectFlags::MERGED;
            }
        }
        node.ok = false;
    }
}

/// Elliptical profile of one leaf used to share out parent pixels.
#[derive(Debug, Clone, Copy)]
struct Profile {
    mx: f64,
    my: f64,
    cxx: f64,
    cyy: f64,
    cxy: f64,
    abcor: f64,
    amp: f64,
}

impl Profile {
    fn new(object: &Object) -> Self {
        let fdpeak = object.fdpeak as f64;
        let ab = object.abcor as f64 * object.a as f64 * object.b as f64;
        let exponent = if ab > 0.0 {
            object.fdnpix as f64 / (2.0 * std::f64::consts::PI * ab)
        } else {
            f64::INFINITY
        };
        let amp = if exponent > MAX_PROFILE_DIST {
            4.0 * fdpeak
        } else {
            (object.thresh as f64 * exponent.exp()).min(4.0 * fdpeak)
        };
        Self {
            mx: object.mx,
            my: object.my,
            cxx: object.cxx as f64,
            cyy: object.cyy as f64,
            cxy: object.cxy as f64,
            abcor: if object.abcor > 0.0 {
                object.abcor as f64
            } else {
                1.0
            },
            amp: amp.max(0.0),
        }
    }

    /// Scaled squared elliptical distance of `(x, y)`.
    fn distance(&self, x: u32, y: u32) -> f64 {
        let dx = x as f64 - self.mx;
        let dy = y as f64 - self.my;
        0.5 * (self.cxx * dx * dx + self.cyy * dy * dy + self.cxy * dx * dy) / self.abcor
    }
}

/// Pick the leaf receiving pixel `(x, y)`.
///
/// Without a generator the largest profile value wins; with one, a leaf is
/// drawn in proportion to it. When every profile vanishes the nearest leaf
/// wins.
fn choose(
    profiles: &[Profile],
    x: u32,
    y: u32,
    likelihood: &mut [f64],
    rng: Option<&mut StdRng>,
) -> usize {
    let mut nearest = 0;
    let mut nearest_dist = f64::INFINITY;
    let mut total = 0.0;
    for (i, profile) in profiles.iter().enumerate() {
        let dist = profile.distance(x, y);
        if dist < nearest_dist {
            nearest_dist = dist;
            nearest = i;
        }
        likelihood[i] = if dist < MAX_PROFILE_DIST {
            profile.amp * (-dist).exp()
        } else {
            0.0
        };
        total += likelihood[i];
    }
    if !(total > 1.0e-31) {
        return nearest;
    }

    match rng {
        None => likelihood
            .iter()
            .enumerate()
            .fold((nearest, f64::NEG_INFINITY), |best, (i, &l)| {
                if l > best.1 {
                    (i, l)
                } else {
                    best
                }
            })
            .0,
        Some(rng) => {
            let draw = total * rng.gen::<f64>();
            let mut cumulative = 0.0;
            for (i, &l) in likelihood.iter().enumerate() {
                cumulative += l;
                if cumulative >= draw && l > 0.0 {
                    return i;
                }
            }
            nearest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ladder::LadderSpacing;
    use crate::detection::lutz::label_image;
    use crate::pixel_list::{Filtered, PixelSpan};
    use ndarray::Array2;
    use std::collections::HashSet;

    fn config() -> DeblendConfig {
        DeblendConfig::default()
    }

    /// Label `image` at `thresh` and return the single root with its arena.
    fn root_of(image: &Array2<f32>, thresh: f32) -> (PixelArena<Filtered>, Object) {
        let (h, w) = image.dim();
        let region = SubRegion::full_frame(w, h).unwrap();
        let mut buffers = LutzBuffers::new(w);
        let mut arena = PixelArena::with_capacity(w * h);
        let comps = label_image(image.view(), region, thresh, 3, &mut buffers, &mut arena).unwrap();
        assert_eq!(comps.len(), 1, "scene should be one detection");
        let mut root = Object::new(comps[0].span, thresh, comps[0].flags);
        preanalyse(&mut root, &arena);
        (arena, root)
    }

    fn coords(arena: &PixelArena<Filtered>, span: PixelSpan) -> HashSet<(u32, u32)> {
        arena.iter(span).map(|p| (p.x, p.y)).collect()
    }

    fn split(
        image: &Array2<f32>,
        thresh: f32,
        ladder: &[f32],
        config: &DeblendConfig,
    ) -> (PixelArena<Filtered>, Object, PixelArena<Filtered>, DeblendOutcome) {
        let (arena, root) = root_of(image, thresh);
        let mut session = DeblendSession::new(100_000, image.ncols());
        let outcome = session.deblend(&root, &arena, ladder, config, 3, 0).unwrap();
        let scratch = session.arena().clone();
        (arena, root, scratch, outcome)
    }

    #[test]
    fn test_dumbbell_splits_in_two() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 100.0);
        let (arena, root, scratch, outcome) = split(&image, 1.0, &ladder, &config());

        let DeblendOutcome::Split(leaves) = outcome else {
            panic!("dumbbell should split");
        };
        assert_eq!(leaves.len(), 2);
        let total: usize = leaves.iter().map(|l| l.span.len()).sum();
        assert_eq!(total, root.fdnpix);

        let a = coords(&scratch, leaves[0].span);
        let b = coords(&scratch, leaves[1].span);
        assert!(a.is_disjoint(&b));
        let union: HashSet<_> = a.union(&b).copied().collect();
        assert_eq!(union, coords(&arena, root.span));
        for leaf in &leaves {
            assert!(leaf.flags.contains(ObjectFlags::MERGED));
            scratch.verify_span(leaf.span).unwrap();
        }
    }

    #[test]
    fn test_leaves_keep_their_own_peak() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 100.0);
        let (_, _, scratch, outcome) = split(&image, 1.0, &ladder, &config());
        let DeblendOutcome::Split(leaves) = outcome else {
            panic!("dumbbell should split");
        };
        let mut peaks: Vec<u32> = leaves
            .iter()
            .map(|leaf| {
                let mut leaf = *leaf;
                preanalyse(&mut leaf, &scratch);
                leaf.xcpeak
            })
            .collect();
        peaks.sort();
        assert_eq!(peaks, vec![12, 28]);
    }

    #[test]
    fn test_ladder_below_saddle_leaves_object_unchanged() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let (_, _, _, outcome) = split(&image, 1.0, &[1.5], &config());
        assert_eq!(outcome, DeblendOutcome::Unchanged);
        let (_, _, _, outcome) = split(&image, 1.0, &[], &config());
        assert_eq!(outcome, DeblendOutcome::Unchanged);
    }

    #[test]
    fn test_single_peak_is_unchanged() {
        let image = test_helpers::scenes::gaussian_blob(21, 21, 10.0, 10.0, 2.0, 50.0);
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 50.0);
        let (_, _, _, outcome) = split(&image, 1.0, &ladder, &config());
        assert_eq!(outcome, DeblendOutcome::Unchanged);
    }

    #[test]
    fn test_faint_companion_below_contrast_is_folded_back() {
        let mut image = test_helpers::scenes::gaussian_blob(40, 20, 12.0, 10.0, 2.0, 100.0);
        let faint = test_helpers::scenes::gaussian_blob(40, 20, 24.0, 10.0, 1.0, 3.0);
        image.zip_mut_with(&faint, |a, &b| *a = a.max(b));
        for x in 12..=24 {
            image[[10, x]] = image[[10, x]].max(1.5);
        }
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 100.0);

        let strict = DeblendConfig {
            contrast: 0.05,
            ..config()
        };
        let (_, _, _, outcome) = split(&image, 1.0, &ladder, &strict);
        assert_eq!(outcome, DeblendOutcome::Unchanged);

        let lenient = DeblendConfig {
            contrast: 0.0,
            ..config()
        };
        let (_, _, _, outcome) = split(&image, 1.0, &ladder, &lenient);
        assert!(matches!(outcome, DeblendOutcome::Split(ref leaves) if leaves.len() == 2));
    }

    #[test]
    fn test_siblings_reference_ignores_shared_pedestal() {
        // The faint companion carries about 2.6 above its level. A 1.2
        // pedestal over the frame adds some 7000 to the root's flux but
        // drops out below the level where the companion separates.
        let mut image = Array2::from_elem((60, 100), 1.2f32);
        let bright = test_helpers::scenes::gaussian_blob(100, 60, 40.0, 30.0, 2.0, 100.0);
        let faint = test_helpers::scenes::gaussian_blob(100, 60, 52.0, 30.0, 1.0, 3.0);
        image.zip_mut_with(&bright, |a, &b| *a = a.max(b));
        image.zip_mut_with(&faint, |a, &b| *a = a.max(b));
        for x in 40..=52 {
            image[[30, x]] = image[[30, x]].max(1.5);
        }
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 100.0);

        let against_root = DeblendConfig {
            contrast: 0.0005,
            ..config()
        };
        let (_, _, _, outcome) = split(&image, 1.0, &ladder, &against_root);
        assert_eq!(outcome, DeblendOutcome::Unchanged);

        let against_siblings = DeblendConfig {
            contrast_reference: ContrastReference::Siblings,
            ..against_root
        };
        let (_, _, _, outcome) = split(&image, 1.0, &ladder, &against_siblings);
        assert!(matches!(outcome, DeblendOutcome::Split(ref leaves) if leaves.len() == 2));

        let strict_siblings = DeblendConfig {
            contrast: 0.05,
            ..against_siblings
        };
        let (_, _, _, outcome) = split(&image, 1.0, &ladder, &strict_siblings);
        assert_eq!(outcome, DeblendOutcome::Unchanged);
    }

    #[test]
    fn test_tree_shape() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let (arena, root) = root_of(&image, 1.0);
        let ladder = LadderSpacing::Linear.levels(4, 1.0, 100.0);
        let mut session = DeblendSession::new(100_000, 40);
        let mut tree = session.build_tree(&root, &arena, &ladder, &config(), 3).unwrap();
        // Linear levels 25.75, 50.5, 75.25 are all above the bridge.
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.depth(), 3);
        cut_tree(&mut tree, &config(), 3);
        assert!(!tree.ok);
        assert_eq!(tree.accepted().len(), 2);
        assert!(tree.accepted().iter().all(|n| n.level == 1));
    }

    #[test]
    fn test_candidate_cap() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 100.0);
        let capped = DeblendConfig {
            max_candidates: 1,
            ..config()
        };
        let (arena, root) = root_of(&image, 1.0);
        let mut session = DeblendSession::new(100_000, 40);
        let err = session
            .deblend(&root, &arena, &ladder, &capped, 3, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractError::OutOfCapacity {
                resource: Resource::DeblendCandidates,
                ..
            }
        ));
    }

    #[test]
    fn test_sampled_allocation_is_reproducible() {
        let image = test_helpers::scenes::dumbbell(40, 20, 16.0, 2.0, 100.0, 2.0);
        let ladder = LadderSpacing::Logarithmic.levels(32, 1.0, 100.0);
        let sampled = DeblendConfig {
            allocation: PixelAllocation::Sampled { seed: 7 },
            ..config()
        };
        let run = || {
            let (_, root, scratch, outcome) = split(&image, 1.0, &ladder, &sampled);
            let DeblendOutcome::Split(leaves) = outcome else {
                panic!("dumbbell should split");
            };
            let total: usize = leaves.iter().map(|l| l.span.len()).sum();
            assert_eq!(total, root.fdnpix);
            leaves
                .iter()
                .map(|l| {
                    let mut c: Vec<_> = coords(&scratch, l.span).into_iter().collect();
                    c.sort();
                    c
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_choose_most_likely_and_nearest() {
        let near = Profile {
            mx: 0.0,
            my: 0.0,
            cxx: 1.0,
            cyy: 1.0,
            cxy: 0.0,
            abcor: 1.0,
            amp: 10.0,
        };
        let far = Profile {
            mx: 10.0,
            ..near
        };
        let mut scratch = vec![0.0; 2];
        assert_eq!(choose(&[near, far], 2, 0, &mut scratch, None), 0);
        assert_eq!(choose(&[near, far], 8, 0, &mut scratch, None), 1);
        // Far outside both profiles: nearest wins.
        assert_eq!(choose(&[near, far], 40, 0, &mut scratch, None), 1);
    }
}
