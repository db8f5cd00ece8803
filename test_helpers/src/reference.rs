//! Reference connected-component labeling.
//!
//! Two-pass labeling with union-find over the whole image. Slow and
//! memory-hungry next to the single-pass engine, which is what makes it a
//! useful oracle. Uses 8-connectivity to match the engine.

use ndarray::{Array2, ArrayView2};

fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != labels[current] {
        // Path compression - make the parent point to the grandparent
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

fn union_labels(labels: &mut [usize], label1: usize, label2: usize) {
    let root1 = find_root(labels, label1);
    let root2 = find_root(labels, label2);
    if root1 < root2 {
        labels[root2] = root1;
    } else if root2 < root1 {
        labels[root1] = root2;
    }
}

/// Label pixels strictly above `thresh`.
///
/// Returns an image of consecutive labels starting at 1, 0 for background.
pub fn connected_components(image: &ArrayView2<f32>, thresh: f32) -> Array2<usize> {
    let (height, width) = image.dim();
    let mut labels = Array2::zeros((height, width));
    let mut parent_table = vec![0];
    let mut label_count = 0;

    for i in 0..height {
        for j in 0..width {
            if !(image[[i, j]] > thresh) {
                continue;
            }
            // Already visited neighbours: the row before and the pixel to the left
            let mut neighbour_labels = Vec::with_capacity(4);
            if i > 0 {
                for jj in j.saturating_sub(1)..=(j + 1).min(width - 1) {
                    if labels[[i - 1, jj]] > 0 {
                        neighbour_labels.push(labels[[i - 1, jj]]);
                    }
                }
            }
            if j > 0 && labels[[i, j - 1]] > 0 {
                neighbour_labels.push(labels[[i, j - 1]]);
            }

            match neighbour_labels.iter().min().copied() {
                None => {
                    label_count += 1;
                    labels[[i, j]] = label_count;
                    parent_table.push(label_count);
                }
                Some(min_label) => {
                    labels[[i, j]] = min_label;
                    for &other in &neighbour_labels {
                        if other != min_label {
                            union_labels(&mut parent_table, min_label, other);
                        }
                    }
                }
            }
        }
    }

    for i in 1..parent_table.len() {
        find_root(&mut parent_table, i);
    }

    let mut relabel_map = vec![0; parent_table.len()];
    let mut next_label = 1;
    for i in 1..parent_table.len() {
        let root = find_root(&mut parent_table, i);
        if relabel_map[root] == 0 {
            relabel_map[root] = next_label;
            next_label += 1;
        }
        relabel_map[i] = relabel_map[root];
    }

    labels.mapv_inplace(|l| relabel_map[l]);
    labels
}

/// Pixel sets of every component of at least `min_area` pixels.
///
/// Each component is a sorted list of `(x, y)`; components are sorted by
/// their first pixel, so two labelings can be compared with `==`.
pub fn component_pixels(image: &ArrayView2<f32>, thresh: f32, min_area: usize) -> Vec<Vec<(u32, u32)>> {
    let labels = connected_components(image, thresh);
    let count = labels.iter().copied().max().unwrap_or(0);
    let mut components = vec![Vec::new(); count];
    for ((y, x), &label) in labels.indexed_iter() {
        if label > 0 {
            components[label - 1].push((x as u32, y as u32));
        }
    }
    let mut components: Vec<Vec<(u32, u32)>> = components
        .into_iter()
        .filter(|c| c.len() >= min_area)
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    components.sort();
    components
}
