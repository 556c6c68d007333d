use tracing::instrument;

use crate::{PositionMap, RegionBox};

/// Replaces every group of transitively overlapping boxes by its bounding
/// union. Output boxes are pairwise non-overlapping.
///
/// Each incoming box absorbs every already-merged box it overlaps, growing
/// as it goes, until nothing in the merged set touches it. The merged set is
/// therefore disjoint after every insertion and the final partition is the
/// same fixed point a full rescan-after-every-merge loop reaches.
pub fn merge_overlapping(boxes: &[RegionBox]) -> Vec<RegionBox> {
    let mut merged: Vec<RegionBox> = Vec::with_capacity(boxes.len());
    for rect in boxes {
        let mut current = *rect;
        while let Some(index) = merged.iter().position(|other| other.overlaps(&current)) {
            current = current.union(&merged.remove(index));
        }
        merged.push(current);
    }
    merged
}

/// Runs [`merge_overlapping`] independently for every class.
#[instrument(level = "debug", skip(boxes))]
pub fn merge_by_class(boxes: &PositionMap) -> PositionMap {
    let mut merged = PositionMap::new();
    for (class, rects) in boxes.classes() {
        let class_merged = merge_overlapping(rects);
        log::debug!(
            "Merged {} {class} boxes into {}",
            rects.len(),
            class_merged.len()
        );
        for rect in class_merged {
            merged.push(class, rect);
        }
    }
    merged
}
