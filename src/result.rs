use std::{collections::BTreeMap, fmt, str::FromStr};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::CollageError;

/// Region classes the detector was trained on, in output index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionClass {
    Ruler,
    Barcode,
    #[serde(rename = "colorcard")]
    ColorCard,
    Label,
    Map,
    Envelope,
    Photo,
    AttachedItem,
    Weights,
}

impl RegionClass {
    pub const ALL: [RegionClass; 9] = [
        RegionClass::Ruler,
        RegionClass::Barcode,
        RegionClass::ColorCard,
        RegionClass::Label,
        RegionClass::Map,
        RegionClass::Envelope,
        RegionClass::Photo,
        RegionClass::AttachedItem,
        RegionClass::Weights,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegionClass::Ruler => "ruler",
            RegionClass::Barcode => "barcode",
            RegionClass::ColorCard => "colorcard",
            RegionClass::Label => "label",
            RegionClass::Map => "map",
            RegionClass::Envelope => "envelope",
            RegionClass::Photo => "photo",
            RegionClass::AttachedItem => "attached_item",
            RegionClass::Weights => "weights",
        }
    }
}

impl fmt::Display for RegionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionClass {
    type Err = CollageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == name)
            .ok_or_else(|| CollageError::Config(format!("unknown region class `{s}`")))
    }
}

/// Axis-aligned box in whatever coordinate space its owner is in.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct RegionBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl RegionBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width().max(0) as i64 * self.height().max(0) as i64
    }

    pub fn is_degenerate(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    /// Strict interior overlap on both axes; touching edges do not count.
    pub fn overlaps(&self, other: &RegionBox) -> bool {
        self.x1 < other.x2 && self.x2 > other.x1 && self.y1 < other.y2 && self.y2 > other.y1
    }

    pub fn union(&self, other: &RegionBox) -> RegionBox {
        RegionBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn intersection_area(&self, other: &RegionBox) -> i64 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0) as i64;
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0) as i64;
        w * h
    }

    pub fn iou(&self, other: &RegionBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> RegionBox {
        RegionBox::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

impl From<[i32; 4]> for RegionBox {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<RegionBox> for [i32; 4] {
    fn from(b: RegionBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub rect: RegionBox,
    pub class: RegionClass,
    pub score: f32,
}

/// A pixel region cut out of the source image.
#[derive(Debug, Clone)]
pub struct Crop {
    pub image: RgbImage,
    /// Extent in source-image coordinates.
    pub source: RegionBox,
    pub class: RegionClass,
}

impl Crop {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Per-class boxes, each in the coordinate space of the canvas it describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionMap(BTreeMap<RegionClass, Vec<RegionBox>>);

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class: RegionClass, rect: RegionBox) {
        self.0.entry(class).or_default().push(rect);
    }

    pub fn get(&self, class: RegionClass) -> &[RegionBox] {
        self.0.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegionClass, &RegionBox)> {
        self.0
            .iter()
            .flat_map(|(class, boxes)| boxes.iter().map(move |rect| (*class, rect)))
    }

    pub fn classes(&self) -> impl Iterator<Item = (RegionClass, &[RegionBox])> {
        self.0.iter().map(|(class, boxes)| (*class, boxes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves every box by `(dx, dy)`.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        for rect in self.0.values_mut().flatten() {
            *rect = rect.translate(dx, dy);
        }
    }

    /// Appends all boxes of `other`, keeping per-class order.
    pub fn extend(&mut self, other: PositionMap) {
        for (class, boxes) in other.0 {
            self.0.entry(class).or_default().extend(boxes);
        }
    }

    pub fn map_boxes(&mut self, mut f: impl FnMut(RegionBox) -> RegionBox) {
        for rect in self.0.values_mut().flatten() {
            *rect = f(*rect);
        }
    }
}

impl FromIterator<(RegionClass, RegionBox)> for PositionMap {
    fn from_iter<T: IntoIterator<Item = (RegionClass, RegionBox)>>(iter: T) -> Self {
        let mut map = PositionMap::new();
        for (class, rect) in iter {
            map.push(class, rect);
        }
        map
    }
}

/// Which coordinate space a canvas's pixels (and its position map) are in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordinateSpace {
    Packed,
    Resized { scale: f64 },
}

#[derive(Debug, Clone)]
pub struct Canvas {
    pub image: RgbImage,
    pub space: CoordinateSpace,
}

impl Canvas {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Everything one pipeline run hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct CollageResult {
    /// Decoded detections before merging, in original-image coordinates.
    pub raw_boxes: PositionMap,
    /// Merged boxes in original-image coordinates.
    pub position_original: PositionMap,
    /// Placed boxes in final collage coordinates.
    pub position_collage: PositionMap,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_strict() {
        let a = RegionBox::new(0, 0, 10, 10);
        assert!(!a.overlaps(&RegionBox::new(10, 0, 20, 10)));
        assert!(a.overlaps(&RegionBox::new(9, 9, 20, 20)));
    }

    #[test]
    fn class_names_parse() {
        for class in RegionClass::ALL {
            assert_eq!(class.as_str().parse::<RegionClass>().unwrap(), class);
        }
        assert!("stamp".parse::<RegionClass>().is_err());
    }

    #[test]
    fn position_map_serializes_as_arrays() {
        let map: PositionMap = [(RegionClass::Label, RegionBox::new(1, 2, 3, 4))]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"label":[[1,2,3,4]]}"#);
    }
}
