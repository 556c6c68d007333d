use image::{imageops, RgbImage};
use tracing::instrument;

use crate::{Canvas, CoordinateSpace, Crop, PositionMap, RegionBox};

/// A canvas of packed crops and where each crop landed on it.
#[derive(Debug, Clone)]
pub struct Packed {
    pub canvas: Canvas,
    pub positions: PositionMap,
}

/// Crops sharing a vertical band of the source image.
struct Row {
    crops: Vec<Crop>,
    y_min: i32,
    y_max: i32,
}

impl Row {
    fn overlaps(&self, rect: &RegionBox) -> bool {
        self.y_min.max(rect.y1) < self.y_max.min(rect.y2)
    }

    fn width(&self) -> u32 {
        self.crops.iter().map(Crop::width).sum()
    }

    fn height(&self) -> u32 {
        self.crops.iter().map(Crop::height).max().unwrap_or(0)
    }
}

/// Groups crops into rows: each crop (taken top to bottom by source `y1`)
/// joins the first row whose vertical extent it overlaps, widening it, or
/// starts a new row. Crops within a row are ordered by source `x1`.
fn group_rows(mut crops: Vec<Crop>) -> Vec<Row> {
    crops.sort_by_key(|crop| crop.source.y1);

    let mut rows: Vec<Row> = Vec::new();
    for crop in crops {
        let source = crop.source;
        match rows.iter_mut().find(|row| row.overlaps(&source)) {
            Some(row) => {
                row.y_min = row.y_min.min(source.y1);
                row.y_max = row.y_max.max(source.y2);
                row.crops.push(crop);
            }
            None => rows.push(Row {
                crops: vec![crop],
                y_min: source.y1,
                y_max: source.y2,
            }),
        }
    }

    for row in rows.iter_mut() {
        row.crops.sort_by_key(|crop| crop.source.x1);
    }
    rows
}

/// Shelf-packs crops into a single canvas.
///
/// Rows are stacked top to bottom and crops placed side by side from x = 0
/// with no gaps. The canvas is as wide as the widest row and as tall as all
/// row heights together. Returns `None` for an empty crop list.
#[instrument(level = "debug", skip(crops), fields(crops = crops.len()))]
pub fn pack_crops(crops: Vec<Crop>) -> Option<Packed> {
    if crops.is_empty() {
        return None;
    }
    let rows = group_rows(crops);
    let width = rows.iter().map(Row::width).max().unwrap_or(0);
    let height = rows.iter().map(Row::height).sum::<u32>();
    log::debug!(
        "Packing {} rows into a {width}x{height} canvas",
        rows.len()
    );

    let mut image = RgbImage::new(width, height);
    let mut positions = PositionMap::new();
    let mut y_offset = 0u32;
    for row in &rows {
        let mut x_offset = 0u32;
        for crop in &row.crops {
            imageops::replace(&mut image, &crop.image, x_offset as i64, y_offset as i64);
            positions.push(
                crop.class,
                RegionBox::new(
                    x_offset as i32,
                    y_offset as i32,
                    (x_offset + crop.width()) as i32,
                    (y_offset + crop.height()) as i32,
                ),
            );
            x_offset += crop.width();
        }
        y_offset += row.height();
    }

    Some(Packed {
        canvas: Canvas {
            image,
            space: CoordinateSpace::Packed,
        },
        positions,
    })
}

/// Packs `long_crops` into their own strip and stacks it under `base`.
///
/// The strip's boxes are shifted down by the base height, so they never
/// intersect the base region. With no long crops `base` comes back as is;
/// with no base the strip alone is the result.
#[instrument(level = "debug", skip(base, long_crops), fields(long = long_crops.len()))]
pub fn append_long_crops(base: Option<Packed>, long_crops: Vec<Crop>) -> Option<Packed> {
    let Some(strip) = pack_crops(long_crops) else {
        return base;
    };
    let Some(mut base) = base else {
        return Some(strip);
    };

    let base_height = base.canvas.height();
    let width = base.canvas.width().max(strip.canvas.width());
    let height = base_height + strip.canvas.height();
    log::debug!("Appending long-object strip, canvas grows to {width}x{height}");

    let mut image = RgbImage::new(width, height);
    imageops::replace(&mut image, &base.canvas.image, 0, 0);
    imageops::replace(&mut image, &strip.canvas.image, 0, base_height as i64);

    let mut strip_positions = strip.positions;
    strip_positions.translate(0, base_height as i32);
    base.positions.extend(strip_positions);

    Some(Packed {
        canvas: Canvas {
            image,
            space: CoordinateSpace::Packed,
        },
        positions: base.positions,
    })
}
