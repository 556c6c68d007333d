use std::{fmt, str::FromStr};

use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{Canvas, CollageError, CoordinateSpace, PositionMap, RegionBox};

/// Size limits of the vision engine the collage is meant for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineProfile {
    /// No limits; the canvas is sent as packed.
    #[default]
    #[serde(rename = "uncapped", alias = "a", alias = "gemini")]
    Uncapped,
    /// Longer side at most 1568 px.
    #[serde(rename = "long-side-1568", alias = "b", alias = "claude")]
    LongSide1568,
    /// Longer side at most 2048 px, then shorter side at most 768 px.
    #[serde(rename = "long-side-2048-short-side-768", alias = "c", alias = "gpt")]
    LongSide2048ShortSide768,
}

/// Target size of one resize step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeStep {
    pub factor: f64,
    pub width: u32,
    pub height: u32,
}

/// The planned resize: individual steps plus their product.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizePlan {
    pub steps: Vec<ResizeStep>,
    pub scale: f64,
}

impl ResizePlan {
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.steps
            .last()
            .map_or((width, height), |step| (step.width, step.height))
    }
}

fn step(factor: f64, width: u32, height: u32) -> ResizeStep {
    ResizeStep {
        factor,
        width: ((width as f64 * factor) as u32).max(1),
        height: ((height as f64 * factor) as u32).max(1),
    }
}

impl EngineProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineProfile::Uncapped => "uncapped",
            EngineProfile::LongSide1568 => "long-side-1568",
            EngineProfile::LongSide2048ShortSide768 => "long-side-2048-short-side-768",
        }
    }

    /// Works out the resize steps for a `width`×`height` canvas.
    pub fn plan(self, width: u32, height: u32) -> ResizePlan {
        let mut steps = Vec::new();
        let mut scale = 1.0;
        let (mut w, mut h) = (width, height);
        match self {
            EngineProfile::Uncapped => {}
            EngineProfile::LongSide1568 => {
                let longest = w.max(h);
                if longest > 1568 {
                    let first = step(1568.0 / longest as f64, w, h);
                    scale = first.factor;
                    steps.push(first);
                }
            }
            EngineProfile::LongSide2048ShortSide768 => {
                let longest = w.max(h);
                if longest > 2048 {
                    let first = step(2048.0 / longest as f64, w, h);
                    scale = first.factor;
                    (w, h) = (first.width, first.height);
                    steps.push(first);
                }
                let shortest = w.min(h);
                if shortest > 768 {
                    let second = step(768.0 / shortest as f64, w, h);
                    scale *= second.factor;
                    steps.push(second);
                }
            }
        }
        ResizePlan { steps, scale }
    }
}

impl fmt::Display for EngineProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineProfile {
    type Err = CollageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "gemini" | "uncapped" => Ok(EngineProfile::Uncapped),
            "b" | "claude" | "long-side-1568" => Ok(EngineProfile::LongSide1568),
            "c" | "gpt" | "long-side-2048-short-side-768" => {
                Ok(EngineProfile::LongSide2048ShortSide768)
            }
            other => Err(CollageError::Config(format!("unknown engine profile `{other}`"))),
        }
    }
}

/// Scales one box by `scale`, truncating, and keeps it inside the canvas.
pub fn scale_box(rect: RegionBox, scale: f64, width: u32, height: u32) -> RegionBox {
    let x = |v: i32| ((v as f64 * scale) as i32).clamp(0, width as i32);
    let y = |v: i32| ((v as f64 * scale) as i32).clamp(0, height as i32);
    RegionBox::new(x(rect.x1), y(rect.y1), x(rect.x2), y(rect.y2))
}

/// Resizes the canvas for `profile` and applies the same overall scale to
/// every box in `positions`.
#[instrument(level = "debug", skip(canvas, positions))]
pub fn resize_for_engine(
    canvas: Canvas,
    positions: &mut PositionMap,
    profile: EngineProfile,
) -> Canvas {
    let plan = profile.plan(canvas.width(), canvas.height());
    if plan.steps.is_empty() {
        return canvas;
    }
    let (target_width, target_height) = plan.target_size(canvas.width(), canvas.height());
    log::debug!(
        "{profile} profile resizes {}x{} to {target_width}x{target_height} (scale {})",
        canvas.width(),
        canvas.height(),
        plan.scale
    );

    let mut image = canvas.image;
    for step in &plan.steps {
        log::debug!(
            "Resizing collage from {}x{} to {}x{} (factor {})",
            image.width(),
            image.height(),
            step.width,
            step.height,
            step.factor
        );
        image = imageops::resize(&image, step.width, step.height, FilterType::Triangle);
    }

    let (width, height) = image.dimensions();
    positions.map_boxes(|rect| scale_box(rect, plan.scale, width, height));
    Canvas {
        image,
        space: CoordinateSpace::Resized { scale: plan.scale },
    }
}
