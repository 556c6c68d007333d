use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use base64::Engine as _;
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ExtendedColorType, ImageEncoder, RgbImage};
use serde::Deserialize;
use tracing::instrument;

pub mod batch;
pub mod crop;
pub mod decode;
pub mod deskew;
pub mod detector;
mod error;
pub mod layout;
pub mod merge;
pub mod ocr;
pub mod orient;
pub mod overlay;
pub mod partition;
pub mod resize;
mod result;
mod util;

pub use batch::{process_folder, BatchSummary};
pub use decode::DecodeOptions;
pub use detector::{Detector, OrtDetector};
pub use error::{CollageError, OcrError, Result};
pub use ocr::{TesseractCli, TextRecognizer, TextToken};
pub use orient::{OrientOptions, Orienter};
pub use overlay::OverlayStyle;
pub use resize::EngineProfile;
pub use result::*;

pub use ort as runtime;

use crate::{
    crop::extract_crop,
    decode::decode_detections,
    layout::{append_long_crops, pack_crops},
    merge::merge_by_class,
    overlay::draw_overlay,
    partition::partition_by_aspect,
    resize::resize_for_engine,
    util::to_input_tensor,
};

/// Everything that controls a collage run besides the collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollageOptions {
    /// Classes that end up in the collage, in crop order.
    pub target_classes: Vec<RegionClass>,
    /// Move boxes wider than `long_ratio`×height into a strip at the bottom.
    pub segregate_long: bool,
    pub long_ratio: f32,
    pub auto_orient: bool,
    pub deskew: bool,
    pub blank_score_cutoff: f32,
    pub profile: EngineProfile,
    pub draw_overlay: bool,
    /// Font for overlay labels; without one only label tabs are drawn.
    pub overlay_font: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub jpeg_quality: u8,
}

impl Default for CollageOptions {
    fn default() -> Self {
        Self {
            target_classes: vec![RegionClass::Label, RegionClass::Barcode, RegionClass::Map],
            segregate_long: false,
            long_ratio: partition::DEFAULT_LONG_RATIO,
            auto_orient: true,
            deskew: true,
            blank_score_cutoff: orient::DEFAULT_BLANK_SCORE_CUTOFF,
            profile: EngineProfile::Uncapped,
            draw_overlay: false,
            overlay_font: None,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            jpeg_quality: 95,
        }
    }
}

impl CollageOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| CollageError::Config(format!("{}: {err}", path.display())))
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            input_size: self.input_size,
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        }
    }

    fn orient_options(&self) -> OrientOptions {
        OrientOptions {
            auto_orient: self.auto_orient,
            deskew: self.deskew,
            blank_score_cutoff: self.blank_score_cutoff,
        }
    }
}

pub struct CollageBuilder {
    threads: usize,
    model_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    options: CollageOptions,
}

impl CollageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    pub fn recognizer(mut self, recognizer: impl TextRecognizer + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn options(mut self, options: CollageOptions) -> Self {
        self.options = options;
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<Collage> {
        let model_path = self
            .model_path
            .unwrap_or_else(|| "models/specimen_regions.onnx".into());
        let detector = OrtDetector::init(
            model_path,
            self.threads,
            self.options.input_size,
            &self.execution_providers,
            self.cache_path,
        )?;
        let recognizer = self
            .recognizer
            .unwrap_or_else(|| Box::new(TesseractCli::default()));
        let orienter = Orienter::from_boxed(recognizer, self.options.orient_options());
        Collage::with_orienter(detector, orienter, self.options)
    }
}

impl Default for CollageBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            model_path: None,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
            recognizer: None,
            options: CollageOptions::default(),
        }
    }
}

/// Detector output for one image: pre-merge and merged boxes.
#[derive(Debug, Clone)]
pub struct Regions {
    pub raw: PositionMap,
    pub merged: PositionMap,
}

/// Turns a specimen photograph into a packed collage of its target regions.
///
/// Only the detector call is serialized; everything else runs without
/// locks, so one `Collage` can be shared across worker threads.
pub struct Collage {
    detector: Mutex<Box<dyn Detector>>,
    orienter: Orienter,
    overlay: OverlayStyle,
    options: CollageOptions,
}

impl Collage {
    pub fn new(
        detector: impl Detector + 'static,
        recognizer: impl TextRecognizer + 'static,
        options: CollageOptions,
    ) -> Result<Self> {
        let orienter = Orienter::new(recognizer, options.orient_options());
        Self::with_orienter(detector, orienter, options)
    }

    fn with_orienter(
        detector: impl Detector + 'static,
        orienter: Orienter,
        options: CollageOptions,
    ) -> Result<Self> {
        if options.input_size == 0 {
            return Err(CollageError::Config("input_size must be positive".into()));
        }
        let overlay = match &options.overlay_font {
            Some(path) => OverlayStyle::with_font_path(path)?,
            None => {
                if options.draw_overlay {
                    log::warn!("Overlay enabled without a font, boxes get untitled label tabs");
                }
                OverlayStyle::default()
            }
        };
        Ok(Self {
            detector: Mutex::new(Box::new(detector)),
            orienter,
            overlay,
            options,
        })
    }

    pub fn options(&self) -> &CollageOptions {
        &self.options
    }

    /// Runs the detector and decodes its output into per-class boxes.
    #[instrument(level = "debug", skip_all)]
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let decode = self.options.decode_options();
        let input = to_input_tensor(&DynamicImage::ImageRgb8(image.clone()), decode.input_size);
        let predictions = {
            let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
            detector.infer(input)?
        };
        Ok(decode_detections(
            predictions.view(),
            image.width(),
            image.height(),
            decode,
        ))
    }

    /// Detects and merges regions.
    pub fn regions(&self, image: &RgbImage) -> Result<Regions> {
        let raw = self
            .detect(image)?
            .into_iter()
            .map(|detection| (detection.class, detection.rect))
            .collect::<PositionMap>();
        let merged = merge_by_class(&raw);
        Ok(Regions { raw, merged })
    }

    fn crops_for(&self, image: &RgbImage, boxes: &PositionMap) -> Vec<Crop> {
        self.options
            .target_classes
            .iter()
            .flat_map(|class| boxes.get(*class).iter().map(move |rect| (*class, *rect)))
            .filter_map(|(class, rect)| extract_crop(image, rect, class))
            .map(|crop| self.orienter.orient(crop))
            .collect()
    }

    /// Builds the collage canvas and its position map, before any resize.
    #[instrument(level = "debug", skip_all)]
    pub fn compose(&self, image: &RgbImage, merged: &PositionMap) -> Result<layout::Packed> {
        let (normal_boxes, long_boxes) = if self.options.segregate_long {
            partition_by_aspect(merged, self.options.long_ratio)
        } else {
            (merged.clone(), PositionMap::new())
        };

        let normal = self.crops_for(image, &normal_boxes);
        let long = self.crops_for(image, &long_boxes);
        log::debug!("{} normal and {} long crops", normal.len(), long.len());
        #[cfg(feature = "debug")]
        dump_crops(normal.iter().chain(long.iter()));

        append_long_crops(pack_crops(normal), long).ok_or(CollageError::EmptyResult)
    }

    /// Opens `path` and runs the full pipeline on it.
    #[instrument(skip(self))]
    pub fn run(&self, path: &Path, destination: Option<&Path>) -> Result<CollageResult> {
        let image = image::open(path).map_err(|source| CollageError::Input {
            path: path.to_path_buf(),
            source,
        })?;
        self.run_image(&image, destination)
    }

    /// Runs the full pipeline on a loaded image. The encoded JPEG is written
    /// to `destination` if given, otherwise returned base64-encoded.
    #[instrument(skip(self, image, destination))]
    pub fn run_image(
        &self,
        image: &DynamicImage,
        destination: Option<&Path>,
    ) -> Result<CollageResult> {
        let image = image.to_rgb8();
        let regions = self.regions(&image)?;
        let layout::Packed {
            canvas,
            mut positions,
        } = self.compose(&image, &regions.merged)?;

        let canvas = resize_for_engine(canvas, &mut positions, self.options.profile);
        let scale = match canvas.space {
            CoordinateSpace::Resized { scale } => scale,
            CoordinateSpace::Packed => 1.0,
        };
        let pixels = if self.options.draw_overlay {
            draw_overlay(&canvas.image, &positions, &self.overlay)
        } else {
            canvas.image
        };

        let jpeg = encode_jpeg(&pixels, self.options.jpeg_quality)?;
        let image_base64 = match destination {
            Some(path) => {
                std::fs::write(path, &jpeg)?;
                log::debug!("Wrote collage to {}", path.display());
                None
            }
            None => Some(base64::engine::general_purpose::STANDARD.encode(&jpeg)),
        };

        Ok(CollageResult {
            raw_boxes: regions.raw,
            position_original: regions.merged,
            position_collage: positions,
            width: pixels.width(),
            height: pixels.height(),
            scale,
            image_base64,
        })
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(CollageError::Encoding)?;
    Ok(buffer.into_inner())
}

#[cfg(feature = "debug")]
fn dump_crops<'a>(crops: impl Iterator<Item = &'a Crop>) {
    if let Err(err) = std::fs::create_dir_all("part_images") {
        log::warn!("Cannot create part_images: {err}");
        return;
    }
    for (i, crop) in crops.enumerate() {
        if let Err(err) = crop.image.save(format!("part_images/{i}_{}.png", crop.class)) {
            log::warn!("Failed to dump crop {i}: {err}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
