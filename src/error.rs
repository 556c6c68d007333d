use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = CollageError> = std::result::Result<T, E>;

/// Per-image fatal errors. A batch caller logs these and moves on.
#[derive(Debug, Error)]
pub enum CollageError {
    #[error("failed to read image at {path:?}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no crops survived filtering, nothing to build a collage from")]
    EmptyResult,
    #[error("failed to encode collage: {0}")]
    Encoding(#[source] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("unexpected detector output: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failures of the OCR collaborator. These never abort a pipeline run.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to run OCR process: {0}")]
    Io(#[from] std::io::Error),
    #[error("OCR process exited with {status}: {stderr}")]
    Status { status: String, stderr: String },
    #[error("failed to encode OCR input: {0}")]
    Encode(#[from] image::ImageError),
    #[error("{0}")]
    Other(String),
}
