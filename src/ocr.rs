use std::{
    io::{Cursor, Write},
    path::PathBuf,
    process::{Command, Stdio},
};

use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::instrument;

use crate::error::OcrError;

/// One recognized word with the engine's confidence for it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextToken {
    pub text: String,
    pub confidence: f32,
}

impl TextToken {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// Tokens with no text or a non-positive confidence carry no signal.
    pub fn has_signal(&self) -> bool {
        self.confidence > 0.0 && !self.text.is_empty()
    }
}

/// The OCR collaborator used to score crop orientations.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextToken>, OcrError>;
}

impl<F> TextRecognizer for F
where
    F: Fn(&RgbImage) -> Result<Vec<TextToken>, OcrError> + Send + Sync,
{
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextToken>, OcrError> {
        self(image)
    }
}

/// Runs the `tesseract` executable on a grayscale copy of the image and reads
/// word confidences from its TSV output.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    args: Vec<String>,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            args: ["--oem", "1", "--psm", "6"].map(String::from).to_vec(),
        }
    }
}

impl TesseractCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = path.into();
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl TextRecognizer for TesseractCli {
    #[instrument(level = "trace", skip(self, image))]
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextToken>, OcrError> {
        let gray = DynamicImage::ImageRgb8(image.clone()).into_luma8();
        let mut png = Vec::new();
        gray.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut child = Command::new(&self.binary)
            .arg("stdin")
            .arg("stdout")
            .args(&self.args)
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Other("tesseract stdin unavailable".into()))?
            .write_all(&png)?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(OcrError::Status {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses tesseract TSV output into tokens. Rows without a parseable
/// confidence get `-1`, matching tesseract's own "no word" marker.
pub fn parse_tsv(tsv: &str) -> Vec<TextToken> {
    let mut lines = tsv.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns = header.split('\t').collect::<Vec<_>>();
    let conf_col = columns.iter().position(|c| *c == "conf").unwrap_or(10);
    let text_col = columns.iter().position(|c| *c == "text").unwrap_or(11);

    lines
        .map(|line| line.split('\t').collect::<Vec<_>>())
        .filter(|fields| fields.len() > conf_col)
        .map(|fields| {
            let confidence = fields[conf_col].trim().parse::<f32>().unwrap_or(-1.0);
            let text = fields.get(text_col).map(|t| t.trim()).unwrap_or_default();
            TextToken::new(text, confidence)
        })
        .collect()
}
