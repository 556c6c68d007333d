use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::{error::Result, Collage};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// Outcome of a folder run. Failures carry the image path and the error text.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub total: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Image files directly inside `dir`, sorted by path.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect::<Vec<_>>();
    images.sort();
    Ok(images)
}

pub fn output_path(output_dir: &Path, image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    output_dir.join(format!("{stem}_segmentation.jpg"))
}

/// Builds a collage for every image in `input_dir`, writing
/// `<stem>_segmentation.jpg` files into `output_dir`. A failing image is
/// logged and counted; the batch keeps going.
#[instrument(skip(collage))]
pub fn process_folder(
    collage: &Collage,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<BatchSummary> {
    std::fs::create_dir_all(output_dir)?;
    let images = list_images(input_dir)?;
    let mut summary = BatchSummary {
        total: images.len(),
        ..BatchSummary::default()
    };
    if images.is_empty() {
        log::warn!("No images found in {}", input_dir.display());
        return Ok(summary);
    }

    let options = collage.options();
    log::info!(
        "Building collages of {:?} for the {} engine profile",
        options.target_classes,
        options.profile
    );
    for (i, image) in images.iter().enumerate() {
        let destination = output_path(output_dir, image);
        log::info!("Processing {}/{}: {}", i + 1, images.len(), image.display());
        match collage.run(image, Some(&destination)) {
            Ok(_) => {
                log::info!("Wrote {}", destination.display());
                summary.succeeded += 1;
            }
            Err(err) => {
                log::error!("Failed on {}: {err}", image.display());
                summary.failures.push((image.clone(), err.to_string()));
            }
        }
    }
    log::info!(
        "Processed {}/{} images successfully",
        summary.succeeded,
        summary.total
    );
    Ok(summary)
}
