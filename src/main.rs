use std::{path::PathBuf, process::ExitCode, time::Instant};

use clap::Parser;
use specimen_collage::{
    process_folder, CollageBuilder, CollageOptions, EngineProfile, RegionClass, TesseractCli,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Packs the labelled regions of specimen photographs into collage images.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Folder with specimen images.
    input: PathBuf,
    /// Folder for `<stem>_segmentation.jpg` outputs.
    output: PathBuf,
    /// Region detector ONNX model.
    #[arg(long, default_value = "models/specimen_regions.onnx")]
    model: PathBuf,
    /// JSON options file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Comma-separated classes to include, e.g. `label,map`.
    #[arg(long, value_delimiter = ',', value_parser = parse_class)]
    classes: Option<Vec<RegionClass>>,
    /// Engine size profile: uncapped (a, gemini), long-side-1568 (b, claude),
    /// long-side-2048-short-side-768 (c, gpt).
    #[arg(long, value_parser = parse_profile)]
    profile: Option<EngineProfile>,
    /// Put boxes wider than this many heights into a strip at the bottom.
    #[arg(long)]
    long_ratio: Option<f32>,
    #[arg(long)]
    no_orient: bool,
    #[arg(long)]
    no_deskew: bool,
    #[arg(long)]
    overlay: bool,
    /// TTF/OTF font for overlay labels; implies `--overlay`.
    #[arg(long)]
    overlay_font: Option<PathBuf>,
    #[arg(long)]
    tesseract: Option<PathBuf>,
    /// Comma-separated tesseract options, e.g. `--tesseract-args=--oem,1,--psm,4`.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    tesseract_args: Option<Vec<String>>,
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

fn parse_class(value: &str) -> Result<RegionClass, String> {
    value.parse().map_err(|err: specimen_collage::CollageError| err.to_string())
}

fn parse_profile(value: &str) -> Result<EngineProfile, String> {
    value.parse().map_err(|err: specimen_collage::CollageError| err.to_string())
}

fn options(args: &Args) -> specimen_collage::Result<CollageOptions> {
    let mut options = match &args.config {
        Some(path) => CollageOptions::from_json_file(path)?,
        None => CollageOptions::default(),
    };
    if let Some(classes) = &args.classes {
        options.target_classes = classes.clone();
    }
    if let Some(profile) = args.profile {
        options.profile = profile;
    }
    if let Some(ratio) = args.long_ratio {
        options.segregate_long = true;
        options.long_ratio = ratio;
    }
    options.auto_orient &= !args.no_orient;
    options.deskew &= !args.no_deskew;
    if let Some(font) = &args.overlay_font {
        options.overlay_font = Some(font.clone());
        options.draw_overlay = true;
    }
    options.draw_overlay |= args.overlay;
    Ok(options)
}

fn recognizer(args: &Args) -> TesseractCli {
    let mut tesseract = TesseractCli::new();
    if let Some(binary) = &args.tesseract {
        tesseract = tesseract.binary(binary);
    }
    if let Some(extra) = &args.tesseract_args {
        tesseract = tesseract.args(extra);
    }
    tesseract
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let run = || -> specimen_collage::Result<_> {
        let options = options(&args)?;
        let collage = CollageBuilder::new()
            .model(&args.model)
            .threads(args.threads)
            .recognizer(recognizer(&args))
            .options(options)
            .build()?;
        process_folder(&collage, &args.input, &args.output)
    };

    let start = Instant::now();
    match run() {
        Ok(summary) => {
            log::info!(
                "Done in {:?}: {}/{} succeeded",
                start.elapsed(),
                summary.succeeded,
                summary.total
            );
            if summary.failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
