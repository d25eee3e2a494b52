// ============================================================================
// LayerFE CLI: headless compositing via command-line arguments
// ============================================================================
//
// Usage examples:
//   layerfe -i base.png overlay.png -o out.png
//   layerfe -i "shots/*.jpg" --width 1920 --height 1080 --placement fit -o collage.png
//   layerfe -i a.png b.png --blend-area 40 --blend-mode multiply --mask keep.png -o out.png
//   layerfe -i a.png b.png -o out.png --session out.lfe
//
// Every input becomes one layer, stacked in argument order. All work runs
// synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use image::imageops::FilterType;

use crate::canvas::OutputArea;
use crate::editor::Editor;
use crate::error::{EngineError, Result};
use crate::io::{encode_session, load_image_file};
use crate::mask::{MaskProvider, MaskRaster};
use crate::ops::blend::BlendMode;
use crate::ops::canvas_ops::Placement;
use crate::settings::{CacheExecution, EngineSettings, PersistMode};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlacementArg {
    Center,
    Fit,
    Origin,
}

impl PlacementArg {
    fn to_placement(self, area: &OutputArea) -> Placement {
        match self {
            PlacementArg::Center => Placement::Center,
            PlacementArg::Fit => Placement::Fit,
            PlacementArg::Origin => Placement::At(egui::pos2(area.x, area.y)),
        }
    }
}

/// LayerFE headless compositor.
#[derive(Parser, Debug)]
#[command(
    name = "layerfe",
    about = "Stack images as layers and export the flattened output area",
    long_about = "Load images as layers, optionally feather and blend them, apply a mask\n\
                  and write the flattened output area.\n\n\
                  Example:\n  \
                  layerfe -i base.png overlay.png --blend-area 30 -o out.png"
)]
pub struct CliArgs {
    /// Input image(s), bottom layer first. Glob patterns accepted (e.g. "*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output image path; the format follows the extension.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Output area width. Defaults to the first input's width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Output area height. Defaults to the first input's height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Where each layer lands inside the output area.
    #[arg(long, value_enum, default_value_t = PlacementArg::Center)]
    pub placement: PlacementArg,

    /// Feather intensity (0-100) for every layer above the bottom one.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub blend_area: u8,

    /// Blend mode for every layer above the bottom one (e.g. multiply, screen).
    #[arg(long, value_name = "MODE")]
    pub blend_mode: Option<String>,

    /// Grayscale mask image; white keeps, black removes. Resized to the output area.
    #[arg(long, value_name = "FILE")]
    pub mask: Option<PathBuf>,

    /// Also write the session blob here.
    #[arg(long, value_name = "FILE")]
    pub session: Option<PathBuf>,

    /// Write debug-level events to the session log and print timing.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the composition and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }
    let blend_mode = match args.blend_mode.as_deref().map(BlendMode::from_name) {
        None => None,
        Some(Some(mode)) => Some(mode),
        Some(None) => {
            let known: Vec<&str> = BlendMode::all().iter().map(|m| m.name()).collect();
            eprintln!("error: unknown blend mode. Known modes: {}", known.join(", "));
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    match compose(&args, &inputs, blend_mode) {
        Ok((w, h)) => {
            if args.verbose {
                println!(
                    "wrote {} ({}x{}, {} layer(s)) in {:.1} ms",
                    args.output.display(),
                    w,
                    h,
                    inputs.len(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            tracing::error!(error = %e, "CLI composition failed");
            ExitCode::FAILURE
        }
    }
}

fn compose(args: &CliArgs, inputs: &[PathBuf], blend_mode: Option<BlendMode>) -> Result<(u32, u32)> {
    let settings = EngineSettings {
        cache_execution: CacheExecution::Inline,
        persist_mode: PersistMode::Sync,
        ..EngineSettings::load()
    };
    let mut editor = Editor::new(settings);

    let mut images = Vec::with_capacity(inputs.len());
    for path in inputs {
        images.push((path, load_image_file(path)?));
    }
    let (first_w, first_h) = images.first().map(|(_, img)| img.dimensions()).unwrap_or((0, 0));
    let area = OutputArea::new(
        0.0,
        0.0,
        args.width.unwrap_or(first_w) as f32,
        args.height.unwrap_or(first_h) as f32,
    );
    editor.set_output_area(area)?;

    for (i, (path, image)) in images.into_iter().enumerate() {
        let key = path.to_string_lossy().to_string();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Layer".to_string());
        let id = editor.add_layer(image, &key, &name, args.placement.to_placement(&area))?;
        if i > 0 {
            editor.set_blend_area(id, args.blend_area)?;
            if let Some(mode) = blend_mode {
                editor.set_blend_mode(id, mode)?;
            }
        }
    }

    let with_mask = match &args.mask {
        Some(path) => {
            let raster = load_mask(path, &area)?;
            let mut mask = MaskRaster::for_output_area(&area);
            mask.set(raster);
            editor = editor.with_mask(mask);
            true
        }
        None => false,
    };

    let image = editor.export_flattened(with_mask, Instant::now())?;
    image.save(&args.output)?;

    if let Some(session_path) = &args.session {
        let bytes = encode_session(&editor.to_persisted())?;
        std::fs::write(session_path, bytes)?;
    }
    Ok(image.dimensions())
}

fn load_mask(path: &Path, area: &OutputArea) -> Result<image::GrayImage> {
    let gray = image::open(path)?.to_luma8();
    let (w, h) = (area.width.round() as u32, area.height.round() as u32);
    if w == 0 || h == 0 {
        return Err(EngineError::degenerate("mask", area.width, area.height));
    }
    if gray.dimensions() == (w, h) {
        return Ok(gray);
    }
    Ok(image::imageops::resize(&gray, w, h, FilterType::Triangle))
}

/// Expand glob patterns and literal paths into a deduplicated list of files.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);
        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn resolve_inputs_expands_globs_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let literal = dir.path().join("a.png").to_string_lossy().to_string();
        let pattern = dir.path().join("*.png").to_string_lossy().to_string();
        let found = resolve_inputs(&[literal, pattern]);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().is_some_and(|e| e == "png")));
    }

    #[test]
    fn compose_writes_flattened_output() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.png");
        let top = dir.path().join("top.png");
        RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255])).save(&base).unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])).save(&top).unwrap();
        let output = dir.path().join("out.png");
        let session = dir.path().join("out.lfe");

        let args = CliArgs::parse_from([
            "layerfe",
            "-i",
            base.to_str().unwrap(),
            top.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--session",
            session.to_str().unwrap(),
        ]);
        let inputs = resolve_inputs(&args.input);
        assert_eq!(compose(&args, &inputs, None).unwrap(), (8, 8));

        let out = image::open(&output).unwrap().to_rgba8();
        assert_eq!(out.get_pixel(4, 4), &Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert!(session.exists());
    }
}
