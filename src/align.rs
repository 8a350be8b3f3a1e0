//! Alignment inspection on still images, and the output files it leaves behind

use anyhow::Context;
use opencv::core::Mat;
use robovision_cv::{
    alignment::{AlignmentInspector, AlignmentReport},
    annotate::annotate,
    utils::ImageUtils,
    Result,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// What one inspected image produced
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentRecord {
    pub image: PathBuf,
    pub annotated: PathBuf,
    pub report: AlignmentReport,
}

/// Write `<stem>_match.png` (annotated) and `<stem>_match.json` (report) into
/// `output_dir`. Returns the image path.
pub fn write_inspection(
    image: &Mat,
    report: &AlignmentReport,
    output_dir: &Path,
    stem: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).with_context(|| format!("Failed to create {:?}", output_dir))?;

    let annotated = annotate(image, report)?;
    let image_path = output_dir.join(format!("{stem}_match.png"));
    ImageUtils::save_image(&annotated, &image_path)?;

    let report_path = output_dir.join(format!("{stem}_match.json"));
    fs::write(&report_path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Failed to write {:?}", report_path))?;

    Ok(image_path)
}

/// Inspect every image in turn.
pub fn align_images(
    inspector: &AlignmentInspector,
    images: &[PathBuf],
    output_dir: &Path,
) -> Result<Vec<AlignmentRecord>> {
    let mut records = Vec::with_capacity(images.len());

    for path in images {
        let image = ImageUtils::load_color(path)?;
        let report = inspector
            .inspect(&image)
            .with_context(|| format!("Alignment failed for {:?}", path))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let annotated = write_inspection(&image, &report, output_dir, &stem)?;
        info!("{:?}: {}", path, report.summary());

        records.push(AlignmentRecord {
            image: path.clone(),
            annotated,
            report,
        });
    }

    Ok(records)
}
