//! Crop engine.
//!
//! Cuts one image per filtered detection out of the source photo, dilated
//! by a fraction of the box's own size and clamped to the image, and saves
//! it as JPEG. Failures are per item: a degenerate box, an unreadable
//! source or a failed write becomes a [`CropOmission`] and the rest of the
//! batch continues.
//!
//! All I/O here is blocking; async callers should run it on
//! `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use tracing::{debug, warn};

use declutter_types::detection::DetectionSet;
use declutter_types::message::{CropOmission, CropRecord, ImageRef};

/// Crops produced for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CropBatch {
    pub crops: Vec<CropRecord>,
    pub omissions: Vec<CropOmission>,
}

#[derive(Debug, Clone)]
pub struct CropEngine {
    crop_dir: PathBuf,
    border_fraction: f64,
}

impl CropEngine {
    pub fn new(crop_dir: impl Into<PathBuf>, border_fraction: f64) -> Self {
        Self {
            crop_dir: crop_dir.into(),
            border_fraction,
        }
    }

    pub fn crop_dir(&self) -> &Path {
        &self.crop_dir
    }

    /// `<session>_<capture_ts>_<index>_<class>.jpg`
    pub fn file_name(session_id: &str, captured_at_ms: i64, index: usize, class: &str) -> String {
        let safe: String = class
            .chars()
            .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
            .collect();
        format!("{session_id}_{captured_at_ms}_{index}_{safe}.jpg")
    }

    /// Crop every entry of `filtered` out of `image`.
    pub fn crop_all(
        &self,
        session_id: &str,
        image: &ImageRef,
        filtered: &DetectionSet,
    ) -> CropBatch {
        let mut batch = CropBatch::default();
        if filtered.is_empty() {
            return batch;
        }

        let source = match image::open(&image.path) {
            Ok(img) => img,
            Err(e) => {
                warn!(path = %image.path.display(), error = %e, "cannot read source image");
                batch.omissions = filtered
                    .iter()
                    .map(|d| CropOmission {
                        class_name: d.label.clone(),
                        bbox: d.bbox,
                        reason: format!("source image unreadable: {e}"),
                    })
                    .collect();
                return batch;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.crop_dir) {
            warn!(dir = %self.crop_dir.display(), error = %e, "cannot create crop dir");
            batch.omissions = filtered
                .iter()
                .map(|d| CropOmission {
                    class_name: d.label.clone(),
                    bbox: d.bbox,
                    reason: format!("crop dir unavailable: {e}"),
                })
                .collect();
            return batch;
        }

        for (i, entry) in filtered.iter().enumerate() {
            let index = i + 1;
            match self.crop_one(&source, session_id, image, index, &entry.label, entry.bbox) {
                Ok(record) => batch.crops.push(record),
                Err(reason) => {
                    warn!(
                        session_id = %session_id,
                        class = %entry.label,
                        bbox = %entry.bbox,
                        reason = %reason,
                        "crop failed"
                    );
                    batch.omissions.push(CropOmission {
                        class_name: entry.label.clone(),
                        bbox: entry.bbox,
                        reason,
                    });
                }
            }
        }
        batch
    }

    fn crop_one(
        &self,
        source: &DynamicImage,
        session_id: &str,
        image: &ImageRef,
        index: usize,
        class: &str,
        bbox: declutter_types::BoundingBox,
    ) -> Result<CropRecord, String> {
        if bbox.is_degenerate() {
            return Err(format!("degenerate box {bbox}"));
        }
        let (width, height) = source.dimensions();
        let expanded = bbox.expanded(self.border_fraction, width, height);
        if expanded.is_degenerate() {
            return Err(format!("box {bbox} lies outside the {width}x{height} image"));
        }

        let cropped = source.crop_imm(
            expanded.x_min as u32,
            expanded.y_min as u32,
            expanded.width() as u32,
            expanded.height() as u32,
        );
        let file_name = Self::file_name(session_id, image.captured_at_ms, index, class);
        let out = self.crop_dir.join(&file_name);
        DynamicImage::ImageRgb8(cropped.to_rgb8())
            .save(&out)
            .map_err(|e| format!("write {} failed: {e}", out.display()))?;

        debug!(
            session_id = %session_id,
            class = %class,
            original = %bbox,
            expanded = %expanded,
            file = %file_name,
            "crop saved"
        );

        Ok(CropRecord {
            class_name: class.to_string(),
            source: image.path.clone(),
            bbox,
            expanded,
            file_name,
            area: bbox.area(),
            border: bbox.border(self.border_fraction),
        })
    }
}
