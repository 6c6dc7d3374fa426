//! Plain-text session analysis report.
//!
//! One file per session at `<report_dir>/<session>_analysis_report.txt`:
//! a header, one entry per processed image, then a session summary. The
//! format is for humans; nothing parses it back.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use declutter_types::message::ImageEntry;

const REPORT_SUFFIX: &str = "analysis_report.txt";
const RULE: &str = "----------------------------------------";

fn render_entry(entry: &ImageEntry, out: &mut String) {
    let _ = writeln!(out, "Capture: {}", entry.image.file_name());
    if let Some(first) = entry.crops.first() {
        let names: Vec<&str> = entry.crops.iter().map(|c| c.class_name.as_str()).collect();
        let files: Vec<&str> = entry.crops.iter().map(|c| c.file_name.as_str()).collect();
        let _ = writeln!(out, "  - Resellable Objects: {}", names.join(", "));
        let _ = writeln!(out, "  - Cropped Files: {}", files.join(", "));
        let _ = writeln!(out, "  - Location (First Item): XYXY {}", first.bbox);
        let _ = writeln!(
            out,
            "  - Processing Summary: {} items processed",
            entry.crops.len()
        );
    } else {
        let _ = writeln!(out, "  - No resellable objects found");
    }
    for o in &entry.omissions {
        let _ = writeln!(
            out,
            "  - Omitted: {} at {} ({})",
            o.class_name, o.bbox, o.reason
        );
    }
    let _ = writeln!(out, "{RULE}");
}

/// Everything needed to render one session's report.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    /// One entry per processed image, in capture order.
    pub entries: Vec<ImageEntry>,
    pub duration: Duration,
}

impl SessionReport {
    /// Distinct resellable class names across every image, lower-cased,
    /// in first-seen order. Detected but unsold classes are not counted.
    pub fn items(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in self.entries.iter().flat_map(ImageEntry::resellable_objects) {
            let name = name.to_lowercase();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }

    pub fn unique_object_types(&self) -> usize {
        self.items().len()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- Declutter Detector Analysis Report ---");
        let _ = writeln!(out);
        let _ = writeln!(out, "Session ID: {}", self.session_id);
        let _ = writeln!(
            out,
            "Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out);
        for entry in &self.entries {
            render_entry(entry, &mut out);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "--- Session Summary ---");
        let _ = writeln!(out, "Total Images Processed: {}", self.entries.len());
        let _ = writeln!(
            out,
            "Total Unique Object Types: {}",
            self.unique_object_types()
        );
        let _ = writeln!(
            out,
            "Session Duration: {:.1} seconds",
            self.duration.as_secs_f64()
        );
        out
    }
}

/// Writes session reports into one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    report_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
        }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.report_dir
            .join(format!("{session_id}_{REPORT_SUFFIX}"))
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Render and write `report`, replacing any earlier file for the session.
    pub async fn write(&self, report: &SessionReport) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.report_dir).await?;
        let path = self.path_for(&report.session_id);
        tokio::fs::write(&path, report.render()).await?;
        info!(
            session_id = %report.session_id,
            path = %path.display(),
            images = report.entries.len(),
            "report written"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use declutter_types::BoundingBox;
    use declutter_types::message::{CropOmission, CropRecord, ImageRef};

    use super::*;

    fn crop(class_name: &str, file_name: &str) -> CropRecord {
        CropRecord {
            class_name: class_name.into(),
            source: PathBuf::from("capture.jpg"),
            bbox: BoundingBox::new(0, 0, 100, 100),
            expanded: BoundingBox::new(0, 0, 130, 130),
            file_name: file_name.into(),
            area: 10_000,
            border: (30, 30),
        }
    }

    fn entry(name: &str, crops: Vec<CropRecord>) -> ImageEntry {
        ImageEntry {
            crops,
            classes: vec!["laptop".into(), "bottle".into()],
            ..ImageEntry::empty(ImageRef {
                path: PathBuf::from(name),
                captured_at_ms: 0,
            })
        }
    }

    fn report(entries: Vec<ImageEntry>) -> SessionReport {
        SessionReport {
            session_id: "s1".into(),
            generated_at: Utc::now(),
            entries,
            duration: Duration::from_millis(2500),
        }
    }

    #[test]
    fn renders_resellable_entry() {
        let text = report(vec![entry(
            "/uploads/capture.jpg",
            vec![crop("laptop", "s1_1_1_laptop.jpg")],
        )])
        .render();
        assert!(text.starts_with("--- Declutter Detector Analysis Report ---"));
        assert!(text.contains("Session ID: s1"));
        assert!(text.contains("Capture: capture.jpg"));
        assert!(text.contains("  - Resellable Objects: laptop\n"));
        assert!(text.contains("  - Cropped Files: s1_1_1_laptop.jpg"));
        assert!(text.contains("XYXY (0, 0, 100, 100)"));
        assert!(text.contains("1 items processed"));
        assert!(text.contains("Total Images Processed: 1"));
        // bottle was detected but is not resellable
        assert!(text.contains("Total Unique Object Types: 1"));
        assert!(text.contains("Session Duration: 2.5 seconds"));
        assert!(!text.contains("bottle"));
    }

    #[test]
    fn renders_empty_entry_and_omissions() {
        let mut e = entry("capture.jpg", vec![]);
        e.omissions.push(CropOmission {
            class_name: "mug".into(),
            bbox: BoundingBox::new(1, 1, 1, 1),
            reason: "degenerate box".into(),
        });
        let text = report(vec![e]).render();
        assert!(text.contains("  - No resellable objects found"));
        assert!(text.contains("  - Omitted: mug at (1, 1, 1, 1) (degenerate box)"));
        assert!(text.contains("Total Unique Object Types: 0"));
    }

    #[test]
    fn batch_counts_distinct_types_across_images() {
        let r = report(vec![
            entry("a.jpg", vec![crop("laptop", "a1.jpg"), crop("laptop", "a2.jpg")]),
            entry("b.jpg", vec![]),
            entry("c.jpg", vec![crop("Laptop", "c1.jpg"), crop("chair", "c2.jpg")]),
        ]);
        assert_eq!(r.items(), vec!["laptop", "chair"]);
        let text = r.render();
        assert!(text.contains("Capture: a.jpg"));
        assert!(text.contains("Capture: b.jpg"));
        assert!(text.contains("Capture: c.jpg"));
        assert!(text.contains("Total Images Processed: 3"));
        assert!(text.contains("Total Unique Object Types: 2"));
    }

    #[tokio::test]
    async fn write_creates_dir_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path().join("reports"));
        let path = writer.write(&report(vec![])).await.unwrap();
        assert_eq!(path, tmp.path().join("reports").join("s1_analysis_report.txt"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Total Images Processed: 0"));
    }
}
