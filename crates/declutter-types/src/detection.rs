//! Detection sets and the resellability filter.
//!
//! A [`DetectionSet`] is the per-image mapping from [`BoundingBox`] to class
//! label. It keeps insertion order, which is what makes the
//! largest-instance tie-break deterministic: when two boxes of one class
//! have the same area, the one inserted first wins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::{BoundingBox, BoxParseError};

/// One raw detector hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub bbox: BoundingBox,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// A labelled box inside a [`DetectionSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledBox {
    pub bbox: BoundingBox,
    pub label: String,
}

/// Insertion-ordered map from box to class label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionSet {
    entries: Vec<LabeledBox>,
}

impl DetectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from detector hits, discarding those below `threshold`.
    pub fn from_detections<'a, I>(detections: I, threshold: f32) -> Self
    where
        I: IntoIterator<Item = &'a Detection>,
    {
        let mut set = Self::new();
        for d in detections {
            if d.confidence >= threshold {
                set.insert(d.bbox, d.label.clone());
            }
        }
        set
    }

    /// Build a set from the legacy keyed form (`"(x1, y1, x2, y2)" -> label`).
    ///
    /// Keys that do not parse are logged and returned alongside the set
    /// instead of being inserted; they count as area-0 parse failures.
    pub fn from_keyed<I, K, V>(pairs: I) -> (Self, Vec<BoxParseError>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut set = Self::new();
        let mut failures = Vec::new();
        for (key, label) in pairs {
            match key.as_ref().parse::<BoundingBox>() {
                Ok(bbox) => set.insert(bbox, label.into()),
                Err(e) => {
                    warn!(key = %key.as_ref(), "failed to parse box coordinates, area treated as 0");
                    failures.push(e);
                }
            }
        }
        (set, failures)
    }

    /// Insert a box. A box already present keeps its position and takes
    /// the new label.
    pub fn insert(&mut self, bbox: BoundingBox, label: impl Into<String>) {
        let label = label.into();
        match self.entries.iter_mut().find(|e| e.bbox == bbox) {
            Some(existing) => existing.label = label,
            None => self.entries.push(LabeledBox { bbox, label }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabeledBox> {
        self.entries.iter()
    }

    pub fn label_of(&self, bbox: &BoundingBox) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| &e.bbox == bbox)
            .map(|e| e.label.as_str())
    }

    /// Distinct class labels in order of first appearance.
    pub fn unique_classes(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for e in &self.entries {
            if !out.contains(&e.label) {
                out.push(e.label.clone());
            }
        }
        out
    }

    /// Keep only the largest box per class label.
    ///
    /// Strictly-greater comparison means equal areas resolve to the first
    /// inserted box. The result preserves the winners' insertion order.
    pub fn largest_instances(&self) -> Self {
        let mut winners: Vec<&LabeledBox> = Vec::new();
        for e in &self.entries {
            match winners.iter_mut().find(|w| w.label == e.label) {
                Some(w) if e.bbox.area() > w.bbox.area() => *w = e,
                Some(_) => {}
                None => winners.push(e),
            }
        }
        let keep: Vec<BoundingBox> = winners.iter().map(|w| w.bbox).collect();
        Self {
            entries: self
                .entries
                .iter()
                .filter(|e| keep.contains(&e.bbox))
                .cloned()
                .collect(),
        }
    }

    /// Entries whose label is in `resellable` (case-insensitive).
    pub fn filter_resellable(&self, resellable: &ResellableSet) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|e| resellable.contains(&e.label))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<(BoundingBox, String)> for DetectionSet {
    fn from_iter<T: IntoIterator<Item = (BoundingBox, String)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (bbox, label) in iter {
            set.insert(bbox, label);
        }
        set
    }
}

/// Lower-cased class names judged worth reselling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResellableSet(BTreeSet<String>);

impl ResellableSet {
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            labels
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(&label.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
