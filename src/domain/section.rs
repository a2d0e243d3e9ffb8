//! Sections of a long-form video.
//!
//! A long-form run plans a handful of sections up front and then carries
//! each one through its own script, narration, timing, images and clips.
//! Every section ends as a standalone video with its own audio.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::plan::ImagePlan;
use super::script::ScriptSegment;
use super::timing::CharacterTimingTable;

/// What one section covers, as planned before any script is written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionOutline {
    pub name: String,
    pub purpose: String,
    #[serde(default)]
    pub directives: Vec<String>,
    #[serde(default)]
    pub talking_points: Vec<String>,
}

/// One section and everything produced for it so far
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub outline: SectionOutline,
    pub script: Option<String>,
    pub segments: Option<Vec<ScriptSegment>>,
    pub narration_audio: Option<PathBuf>,
    pub timing_table: Option<CharacterTimingTable>,
    pub image_plans: Option<Vec<ImagePlan>>,
    /// Image prompts per segment of this section
    pub image_prompts: Option<Vec<Vec<String>>>,
    pub image_paths: Option<Vec<Vec<PathBuf>>>,
    pub clip_paths: Option<Vec<PathBuf>>,
    /// Clips composed under this section's narration
    pub video: Option<PathBuf>,
}

impl Section {
    pub fn new(outline: SectionOutline) -> Self {
        Self {
            outline,
            script: None,
            segments: None,
            narration_audio: None,
            timing_table: None,
            image_plans: None,
            image_prompts: None,
            image_paths: None,
            clip_paths: None,
            video: None,
        }
    }

    /// Every segment carries a timing
    pub fn is_aligned(&self) -> bool {
        self.segments
            .as_ref()
            .map(|segments| !segments.is_empty() && segments.iter().all(|s| s.timing.is_some()))
            .unwrap_or(false)
    }

    /// Narration seconds covered by this section's timing table
    pub fn narration_seconds(&self) -> Option<f64> {
        self.timing_table.as_ref().map(|t| t.narration_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SegmentTiming;

    fn outline() -> SectionOutline {
        SectionOutline {
            name: "Anatomy".to_string(),
            purpose: "Introduce the hearts".to_string(),
            directives: Vec::new(),
            talking_points: vec!["three hearts".to_string()],
        }
    }

    #[test]
    fn test_alignment_needs_every_segment() {
        let mut section = Section::new(outline());
        assert!(!section.is_aligned());

        section.segments = Some(vec![
            ScriptSegment::new("One.", "One.").with_timing(SegmentTiming::new(0.0, 1.0)),
            ScriptSegment::new("Two.", "Two."),
        ]);
        assert!(!section.is_aligned());

        section.segments = Some(vec![
            ScriptSegment::new("One.", "One.").with_timing(SegmentTiming::new(0.0, 1.0))
        ]);
        assert!(section.is_aligned());
    }

    #[test]
    fn test_outline_lists_default_empty() {
        let outline: SectionOutline =
            serde_json::from_str(r#"{"name": "Blood", "purpose": "Explain copper"}"#).unwrap();
        assert!(outline.directives.is_empty());
        assert!(outline.talking_points.is_empty());
    }
}
