//! Script segments and their narration timing.

use serde::{Deserialize, Serialize};

/// Ordered unit of narration text mapped to one or more images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// Text as written for the viewer
    pub text: String,

    /// Variant with delivery cues, used for synthesis when enhancement is on
    pub enhanced_text: String,

    /// Filled in once the segment has been aligned to the narration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<SegmentTiming>,
}

impl ScriptSegment {
    pub fn new(text: impl Into<String>, enhanced_text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            enhanced_text: enhanced_text.into(),
            timing: None,
        }
    }

    /// The variant that is sent to speech synthesis
    pub fn narration_text(&self, use_enhanced: bool) -> &str {
        if use_enhanced {
            &self.enhanced_text
        } else {
            &self.text
        }
    }

    /// Length in characters of the narrated variant
    pub fn character_length(&self, use_enhanced: bool) -> usize {
        self.narration_text(use_enhanced).chars().count()
    }

    pub fn with_timing(mut self, timing: SegmentTiming) -> Self {
        self.timing = Some(timing);
        self
    }
}

/// Where a segment sits on the narration timeline, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentTiming {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

impl SegmentTiming {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            duration: end_time - start_time,
        }
    }
}
