//! Per-character narration timestamps.
//!
//! Speech synthesis reports one `(character, start, end)` entry for every
//! character of the exact text it was given. The table is validated once on
//! construction and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::error::AlignmentError;

/// Parallel arrays of characters and their start/end times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimingTable")]
pub struct CharacterTimingTable {
    characters: Vec<char>,
    #[serde(rename = "character_start_times_seconds")]
    start_times: Vec<f64>,
    #[serde(rename = "character_end_times_seconds")]
    end_times: Vec<f64>,
}

/// Unvalidated wire shape (field names follow the common TTS alignment payload)
#[derive(Debug, Deserialize)]
struct RawTimingTable {
    characters: Vec<char>,
    #[serde(alias = "start_times")]
    character_start_times_seconds: Vec<f64>,
    #[serde(alias = "end_times")]
    character_end_times_seconds: Vec<f64>,
}

impl TryFrom<RawTimingTable> for CharacterTimingTable {
    type Error = AlignmentError;

    fn try_from(raw: RawTimingTable) -> Result<Self, Self::Error> {
        Self::new(
            raw.characters,
            raw.character_start_times_seconds,
            raw.character_end_times_seconds,
        )
    }
}

impl CharacterTimingTable {
    /// Build a table, rejecting arrays of unequal length or non-finite times
    pub fn new(
        characters: Vec<char>,
        start_times: Vec<f64>,
        end_times: Vec<f64>,
    ) -> Result<Self, AlignmentError> {
        if characters.len() != start_times.len() || characters.len() != end_times.len() {
            return Err(AlignmentError::RaggedTable {
                characters: characters.len(),
                starts: start_times.len(),
                ends: end_times.len(),
            });
        }

        if let Some(index) = start_times
            .iter()
            .zip(&end_times)
            .position(|(start, end)| !start.is_finite() || !end.is_finite())
        {
            return Err(AlignmentError::NonFiniteTime { index });
        }

        Ok(Self {
            characters,
            start_times,
            end_times,
        })
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn characters(&self) -> &[char] {
        &self.characters
    }

    pub fn start_times(&self) -> &[f64] {
        &self.start_times
    }

    pub fn end_times(&self) -> &[f64] {
        &self.end_times
    }

    /// The text the table was synthesized from
    pub fn text(&self) -> String {
        self.characters.iter().collect()
    }

    /// Time between the first and last character onsets
    pub fn onset_span(&self) -> f64 {
        match (self.start_times.first(), self.start_times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// End time of the final character (total narration length)
    pub fn narration_end(&self) -> f64 {
        self.end_times.last().copied().unwrap_or(0.0)
    }
}
