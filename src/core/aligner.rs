//! Timeline alignment.
//!
//! Narration synthesis returns one timestamp per character of the text it was
//! given. The aligner walks that table with a cursor to recover when each
//! script segment starts and ends in the audio. Segments are separated in the
//! synthesized text by `join_width` delimiter characters, and the silence
//! between segments is absorbed into the preceding segment so the timings
//! tile the narration without gaps.

use crate::domain::{CharacterTimingTable, ScriptSegment, SegmentTiming};
use crate::error::AlignmentError;

/// Delimiter characters inserted between segments when none is configured
pub const DEFAULT_JOIN_WIDTH: usize = 1;

/// Compute per-segment timing from a character timing table.
///
/// `segment_lengths` are character counts of each segment, in narration
/// order. The table must cover every segment plus `join_width` delimiters
/// between consecutive segments.
pub fn align(
    table: &CharacterTimingTable,
    segment_lengths: &[usize],
    join_width: usize,
) -> Result<Vec<SegmentTiming>, AlignmentError> {
    if table.is_empty() {
        return Err(AlignmentError::EmptyTable);
    }
    if let Some(index) = segment_lengths.iter().position(|&len| len == 0) {
        return Err(AlignmentError::EmptySegment { index });
    }

    let delimiters = join_width * segment_lengths.len().saturating_sub(1);
    let required = segment_lengths.iter().sum::<usize>() + delimiters;
    if required > table.len() {
        return Err(AlignmentError::Overflow {
            required,
            available: table.len(),
        });
    }

    let starts = table.start_times();
    let mut timings = Vec::with_capacity(segment_lengths.len());
    let mut cursor = 0usize;

    for &length in segment_lengths {
        let start_index = if cursor == 0 { 0 } else { cursor + join_width };
        let end_index = start_index + length - 1;

        let start_time = starts[start_index];
        let mut end_time = starts[end_index];

        // Pause before the next segment belongs to this one.
        let next_start = end_index + join_width + 1;
        if next_start < starts.len() {
            end_time += starts[next_start] - starts[end_index];
        }

        timings.push(SegmentTiming::new(start_time, end_time));

        cursor = if end_index + 1 < starts.len() {
            end_index + 1
        } else {
            0
        };
    }

    Ok(timings)
}

/// Fill in `timing` on every segment.
pub fn align_segments(
    table: &CharacterTimingTable,
    segments: &[ScriptSegment],
    use_enhanced: bool,
    join_width: usize,
) -> Result<Vec<ScriptSegment>, AlignmentError> {
    let lengths: Vec<usize> = segments
        .iter()
        .map(|s| s.character_length(use_enhanced))
        .collect();

    let timings = align(table, &lengths, join_width)?;

    Ok(segments
        .iter()
        .cloned()
        .zip(timings)
        .map(|(segment, timing)| segment.with_timing(timing))
        .collect())
}

/// The exact text handed to narration synthesis.
///
/// Segments are joined by `join_width` spaces so the character table lines up
/// with [`align`].
pub fn narration_text(segments: &[ScriptSegment], use_enhanced: bool, join_width: usize) -> String {
    let delimiter = " ".repeat(join_width);
    segments
        .iter()
        .map(|s| s.narration_text(use_enhanced))
        .collect::<Vec<_>>()
        .join(&delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evenly spaced table: character i starts at i * step.
    fn table_for(text: &str, step: f64) -> CharacterTimingTable {
        let characters: Vec<char> = text.chars().collect();
        let starts: Vec<f64> = (0..characters.len()).map(|i| i as f64 * step).collect();
        let ends: Vec<f64> = starts.iter().map(|s| s + step).collect();
        CharacterTimingTable::new(characters, starts, ends).unwrap()
    }

    #[test]
    fn test_two_segments_single_space() {
        // "Hi there" + " " + "Bye now" = 8 + 1 + 7
        let table = table_for("Hi there Bye now", 0.1);
        let timings = align(&table, &[8, 7], 1).unwrap();

        assert_eq!(timings.len(), 2);
        assert!((timings[0].start_time - 0.0).abs() < 1e-9);
        // end absorbs the gap up to the next segment's first character (index 9)
        assert!((timings[0].end_time - 0.9).abs() < 1e-9);
        assert!((timings[1].start_time - 0.9).abs() < 1e-9);
        // last segment ends at the onset of its final character
        assert!((timings[1].end_time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_durations_sum_to_onset_span() {
        let segments = ["One fish.", "Two fish.", "Red fish, blue fish."];
        let text = segments.join(" ");
        let table = table_for(&text, 0.07);
        let lengths: Vec<usize> = segments.iter().map(|s| s.chars().count()).collect();

        let timings = align(&table, &lengths, 1).unwrap();
        let total: f64 = timings.iter().map(|t| t.duration).sum();

        assert!((total - table.onset_span()).abs() < 1e-9);
        for pair in timings.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time + 1e-9);
        }
    }

    #[test]
    fn test_wider_join() {
        let table = table_for("abc--de", 1.0);
        let timings = align(&table, &[3, 2], 2).unwrap();

        assert_eq!(timings[0].start_time, 0.0);
        assert_eq!(timings[0].end_time, 5.0);
        assert_eq!(timings[1].start_time, 5.0);
        assert_eq!(timings[1].end_time, 6.0);
    }

    #[test]
    fn test_error_cases() {
        let table = table_for("abc def", 0.1);

        assert_eq!(
            align(&table, &[3, 0], 1),
            Err(AlignmentError::EmptySegment { index: 1 })
        );
        assert_eq!(
            align(&table, &[3, 4], 1),
            Err(AlignmentError::Overflow {
                required: 8,
                available: 7
            })
        );

        let empty = CharacterTimingTable::new(vec![], vec![], vec![]).unwrap();
        assert_eq!(align(&empty, &[1], 1), Err(AlignmentError::EmptyTable));
    }

    #[test]
    fn test_narration_text_matches_alignment() {
        let segments = vec![
            ScriptSegment::new("Octopuses have three hearts.", "[curious] Octopuses have three hearts."),
            ScriptSegment::new("Two pump blood to the gills.", "Two pump blood to the gills."),
        ];

        let text = narration_text(&segments, true, 2);
        assert_eq!(
            text,
            "[curious] Octopuses have three hearts.  Two pump blood to the gills."
        );

        let table = table_for(&text, 0.05);
        let aligned = align_segments(&table, &segments, true, 2).unwrap();
        assert!(aligned.iter().all(|s| s.timing.is_some()));
    }
}
