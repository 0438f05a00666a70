//! Simultaneity grouping
//!
//! Notes whose start times lie within [`GROUP_TOLERANCE`] of the previously
//! added note are treated as one musical moment. The comparison is against
//! the most recent member, not the group's first note, so a run of notes
//! spaced just under the tolerance keeps extending the same group. That
//! accumulation is intentional and kept as-is.

use crate::pipeline::parser::RawNote;

/// Maximum start-time distance (seconds) between consecutive group members
pub const GROUP_TOLERANCE: f64 = 0.05;

/// Shortest duration emitted under [`DurationStrategy::Actual`]
pub const MIN_ACTUAL_DURATION_MS: u32 = 80;

/// Duration bounds and final-group duration for [`DurationStrategy::GapDerived`]
pub const MIN_GAP_DURATION_MS: u32 = 100;
pub const MAX_GAP_DURATION_MS: u32 = 1000;
pub const FINAL_GAP_DURATION_MS: u32 = 500;

/// Notes that start together
#[derive(Debug, Clone, PartialEq)]
pub struct EventGroup {
    /// Start time of the first member (seconds)
    pub time: f64,
    pub notes: Vec<RawNote>,
}

/// How event durations are derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DurationStrategy {
    /// Use measured note-off timing, floored at 80 ms
    #[default]
    Actual,
    /// Use 90% of the gap to the next group, clamped to 100..=1000 ms
    GapDerived,
}

impl std::str::FromStr for DurationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actual" => Ok(DurationStrategy::Actual),
            "gap" | "gap_derived" | "gap-derived" => Ok(DurationStrategy::GapDerived),
            _ => Err(format!("unknown duration strategy: {}", s)),
        }
    }
}

/// Group notes that are already sorted by start time
pub fn group_notes(notes: &[RawNote]) -> Vec<EventGroup> {
    group_with_tolerance(notes, GROUP_TOLERANCE)
}

/// Group sorted notes using a custom tolerance (seconds)
pub fn group_with_tolerance(notes: &[RawNote], tolerance: f64) -> Vec<EventGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<RawNote> = Vec::new();
    let mut last_time = -1.0;

    for note in notes {
        if !current.is_empty() && (note.start - last_time).abs() > tolerance {
            let notes = std::mem::take(&mut current);
            groups.push(EventGroup {
                time: notes[0].start,
                notes,
            });
        }
        current.push(*note);
        last_time = note.start;
    }

    if !current.is_empty() {
        groups.push(EventGroup {
            time: current[0].start,
            notes: current,
        });
    }

    groups
}

/// Duration for a single note under the actual-duration strategy
pub fn actual_single(note: &RawNote) -> u32 {
    note.duration_ms.max(MIN_ACTUAL_DURATION_MS)
}

/// Duration for a note pair under the actual-duration strategy
pub fn actual_pair(first: &RawNote, second: &RawNote) -> u32 {
    ((first.duration_ms as u64 + second.duration_ms as u64) / 2).max(MIN_ACTUAL_DURATION_MS as u64)
        as u32
}

/// Gap-derived duration of every group, in group order
pub fn gap_durations(groups: &[EventGroup]) -> Vec<u32> {
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| match groups.get(i + 1) {
            Some(next) => {
                let gap_ms = (next.time - group.time) * 1000.0 * 0.9;
                (gap_ms as u32).clamp(MIN_GAP_DURATION_MS, MAX_GAP_DURATION_MS)
            }
            None => FINAL_GAP_DURATION_MS,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(start: f64, pitch: u8) -> RawNote {
        RawNote {
            start,
            pitch,
            velocity: 100,
            duration_ms: 250,
        }
    }

    #[test]
    fn test_simultaneous_notes_share_group() {
        let groups = group_notes(&[note(0.0, 60), note(0.0, 64), note(0.5, 67)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].notes.len(), 2);
        assert_eq!(groups[1].time, 0.5);
    }

    #[test]
    fn test_tolerance_boundary() {
        // Exactly the tolerance apart still joins
        let groups = group_notes(&[note(0.0, 60), note(0.05, 62)]);
        assert_eq!(groups.len(), 1);

        let groups = group_notes(&[note(0.0, 60), note(0.051, 62)]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_drift_accumulates_from_last_member() {
        let notes: Vec<RawNote> = (0..10).map(|i| note(i as f64 * 0.049, 60 + i)).collect();
        let groups = group_notes(&notes);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].time, 0.0);
        assert!(groups[0].notes.last().unwrap().start > 0.4);
    }

    #[test]
    fn test_anchor_is_first_member() {
        let groups = group_notes(&[note(2.0, 60), note(2.03, 62), note(3.0, 64)]);
        assert_eq!(groups[0].time, 2.0);
        assert_eq!(groups[1].time, 3.0);
    }

    #[test]
    fn test_anchors_strictly_increase() {
        let notes: Vec<RawNote> = [0.0, 0.01, 0.2, 0.2, 0.26, 0.9, 1.5, 1.52]
            .iter()
            .map(|&t| note(t, 60))
            .collect();
        let groups = group_notes(&notes);

        assert!(groups.windows(2).all(|w| w[0].time < w[1].time));
        let total: usize = groups.iter().map(|g| g.notes.len()).sum();
        assert_eq!(total, notes.len());
    }

    #[test]
    fn test_regrouping_anchors_is_idempotent() {
        let notes: Vec<RawNote> = [0.0, 0.02, 0.3, 0.33, 0.36, 1.0, 1.2]
            .iter()
            .map(|&t| note(t, 60))
            .collect();
        let groups = group_notes(&notes);

        let anchors: Vec<RawNote> = groups.iter().map(|g| note(g.time, 60)).collect();
        let regrouped = group_notes(&anchors);

        let before: Vec<f64> = groups.iter().map(|g| g.time).collect();
        let after: Vec<f64> = regrouped.iter().map(|g| g.time).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_notes(&[]).is_empty());
        assert!(gap_durations(&[]).is_empty());
    }

    #[test]
    fn test_actual_durations() {
        let short = RawNote {
            duration_ms: 30,
            ..note(0.0, 60)
        };
        let long = RawNote {
            duration_ms: 1000,
            ..note(0.0, 64)
        };

        assert_eq!(actual_single(&short), 80);
        assert_eq!(actual_single(&long), 1000);
        assert_eq!(actual_pair(&short, &long), 515);
        assert_eq!(actual_pair(&short, &short), 80);
    }

    #[test]
    fn test_gap_durations() {
        let groups = group_notes(&[note(0.0, 60), note(0.5, 62), note(0.6, 64), note(5.0, 65)]);
        assert_eq!(gap_durations(&groups), vec![450, 100, 1000, 500]);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("actual".parse::<DurationStrategy>().unwrap(), DurationStrategy::Actual);
        assert_eq!("gap".parse::<DurationStrategy>().unwrap(), DurationStrategy::GapDerived);
        assert!("longest".parse::<DurationStrategy>().is_err());
    }
}
