//! Channel assignment for simultaneous notes
//!
//! The synth has two monophonic channels, so every [`EventGroup`] has to be
//! reduced to at most two sounding notes and each of them routed to a
//! channel. [`assign`] does this for one group; [`build_schedule`] runs
//! grouping and assignment over a whole note list.
//!
//! | group size | Mono / Sync | Chord | other modes |
//! |---|---|---|---|
//! | 1 | `Mono` | `Note` (by pitch) | `Note` (by mode) |
//! | 2 | `Note` left + `Note` right | `Chord` | `Note` left + `Note` right |
//! | 3+ | two loudest notes, then as for 2 | | |

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::command::{midi_to_hz, Channel, Command};
use crate::pipeline::grouper::{
    actual_pair, actual_single, gap_durations, group_notes, DurationStrategy, EventGroup,
};
use crate::pipeline::parser::RawNote;

/// Default pitch boundary for bass routing (middle C)
pub const DEFAULT_BASS_THRESHOLD: u8 = 60;

/// Policy for routing simultaneous notes to the two channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StereoMode {
    /// Bass notes left, everything else right
    #[default]
    Auto,
    /// Same routing as `Auto`
    BassSplit,
    /// Note pairs become a single chord event
    Chord,
    /// Single notes go to a random channel
    Random,
    /// Single notes go to `pitch % 2`
    Alternate,
    /// Single notes play on both channels as one command
    Mono,
    /// Same as `Mono`
    Sync,
}

impl StereoMode {
    pub const ALL: [StereoMode; 7] = [
        StereoMode::Auto,
        StereoMode::BassSplit,
        StereoMode::Chord,
        StereoMode::Random,
        StereoMode::Alternate,
        StereoMode::Mono,
        StereoMode::Sync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StereoMode::Auto => "auto",
            StereoMode::BassSplit => "bass_split",
            StereoMode::Chord => "chord",
            StereoMode::Random => "random",
            StereoMode::Alternate => "alternate",
            StereoMode::Mono => "mono",
            StereoMode::Sync => "sync",
        }
    }

    fn forces_mono(&self) -> bool {
        matches!(self, StereoMode::Mono | StereoMode::Sync)
    }
}

/// Unknown names fall back to [`StereoMode::Auto`]
impl FromStr for StereoMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "bass_split" | "bass-split" => StereoMode::BassSplit,
            "chord" => StereoMode::Chord,
            "random" => StereoMode::Random,
            "alternate" => StereoMode::Alternate,
            "mono" => StereoMode::Mono,
            "sync" => StereoMode::Sync,
            _ => StereoMode::Auto,
        };
        Ok(mode)
    }
}

impl fmt::Display for StereoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the dispatcher can send to the synth
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayableEvent {
    Note {
        pitch: u8,
        duration_ms: u32,
        channel: Channel,
        velocity: u8,
    },
    Chord {
        pitch1: u8,
        pitch2: u8,
        duration_ms: u32,
        velocity1: u8,
        velocity2: u8,
    },
    /// Same note on both channels, sent as one command so the channels
    /// cannot drift apart
    Mono {
        pitch: u8,
        duration_ms: u32,
        velocity: u8,
    },
    PitchBend {
        channel: Channel,
        target_hz: f64,
        glide_ms: u32,
    },
}

impl PlayableEvent {
    /// Protocol lines for this event, in send order
    pub fn commands(&self) -> Vec<Command> {
        match *self {
            PlayableEvent::Note {
                pitch,
                duration_ms,
                channel,
                ..
            } => vec![Command::note(pitch, duration_ms, channel)],
            PlayableEvent::Chord {
                pitch1,
                pitch2,
                duration_ms,
                ..
            } => vec![
                Command::note(pitch1, duration_ms, Channel::Left),
                Command::note(pitch2, duration_ms, Channel::Right),
            ],
            PlayableEvent::Mono { pitch, duration_ms, .. } => {
                vec![Command::Mono { pitch, duration_ms }]
            }
            PlayableEvent::PitchBend {
                channel,
                target_hz,
                glide_ms,
            } => vec![Command::Bend {
                channel,
                hz: target_hz,
                glide_ms,
            }],
        }
    }

    /// How long the event sounds, if it starts a note
    pub fn duration_ms(&self) -> Option<u32> {
        match *self {
            PlayableEvent::Note { duration_ms, .. }
            | PlayableEvent::Chord { duration_ms, .. }
            | PlayableEvent::Mono { duration_ms, .. } => Some(duration_ms),
            PlayableEvent::PitchBend { .. } => None,
        }
    }

    /// Pitch started on each channel by this event
    pub fn channel_pitches(&self) -> Vec<(Channel, u8)> {
        match *self {
            PlayableEvent::Note { pitch, channel, .. } => vec![(channel, pitch)],
            PlayableEvent::Chord { pitch1, pitch2, .. } => {
                vec![(Channel::Left, pitch1), (Channel::Right, pitch2)]
            }
            PlayableEvent::Mono { pitch, .. } => {
                Channel::BOTH.iter().map(|&c| (c, pitch)).collect()
            }
            PlayableEvent::PitchBend { .. } => Vec::new(),
        }
    }

    /// Frequency of the event's first sounding pitch
    pub fn frequency(&self) -> f64 {
        match *self {
            PlayableEvent::Note { pitch, .. }
            | PlayableEvent::Chord { pitch1: pitch, .. }
            | PlayableEvent::Mono { pitch, .. } => midi_to_hz(pitch as f64),
            PlayableEvent::PitchBend { target_hz, .. } => target_hz,
        }
    }
}

/// Where a group's event durations come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDuration {
    /// Measured note durations (floored at 80 ms)
    Measured,
    /// One precomputed duration for every event in the group
    Fixed(u32),
}

/// Channel for a lone note under the given mode
pub fn assign_channel<R: Rng + ?Sized>(
    pitch: u8,
    mode: StereoMode,
    bass_threshold: u8,
    rng: &mut R,
) -> Channel {
    match mode {
        StereoMode::Random => {
            if rng.gen::<bool>() {
                Channel::Right
            } else {
                Channel::Left
            }
        }
        StereoMode::Alternate => Channel::from_index(pitch % 2),
        _ => {
            if pitch < bass_threshold {
                Channel::Left
            } else {
                Channel::Right
            }
        }
    }
}

/// The two highest-velocity notes, loudest first
///
/// Equal velocities keep their input order. `notes` must hold at least two
/// entries.
pub fn select_loudest(notes: &[RawNote]) -> (RawNote, RawNote) {
    let mut sorted = notes.to_vec();
    sorted.sort_by(|a, b| b.velocity.cmp(&a.velocity));
    (sorted[0], sorted[1])
}

/// Turn one group into playable events
pub fn assign<R: Rng + ?Sized>(
    group: &EventGroup,
    mode: StereoMode,
    bass_threshold: u8,
    duration: GroupDuration,
    rng: &mut R,
) -> Vec<PlayableEvent> {
    match group.notes.as_slice() {
        [] => Vec::new(),
        [note] => {
            let duration_ms = match duration {
                GroupDuration::Measured => actual_single(note),
                GroupDuration::Fixed(ms) => ms,
            };

            if mode.forces_mono() {
                vec![PlayableEvent::Mono {
                    pitch: note.pitch,
                    duration_ms,
                    velocity: note.velocity,
                }]
            } else {
                vec![PlayableEvent::Note {
                    pitch: note.pitch,
                    duration_ms,
                    channel: assign_channel(note.pitch, mode, bass_threshold, rng),
                    velocity: note.velocity,
                }]
            }
        }
        [first, second] => assign_pair(first, second, mode, duration),
        notes => {
            let (first, second) = select_loudest(notes);
            assign_pair(&first, &second, mode, duration)
        }
    }
}

fn assign_pair(
    first: &RawNote,
    second: &RawNote,
    mode: StereoMode,
    duration: GroupDuration,
) -> Vec<PlayableEvent> {
    let duration_ms = match duration {
        GroupDuration::Measured => actual_pair(first, second),
        GroupDuration::Fixed(ms) => ms,
    };

    if mode == StereoMode::Chord {
        vec![PlayableEvent::Chord {
            pitch1: first.pitch,
            pitch2: second.pitch,
            duration_ms,
            velocity1: first.velocity,
            velocity2: second.velocity,
        }]
    } else {
        vec![
            PlayableEvent::Note {
                pitch: first.pitch,
                duration_ms,
                channel: Channel::Left,
                velocity: first.velocity,
            },
            PlayableEvent::Note {
                pitch: second.pitch,
                duration_ms,
                channel: Channel::Right,
                velocity: second.velocity,
            },
        ]
    }
}

/// Events that fire together at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledGroup {
    /// Seconds from the start of the file, before tempo scaling
    pub time: f64,
    pub events: Vec<PlayableEvent>,
}

/// The ordered event list for one playback pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub groups: Vec<ScheduledGroup>,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.groups.iter().map(|g| g.events.len()).sum()
    }

    /// Start time of the last group (seconds)
    pub fn last_time(&self) -> f64 {
        self.groups.last().map_or(0.0, |g| g.time)
    }
}

/// Group sorted notes and assign channels to every group
pub fn build_schedule<R: Rng + ?Sized>(
    notes: &[RawNote],
    mode: StereoMode,
    bass_threshold: u8,
    strategy: DurationStrategy,
    rng: &mut R,
) -> Schedule {
    let groups = group_notes(notes);
    let durations: Vec<GroupDuration> = match strategy {
        DurationStrategy::Actual => vec![GroupDuration::Measured; groups.len()],
        DurationStrategy::GapDerived => gap_durations(&groups)
            .into_iter()
            .map(GroupDuration::Fixed)
            .collect(),
    };

    let groups = groups
        .iter()
        .zip(durations)
        .map(|(group, duration)| ScheduledGroup {
            time: group.time,
            events: assign(group, mode, bass_threshold, duration, rng),
        })
        .filter(|g| !g.events.is_empty())
        .collect();

    Schedule { groups }
}
