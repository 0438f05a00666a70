//! MIDI to stereo playback pipeline
//!
//! - Tempo: tick to seconds conversion under a running tempo
//! - Parser: MIDI decoding and note extraction
//! - Grouper: simultaneous-note grouping and event durations
//! - Policy: channel assignment for each group
//! - Bend: per-channel active notes and pitch bends
//! - Scheduler: wall-clock dispatch of the schedule to the synth

pub mod bend;
pub mod grouper;
pub mod parser;
pub mod policy;
pub mod scheduler;
pub mod tempo;

pub use bend::{ChannelState, PitchBendTracker};
pub use grouper::{group_notes, DurationStrategy, EventGroup};
pub use parser::{analyze_tracks, extract, ExtractOptions, MidiSource, RawNote, TrackSummary};
pub use policy::{build_schedule, PlayableEvent, Schedule, ScheduledGroup, StereoMode};
pub use scheduler::{
    Clock, Dispatcher, ManualClock, PlaybackConfig, PlaybackHandle, PlaybackState, Player,
    SystemClock,
};
pub use tempo::{TempoMap, TimeConverter};
