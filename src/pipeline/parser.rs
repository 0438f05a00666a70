//! MIDI container decoding and note extraction
//!
//! A [`MidiSource`] is the decoded form of a Standard MIDI File: the
//! ticks-per-beat resolution plus one list of delta-timed messages per track.
//! Only the messages the player cares about are kept apart:
//!
//! - Note on / note off (pitch, velocity, channel)
//! - Set tempo (microseconds per quarter note)
//! - Everything else collapses into [`MessageKind::Other`]
//!
//! [`extract`] walks the tracks and pairs note-ons with their note-offs to
//! produce [`RawNote`]s sorted by start time. The percussion channel (9) is
//! never extracted.

use std::collections::HashMap;
use std::path::Path;

use midly::{MetaMessage, MidiMessage as MidlyMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pipeline::tempo::{TempoMap, TimeConverter};

/// General MIDI percussion channel (channel 10, zero-based 9)
pub const PERCUSSION_CHANNEL: u8 = 9;

/// The message types the extractor distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    SetTempo { micros_per_quarter: u32 },
    Other,
}

/// A track message with its tick delta from the previous message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackMessage {
    pub delta: u32,
    pub kind: MessageKind,
}

impl TrackMessage {
    pub fn new(delta: u32, kind: MessageKind) -> Self {
        Self { delta, kind }
    }
}

/// Decoded MIDI file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiSource {
    ticks_per_beat: u16,
    tracks: Vec<Vec<TrackMessage>>,
}

impl MidiSource {
    pub fn new(ticks_per_beat: u16, tracks: Vec<Vec<TrackMessage>>) -> Self {
        Self {
            ticks_per_beat,
            tracks,
        }
    }

    /// Decode a Standard MIDI File from bytes
    ///
    /// Only metrical (ticks per quarter note) timing is supported.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int(),
            Timing::Timecode(..) => return Err(Error::UnsupportedTiming),
        };

        let tracks = smf
            .tracks
            .iter()
            .map(|track| {
                track
                    .iter()
                    .map(|event| TrackMessage::new(event.delta.as_int(), convert_kind(event.kind)))
                    .collect()
            })
            .collect();

        Ok(Self::new(ticks_per_beat, tracks))
    }

    /// Read and decode a MIDI file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn tracks(&self) -> &[Vec<TrackMessage>] {
        &self.tracks
    }
}

fn convert_kind(kind: TrackEventKind<'_>) -> MessageKind {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            let channel = channel.as_int();
            match message {
                MidlyMessage::NoteOn { key, vel } => MessageKind::NoteOn {
                    channel,
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidlyMessage::NoteOff { key, vel } => MessageKind::NoteOff {
                    channel,
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                },
                _ => MessageKind::Other,
            }
        }
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => MessageKind::SetTempo {
            micros_per_quarter: tempo.as_int(),
        },
        _ => MessageKind::Other,
    }
}

/// A note with a start time and a measured duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawNote {
    /// Start time in seconds from the beginning of the file
    pub start: f64,
    pub pitch: u8,
    pub velocity: u8,
    pub duration_ms: u32,
}

/// Restricts which notes are extracted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Only extract notes from this track index
    pub track: Option<usize>,
    /// Only extract notes whose pitch lies in this inclusive range
    pub pitch_range: Option<(u8, u8)>,
}

impl ExtractOptions {
    fn accepts_pitch(&self, pitch: u8) -> bool {
        match self.pitch_range {
            Some((low, high)) => (low..=high).contains(&pitch),
            None => true,
        }
    }
}

/// Result of walking a MIDI source
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Notes sorted by start time
    pub notes: Vec<RawNote>,
    /// Tempo changes in the order they were seen
    pub tempo_map: TempoMap,
}

/// Extract all playable notes from a MIDI source
///
/// The running tempo is shared across tracks in file order, so a tempo track
/// placed first affects every later track. A track filter only suppresses
/// notes; tempo messages on skipped tracks still apply.
pub fn extract(source: &MidiSource, options: &ExtractOptions) -> Extraction {
    let mut converter = TimeConverter::new(source.ticks_per_beat);
    let mut tempo_map = TempoMap::new();
    let mut notes = Vec::new();

    for (index, track) in source.tracks.iter().enumerate() {
        let wanted = options.track.map_or(true, |t| t == index);
        let mut tick = 0u64;
        // (pitch, channel) -> (start seconds, velocity)
        let mut pending: HashMap<(u8, u8), (f64, u8)> = HashMap::new();

        for message in track {
            tick += message.delta as u64;

            match message.kind {
                MessageKind::SetTempo { micros_per_quarter } => {
                    converter.set_tempo(micros_per_quarter);
                    tempo_map.push(tick, micros_per_quarter);
                }
                MessageKind::NoteOn {
                    channel,
                    pitch,
                    velocity,
                } if velocity > 0 => {
                    if !wanted || channel == PERCUSSION_CHANNEL || !options.accepts_pitch(pitch) {
                        continue;
                    }
                    pending.insert((pitch, channel), (converter.seconds(tick), velocity));
                }
                MessageKind::NoteOn { channel, pitch, .. }
                | MessageKind::NoteOff { channel, pitch, .. } => {
                    if channel == PERCUSSION_CHANNEL {
                        continue;
                    }
                    if let Some((start, velocity)) = pending.remove(&(pitch, channel)) {
                        let elapsed = (converter.seconds(tick) - start).max(0.0);
                        notes.push(RawNote {
                            start,
                            pitch,
                            velocity,
                            duration_ms: (elapsed * 1000.0) as u32,
                        });
                    }
                }
                MessageKind::Other => {}
            }
        }

        if !pending.is_empty() {
            debug!(track = index, dropped = pending.len(), "dropping notes without note-off");
        }
    }

    notes.sort_by(|a, b| a.start.total_cmp(&b.start));

    Extraction { notes, tempo_map }
}

/// Extract notes with no filtering
pub fn extract_notes(source: &MidiSource) -> Vec<RawNote> {
    extract(source, &ExtractOptions::default()).notes
}

/// Per-track note statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSummary {
    pub index: usize,
    pub note_count: usize,
    pub lowest: Option<u8>,
    pub highest: Option<u8>,
}

impl TrackSummary {
    pub fn has_notes(&self) -> bool {
        self.note_count > 0
    }
}

/// Count sounding note-ons and the pitch range of every track
pub fn analyze_tracks(source: &MidiSource) -> Vec<TrackSummary> {
    source
        .tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let pitches = track.iter().filter_map(|m| match m.kind {
                MessageKind::NoteOn {
                    pitch, velocity, ..
                } if velocity > 0 => Some(pitch),
                _ => None,
            });

            let mut summary = TrackSummary {
                index,
                note_count: 0,
                lowest: None,
                highest: None,
            };
            for pitch in pitches {
                summary.note_count += 1;
                summary.lowest = Some(summary.lowest.map_or(pitch, |p| p.min(pitch)));
                summary.highest = Some(summary.highest.map_or(pitch, |p| p.max(pitch)));
            }
            summary
        })
        .collect()
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Scientific pitch name of a MIDI note (60 -> "C4")
pub fn note_name(pitch: u8) -> String {
    let octave = (pitch / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], octave)
}
