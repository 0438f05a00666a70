//! Per-channel note state and pitch bends
//!
//! [`ChannelState`] remembers the last note started on each channel. Only the
//! dispatcher writes it; [`PitchBendTracker`] reads it to turn a semitone
//! offset into an absolute glide target.

use crate::command::{midi_to_hz, Channel};
use crate::pipeline::policy::PlayableEvent;

/// Glide time used when a bend request does not specify one
pub const DEFAULT_GLIDE_MS: u32 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ChannelSlot {
    active_note: Option<u8>,
    /// Session offset (seconds) at which the note stops sounding
    sounding_until: Option<f64>,
}

/// Active note of both synth channels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    slots: [ChannelSlot; 2],
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_note(&self, channel: Channel) -> Option<u8> {
        self.slots[channel.index()].active_note
    }

    /// Whether the channel's last note is still sounding at `now` (seconds)
    pub fn is_sounding(&self, channel: Channel, now: f64) -> bool {
        self.slots[channel.index()]
            .sounding_until
            .map_or(false, |until| now < until)
    }

    /// Record a note started at `now` (seconds) lasting `duration_ms`
    pub fn note_started(&mut self, channel: Channel, pitch: u8, now: f64, duration_ms: u32) {
        let slot = &mut self.slots[channel.index()];
        slot.active_note = Some(pitch);
        slot.sounding_until = Some(now + duration_ms as f64 / 1000.0);
    }

    /// Record every channel a dispatched event starts a note on
    pub fn apply(&mut self, event: &PlayableEvent, now: f64) {
        let duration_ms = match event.duration_ms() {
            Some(ms) => ms,
            None => return,
        };
        for (channel, pitch) in event.channel_pitches() {
            self.note_started(channel, pitch, now, duration_ms);
        }
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}

/// Computes bend targets relative to a channel's active note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchBendTracker {
    default_glide_ms: u32,
}

impl Default for PitchBendTracker {
    fn default() -> Self {
        Self {
            default_glide_ms: DEFAULT_GLIDE_MS,
        }
    }
}

impl PitchBendTracker {
    pub fn new(default_glide_ms: u32) -> Self {
        Self { default_glide_ms }
    }

    /// Bend the active note on `channel` by `semitones`
    ///
    /// Returns `None` when nothing is playing on the channel. The active note
    /// is left untouched so consecutive bends stay relative to the note that
    /// was struck.
    pub fn bend(
        &self,
        state: &ChannelState,
        channel: Channel,
        semitones: f64,
        glide_ms: Option<u32>,
    ) -> Option<PlayableEvent> {
        let base = state.active_note(channel)?;
        Some(PlayableEvent::PitchBend {
            channel,
            target_hz: midi_to_hz(base as f64 + semitones),
            glide_ms: glide_ms.unwrap_or(self.default_glide_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_active_note_no_bend() {
        let tracker = PitchBendTracker::default();
        let state = ChannelState::new();
        assert!(tracker.bend(&state, Channel::Left, 2.0, None).is_none());
    }

    #[test]
    fn test_bend_relative_to_active_note() {
        let tracker = PitchBendTracker::default();
        let mut state = ChannelState::new();
        state.note_started(Channel::Left, 64, 0.0, 500);

        let event = tracker.bend(&state, Channel::Left, 2.0, None).unwrap();
        match event {
            PlayableEvent::PitchBend {
                channel,
                target_hz,
                glide_ms,
            } => {
                assert_eq!(channel, Channel::Left);
                assert!((target_hz - midi_to_hz(66.0)).abs() < 1e-9);
                assert_eq!(glide_ms, DEFAULT_GLIDE_MS);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Fractional bend with custom glide; base note unchanged
        let event = tracker.bend(&state, Channel::Left, -0.5, Some(50)).unwrap();
        assert_eq!(event.commands()[0].to_string(), "BEND,0,320.24,50");
        assert_eq!(state.active_note(Channel::Left), Some(64));

        // Other channel still idle
        assert!(tracker.bend(&state, Channel::Right, 1.0, None).is_none());
    }

    #[test]
    fn test_apply_events() {
        let mut state = ChannelState::new();

        state.apply(
            &PlayableEvent::Mono {
                pitch: 57,
                duration_ms: 250,
                velocity: 100,
            },
            1.0,
        );
        assert_eq!(state.active_note(Channel::Left), Some(57));
        assert_eq!(state.active_note(Channel::Right), Some(57));
        assert!(state.is_sounding(Channel::Right, 1.2));
        assert!(!state.is_sounding(Channel::Right, 1.25));

        state.apply(
            &PlayableEvent::Chord {
                pitch1: 60,
                pitch2: 67,
                duration_ms: 100,
                velocity1: 90,
                velocity2: 90,
            },
            2.0,
        );
        assert_eq!(state.active_note(Channel::Left), Some(60));
        assert_eq!(state.active_note(Channel::Right), Some(67));

        // Bends never change the active note
        state.apply(
            &PlayableEvent::PitchBend {
                channel: Channel::Left,
                target_hz: 300.0,
                glide_ms: 200,
            },
            2.05,
        );
        assert_eq!(state.active_note(Channel::Left), Some(60));

        state.clear();
        assert_eq!(state.active_note(Channel::Left), None);
        assert!(!state.is_sounding(Channel::Left, 2.05));
    }

    #[test]
    fn test_custom_default_glide() {
        let tracker = PitchBendTracker::new(500);
        let mut state = ChannelState::new();
        state.note_started(Channel::Right, 69, 0.0, 100);

        let event = tracker.bend(&state, Channel::Right, 12.0, None).unwrap();
        assert_eq!(event.commands()[0].to_string(), "BEND,1,880.00,500");
    }
}
