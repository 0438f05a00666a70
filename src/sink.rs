//! Command sinks and playback observers
//!
//! A [`CommandSink`] is whatever carries protocol lines to the synth. The
//! dispatcher owns its sink for the whole session and is the only writer.
//! A [`PlaybackObserver`] receives fire-and-forget notifications for
//! progress bars, visualizers and logs.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::command::Channel;
use crate::error::{Error, Result};
use crate::pipeline::parser::note_name;
use crate::pipeline::policy::PlayableEvent;

/// Destination for protocol lines
pub trait CommandSink {
    /// Send one command (without line terminator)
    fn send(&mut self, command: &str) -> Result<()>;
}

impl<S: CommandSink + ?Sized> CommandSink for Box<S> {
    fn send(&mut self, command: &str) -> Result<()> {
        (**self).send(command)
    }
}

/// Writes newline-terminated commands to any byte stream
///
/// Each command is flushed immediately so it reaches the device on time.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> CommandSink for WriterSink<W> {
    fn send(&mut self, command: &str) -> Result<()> {
        writeln!(self.writer, "{}", command)
            .and_then(|()| self.writer.flush())
            .map_err(|e| Error::Sink(e.to_string()))
    }
}

/// Records commands in memory
///
/// Clones share the same buffer, so a clone kept outside a playback thread
/// sees everything the dispatcher sent.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl CommandSink for MemorySink {
    fn send(&mut self, command: &str) -> Result<()> {
        self.lines.lock().push(command.to_string());
        Ok(())
    }
}

/// Receives playback notifications
///
/// Every method defaults to doing nothing.
pub trait PlaybackObserver {
    /// Percentage of groups dispatched; 0 when a session ends
    fn on_progress(&mut self, _percent: u8) {}

    fn on_event(&mut self, _event: &PlayableEvent) {}

    fn on_status(&mut self, _message: &str) {}

    /// A channel's last note has run its duration
    fn on_channel_release(&mut self, _channel: Channel) {}
}

impl PlaybackObserver for () {}

impl<O: PlaybackObserver + ?Sized> PlaybackObserver for Box<O> {
    fn on_progress(&mut self, percent: u8) {
        (**self).on_progress(percent)
    }

    fn on_event(&mut self, event: &PlayableEvent) {
        (**self).on_event(event)
    }

    fn on_status(&mut self, message: &str) {
        (**self).on_status(message)
    }

    fn on_channel_release(&mut self, channel: Channel) {
        (**self).on_channel_release(channel)
    }
}

/// Logs every notification through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl PlaybackObserver for LogObserver {
    fn on_progress(&mut self, percent: u8) {
        debug!(percent, "progress");
    }

    fn on_event(&mut self, event: &PlayableEvent) {
        match *event {
            PlayableEvent::Note {
                pitch,
                duration_ms,
                channel,
                ..
            } => {
                let side = if channel == Channel::Left { "LEFT" } else { "RIGHT" };
                info!(
                    "♪ {} {:.2}Hz ({}) for {}ms",
                    note_name(pitch),
                    event.frequency(),
                    side,
                    duration_ms
                );
            }
            PlayableEvent::Chord {
                pitch1,
                pitch2,
                duration_ms,
                ..
            } => {
                info!(
                    "♫ CHORD: {} + {} for {}ms",
                    note_name(pitch1),
                    note_name(pitch2),
                    duration_ms
                );
            }
            PlayableEvent::Mono { pitch, duration_ms, .. } => {
                info!(
                    "♪♪ MONO: {} {:.2}Hz on BOTH channels for {}ms",
                    note_name(pitch),
                    event.frequency(),
                    duration_ms
                );
            }
            PlayableEvent::PitchBend {
                channel,
                target_hz,
                glide_ms,
            } => {
                info!("BEND channel {} to {:.2}Hz over {}ms", channel, target_hz, glide_ms);
            }
        }
    }

    fn on_status(&mut self, message: &str) {
        info!("{}", message);
    }

    fn on_channel_release(&mut self, channel: Channel) {
        debug!(channel = channel.index(), "channel released");
    }
}
