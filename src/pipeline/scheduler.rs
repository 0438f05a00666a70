//! Dispatcher and Player
//!
//! The dispatcher walks a [`Schedule`] in wall-clock time. Each group is
//! held back until `group.time / tempo_multiplier` seconds have passed since
//! the session started, then its events are sent to the command sink in
//! order. A shared flag lets another thread cancel between groups and
//! between events; cancelling sends `STOP` and resets the channel state.
//!
//! [`Player`] wraps a dispatcher in a dedicated worker thread so a UI or CLI
//! can start, stop and bend without blocking.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::command::{Channel, Command};
use crate::error::{Error, Result};
use crate::pipeline::bend::{ChannelState, PitchBendTracker, DEFAULT_GLIDE_MS};
use crate::pipeline::grouper::DurationStrategy;
use crate::pipeline::parser::{extract, ExtractOptions, MidiSource};
use crate::pipeline::policy::{
    build_schedule, PlayableEvent, Schedule, StereoMode, DEFAULT_BASS_THRESHOLD,
};
use crate::sink::{CommandSink, PlaybackObserver};

/// Slowest and fastest accepted tempo multipliers
pub const MIN_TEMPO_MULTIPLIER: f64 = 0.25;
pub const MAX_TEMPO_MULTIPLIER: f64 = 3.0;

/// Configuration for a playback session
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// How simultaneous notes map to the two channels
    pub stereo_mode: StereoMode,
    /// Notes below this pitch go left in `auto` / `bass_split`
    pub bass_threshold: u8,
    /// Playback speed (2.0 plays twice as fast)
    pub tempo_multiplier: f64,
    /// Start over after reaching the end
    pub looping: bool,
    /// Silence between loop passes
    pub loop_pause: Duration,
    /// Where event durations come from
    pub durations: DurationStrategy,
    /// Glide time for bends that do not specify one
    pub default_glide_ms: u32,
    /// Seed for `random` stereo mode (entropy when unset)
    pub seed: Option<u64>,
    /// Track / pitch filters applied during extraction
    pub extract: ExtractOptions,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            stereo_mode: StereoMode::Auto,
            bass_threshold: DEFAULT_BASS_THRESHOLD,
            tempo_multiplier: 1.0,
            looping: false,
            loop_pause: Duration::from_secs(1),
            durations: DurationStrategy::Actual,
            default_glide_ms: DEFAULT_GLIDE_MS,
            seed: None,
            extract: ExtractOptions::default(),
        }
    }
}

impl PlaybackConfig {
    /// Reject unusable values and clamp the tempo multiplier into range
    pub fn validated(mut self) -> Result<Self> {
        if !self.tempo_multiplier.is_finite() || self.tempo_multiplier <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "tempo multiplier must be positive, got {}",
                self.tempo_multiplier
            )));
        }
        if self.bass_threshold > 127 {
            return Err(Error::InvalidConfig(format!(
                "bass threshold must be a MIDI pitch (0-127), got {}",
                self.bass_threshold
            )));
        }
        if let Some((low, high)) = self.extract.pitch_range {
            if low > high {
                return Err(Error::InvalidConfig(format!(
                    "empty pitch range {}-{}",
                    low, high
                )));
            }
        }

        let clamped = self
            .tempo_multiplier
            .clamp(MIN_TEMPO_MULTIPLIER, MAX_TEMPO_MULTIPLIER);
        if clamped != self.tempo_multiplier {
            warn!(
                requested = self.tempo_multiplier,
                used = clamped,
                "tempo multiplier out of range"
            );
            self.tempo_multiplier = clamped;
        }

        Ok(self)
    }

    /// Tempo multiplier actually used for pacing
    pub fn effective_tempo(&self) -> f64 {
        if self.tempo_multiplier.is_finite() && self.tempo_multiplier > 0.0 {
            self.tempo_multiplier
                .clamp(MIN_TEMPO_MULTIPLIER, MAX_TEMPO_MULTIPLIER)
        } else {
            1.0
        }
    }

    /// Random source for `random` stereo mode
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Extract, group and assign a MIDI source into a playable schedule
    pub fn schedule(&self, source: &MidiSource) -> Schedule {
        let notes = extract(source, &self.extract).notes;
        let mut rng = self.rng();
        build_schedule(
            &notes,
            self.stereo_mode,
            self.bass_threshold,
            self.durations,
            &mut rng,
        )
    }
}

/// Time source used for pacing
pub trait Clock {
    /// Monotonic time since an arbitrary origin
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Real wall-clock time
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated time that only moves when slept on
///
/// Clones share the same time, so a test can hand one to a dispatcher and
/// inspect it afterwards.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.inner.lock().now += duration;
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.now += duration;
        state.sleeps.push(duration);
    }
}

/// Lifecycle of a playback session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Stopped,
    Completed,
}

/// A bend queued from outside the playback thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BendRequest {
    pub channel: Channel,
    pub semitones: f64,
    pub glide_ms: Option<u32>,
}

/// Cloneable control surface for a running dispatcher
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    cancel: Arc<AtomicBool>,
    requests: Sender<BendRequest>,
}

impl PlaybackHandle {
    /// Ask the dispatcher to stop before its next group or event
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Queue a bend of the active note; sent before the next group
    pub fn bend(&self, channel: Channel, semitones: f64) {
        self.bend_with_glide(channel, semitones, None);
    }

    pub fn bend_with_glide(&self, channel: Channel, semitones: f64, glide_ms: Option<u32>) {
        let request = BendRequest {
            channel,
            semitones,
            glide_ms,
        };
        if self.requests.send(request).is_err() {
            debug!("bend dropped, dispatcher is gone");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Release {
    at_ms: u64,
    channel: Channel,
}

/// Pending "note finished" notifications, earliest first
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    heap: BinaryHeap<Reverse<Release>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a release of `channel` at `at` seconds into the session
    pub fn push(&mut self, at: f64, channel: Channel) {
        self.heap.push(Reverse(Release {
            at_ms: (at.max(0.0) * 1000.0).round() as u64,
            channel,
        }));
    }

    /// Next release due at or before `now` seconds
    pub fn pop_due(&mut self, now: f64) -> Option<Channel> {
        let now_ms = (now.max(0.0) * 1000.0).round() as u64;
        match self.heap.peek() {
            Some(Reverse(release)) if release.at_ms <= now_ms => {
                self.heap.pop().map(|Reverse(r)| r.channel)
            }
            _ => None,
        }
    }

    /// Remove everything, returning each channel once in deadline order
    pub fn drain(&mut self) -> Vec<Channel> {
        let mut channels = Vec::new();
        while let Some(Reverse(release)) = self.heap.pop() {
            if !channels.contains(&release.channel) {
                channels.push(release.channel);
            }
        }
        channels
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Paces a schedule against a clock and feeds the command sink
pub struct Dispatcher<S, C = SystemClock> {
    config: PlaybackConfig,
    sink: S,
    clock: C,
    channels: ChannelState,
    bends: PitchBendTracker,
    releases: ReleaseQueue,
    state: PlaybackState,
    cancel: Arc<AtomicBool>,
    requests_tx: Sender<BendRequest>,
    requests_rx: Receiver<BendRequest>,
    /// Session offset of the current pass, for bends issued between groups
    offset: f64,
}

impl<S: CommandSink> Dispatcher<S, SystemClock> {
    pub fn new(sink: S, config: PlaybackConfig) -> Self {
        Self::with_clock(sink, SystemClock::default(), config)
    }
}

impl<S: CommandSink, C: Clock> Dispatcher<S, C> {
    pub fn with_clock(sink: S, clock: C, config: PlaybackConfig) -> Self {
        let (requests_tx, requests_rx) = crossbeam_channel::unbounded();
        let bends = PitchBendTracker::new(config.default_glide_ms);

        Self {
            config,
            sink,
            clock,
            channels: ChannelState::new(),
            bends,
            releases: ReleaseQueue::new(),
            state: PlaybackState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
            requests_tx,
            requests_rx,
            offset: 0.0,
        }
    }

    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            cancel: Arc::clone(&self.cancel),
            requests: self.requests_tx.clone(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn channels(&self) -> &ChannelState {
        &self.channels
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlaybackConfig) {
        self.bends = PitchBendTracker::new(config.default_glide_ms);
        self.config = config;
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Play a schedule to the end, or until stopped
    ///
    /// Blocks the calling thread. Returns the terminal state (`Completed` or
    /// `Stopped`).
    pub fn play<O: PlaybackObserver + ?Sized>(
        &mut self,
        schedule: &Schedule,
        observer: &mut O,
    ) -> PlaybackState {
        self.reset_controls();
        self.run(schedule, observer)
    }

    /// Clear the stop flag and drop bends queued for an earlier session
    fn reset_controls(&mut self) {
        self.cancel.store(false, Ordering::SeqCst);
        while self.requests_rx.try_recv().is_ok() {}
    }

    fn run<O: PlaybackObserver + ?Sized>(
        &mut self,
        schedule: &Schedule,
        observer: &mut O,
    ) -> PlaybackState {
        self.state = PlaybackState::Playing;

        info!(
            groups = schedule.len(),
            events = schedule.event_count(),
            mode = %self.config.stereo_mode,
            tempo = self.config.effective_tempo(),
            "playback started"
        );
        observer.on_status(&format!("Playing {} stereo events...", schedule.len()));

        loop {
            if !self.play_once(schedule, observer) {
                return self.finish_stopped(observer);
            }
            if !self.config.looping || schedule.is_empty() {
                return self.finish_completed(observer);
            }

            observer.on_status("Looping...");
            self.clock.sleep(self.config.loop_pause);
            if self.is_cancelled() {
                return self.finish_stopped(observer);
            }
        }
    }

    /// One pass over the schedule; false when cancelled
    fn play_once<O: PlaybackObserver + ?Sized>(
        &mut self,
        schedule: &Schedule,
        observer: &mut O,
    ) -> bool {
        let tempo = self.config.effective_tempo();
        let start = self.clock.now();
        let total = schedule.len();

        for (index, group) in schedule.groups.iter().enumerate() {
            if self.is_cancelled() {
                return false;
            }

            let target = Duration::from_secs_f64((group.time / tempo).max(0.0));
            let elapsed = self.clock.now().saturating_sub(start);
            if target > elapsed {
                self.clock.sleep(target - elapsed);
            }
            self.offset = self.clock.now().saturating_sub(start).as_secs_f64();

            self.fire_due_releases(observer);
            self.drain_bend_requests(observer);

            for event in &group.events {
                if self.is_cancelled() {
                    return false;
                }
                self.dispatch(event, observer);
            }

            observer.on_progress((index * 100 / total) as u8);
        }

        if self.is_cancelled() {
            return false;
        }
        self.drain_bend_requests(observer);
        for channel in self.releases.drain() {
            observer.on_channel_release(channel);
        }
        true
    }

    fn finish_stopped<O: PlaybackObserver + ?Sized>(&mut self, observer: &mut O) -> PlaybackState {
        self.send(&Command::Stop, observer);
        self.channels.clear();
        for channel in self.releases.drain() {
            observer.on_channel_release(channel);
        }
        observer.on_progress(0);
        observer.on_status("Playback stopped");
        info!("playback stopped");

        self.state = PlaybackState::Stopped;
        self.state
    }

    fn finish_completed<O: PlaybackObserver + ?Sized>(&mut self, observer: &mut O) -> PlaybackState {
        observer.on_progress(0);
        observer.on_status("Playback finished");
        info!("playback completed");

        self.state = PlaybackState::Completed;
        self.state
    }

    fn fire_due_releases<O: PlaybackObserver + ?Sized>(&mut self, observer: &mut O) {
        let mut released = Vec::new();
        while let Some(channel) = self.releases.pop_due(self.offset) {
            // A newer note on the channel supersedes this release
            if !self.channels.is_sounding(channel, self.offset) && !released.contains(&channel) {
                released.push(channel);
            }
        }
        for channel in released {
            observer.on_channel_release(channel);
        }
    }

    /// Send queued bends; requests left after a stop are discarded by the
    /// next session's `play`
    fn drain_bend_requests<O: PlaybackObserver + ?Sized>(&mut self, observer: &mut O) {
        while !self.is_cancelled() {
            match self.requests_rx.try_recv() {
                Ok(request) => {
                    self.bend(request.channel, request.semitones, request.glide_ms, observer);
                }
                Err(_) => break,
            }
        }
    }

    /// Send one event and record the notes it starts
    pub fn dispatch<O: PlaybackObserver + ?Sized>(
        &mut self,
        event: &PlayableEvent,
        observer: &mut O,
    ) {
        if let Some(duration_ms) = event.duration_ms() {
            self.channels.apply(event, self.offset);
            let until = self.offset + duration_ms as f64 / 1000.0;
            for (channel, _) in event.channel_pitches() {
                self.releases.push(until, channel);
            }
        }

        for command in event.commands() {
            self.send(&command, observer);
        }
        observer.on_event(event);
    }

    /// Bend the active note on a channel right away
    ///
    /// Returns false (and sends nothing) when the channel has no active note.
    pub fn bend<O: PlaybackObserver + ?Sized>(
        &mut self,
        channel: Channel,
        semitones: f64,
        glide_ms: Option<u32>,
        observer: &mut O,
    ) -> bool {
        match self.bends.bend(&self.channels, channel, semitones, glide_ms) {
            Some(event) => {
                self.dispatch(&event, observer);
                true
            }
            None => {
                debug!(channel = channel.index(), "bend ignored, no active note");
                false
            }
        }
    }

    /// Silence the synth and forget the active notes
    pub fn stop_all<O: PlaybackObserver + ?Sized>(&mut self, observer: &mut O) {
        self.send(&Command::Stop, observer);
        self.channels.clear();
    }

    fn send<O: PlaybackObserver + ?Sized>(&mut self, command: &Command, observer: &mut O) {
        let line = command.to_string();
        debug!(command = %line, "send");
        if let Err(e) = self.sink.send(&line) {
            warn!(command = %line, error = %e, "command not delivered");
            observer.on_status(&format!("Error sending command: {}", e));
        }
    }
}

/// Runs playback sessions on a dedicated worker thread
///
/// At most one session runs at a time; `play` while playing is ignored.
pub struct Player<S, C = SystemClock> {
    source: Option<MidiSource>,
    config: PlaybackConfig,
    state: Arc<Mutex<PlaybackState>>,
    handle: PlaybackHandle,
    dispatcher: Option<Dispatcher<S, C>>,
    worker: Option<JoinHandle<Dispatcher<S, C>>>,
}

impl<S: CommandSink + Send + 'static> Player<S, SystemClock> {
    pub fn new(sink: S, config: PlaybackConfig) -> Self {
        Self::with_clock(sink, SystemClock::default(), config)
    }
}

impl<S, C> Player<S, C>
where
    S: CommandSink + Send + 'static,
    C: Clock + Send + 'static,
{
    pub fn with_clock(sink: S, clock: C, config: PlaybackConfig) -> Self {
        let dispatcher = Dispatcher::with_clock(sink, clock, config.clone());
        let handle = dispatcher.handle();

        Self {
            source: None,
            config,
            state: Arc::new(Mutex::new(PlaybackState::Idle)),
            handle,
            dispatcher: Some(dispatcher),
            worker: None,
        }
    }

    pub fn load(&mut self, source: MidiSource) {
        self.source = Some(source);
    }

    /// Decode a MIDI file; on error the previous file stays loaded
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let source = MidiSource::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), tracks = source.tracks().len(), "loaded MIDI file");
        self.source = Some(source);
        Ok(())
    }

    /// Settings for the next session
    pub fn set_config(&mut self, config: PlaybackConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn handle(&self) -> PlaybackHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn bend(&self, channel: Channel, semitones: f64) {
        self.handle.bend(channel, semitones);
    }

    /// Start playing the loaded file on the worker thread
    ///
    /// Returns `Ok(false)` when a session is already running.
    pub fn play<O>(&mut self, observer: O) -> Result<bool>
    where
        O: PlaybackObserver + Send + 'static,
    {
        if self.is_playing() {
            debug!("play ignored, already playing");
            return Ok(false);
        }

        let source = self.source.as_ref().ok_or(Error::NoMidiLoaded)?;
        let schedule = self.config.schedule(source);
        self.play_schedule(schedule, observer)
    }

    /// Play a prepared schedule on the worker thread
    ///
    /// The schedule is played exactly as given, so callers can inspect or log
    /// it first. Returns `Ok(false)` when a session is already running.
    pub fn play_schedule<O>(&mut self, schedule: Schedule, observer: O) -> Result<bool>
    where
        O: PlaybackObserver + Send + 'static,
    {
        if self.is_playing() {
            debug!("play ignored, already playing");
            return Ok(false);
        }
        self.reclaim()?;

        let mut dispatcher = self.dispatcher.take().ok_or(Error::WorkerPanicked)?;
        dispatcher.set_config(self.config.clone());
        // Cleared here so a stop issued right after `play` returns is kept
        dispatcher.reset_controls();

        *self.state.lock() = PlaybackState::Playing;
        let state = Arc::clone(&self.state);

        let spawned = std::thread::Builder::new()
            .name("duetto-playback".to_string())
            .spawn(move || {
                let mut observer = observer;
                let outcome = dispatcher.run(&schedule, &mut observer);
                *state.lock() = outcome;
                dispatcher
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(true)
            }
            Err(e) => {
                *self.state.lock() = PlaybackState::Idle;
                Err(Error::Io(e))
            }
        }
    }

    /// Block until the current session ends
    pub fn wait(&mut self) -> Result<PlaybackState> {
        self.reclaim()?;
        Ok(self.state())
    }

    /// Wait for the session and hand back the sink
    pub fn into_sink(mut self) -> Result<S> {
        self.reclaim()?;
        self.dispatcher
            .take()
            .map(Dispatcher::into_sink)
            .ok_or(Error::WorkerPanicked)
    }

    fn reclaim(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(dispatcher) => self.dispatcher = Some(dispatcher),
                Err(_) => {
                    error!("playback worker panicked");
                    *self.state.lock() = PlaybackState::Stopped;
                    return Err(Error::WorkerPanicked);
                }
            }
        }
        Ok(())
    }
}
