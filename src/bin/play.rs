//! Play a MIDI file on the stereo synth
//!
//! Usage: play <song.mid> [--device /dev/ttyUSB0] [options]
//!
//! Without `--device` the commands are printed to stdout, one per line.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duetto::pipeline::grouper::DurationStrategy;
use duetto::pipeline::parser::{analyze_tracks, extract, note_name, ExtractOptions, MidiSource};
use duetto::pipeline::policy::{PlayableEvent, Schedule, ScheduledGroup, StereoMode};
use duetto::pipeline::scheduler::{Dispatcher, PlaybackConfig, PlaybackState, Player};
use duetto::{Command, CommandSink, LogObserver, WriterSink};

/// Chords used by `--demo`
const DEMO_CHORDS: [(u8, u8); 6] = [(60, 64), (62, 65), (64, 67), (65, 69), (67, 71), (69, 72)];
const DEMO_CHORD_MS: u32 = 800;

#[derive(Parser)]
#[command(name = "play")]
#[command(about = "Play MIDI files on a two-channel monophonic synth")]
#[command(version)]
struct Cli {
    /// MIDI file to play
    #[arg(required_unless_present = "demo")]
    file: Option<PathBuf>,

    /// Device node to write commands to (stdout when omitted)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Playback speed multiplier (0.25 - 3.0)
    #[arg(short, long, default_value = "1.0")]
    tempo: f64,

    /// Start over after the last note
    #[arg(short, long = "loop")]
    looping: bool,

    /// auto, bass_split, chord, random, alternate, mono or sync
    #[arg(short, long, default_value = "auto")]
    stereo_mode: StereoMode,

    /// Notes below this pitch go to the left channel
    #[arg(short, long, default_value = "60")]
    bass_threshold: u8,

    /// Event durations: actual or gap
    #[arg(long, default_value = "actual")]
    durations: DurationStrategy,

    /// Seed for random channel assignment
    #[arg(long)]
    seed: Option<u64>,

    /// Only play notes from this track
    #[arg(long)]
    track: Option<usize>,

    /// Only play pitches in LO-HI (inclusive)
    #[arg(long, value_parser = parse_pitch_range)]
    pitch_range: Option<(u8, u8)>,

    /// Print per-track statistics instead of playing
    #[arg(long)]
    analyze: bool,

    /// Play a short chord progression instead of a file
    #[arg(long)]
    demo: bool,
}

fn parse_pitch_range(s: &str) -> std::result::Result<(u8, u8), String> {
    let (low, high) = s
        .split_once('-')
        .ok_or_else(|| format!("expected LO-HI, got '{}'", s))?;
    let low: u8 = low.trim().parse().map_err(|e| format!("bad low pitch: {}", e))?;
    let high: u8 = high.trim().parse().map_err(|e| format!("bad high pitch: {}", e))?;
    Ok((low, high))
}

fn open_sink(device: Option<&PathBuf>) -> Result<Box<dyn CommandSink + Send>> {
    match device {
        Some(path) => {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .with_context(|| format!("Failed to open device {}", path.display()))?;
            info!(device = %path.display(), "connected");
            Ok(Box::new(WriterSink::new(file)))
        }
        None => Ok(Box::new(WriterSink::new(std::io::stdout()))),
    }
}

fn analyze(source: &MidiSource) {
    let extraction = extract(source, &ExtractOptions::default());
    println!("Ticks per beat: {}", source.ticks_per_beat());
    println!("Initial tempo: {:.1} BPM", extraction.tempo_map.initial_bpm());
    println!("Tempo changes: {}", extraction.tempo_map.changes().len());
    println!();

    for summary in analyze_tracks(source) {
        match (summary.lowest, summary.highest) {
            (Some(low), Some(high)) => println!(
                "Track {}: {} notes, range {} - {}",
                summary.index,
                summary.note_count,
                note_name(low),
                note_name(high)
            ),
            _ => println!("Track {}: no notes", summary.index),
        }
    }
}

fn demo_schedule() -> Schedule {
    let step = DEMO_CHORD_MS as f64 / 1000.0;
    Schedule {
        groups: DEMO_CHORDS
            .iter()
            .enumerate()
            .map(|(i, &(pitch1, pitch2))| ScheduledGroup {
                time: i as f64 * step,
                events: vec![PlayableEvent::Chord {
                    pitch1,
                    pitch2,
                    duration_ms: DEMO_CHORD_MS,
                    velocity1: 100,
                    velocity2: 100,
                }],
            })
            .collect(),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = PlaybackConfig {
        stereo_mode: cli.stereo_mode,
        bass_threshold: cli.bass_threshold,
        tempo_multiplier: cli.tempo,
        looping: cli.looping,
        durations: cli.durations,
        seed: cli.seed,
        extract: ExtractOptions {
            track: cli.track,
            pitch_range: cli.pitch_range,
        },
        ..Default::default()
    }
    .validated()?;

    if cli.demo {
        let sink = open_sink(cli.device.as_ref())?;
        let mut dispatcher = Dispatcher::new(sink, config);
        let mut observer = LogObserver;
        dispatcher.play(&demo_schedule(), &mut observer);
        dispatcher.stop_all(&mut observer);
        return Ok(());
    }

    let Some(path) = cli.file.as_ref() else {
        bail!("No MIDI file given");
    };
    let source = MidiSource::open(path)
        .with_context(|| format!("Failed to load MIDI file {}", path.display()))?;

    if cli.analyze {
        analyze(&source);
        return Ok(());
    }

    let schedule = config.schedule(&source);
    info!(
        groups = schedule.len(),
        seconds = %format!("{:.1}", schedule.last_time() / config.effective_tempo()),
        mode = %config.stereo_mode,
        "prepared schedule"
    );
    if schedule.is_empty() {
        bail!("No playable notes in {}", path.display());
    }

    let sink = open_sink(cli.device.as_ref())?;
    let mut player = Player::new(sink, config);
    // Play the schedule logged above; rebuilding it would reroll random mode
    player.play_schedule(schedule, LogObserver)?;

    let state = player.wait()?;
    if state == PlaybackState::Completed {
        // Let the final note ring out before silencing the synth
        std::thread::sleep(Duration::from_millis(500));
    }

    let mut sink = player.into_sink()?;
    sink.send(&Command::Stop.to_string()).context("Failed to send STOP")?;
    info!(?state, "done");

    Ok(())
}
