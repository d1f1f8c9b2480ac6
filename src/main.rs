use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pianosync::audio::{
    load_performance, AudioAnalysis, LoadedPerformance, ManualClock, NullOutput,
    PerformanceTimeline, PlaybackScheduler, Player, SchedulerState, SilentVoices,
};
use pianosync::command::{Command, PlayerEvent};
use pianosync::config::{SyncSettings, TrackCatalog, TrackEntry};
use pianosync::io::{AudioFile, CpalAudioOutput, FileSource};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pianosync", version, about = "Audio/MIDI synchronized piano playback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge MIDI part files and print a timeline summary
    Inspect {
        #[arg(required = true)]
        parts: Vec<PathBuf>,
        /// Skip the sentinel note filter
        #[arg(long)]
        keep_sentinels: bool,
    },
    /// Analyse an audio file and print the result as JSON
    Analyze {
        audio: PathBuf,
        /// Measure from the start of the buffer instead of the detected onset
        #[arg(long)]
        no_trim: bool,
    },
    /// Step the scheduler on a simulated clock and report dispatch timing
    Simulate {
        #[command(flatten)]
        track: TrackArgs,
        /// Simulated frame rate
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
    },
    /// Play a track in real time on the default output device
    Play {
        #[command(flatten)]
        track: TrackArgs,
    },
    /// Show or change the persistent settings
    Settings {
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i32>,
        #[arg(long)]
        rate: Option<f64>,
    },
}

#[derive(Args)]
struct TrackArgs {
    /// Track catalog (JSON)
    #[arg(long, requires = "track")]
    catalog: Option<PathBuf>,
    /// Key of the track in the catalog
    #[arg(long)]
    track: Option<String>,
    /// MIDI part file (repeatable)
    #[arg(long = "midi")]
    midi_parts: Vec<String>,
    /// Audio candidate, tried in order (repeatable)
    #[arg(long = "audio")]
    audio_candidates: Vec<String>,
    /// Directory that asset locations are relative to
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Sync offset in ms (overrides the saved setting)
    #[arg(long, allow_hyphen_values = true)]
    offset: Option<i32>,
    /// Playback rate (overrides the saved setting)
    #[arg(long)]
    rate: Option<f64>,
}

impl TrackArgs {
    fn entry(&self) -> Result<TrackEntry> {
        if let (Some(catalog), Some(key)) = (&self.catalog, &self.track) {
            let catalog = TrackCatalog::load_from(catalog)
                .with_context(|| format!("Failed to read catalog {}", catalog.display()))?;
            return Ok(catalog.find(key)?.clone());
        }
        if self.midi_parts.is_empty() || self.audio_candidates.is_empty() {
            bail!("Give --catalog and --track, or at least one --midi and one --audio");
        }
        Ok(TrackEntry {
            midi_parts: self.midi_parts.clone(),
            audio_candidates: self.audio_candidates.clone(),
            ..TrackEntry::new("cli")
        })
    }

    fn settings(&self) -> Result<SyncSettings> {
        let mut settings = SyncSettings::load();
        if let Some(offset) = self.offset {
            settings.set_sync_offset_ms(offset);
        }
        if let Some(rate) = self.rate {
            settings.set_playback_rate(rate)?;
        }
        Ok(settings)
    }

    async fn load(&self, settings: &SyncSettings) -> Result<LoadedPerformance> {
        let entry = self.entry()?;
        let source = FileSource::new(&self.root);
        let loaded = load_performance(&source, &entry, &settings.analysis).await;
        println!(
            "Track {}: MIDI {:?}, audio {:?}",
            loaded.key, loaded.midi_status, loaded.audio_status
        );
        if !loaded.can_play() {
            bail!("Track {} is not playable", loaded.key);
        }
        Ok(loaded)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect {
            parts,
            keep_sentinels,
        } => inspect(&parts, keep_sentinels),
        Commands::Analyze { audio, no_trim } => analyze(&audio, no_trim),
        Commands::Simulate { track, fps } => simulate(&track, fps).await,
        Commands::Play { track } => play(&track).await,
        Commands::Settings { offset, rate } => settings(offset, rate),
    }
}

fn inspect(parts: &[PathBuf], keep_sentinels: bool) -> Result<()> {
    let fetched = parts.iter().map(std::fs::read).collect();
    let mut timeline = PerformanceTimeline::merge_parts(fetched).context("No usable MIDI part")?;
    if !keep_sentinels {
        timeline.filter_sentinels();
    }

    println!("Parts merged:      {}/{}", timeline.part_count(), parts.len());
    println!("Events:            {}", timeline.len());
    println!("Ticks per quarter: {}", timeline.ticks_per_quarter());
    println!("Tempo segments:    {}", timeline.tempo_map().segments().len());
    for segment in timeline.tempo_map().segments() {
        println!(
            "  tick {:>8} at {:>10.1}ms: {:.2} bpm",
            segment.start_tick,
            segment.start_time_ms,
            60_000_000.0 / segment.microseconds_per_quarter as f64
        );
    }
    println!("First note-on:     {:.1}ms", timeline.first_note_on_ms());
    println!("Active duration:   {:.1}ms", timeline.active_duration_ms());
    println!("Distinct notes:    {}", timeline.notes_used().len());
    let report = timeline.sentinel_report();
    println!(
        "Sentinels removed: {} {:?}",
        report.removed_pairs, report.removed_at_ms
    );
    Ok(())
}

fn analyze(path: &Path, no_trim: bool) -> Result<()> {
    let settings = SyncSettings::load();
    let audio = AudioFile::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let analysis = AudioAnalysis::analyze(&audio, &settings.analysis, !no_trim);
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

async fn simulate(track: &TrackArgs, fps: f64) -> Result<()> {
    if !(fps.is_finite() && fps > 0.0) {
        bail!("Frame rate must be positive");
    }
    let settings = track.settings()?;
    let loaded = track.load(&settings).await?;

    let clock = ManualClock::new(0.0);
    let mut scheduler = PlaybackScheduler::new(
        Box::new(clock.clone()),
        Box::new(NullOutput::new()),
        Box::new(SilentVoices),
        settings,
    );
    let total_ms = loaded.analysis.map_or(0.0, |a| a.total_ms);
    scheduler.load(
        loaded.timeline.context("Timeline missing")?,
        loaded.analysis,
    );
    scheduler.start()?;

    let frame_sec = 1.0 / fps;
    let limit_sec = scheduler.settings().lead_time_sec
        + total_ms / 1000.0 / scheduler.playback_rate()
        + 1.0;
    let mut frames = 0usize;
    let mut dispatched = 0usize;
    let mut max_late_ms = 0.0f64;

    while !scheduler.is_finished() && frames as f64 * frame_sec < limit_sec {
        clock.advance(frame_sec);
        frames += 1;
        let range = scheduler.advance();
        if range.is_empty() {
            continue;
        }
        let elapsed = scheduler.elapsed_ms().unwrap_or(0.0);
        if let Some(timeline) = scheduler.timeline() {
            for event in &timeline.events()[range.clone()] {
                max_late_ms = max_late_ms.max(elapsed - scheduler.scheduled_ms(event));
            }
        }
        dispatched += range.len();
    }

    println!("Stretch factor:   {:.4}", scheduler.stretch_factor());
    println!("Frames simulated: {}", frames);
    println!(
        "Events:           {}/{}",
        dispatched,
        scheduler.timeline().map_or(0, |t| t.len())
    );
    println!("Max lateness:     {:.2}ms (frame {:.2}ms)", max_late_ms, frame_sec * 1000.0);
    Ok(())
}

async fn play(track: &TrackArgs) -> Result<()> {
    let settings = track.settings()?;
    let loaded = track.load(&settings).await?;

    let output = CpalAudioOutput::open().context("Failed to open audio output")?;
    let clock = output.clock();
    let scheduler = PlaybackScheduler::new(
        Box::new(clock),
        Box::new(output),
        Box::new(SilentVoices),
        settings,
    );

    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(256);
    let (event_tx, mut event_rx) = rtrb::RingBuffer::<PlayerEvent>::new(256);
    let mut player = Player::new(scheduler, command_rx, event_tx);
    let mut controller = player.get_controller(command_tx);

    controller.load_performance(loaded);
    controller.play();

    let mut frame = tokio::time::interval(Duration::from_millis(16));
    loop {
        frame.tick().await;
        player.process_frame();

        while let Ok(event) = event_rx.pop() {
            match event {
                PlayerEvent::PlaybackPosition(ms) => {
                    log::debug!("Position {:.0}ms", ms);
                }
                PlayerEvent::PlaybackFinished => {
                    println!("Finished");
                    return Ok(());
                }
                PlayerEvent::AudioError(e) => bail!("Audio playback failed: {}", e),
                PlayerEvent::SchedulingFailed(e) => {
                    log::warn!("Start refused, retrying: {}", e);
                    controller.play();
                }
                PlayerEvent::StateChanged(state) => {
                    println!("State: {:?}", state);
                    if state == SchedulerState::Stopped {
                        return Ok(());
                    }
                }
                PlayerEvent::LoadStatusChanged { .. } | PlayerEvent::EventsDispatched(_) => {}
            }
        }
    }
}

fn settings(offset: Option<i32>, rate: Option<f64>) -> Result<()> {
    let mut settings = SyncSettings::load();
    let changed = offset.is_some() || rate.is_some();
    if let Some(offset) = offset {
        settings.set_sync_offset_ms(offset);
    }
    if let Some(rate) = rate {
        settings.set_playback_rate(rate)?;
    }
    if changed {
        settings.save();
    }
    if let Ok(path) = SyncSettings::config_path() {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
