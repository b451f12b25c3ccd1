use std::{
    cell::RefCell,
    f32::consts::PI,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use sonografi_core::{
    audio, uniform::Rgb, AppConfig, AudioEngine, HostLoop, PcmClip, PcmPlayer, Session,
    SonografiError, TraceRenderer, Uniform, UniformSet,
};
use tracing_subscriber::EnvFilter;

/// Rotation applied by the demo `spinEarth` animation on every frame.
const ROTATION_STEP: f32 = 0.0003;

/// Ocean gradient, bottom to top, with its stop positions.
const OCEAN_GRADIENT: [u32; 3] = [0x010014, 0x010014, 0x4500c3];
const OCEAN_STOPS: [f32; 3] = [0.0, 0.3, 1.0];

/// Scene-specific cells layered over the session's common uniforms.
struct OceanScene {
    gradient_colors: Uniform<Vec<Rgb>>,
    gradient_stops: Uniform<[f32; 3]>,
}

impl OceanScene {
    fn new() -> Self {
        Self {
            gradient_colors: Uniform::new(OCEAN_GRADIENT.map(Rgb::from_hex).to_vec()),
            gradient_stops: Uniform::new(OCEAN_STOPS),
        }
    }

    fn uniforms(&self, common: &UniformSet) -> UniformSet {
        let mut scene = UniformSet::new();
        scene.insert("gradientColors", self.gradient_colors.reader());
        scene.insert("gradientStops", self.gradient_stops.reader());
        common.merged(&scene)
    }
}

fn main() -> sonografi_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            input,
            config,
            seconds,
            log_every,
        } => {
            let config = load_config(config.as_deref())?;
            let clip = audio::load_wav(&input)?;
            tracing::info!(
                ?input,
                sample_rate = clip.sample_rate,
                channels = clip.channels,
                duration = ?clip.duration(),
                "loaded clip"
            );
            run_clip(&config, clip, seconds, log_every)
        }
        Commands::Demo {
            config,
            seconds,
            log_every,
        } => {
            let config = load_config(config.as_deref())?;
            run_clip(&config, demo_clip(seconds), None, log_every)
        }
        Commands::Config { output } => print_config(output.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> sonografi_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn print_config(output: Option<&Path>) -> sonografi_core::Result<()> {
    let text = AppConfig::default().to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            tracing::info!(?path, "wrote default configuration");
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn run_clip(
    config: &AppConfig,
    clip: PcmClip,
    seconds: Option<f32>,
    log_every: u64,
) -> sonografi_core::Result<()> {
    let limit = match seconds {
        Some(seconds) => Duration::try_from_secs_f32(seconds)
            .map_err(|err| SonografiError::invalid_config(format!("--seconds: {err}")))?,
        None => clip.duration(),
    };

    let engine = Rc::new(RefCell::new(AudioEngine::new(
        config.analyser.clone(),
        clip.sample_rate,
        clip.channels,
    )?));
    let player = Rc::new(RefCell::new(PcmPlayer::new(clip)));

    let mut session = Session::with_engine(config, &engine.borrow())?;
    let ocean = OceanScene::new();
    let mut rotation = Uniform::new(0.0_f32);
    let mut uniforms = ocean.uniforms(&session.uniform_set());
    uniforms.insert("rotation", rotation.reader());
    let rotation_view = rotation.reader();

    let renderer = TraceRenderer::new(uniforms, log_every);
    let stats = renderer.stats();
    session.set_render_step(Box::new(renderer))?;
    session.add_animation_function(
        move || rotation.update(|angle| *angle += ROTATION_STEP),
        "spinEarth",
    )?;

    let mut host = HostLoop::realtime(config.scheduler.frame_interval());

    // Stand-in for the audio device: whatever "played" since the last frame
    // reaches the analyser before features are extracted.
    let feed_engine = engine.clone();
    let feed_player = player.clone();
    let feed = host.on_frame(move |frame| {
        let result = feed_player
            .borrow_mut()
            .advance(frame.delta, &mut feed_engine.borrow_mut());
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to feed audio");
        }
    });
    session.attach(&mut host)?;

    let finished = player.clone();
    let completed = host.run_while(limit, move || finished.borrow().is_finished());

    session.teardown(&mut host);
    host.cancel(feed);
    engine.borrow().detach()?;

    let stats = *stats.borrow();
    tracing::info!(
        completed,
        frames = stats.frames,
        peak_amplitude = stats.peak_amplitude,
        peak_streak = stats.peak_streak,
        time = stats.last_time,
        rotation = rotation_view.get(),
        "playback finished"
    );
    Ok(())
}

/// Synthesises a mono clip alternating biased loud passages with near
/// silence, enough to push the streak detector in and out of a streak.
fn demo_clip(seconds: f32) -> PcmClip {
    const SAMPLE_RATE: u32 = 44_100;
    const LOUD_SECS: f32 = 4.0;
    const QUIET_SECS: f32 = 3.0;

    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let frames = (seconds * SAMPLE_RATE as f32) as usize;
    let samples = (0..frames)
        .map(|index| {
            let t = index as f32 / SAMPLE_RATE as f32;
            let tone = (2.0 * PI * 220.0 * t).sin();
            if t % (LOUD_SECS + QUIET_SECS) < LOUD_SECS {
                0.8 * tone.abs()
            } else {
                0.05 * tone
            }
        })
        .collect();

    PcmClip {
        sample_rate: SAMPLE_RATE,
        channels: 1,
        samples,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive visual parameter engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a WAV file and drive the pipeline with it in real time.
    Play {
        /// Path to the WAV file to play.
        input: PathBuf,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many seconds instead of at the end of the clip.
        #[arg(short, long)]
        seconds: Option<f32>,
        /// Log the published uniforms every N frames.
        #[arg(long, default_value_t = 30)]
        log_every: u64,
    },
    /// Drive the pipeline with a synthesised signal.
    Demo {
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Length of the synthesised clip.
        #[arg(short, long, default_value_t = 14.0)]
        seconds: f32,
        /// Log the published uniforms every N frames.
        #[arg(long, default_value_t = 30)]
        log_every: u64,
    },
    /// Print the default configuration as JSON.
    Config {
        /// Write to this file instead of standard output.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
