//! Tonearm - a headless music playback daemon.
//!
//! The binary is a thin shell around the library: it loads the config,
//! wires the symphonia decoder and the cpal output bank into a
//! [`PlayerHandle`], and drives a minimal playlist - each `Playlist`
//! event queues the next file from the command line.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tonearm::config::Config;
use tonearm::decoder::SymphoniaOpener;
use tonearm::events::PipeEvent;
use tonearm::output::DeviceOutput;
use tonearm::output::device::list_devices;
use tonearm::player::{PlayerHandle, PlayerState};
use tonearm::song::Song;

/// Tonearm playback daemon
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: OS config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the given files in order
    Play {
        /// Audio files to play
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Crossfade between songs, in seconds
        #[arg(long)]
        crossfade: Option<f64>,
        /// Software volume, 0-1000
        #[arg(long)]
        volume: Option<u16>,
    },
    /// List available audio output devices
    Devices,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("tonearm=info".parse().unwrap()))
        .init();

    match args.command {
        Commands::Devices => {
            for name in list_devices() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Play {
            files,
            crossfade,
            volume,
        } => cmd_play(args.config.as_deref(), files, crossfade, volume),
    }
}

fn cmd_play(
    config_path: Option<&std::path::Path>,
    files: Vec<PathBuf>,
    crossfade: Option<f64>,
    volume: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(seconds) = crossfade {
        config.player.cross_fade_seconds = seconds;
    }
    if let Some(volume) = volume {
        config.player.software_volume = volume;
    }
    let player_config = config.player.validated();

    let (handle, events) = PlayerHandle::spawn(
        &player_config,
        Box::new(SymphoniaOpener::new()),
        Box::new(DeviceOutput::new()),
    )?;

    let mut queue = files
        .into_iter()
        .map(|path| Song::new(path.display().to_string()));
    let first = queue.next().expect("clap enforces at least one file");
    tracing::info!(url = %first.url, "starting playback");
    handle.play(first);

    if let Some(failure) = handle.error() {
        handle.exit();
        anyhow::bail!("cannot play {}: {:?}", failure.song.url, failure.kind);
    }

    // Drive the playlist: whenever a song takes over (or playback stops),
    // top the queue back up or wind down.
    for event in events.iter() {
        match event {
            PipeEvent::Playlist => {
                if handle.state() == PlayerState::Stop {
                    break;
                }
                if handle.status().next_song.is_none() {
                    if let Some(next) = queue.next() {
                        tracing::info!(url = %next.url, "queueing next song");
                        handle.queue(next);
                    }
                }
            }
            PipeEvent::Tag { url, tag } => {
                tracing::info!(
                    %url,
                    title = tag.title.as_deref().unwrap_or("?"),
                    "stream retagged"
                );
            }
        }
    }

    let failure = handle.error();
    handle.exit();
    if let Some(failure) = failure {
        anyhow::bail!("playback failed on {}: {:?}", failure.song.url, failure.kind);
    }
    Ok(())
}
