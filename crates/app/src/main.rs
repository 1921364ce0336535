use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use motion_particles_core::{
    ParticleLayerConfig, ParticleSystem, RenderSnapshot, ScrubTimeline, SimulationCheckpoint,
};
use tracing_subscriber::EnvFilter;

fn main() -> motion_particles_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            dt,
            output,
        } => run_simulation(&config, frames, dt, &output),
        Commands::Resume {
            config,
            from,
            frames,
            dt,
            output,
        } => resume_simulation(&config, &from, frames, dt, &output),
        Commands::Scrub {
            config,
            frames,
            interval,
            dt,
            snapshot,
        } => scrub(&config, &frames, interval, dt, snapshot.as_deref()),
    }
}

fn run_simulation(
    config: &Path,
    frames: u64,
    dt: f32,
    output: &OutputArgs,
) -> motion_particles_core::Result<()> {
    tracing::info!(?config, frames, dt, "running simulation");
    let layer = ParticleLayerConfig::from_path(config)?;
    let mut system = ParticleSystem::from_layer(&layer)?;
    advance(&mut system, frames, dt);
    write_outputs(&system, output)
}

fn resume_simulation(
    config: &Path,
    checkpoint: &Path,
    frames: u64,
    dt: f32,
    output: &OutputArgs,
) -> motion_particles_core::Result<()> {
    tracing::info!(?config, ?checkpoint, frames, "resuming simulation");
    let layer = ParticleLayerConfig::from_path(config)?;
    let mut system = ParticleSystem::from_layer(&layer)?;
    system.restore(&SimulationCheckpoint::from_path(checkpoint)?)?;
    advance(&mut system, frames, dt);
    write_outputs(&system, output)
}

fn scrub(
    config: &Path,
    frames: &[u64],
    interval: u64,
    dt: f32,
    snapshot: Option<&Path>,
) -> motion_particles_core::Result<()> {
    let layer = ParticleLayerConfig::from_path(config)?;
    let mut system = ParticleSystem::from_layer(&layer)?;
    let mut timeline = ScrubTimeline::new(interval);

    for &frame in frames {
        timeline.seek(&mut system, frame, dt)?;
        tracing::info!(
            frame,
            particles = system.particle_count(),
            cached = timeline.len(),
            "seeked"
        );
    }

    if let Some(path) = snapshot {
        write_snapshot(&system.snapshot(), path)?;
    }
    Ok(())
}

fn advance(system: &mut ParticleSystem, frames: u64, dt: f32) {
    for _ in 0..frames {
        let stats = system.step(dt);
        tracing::debug!(
            frame = system.frame(),
            spawned = stats.spawned,
            died = stats.died,
            "frame simulated"
        );
    }
    tracing::info!(
        frame = system.frame(),
        particles = system.particle_count(),
        "simulation finished"
    );
}

fn write_outputs(
    system: &ParticleSystem,
    output: &OutputArgs,
) -> motion_particles_core::Result<()> {
    if let Some(path) = &output.snapshot {
        write_snapshot(&system.snapshot(), path)?;
    }
    if let Some(path) = &output.checkpoint {
        system.export_checkpoint().write_to(path)?;
        tracing::info!(?path, "checkpoint written");
    }
    Ok(())
}

fn write_snapshot(snapshot: &RenderSnapshot, path: &Path) -> motion_particles_core::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), snapshot)?;
    tracing::info!(?path, particles = snapshot.len(), "snapshot written");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic particle simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Write the final render snapshot as JSON.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Write a restorable checkpoint as JSON.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate a particle layer from frame zero.
    Run {
        /// Particle layer configuration (JSON).
        config: PathBuf,
        /// Number of frames to simulate.
        #[arg(short, long, default_value_t = 120)]
        frames: u64,
        /// Delta time per frame, in ticks.
        #[arg(long, default_value_t = 1.0)]
        dt: f32,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Restore a checkpoint and keep simulating.
    Resume {
        /// Particle layer configuration (JSON).
        config: PathBuf,
        /// Checkpoint produced by `run --checkpoint`.
        from: PathBuf,
        #[arg(short, long, default_value_t = 120)]
        frames: u64,
        #[arg(long, default_value_t = 1.0)]
        dt: f32,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Jump between frames through the checkpoint cache.
    Scrub {
        /// Particle layer configuration (JSON).
        config: PathBuf,
        /// Frames to visit, in order.
        #[arg(required = true, num_args = 1..)]
        frames: Vec<u64>,
        /// Frames between cached checkpoints.
        #[arg(long, default_value_t = 30)]
        interval: u64,
        #[arg(long, default_value_t = 1.0)]
        dt: f32,
        /// Write the snapshot at the last visited frame as JSON.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}
