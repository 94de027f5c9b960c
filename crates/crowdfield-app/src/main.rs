use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crowdfield_analysis::{
    ConsistencyConfig, RegionSpeed, count_flow, smooth_trajectories, synthesise_orientations,
    write_consistency, write_deviations,
};
use crowdfield_app::{JobConfig, stop_on_interrupt};
use crowdfield_raster::RasterEngine;
use crowdfield_storage::{
    ReadWindow, StoreSource, TrajectoryReader, TrajectorySet, extract_agent, write_window,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "crowdfield",
    version,
    about = "Rasterise crowd trajectories and run trajectory analyses"
)]
struct Cli {
    /// JSON job description; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rasterisation worker count, overriding the job file.
    #[arg(long, global = true, env = "CROWDFIELD_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header summary of a trajectory store.
    Info { input: PathBuf },
    /// Rasterise a trajectory store into a grid stream.
    Raster {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Also write per-frame statistics rows here.
        #[arg(long)]
        stats: Option<PathBuf>,
    },
    /// Count crossings through the configured segments.
    Flow {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Mean speed per configured region.
    Regions {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write velocity deviations from a v2.2 store.
    Deviation {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Windowed principal axes of a deviation file.
    Consistency {
        deviations: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Window length in frames, overriding the job file.
        #[arg(long)]
        window: Option<usize>,
    },
    /// Rewrite orientations from displacement.
    Orient {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Gaussian-smooth agent paths.
    Smooth {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Copy a frame range, a sub-sampled store, or a single agent.
    Subset {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        end: Option<usize>,
        #[arg(long, default_value_t = 1)]
        frame_stride: usize,
        #[arg(long, default_value_t = 1)]
        agent_stride: usize,
        /// Extract this agent only; the range options are ignored.
        #[arg(long)]
        agent: Option<usize>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let job = match &cli.config {
        Some(path) => JobConfig::load(path)?,
        None => JobConfig::default(),
    }
    .with_workers(cli.workers);

    match cli.command {
        Command::Info { input } => info_command(&input),
        Command::Raster {
            input,
            output,
            stats,
        } => raster_command(&job, &input, &output, stats.as_deref()),
        Command::Flow { input, output } => {
            let source = StoreSource::open(&input, job.window)?;
            let report = count_flow(source, &job.flow, create_text(&output)?)?;
            println!("{} frames, totals {:?}", report.frames, report.totals);
            Ok(())
        }
        Command::Regions { input, output } => {
            let source = StoreSource::open(&input, job.window)?;
            let report =
                RegionSpeed::from_config(&job.regions)?.run(source, create_text(&output)?)?;
            println!(
                "{} rows, {} unassigned samples",
                report.frames.len(),
                report.unassigned_total
            );
            Ok(())
        }
        Command::Deviation { input, output } => {
            let header = write_deviations(&input, &output)?;
            println!("{} agents, {} frames", header.agent_count, header.frame_count);
            Ok(())
        }
        Command::Consistency {
            deviations,
            output,
            window,
        } => {
            let config = ConsistencyConfig {
                window: window.unwrap_or(job.consistency.window),
            };
            let header = write_consistency(&deviations, &output, &config)?;
            println!(
                "window {} | {} agents | {} frames",
                header.window, header.agent_count, header.frame_count
            );
            Ok(())
        }
        Command::Orient { input, output } => {
            let mut set = load_set(&input)?;
            let report = synthesise_orientations(&mut set, &job.orientation)?;
            set.write(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("{} headings clamped, {} held", report.clamped, report.held);
            Ok(())
        }
        Command::Smooth { input, output } => {
            let mut set = load_set(&input)?;
            let report = smooth_trajectories(&mut set, &job.smoothing)?;
            set.write(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "{} intervals smoothed with {} taps",
                report.intervals, report.kernel_width
            );
            Ok(())
        }
        Command::Subset {
            input,
            output,
            start,
            end,
            frame_stride,
            agent_stride,
            agent,
        } => {
            let mut reader = TrajectoryReader::open(&input)?;
            let frames = match agent {
                Some(agent) => extract_agent(&mut reader, &output, agent)?,
                None => write_window(
                    &mut reader,
                    &output,
                    ReadWindow {
                        start,
                        end,
                        frame_stride,
                        agent_stride,
                    },
                )?,
            };
            println!("{frames} frames written to {}", output.display());
            Ok(())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn create_text(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn load_set(path: &Path) -> Result<TrajectorySet> {
    TrajectorySet::read(path).with_context(|| format!("failed to load {}", path.display()))
}

fn info_command(input: &Path) -> Result<()> {
    let mut reader = TrajectoryReader::open(input)?;
    let frames = reader.frame_count()?;
    println!("{}", reader.header()?.summary(frames));
    Ok(())
}

fn raster_command(job: &JobConfig, input: &Path, output: &Path, stats: Option<&Path>) -> Result<()> {
    let shape = job.grid.shape()?;
    let source = StoreSource::open(input, job.window)?;
    let engine = RasterEngine::new(job.raster.clone())?;
    stop_on_interrupt(engine.stop_handle())?;
    info!(
        mode = job.mode.label(),
        workers = job.raster.workers,
        resolution = ?shape.resolution(),
        "rasterising"
    );
    let report = engine.run(source, shape, &job.mode, output)?;
    if let Some(path) = stats {
        let mut writer = create_text(path)?;
        report
            .stats
            .dump(&mut writer)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    println!(
        "{} grids | range [{:.5}, {:.5}]{}",
        report.grids_written,
        report.global_min,
        report.global_max,
        if report.stopped { " | stopped" } else { "" }
    );
    Ok(())
}
