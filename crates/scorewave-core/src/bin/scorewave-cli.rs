use std::{path::PathBuf, sync::atomic::AtomicBool};

use clap::{Parser, Subcommand, ValueEnum};
use scorewave_core::{
    EngineConfig, PeakControl,
    diagnostics::init_tracing_from_config,
    fingerprint::{render_fingerprint, write_fingerprint_report},
    fixtures::demo_engine,
};

#[derive(Debug, Parser)]
#[command(name = "scorewave-cli")]
#[command(about = "Headless render, export and fingerprint tools for Scorewave sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the configured log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Renders the demo session to a file.
    DemoExport {
        #[arg(long, default_value = "data/exports/demo.wav")]
        output: PathBuf,

        #[arg(long)]
        compressed: bool,

        #[arg(long)]
        sample_rate: Option<u32>,

        #[arg(long, default_value_t = 2)]
        channels: u16,

        #[arg(long, value_enum)]
        peak_control: Option<PeakControlArg>,
    },
    /// Writes a fingerprint report for the demo session.
    Fingerprint {
        #[arg(long, default_value = "data/fingerprint/report.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum PeakControlArg {
    Compressor,
    HardClip,
}

impl From<PeakControlArg> for PeakControl {
    fn from(value: PeakControlArg) -> Self {
        match value {
            PeakControlArg::Compressor => Self::Compressor,
            PeakControlArg::HardClip => Self::HardClip,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = EngineConfig::load_or_default()?;
    if let Some(log_dir) = cli.log_dir {
        config.diagnostics.logs_dir = log_dir;
    }
    let _telemetry = init_tracing_from_config(&config.diagnostics)?;

    match cli.command {
        Commands::DemoExport {
            output,
            compressed,
            sample_rate,
            channels,
            peak_control,
        } => {
            let engine = demo_engine(config)?;
            let mut options = engine.export_options();
            options.compressed = compressed;
            options.channels = channels;
            if let Some(sample_rate) = sample_rate {
                options.sample_rate = sample_rate;
            }
            if let Some(peak_control) = peak_control {
                options.mastering.peak_control = peak_control.into();
            }

            let summary = engine.export(&options, &output, &AtomicBool::new(false), |fraction| {
                tracing::trace!(fraction, "export progress");
            })?;
            tracing::info!(
                path = %summary.path.display(),
                frames = summary.frames,
                lufs = summary.lufs,
                "demo exported"
            );
        }
        Commands::Fingerprint { output } => {
            let engine = demo_engine(config)?;
            let report = render_fingerprint(&engine, &engine.export_options())?;
            write_fingerprint_report(&output, &report)?;
            tracing::info!(path = %output.display(), audio_hash = %report.audio_hash, "fingerprint report generated");
        }
    }

    Ok(())
}
