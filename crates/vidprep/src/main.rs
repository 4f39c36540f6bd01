mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use vidprep_core::pipeline::{self, AugmentConfig, BatchSummary, CountConfig, ResampleConfig};
use vidprep_core::video::FfmpegTools;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let tools = FfmpegTools {
        ffmpeg: cli.ffmpeg,
        ffprobe: cli.ffprobe,
    };

    match cli.command {
        cli::Command::Resample {
            input,
            output,
            target_count,
            fps,
            prefix,
            codec,
        } => {
            info!(?input, ?output, target_count, fps, "starting resample");

            let config = ResampleConfig {
                input_dir: input,
                output_dir: output,
                target_count,
                output_fps: fps,
                name_prefix: prefix,
                codec,
                tools,
                ..Default::default()
            };

            let summary = pipeline::run_resample(&config).context("resample failed")?;
            report(&summary);
            Ok(())
        }
        cli::Command::Augment {
            input,
            output,
            seed,
            max_rotation,
            codec,
        } => {
            info!(?input, ?output, ?seed, "starting augmentation");

            let config = AugmentConfig {
                input_dir: input,
                output_dir: output,
                seed,
                max_rotation,
                codec,
                tools,
                ..Default::default()
            };

            let summary = pipeline::run_augment(&config).context("augmentation failed")?;
            report(&summary);
            Ok(())
        }
        cli::Command::Count {
            input,
            csv,
            plot,
            no_plot,
            font,
        } => {
            let defaults = CountConfig::for_input(&input);
            let config = CountConfig {
                csv_path: csv.unwrap_or(defaults.csv_path.clone()),
                plot_path: if no_plot { None } else { plot.or(defaults.plot_path.clone()) },
                font_path: font,
                tools,
                ..defaults
            };
            info!(?input, csv = ?config.csv_path, plot = ?config.plot_path, "starting frame count");

            let records = pipeline::run_count(&config).context("frame count failed")?;
            if records.is_empty() {
                warn!("no videos could be counted");
            }
            Ok(())
        }
    }
}

fn report(summary: &BatchSummary) {
    for (video, reason) in &summary.failed {
        warn!(?video, %reason, "skipped");
    }
    info!(
        processed = summary.processed,
        failed = summary.failed.len(),
        "batch finished"
    );
}
