//! crosscal CLI - cross-calibrate a LISS-III/AWiFS scene against a reference sensor

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use crosscal::{CalibrationConfig, CalibrationReport, PipelineOrchestrator, ReferenceSensor};

#[derive(Parser)]
#[command(name = "crosscal")]
#[command(author, version, about = "Radiometric cross-calibration of LISS-III/AWiFS scenes", long_about = None)]
struct Cli {
    /// Reference sensor: "Sentinel 2", "Landsat 8" or "Others"
    #[arg(short = 's', long)]
    reference_sensor: Option<String>,

    /// Folder with the LISS-III/AWiFS radiance images and *_META.txt
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Folder with the reference images
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn print_report(report: &CalibrationReport) {
    println!();
    println!("{:>6}  {:>14}  {:>14}  {:>12}  output", "band", "reference", "target", "factor");
    for band in &report.bands {
        println!(
            "{:>6}  {:>14.6}  {:>14.6}  {:>12.6}  {}",
            band.factor.band,
            band.factor.reference_mean,
            band.factor.target_mean,
            band.factor.factor,
            band.output.display()
        );
    }
    for skipped in &report.skipped {
        println!(
            "{:>6}  {:>14.6}  {:>14.6}  {:>12}  skipped",
            skipped.band, skipped.reference_mean, skipped.target_mean, "-"
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = match &cli.config {
        Some(path) => CalibrationConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => CalibrationConfig::default(),
    };

    let sensor_label = match cli.reference_sensor {
        Some(label) => label,
        None => prompt(&format!(
            "Enter the name of the reference sensor [{}]: ",
            ReferenceSensor::LABELS
                .iter()
                .map(|l| format!("\"{}\"", l))
                .collect::<Vec<_>>()
                .join(", ")
        ))?,
    };
    let reference_sensor: ReferenceSensor = sensor_label.parse()?;

    let target = match cli.target {
        Some(path) => path,
        None => PathBuf::from(prompt(
            "Enter the path to the folder containing the radiance images of LISS III or AWiFS: ",
        )?),
    };

    let reference = match cli.reference {
        Some(path) => path,
        None => {
            if reference_sensor == ReferenceSensor::Others {
                println!("Note: with \"Others\" the reference folder must hold reflectance images.");
            }
            PathBuf::from(prompt("Enter the path to the folder containing the reference images: ")?)
        }
    };

    let start = Instant::now();
    let orchestrator = PipelineOrchestrator::new(config)?;
    let report = orchestrator
        .run(&target, &reference, reference_sensor)
        .with_context(|| format!("Cross-calibration of {} failed", target.display()))?;

    print_report(&report);
    log::info!("Completed in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
