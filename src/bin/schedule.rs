//! Manual/fixture entry point for the scheduling core (C11, §2).
//!
//! Reads the cleaned tabular inputs straight from disk and writes the output
//! CSVs to a directory, without the HTTP façade this crate's outputs are
//! normally consumed by. Useful for running a scenario against a fixture
//! directory or reproducing a reported run locally.
//!
//! Runs the scenario on a worker thread and polls the shared
//! [`ScenarioRegistry`] from the main thread to drive the progress bar,
//! exercising the same `progress(scenario)` control-surface contract §6
//! describes for the façade.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use scheduler_core::dispatch::InflationFactors;
use scheduler_core::run::{run_scenario, RunOutcome, ScenarioPaths};
use scheduler_core::state::ScenarioRegistry;

#[derive(Parser, Debug)]
#[command(about = "Run the shop-floor scheduling engine against cleaned CSV inputs.")]
#[command(next_line_help = true)]
struct Args {
    /// Directory holding jobs_clean.csv, shifts_clean.csv,
    /// unlimited_machines.csv and outsourcing_machines.csv.
    #[arg(long, value_name = "DIR")]
    input_dir: PathBuf,

    /// Directory plan.csv, late.csv, unplaced.csv, orders_delivery.csv and
    /// summary.csv are written into.
    #[arg(long, value_name = "DIR")]
    output_dir: PathBuf,

    /// Scenario name, used only for the in-process progress registry.
    #[arg(long, default_value = "default")]
    scenario: String,

    /// Reference instant ("now") for window clamping and deadline
    /// effectiveness, as `YYYY-MM-DD HH:MM:SS`. Defaults to the current
    /// local time.
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<String>,
}

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    let cli = Args::parse();

    let now = match cli.now {
        Some(raw) => NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_else(|why| panic!("--now '{raw}' is not YYYY-MM-DD HH:MM:SS: {why}")),
        None => chrono::Local::now().naive_local(),
    };

    let paths = ScenarioPaths {
        jobs: cli.input_dir.join("jobs_clean.csv"),
        shifts: cli.input_dir.join("shifts_clean.csv"),
        unlimited_machines: cli.input_dir.join("unlimited_machines.csv"),
        outsourcing_machines: cli.input_dir.join("outsourcing_machines.csv"),
        output_dir: cli.output_dir,
    };

    let registry = Arc::new(ScenarioRegistry::new());
    let scenario = cli.scenario.clone();

    let worker = {
        let registry = registry.clone();
        let scenario = scenario.clone();
        thread::spawn(move || run_scenario(&registry, &scenario, &paths, now, &InflationFactors::default()))
    };

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/100 {msg}")
            .expect("static template string should be ok"),
    );
    while !worker.is_finished() {
        let status = registry.status(&scenario);
        bar.set_position(status.progress.max(0) as u64);
        thread::sleep(Duration::from_millis(50));
    }
    bar.finish_and_clear();

    match worker.join().expect("scheduling worker thread panicked") {
        Ok((RunOutcome::Completed, Some(report))) => {
            log::info!(
                "scheduled {} ops ({} late, {} unplaced); objective {:.3}",
                report.placed,
                report.late,
                report.unplaced,
                report.objective_score
            );
        }
        Ok((RunOutcome::Cancelled, _)) => {
            log::warn!("run was cancelled before completion; no outputs were written");
        }
        Ok((RunOutcome::Completed, None)) => unreachable!("completed run always carries a report"),
        Err(err) => {
            log::error!("run failed: {err}");
            std::process::exit(1);
        }
    }
}
