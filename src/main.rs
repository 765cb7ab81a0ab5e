/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::{anyhow, Context};
use colored::Colorize;
use s3bench::{
    benchmark::{BenchmarkRegistry, BenchmarkSpec},
    clap_args::{self, Commands},
    cloud::AwsCloud,
    config::Config,
    orchestrator::Orchestrator,
    report::Report,
    target::SshConnector,
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // AWS credentials and region may come from .env
    dotenvy::dotenv().ok();

    let args = clap_args::parse();
    init_tracing(args.verbose);

    let registry = BenchmarkRegistry::with_builtins();
    match args.command {
        Commands::Benchmarks => {
            for kind in registry.kinds() {
                println!("{kind}");
            }
            Ok(())
        }

        Commands::Run {
            config,
            benchmark_files,
            concurrency,
            result_dir,
        } => run(registry, &config, &benchmark_files, concurrency, result_dir).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

async fn run(
    registry: BenchmarkRegistry,
    config_path: &Path,
    benchmark_files: &[PathBuf],
    concurrency: Option<usize>,
    result_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = Config::try_from_path(config_path)?;
    let config_dir = config_path.parent().unwrap_or(Path::new("."));

    let mut benchmarks = config.benchmarks.clone();
    for path in benchmark_files {
        let json = fs::read_to_string(path)
            .context(format!("Unable to read benchmark file {}", path.display()))?;
        benchmarks.extend(
            BenchmarkSpec::from_json(&json)
                .context(format!("Invalid benchmark file {}", path.display()))?,
        );
    }
    if benchmarks.is_empty() {
        return Err(anyhow!(
            "No benchmarks configured, add [[benchmark]] entries or pass --benchmark-file"
        ));
    }

    let objects = config.load_objects(config_dir)?;

    let mut settings = config.orchestrator_settings();
    if let Some(concurrency) = concurrency {
        settings.concurrency = concurrency;
    }

    let cloud = Arc::new(AwsCloud::from_env(config.region.clone()).await?);
    let mut orchestrator = Orchestrator::new(cloud, Arc::new(SshConnector), registry, settings);
    for spec in benchmarks {
        orchestrator.add_benchmark(spec);
    }

    // teardown runs even when setup failed part way
    let outcome = match orchestrator.set_up(objects).await {
        Ok(()) => orchestrator.run_benchmarks().await,
        Err(err) => Err(err.context("Setting up the benchmark environment failed")),
    };
    orchestrator.tear_down().await;

    let report = outcome?;
    let result_dir = result_dir.unwrap_or(config.result_dir);
    let path = report.write_to_dir(&result_dir)?;
    info!("Report written to {}", path.display());

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &Report) {
    println!("\n{}", " Summary ".reversed().green());
    println!("{}", report.summary_table());

    let failures = report.failures().count();
    if failures > 0 {
        let jobs = report.reports.len();
        error!("{failures} of {jobs} benchmark jobs failed");
    }
}
