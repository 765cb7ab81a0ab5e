/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Verbose mode (-v, --verbose)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the benchmark network, run every benchmark on every instance type, then tear
    /// everything down
    Run {
        /// Path to the TOML config
        #[arg(short, long, default_value = "s3bench.toml")]
        config: PathBuf,

        /// JSON file with an array of benchmarks, may be repeated
        #[arg(short, long = "benchmark-file")]
        benchmark_files: Vec<PathBuf>,

        /// Number of jobs to run at once, overrides the config (0 = all at once)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Where report.json is written, overrides the config
        #[arg(long)]
        result_dir: Option<PathBuf>,
    },

    /// List the available benchmark types
    Benchmarks,
}

pub fn parse() -> Args {
    Args::parse()
}
