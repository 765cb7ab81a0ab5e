/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod aws_cli;
pub mod registry;
pub mod runner;

use crate::{retry::Backoff, target::Target};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub use registry::BenchmarkRegistry;
pub use runner::BenchmarkRunner;

/// Everything a benchmark needs to know about the machine and data it runs against. Each job
/// builds its own.
#[derive(Clone)]
pub struct BenchmarkContext {
    pub target: Arc<dyn Target>,

    /// Baseline network bandwidth of the instance type in Gbps.
    pub desired_throughput_gbps: f64,
    pub bucket: String,
    pub keys: Arc<Vec<String>>,
    pub region: String,

    /// Retry policy for installing software on the target.
    pub install: Backoff,
}

/// What one execution of a benchmark command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchmarkOutput {
    pub total_time_sec: f64,
    pub metadata: Vec<Value>,
}

#[async_trait]
pub trait Benchmark: Send + Sync {
    /// May install software or copy files onto the target.
    async fn set_up(&mut self, ctx: &BenchmarkContext) -> anyhow::Result<()>;

    /// The command which runs the benchmark, including any warm up.
    fn command(&self) -> anyhow::Result<String>;

    fn parse_command_output(&self, output: &str) -> anyhow::Result<BenchmarkOutput>;

    fn name(&self) -> &str;

    /// Echoed into the report, not otherwise interpreted.
    fn input(&self) -> Map<String, Value>;
}

/// A benchmark as written in a benchmark file or the config: a registered type tag and whatever
/// input that type accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSpec {
    #[serde(rename = "Type", alias = "type")]
    pub kind: String,

    #[serde(rename = "Input", alias = "input", default)]
    pub input: Map<String, Value>,
}
impl BenchmarkSpec {
    pub fn new(kind: &str, input: Map<String, Value>) -> Self {
        Self {
            kind: kind.to_string(),
            input,
        }
    }

    /// Reads a JSON array of benchmark specs.
    pub fn from_json(json: &str) -> anyhow::Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Returns the last line of `output` which is not just whitespace.
pub fn last_non_empty_line(output: &str) -> Option<&str> {
    output.lines().rev().find(|line| !line.trim().is_empty())
}
