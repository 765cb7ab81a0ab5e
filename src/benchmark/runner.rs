/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{Benchmark, BenchmarkContext};
use crate::{
    prefix::Ipv4Prefix,
    profile::{Profiler, ProfilerKind},
    report::BenchmarkReport,
    system_monitor::{MonitorSettings, SystemMonitor},
};
use anyhow::{anyhow, Context};
use serde_json::{Map, Value};
use std::{fs::File, path::Path, path::PathBuf, sync::Arc};
use tracing::{debug, info};

/// Drives one benchmark on one target together with the system monitor and, optionally, a
/// profiler.
pub struct BenchmarkRunner {
    benchmark: Box<dyn Benchmark>,
    profiler_kind: ProfilerKind,
    profile_dir: PathBuf,
    runs: u32,
    monitor_settings: MonitorSettings,

    ctx: Option<BenchmarkContext>,
    monitor: Option<SystemMonitor>,
    profiler: Option<Box<dyn Profiler>>,
}
impl BenchmarkRunner {
    pub fn new(
        benchmark: Box<dyn Benchmark>,
        profiler_kind: ProfilerKind,
        profile_dir: &Path,
        runs: u32,
        monitor_settings: MonitorSettings,
    ) -> Self {
        Self {
            benchmark,
            profiler_kind,
            profile_dir: profile_dir.to_path_buf(),
            runs: runs.max(1),
            monitor_settings,
            ctx: None,
            monitor: None,
            profiler: None,
        }
    }

    pub fn name(&self) -> &str {
        self.benchmark.name()
    }

    /// Sets up the benchmark, the system monitor and the profiler, in that order.
    pub async fn set_up(
        &mut self,
        ctx: BenchmarkContext,
        prefixes: Arc<Vec<Ipv4Prefix>>,
    ) -> anyhow::Result<()> {
        info!("Setting up benchmark {}", self.benchmark.name());

        self.benchmark
            .set_up(&ctx)
            .await
            .context("setting up benchmark failed")?;

        let monitor = SystemMonitor::new(ctx.target.clone(), prefixes, self.monitor_settings);
        monitor
            .set_up()
            .await
            .context("setting up system monitor failed")?;

        if let Some(profiler) = self.profiler_kind.create(ctx.target.clone()) {
            profiler
                .set_up()
                .await
                .context("setting up profiler failed")?;
            self.profiler = Some(profiler);
        }

        self.ctx = Some(ctx);
        self.monitor = Some(monitor);
        info!("Finished setting up benchmark {}", self.benchmark.name());
        Ok(())
    }

    /// Runs the benchmark while the system monitor samples the target. The monitor is always
    /// stopped and joined before this returns, whatever happened to the benchmark.
    pub async fn run(mut self) -> BenchmarkReport {
        let mut report = BenchmarkReport::new(self.benchmark.name());
        report.input = self.benchmark.input();

        let (Some(ctx), Some(mut monitor)) = (self.ctx.take(), self.monitor.take()) else {
            report.fail(&anyhow!("benchmark runner has not been set up"));
            return report;
        };

        let cmd = match self.benchmark.command() {
            Ok(cmd) => cmd,
            Err(err) => {
                report.fail(&err.context("getting benchmark command failed"));
                return report;
            }
        };
        debug!("Benchmark {} command: {cmd}", self.benchmark.name());

        let mut meta = Map::new();
        meta.insert("Command".to_string(), Value::from(cmd.clone()));
        meta.insert(
            "Profiler".to_string(),
            Value::from(self.profiler_kind.as_str()),
        );

        if let Err(err) = monitor.start_monitoring().await {
            report.metadata.push(Value::Object(meta));
            report.fail(&err.context("starting system monitor failed"));
            return report;
        }

        info!("Running benchmark {}", self.benchmark.name());
        let outcome = match &self.profiler {
            Some(profiler) => {
                self.run_profiled(profiler.as_ref(), &ctx, &cmd, &mut meta)
                    .await
            }
            None => self.run_repeated(&ctx, &cmd, &mut report).await,
        };

        monitor.stop_monitoring();
        monitor.wait_until_stopped().await;
        report.system_measurements = monitor.take_system_measurements();
        report.metadata.insert(0, Value::Object(meta));

        match outcome {
            Ok(()) => info!("Finished benchmark {}", self.benchmark.name()),
            Err(err) => report.fail(&err),
        }
        report
    }

    async fn run_repeated(
        &self,
        ctx: &BenchmarkContext,
        cmd: &str,
        report: &mut BenchmarkReport,
    ) -> anyhow::Result<()> {
        for run in 1..=self.runs {
            let output = ctx
                .target
                .run_command(cmd)
                .await
                .context("running benchmark failed")?;
            debug!(
                "Benchmark {} run {run}/{} output: {output}",
                self.benchmark.name(),
                self.runs
            );

            let parsed = self
                .benchmark
                .parse_command_output(&output)
                .context("parsing benchmark output failed")?;
            report.total_time_sec.push(parsed.total_time_sec);
            report.metadata.extend(parsed.metadata);
        }
        Ok(())
    }

    /// Runs the command once under the profiler and copies the result archive to
    /// `<profile_dir>/<benchmark name>-<archive name>`.
    async fn run_profiled(
        &self,
        profiler: &dyn Profiler,
        ctx: &BenchmarkContext,
        cmd: &str,
        meta: &mut Map<String, Value>,
    ) -> anyhow::Result<()> {
        let remote_path = profiler
            .profile_command(cmd)
            .await
            .context("profiling benchmark failed")?;

        let file_name = Path::new(&remote_path)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(anyhow!("profiler returned an invalid path: {remote_path}"))?;
        let local_path = self
            .profile_dir
            .join(format!("{}-{file_name}", self.benchmark.name()));
        meta.insert(
            "ProfilingResultPath".to_string(),
            Value::from(local_path.display().to_string()),
        );

        std::fs::create_dir_all(&self.profile_dir).context(format!(
            "Unable to create profile directory {}",
            self.profile_dir.display()
        ))?;
        let file = File::create(&local_path).context(format!(
            "failed to open {} for writing",
            local_path.display()
        ))?;
        ctx.target
            .copy_file_from(&remote_path, Box::new(file))
            .await
            .context("failed to copy profiling result")?;
        Ok(())
    }
}
