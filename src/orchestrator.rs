/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod instance;
pub mod policy;
pub mod provisioner;
pub mod scheduler;

use crate::{
    benchmark::{BenchmarkRegistry, BenchmarkSpec},
    cloud::CloudApi,
    objects::ObjectSet,
    profile::ProfilerKind,
    report::{BenchmarkReport, Report},
    retry::Backoff,
    system_monitor::MonitorSettings,
    target::TargetConnector,
};
use anyhow::anyhow;
use instance::{run_job, JobEnvironment};
use provisioner::{Provisioner, StackHandle};
use serde_json::{json, Value};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info};

pub const DEFAULT_IMAGE_ID: &str = "ami-05fb0b8c1424f266b";

/// Bounded waits of the instance lifecycle and the fixed delays around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub launch: Backoff,
    pub health: Backoff,
    pub public_ip: Backoff,
    pub reachability: Backoff,
    pub termination: Backoff,

    /// Retry policy for installing software on instances.
    pub install: Backoff,

    /// Upper bound of the random delay before a job's first cloud call.
    pub start_jitter: Duration,

    /// Sleep after creating identity resources and before anything uses them.
    pub iam_propagation_delay: Duration,
}
impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            launch: Backoff::new(5, Duration::from_secs(60)),
            health: Backoff::new(5, Duration::from_secs(60)),
            public_ip: Backoff::new(10, Duration::from_secs(3)),
            reachability: Backoff::new(30, Duration::from_secs(10)),
            termination: Backoff::new(5, Duration::from_secs(60)),
            install: Backoff::new(3, Duration::from_secs(30)),
            start_jitter: Duration::from_secs(10),
            iam_propagation_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub bucket: String,
    pub instance_types: Vec<String>,
    pub image_id: String,
    pub wait_to_initialize: bool,

    /// Jobs run at once, 0 runs every job at once.
    pub concurrency: usize,
    pub runs: u32,
    pub profiler: ProfilerKind,
    pub profile_dir: PathBuf,
    pub warm_up_objects: bool,
    pub lifecycle: LifecycleSettings,
    pub monitor: MonitorSettings,
}
impl OrchestratorSettings {
    pub fn new(bucket: &str, instance_types: Vec<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            instance_types,
            image_id: DEFAULT_IMAGE_ID.to_string(),
            wait_to_initialize: true,
            concurrency: 0,
            runs: 1,
            profiler: ProfilerKind::None,
            profile_dir: PathBuf::from("profiles"),
            warm_up_objects: false,
            lifecycle: LifecycleSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

/// Root volume size in GiB for instances benchmarking `total_bytes` of objects.
pub fn root_volume_gib(total_bytes: u64) -> i32 {
    let total_gb = total_bytes.div_ceil(1_000_000_000);
    i32::try_from(total_gb + 10).unwrap_or(i32::MAX).max(32)
}

/// Provisions a resource stack, runs every registered benchmark on every requested instance type
/// and tears the stack down again.
pub struct Orchestrator {
    cloud: Arc<dyn CloudApi>,
    connector: Arc<dyn TargetConnector>,
    registry: BenchmarkRegistry,
    settings: Arc<OrchestratorSettings>,
    benchmarks: Vec<BenchmarkSpec>,
    provisioner: Provisioner,
    objects: ObjectSet,
    stack: Option<StackHandle>,
}
impl Orchestrator {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        connector: Arc<dyn TargetConnector>,
        registry: BenchmarkRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        let provisioner = Provisioner::new(
            cloud.clone(),
            &settings.bucket,
            settings.lifecycle.iam_propagation_delay,
        );
        Self {
            cloud,
            connector,
            registry,
            settings: Arc::new(settings),
            benchmarks: vec![],
            provisioner,
            objects: ObjectSet::default(),
            stack: None,
        }
    }

    pub fn add_benchmark(&mut self, spec: BenchmarkSpec) {
        self.benchmarks.push(spec);
    }

    pub fn benchmarks(&self) -> &[BenchmarkSpec] {
        &self.benchmarks
    }

    /// Provisions the resource stack for benchmarking `objects`. Whatever this leaves behind on
    /// failure is removed by [`Orchestrator::tear_down`].
    pub async fn set_up(&mut self, objects: ObjectSet) -> anyhow::Result<()> {
        if self.settings.warm_up_objects {
            return Err(anyhow!("warming up objects is not supported"));
        }

        info!(
            "Setting up for {} objects ({} bytes) in bucket {}",
            objects.specs.len(),
            objects.total_bytes(),
            self.settings.bucket
        );
        self.objects = objects;
        self.stack = Some(self.provisioner.set_up().await?);
        Ok(())
    }

    /// Runs the job matrix. Failed jobs are part of the report, only being unable to build the
    /// jobs is an error.
    pub async fn run_benchmarks(&self) -> anyhow::Result<Report> {
        let stack = self
            .stack
            .clone()
            .ok_or(anyhow!("the orchestrator has not been set up"))?;

        let jobs = scheduler::expand_jobs(
            &self.registry,
            &self.benchmarks,
            &self.settings.instance_types,
        )?;
        let labels = jobs.iter().map(|job| job.label()).collect::<Vec<_>>();
        info!(
            "Running {} benchmark jobs, concurrency {}",
            jobs.len(),
            self.settings.concurrency
        );

        let env = Arc::new(JobEnvironment {
            cloud: self.cloud.clone(),
            connector: self.connector.clone(),
            stack,
            settings: self.settings.clone(),
            keys: Arc::new(self.objects.keys()),
            root_volume_gib: root_volume_gib(self.objects.total_bytes()),
        });

        let outcomes = scheduler::run_jobs(jobs, self.settings.concurrency, |job| {
            run_job(env.clone(), job.benchmark, job.instance_type)
        })
        .await;

        let reports = labels
            .into_iter()
            .zip(outcomes)
            .map(|(label, outcome)| {
                let mut report = match outcome {
                    Ok(report) => report,
                    Err(err) => {
                        error!(
                            "Benchmark {} on {} failed: {err:#}",
                            label.name, label.instance_type
                        );
                        let mut report = BenchmarkReport::failed(&label.name, &err);
                        report.input = label.input;
                        report
                    }
                };
                report
                    .metadata
                    .push(json!({ "InstanceType": Value::from(label.instance_type) }));
                report
            })
            .collect();

        Ok(Report {
            config: self.objects.summary(),
            reports,
        })
    }

    /// Removes the resource stack. Never fails, problems are logged.
    pub async fn tear_down(&mut self) {
        self.stack = None;
        self.provisioner.tear_down().await;
    }
}
