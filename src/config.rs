/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    benchmark::BenchmarkSpec,
    objects::ObjectSet,
    orchestrator::{LifecycleSettings, OrchestratorSettings, DEFAULT_IMAGE_ID},
    profile::ProfilerKind,
    retry::Backoff,
    system_monitor::MonitorSettings,
};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bucket: String,

    /// Falls back to the AWS default provider chain when missing.
    #[serde(default)]
    pub region: Option<String>,
    pub instance_types: Vec<String>,

    #[serde(default = "default_true")]
    pub wait_to_initialize: bool,

    /// 0 runs every job at once.
    #[serde(default)]
    pub benchmark_concurrency: usize,

    #[serde(default = "default_runs")]
    pub benchmark_runs: u32,

    #[serde(default)]
    pub profiler: ProfilerKind,

    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,

    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,

    #[serde(default = "default_image_id")]
    pub image_id: String,

    #[serde(default)]
    pub warm_up_objects: bool,

    #[serde(default)]
    pub objects: Option<ObjectsConfig>,

    #[serde(rename(serialize = "benchmark", deserialize = "benchmark"), default)]
    pub benchmarks: Vec<BenchmarkSpec>,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_true() -> bool {
    true
}

fn default_runs() -> u32 {
    1
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("profiles")
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_image_id() -> String {
    DEFAULT_IMAGE_ID.to_string()
}

impl Config {
    pub fn try_from_path(path: &Path) -> anyhow::Result<Config> {
        let conf_str = fs::read_to_string(path)
            .context(format!("Unable to read config file {}", path.display()))?;
        Config::try_from_str(&conf_str)
    }

    pub fn try_from_str(conf_str: &str) -> anyhow::Result<Config> {
        let config = toml::from_str::<Config>(conf_str)
            .map_err(|e| anyhow!("TOML parsing error: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(anyhow!("`bucket` must not be empty"));
        }
        if self.instance_types.is_empty() {
            return Err(anyhow!("`instance_types` must not be empty"));
        }
        if let Some(dup) = first_duplicate(&self.instance_types) {
            return Err(anyhow!("instance type {dup} is listed twice"));
        }
        Ok(())
    }

    /// Runtime settings for the orchestrator, with every default filled in.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let lifecycle = self.lifecycle.settings();
        OrchestratorSettings {
            bucket: self.bucket.clone(),
            instance_types: self.instance_types.clone(),
            image_id: self.image_id.clone(),
            wait_to_initialize: self.wait_to_initialize,
            concurrency: self.benchmark_concurrency,
            runs: self.benchmark_runs.max(1),
            profiler: self.profiler,
            profile_dir: self.profile_dir.clone(),
            warm_up_objects: self.warm_up_objects,
            lifecycle,
            monitor: self.monitor.settings(lifecycle.install),
        }
    }

    /// Loads the object specs, resolving a relative CSV path against `base_dir`. A config
    /// without an `[objects]` table benchmarks an empty object set.
    pub fn load_objects(&self, base_dir: &Path) -> anyhow::Result<ObjectSet> {
        match &self.objects {
            Some(objects) => ObjectSet::try_from_path(
                &objects.name,
                &objects.description,
                &base_dir.join(&objects.path),
            ),
            None => Ok(ObjectSet::default()),
        }
    }
}

fn first_duplicate(items: &[String]) -> Option<&str> {
    items
        .iter()
        .enumerate()
        .find(|&(i, item)| items[..i].contains(item))
        .map(|(_, item)| item.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectsConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// CSV of `key,size` lines.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    pub attempts: u32,
    pub interval_secs: u64,
}
impl From<BackoffConfig> for Backoff {
    fn from(conf: BackoffConfig) -> Self {
        Backoff::new(conf.attempts, Duration::from_secs(conf.interval_secs))
    }
}

/// Overrides of the lifecycle timings, anything missing keeps its default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    pub launch: Option<BackoffConfig>,
    pub health: Option<BackoffConfig>,
    pub public_ip: Option<BackoffConfig>,
    pub reachability: Option<BackoffConfig>,
    pub termination: Option<BackoffConfig>,
    pub install: Option<BackoffConfig>,
    pub start_jitter_secs: Option<u64>,
    pub iam_propagation_delay_secs: Option<u64>,
}
impl LifecycleConfig {
    pub fn settings(&self) -> LifecycleSettings {
        let defaults = LifecycleSettings::default();

        LifecycleSettings {
            launch: backoff_or(self.launch, defaults.launch),
            health: backoff_or(self.health, defaults.health),
            public_ip: backoff_or(self.public_ip, defaults.public_ip),
            reachability: backoff_or(self.reachability, defaults.reachability),
            termination: backoff_or(self.termination, defaults.termination),
            install: backoff_or(self.install, defaults.install),
            start_jitter: self
                .start_jitter_secs
                .map_or(defaults.start_jitter, Duration::from_secs),
            iam_propagation_delay: self
                .iam_propagation_delay_secs
                .map_or(defaults.iam_propagation_delay, Duration::from_secs),
        }
    }
}

fn backoff_or(conf: Option<BackoffConfig>, default: Backoff) -> Backoff {
    conf.map_or(default, Backoff::from)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    pub period_ms: Option<u64>,
    pub jitter_budget_ms: Option<u64>,
}
impl MonitorConfig {
    pub fn settings(&self, install: Backoff) -> MonitorSettings {
        let defaults = MonitorSettings::default();
        MonitorSettings {
            period: self.period_ms.map_or(defaults.period, Duration::from_millis),
            jitter_budget: self
                .jitter_budget_ms
                .map_or(defaults.jitter_budget, Duration::from_millis),
            install,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const MINIMAL: &str = r#"
bucket = "bench-data"
instance_types = ["c5n.large"]
"#;

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let config = Config::try_from_str(MINIMAL)?;
        let settings = config.orchestrator_settings();

        assert_eq!(config.region, None);
        assert_eq!(config.result_dir, PathBuf::from("results"));
        assert!(config.benchmarks.is_empty());
        assert!(settings.wait_to_initialize);
        assert_eq!(settings.concurrency, 0);
        assert_eq!(settings.runs, 1);
        assert_eq!(settings.image_id, DEFAULT_IMAGE_ID);
        assert_eq!(settings.profiler, ProfilerKind::None);
        assert_eq!(settings.lifecycle, LifecycleSettings::default());
        assert_eq!(settings.monitor, MonitorSettings::default());
        Ok(())
    }

    #[test]
    fn full_config() -> anyhow::Result<()> {
        let config = Config::try_from_str(
            r#"
bucket = "bench-data"
region = "eu-west-1"
instance_types = ["c5n.large", "c5n.18xlarge"]
wait_to_initialize = false
benchmark_concurrency = 2
benchmark_runs = 0
profiler = "vtune"

[objects]
name = "small"
path = "objects.csv"

[[benchmark]]
type = "aws_cli"
[benchmark.input]
Name = "cli"

[lifecycle]
reachability = { attempts = 3, interval_secs = 1 }
start_jitter_secs = 0

[monitor]
period_ms = 500
"#,
        )?;
        let settings = config.orchestrator_settings();

        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(!settings.wait_to_initialize);
        assert_eq!(settings.concurrency, 2);
        // fewer than one run means one run
        assert_eq!(settings.runs, 1);
        assert_eq!(settings.profiler, ProfilerKind::VTune);
        assert_eq!(
            settings.lifecycle.reachability,
            Backoff::new(3, Duration::from_secs(1))
        );
        assert_eq!(settings.lifecycle.start_jitter, Duration::ZERO);
        assert_eq!(
            settings.lifecycle.launch,
            LifecycleSettings::default().launch
        );
        assert_eq!(settings.monitor.period, Duration::from_millis(500));

        assert_eq!(config.benchmarks.len(), 1);
        assert_eq!(config.benchmarks[0].kind, "aws_cli");
        assert_eq!(
            config.benchmarks[0].input.get("Name"),
            Some(&Value::from("cli"))
        );
        assert_eq!(
            config.objects.map(|objects| objects.path),
            Some(PathBuf::from("objects.csv"))
        );
        Ok(())
    }

    #[test]
    fn rejects_invalid_configs() {
        let invalid = [
            "bucket = 'b'\ninstance_types = []",
            "bucket = ''\ninstance_types = ['a']",
            "bucket = 'b'\ninstance_types = ['a', 'a']",
            "bucket = 'b'\ninstance_types = ['a']\nprofiler = 'perf'",
            "bucket = 'b'\ninstance_types = ['a']\ntypo = 1",
        ];
        for conf in invalid {
            assert!(Config::try_from_str(conf).is_err(), "{conf}");
        }
    }

    #[test]
    fn missing_objects_table_is_an_empty_set() -> anyhow::Result<()> {
        let config = Config::try_from_str(MINIMAL)?;
        let objects = config.load_objects(Path::new("."))?;
        assert!(objects.specs.is_empty());
        Ok(())
    }
}
