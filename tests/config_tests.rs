/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use s3bench::{
    benchmark::{BenchmarkRegistry, BenchmarkSpec},
    config::Config,
    profile::ProfilerKind,
    retry::Backoff,
};
use std::{fs, path::PathBuf, time::Duration};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

#[test]
fn loads_the_fixture_config() -> anyhow::Result<()> {
    let config = Config::try_from_path(&fixtures().join("config.toml"))?;
    let settings = config.orchestrator_settings();

    assert_eq!(settings.bucket, "s3bench-fixture-data");
    assert_eq!(settings.instance_types, vec!["c5n.large", "c5n.9xlarge"]);
    assert_eq!(settings.concurrency, 2);
    assert_eq!(settings.runs, 3);
    assert_eq!(settings.profiler, ProfilerKind::None);
    assert_eq!(
        settings.lifecycle.reachability,
        Backoff::new(20, Duration::from_secs(15))
    );
    assert_eq!(
        settings.lifecycle.iam_propagation_delay,
        Duration::from_secs(15)
    );
    assert_eq!(settings.monitor.jitter_budget, Duration::from_millis(500));
    Ok(())
}

#[test]
fn loads_objects_relative_to_the_config() -> anyhow::Result<()> {
    let config = Config::try_from_path(&fixtures().join("config.toml"))?;
    let objects = config.load_objects(&fixtures())?;

    assert_eq!(objects.name, "mixed");
    assert_eq!(objects.specs.len(), 4);
    assert_eq!(objects.total_bytes(), 2 * 1048576 + 2 * 1073741824);

    let summary = objects.summary();
    assert_eq!(summary.object_count, 4);
    assert_eq!(summary.objects_desc, "a handful of small and large objects");
    Ok(())
}

#[test]
fn missing_config_file_is_an_error() {
    let err = Config::try_from_path(&fixtures().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("Unable to read config file"));
}

#[test]
fn benchmark_file_specs_are_buildable() -> anyhow::Result<()> {
    let json = fs::read_to_string(fixtures().join("benchmarks.json"))?;
    let specs = BenchmarkSpec::from_json(&json)?;
    let registry = BenchmarkRegistry::with_builtins();

    let names = specs
        .iter()
        .map(|spec| registry.create(spec).map(|b| b.name().to_string()))
        .collect::<anyhow::Result<Vec<_>>>()?;
    assert_eq!(names, vec!["cli-a", "aws_cli"]);
    Ok(())
}

#[test]
fn config_benchmarks_are_buildable() -> anyhow::Result<()> {
    let config = Config::try_from_path(&fixtures().join("config.toml"))?;
    let registry = BenchmarkRegistry::with_builtins();

    let benchmark = registry.create(&config.benchmarks[0])?;
    assert_eq!(benchmark.name(), "cli-recursive-copy");
    Ok(())
}
