/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, path::Path};
use term_table::{row, row::Row, table_cell::*, Table, TableStyle};

/// A single timestamped sample. `time` is seconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Measurement<T> {
    pub time: i64,
    pub value: T,
}
impl<T> Measurement<T> {
    pub fn new(time: i64, value: T) -> Self {
        Self { time, value }
    }
}

/// A sample belonging to one block device or network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMeasurement<T> {
    pub device_name: String,
    pub measurement: Measurement<T>,
}
impl<T> DeviceMeasurement<T> {
    pub fn new(device_name: &str, time: i64, value: T) -> Self {
        Self {
            device_name: device_name.to_string(),
            measurement: Measurement::new(time, value),
        }
    }
}

/// Every time series collected by one system monitor over the lifetime of one job. Each derived
/// metric has its own series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemMeasurements {
    pub cpu_usage_user: Vec<Measurement<f64>>,
    pub cpu_usage_system: Vec<Measurement<f64>>,
    pub cpu_usage_idle: Vec<Measurement<f64>>,
    pub cpu_usage_nice: Vec<Measurement<f64>>,
    pub cpu_usage_iowait: Vec<Measurement<f64>>,
    pub cpu_usage_irq: Vec<Measurement<f64>>,
    pub cpu_usage_soft_irq: Vec<Measurement<f64>>,
    pub cpu_usage_steal: Vec<Measurement<f64>>,
    pub cpu_usage_guest: Vec<Measurement<f64>>,
    pub cpu_usage_guest_nice: Vec<Measurement<f64>>,

    pub mem_total_bytes: Vec<Measurement<i64>>,
    pub mem_used_bytes: Vec<Measurement<i64>>,
    pub mem_used_pct: Vec<Measurement<f64>>,
    pub mem_avail_bytes: Vec<Measurement<i64>>,
    pub mem_avail_pct: Vec<Measurement<f64>>,
    pub swap_total_bytes: Vec<Measurement<i64>>,
    pub swap_used_bytes: Vec<Measurement<i64>>,
    pub swap_used_pct: Vec<Measurement<f64>>,

    pub disk_reads: Vec<DeviceMeasurement<i64>>,
    pub disk_reads_merged: Vec<DeviceMeasurement<i64>>,
    pub disk_read_bytes: Vec<DeviceMeasurement<i64>>,
    pub disk_read_time_ms: Vec<DeviceMeasurement<i64>>,
    pub disk_writes: Vec<DeviceMeasurement<i64>>,
    pub disk_writes_merged: Vec<DeviceMeasurement<i64>>,
    pub disk_write_bytes: Vec<DeviceMeasurement<i64>>,
    pub disk_write_time_ms: Vec<DeviceMeasurement<i64>>,
    pub disk_io_time_ms: Vec<DeviceMeasurement<i64>>,
    pub disk_weighted_io_time_ms: Vec<DeviceMeasurement<i64>>,
    pub disk_flushes: Vec<DeviceMeasurement<i64>>,
    pub disk_flush_time_ms: Vec<DeviceMeasurement<i64>>,
    pub disk_ios_in_progress: Vec<DeviceMeasurement<i64>>,
    pub disk_discards: Vec<DeviceMeasurement<i64>>,
    pub disk_discards_merged: Vec<DeviceMeasurement<i64>>,
    pub disk_discard_bytes: Vec<DeviceMeasurement<i64>>,
    pub disk_discard_time_ms: Vec<DeviceMeasurement<i64>>,

    pub net_bytes_sent: Vec<DeviceMeasurement<i64>>,
    pub net_bytes_recv: Vec<DeviceMeasurement<i64>>,
    pub net_packets_sent: Vec<DeviceMeasurement<i64>>,
    pub net_packets_recv: Vec<DeviceMeasurement<i64>>,

    pub storage_ips: Vec<Measurement<i64>>,
    pub storage_networks: Vec<Measurement<i64>>,
}

/// The outcome of one (benchmark, instance type) job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BenchmarkReport {
    pub name: String,

    /// Free-form metadata: the command line, per repetition metadata and the instance type.
    pub metadata: Vec<Value>,

    /// Whatever the user configured the benchmark with, echoed back.
    pub input: Map<String, Value>,

    /// Set iff the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// One entry per repetition.
    pub total_time_sec: Vec<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_measurements: Option<SystemMeasurements>,
}
impl BenchmarkReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// A report for a job that failed before producing anything.
    pub fn failed(name: &str, err: &anyhow::Error) -> Self {
        let mut report = Self::new(name);
        report.fail(err);
        report
    }

    /// Marks the report as failed. Timings gathered before the failure are discarded.
    pub fn fail(&mut self, err: &anyhow::Error) {
        self.error = Some(format!("{err:#}"));
        self.total_time_sec.clear();
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn mean_time_sec(&self) -> Option<f64> {
        if self.total_time_sec.is_empty() {
            None
        } else {
            Some(self.total_time_sec.iter().sum::<f64>() / self.total_time_sec.len() as f64)
        }
    }

    /// The instance type recorded in the metadata by the scheduler.
    pub fn instance_type(&self) -> Option<&str> {
        self.metadata
            .iter()
            .rev()
            .find_map(|meta| meta.get("InstanceType"))
            .and_then(Value::as_str)
    }
}

/// Describes the object set the run was executed against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunSummary {
    pub objects_name: String,
    pub objects_desc: String,
    pub object_count: usize,
    pub total_object_bytes: u64,
}

/// Aggregate of every job in one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Report {
    pub config: RunSummary,
    pub reports: Vec<BenchmarkReport>,
}
impl Report {
    pub fn failures(&self) -> impl Iterator<Item = &BenchmarkReport> {
        self.reports.iter().filter(|r| !r.is_success())
    }

    /// Writes the report as JSON into `result_dir/report.json`, creating the directory if needed.
    pub fn write_to_dir(&self, result_dir: &Path) -> anyhow::Result<std::path::PathBuf> {
        fs::create_dir_all(result_dir).context(format!(
            "Unable to create result directory {}",
            result_dir.display()
        ))?;

        let path = result_dir.join("report.json");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).context(format!("Unable to write report {}", path.display()))?;
        Ok(path)
    }

    /// One row per job: benchmark, instance type, mean time and outcome.
    pub fn summary_table(&self) -> String {
        let header = row![
            TableCell::builder("Benchmark".bold()).build(),
            TableCell::builder("Instance type".bold()).build(),
            TableCell::builder("Mean time (s)".bold()).build(),
            TableCell::builder("Status".bold()).build()
        ];

        let rows = std::iter::once(header)
            .chain(self.reports.iter().map(|report| {
                let status = match &report.error {
                    None => "ok".green(),
                    Some(err) => err.as_str().red(),
                };
                row![
                    TableCell::new(&report.name),
                    TableCell::new(report.instance_type().unwrap_or("-")),
                    TableCell::new(
                        report
                            .mean_time_sec()
                            .map(|mean| format!("{mean:.3}"))
                            .unwrap_or("-".to_string())
                    ),
                    TableCell::new(status)
                ]
            }))
            .collect::<Vec<Row>>();

        Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build()
            .render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_a_report_drops_timings() {
        let mut report = BenchmarkReport::new("cli");
        report.total_time_sec = vec![1.0, 2.0];

        report.fail(&anyhow::anyhow!("boom").context("running benchmark failed"));

        assert!(!report.is_success());
        assert!(report.total_time_sec.is_empty());
        assert_eq!(
            report.error.as_deref(),
            Some("running benchmark failed: boom")
        );
    }

    #[test]
    fn mean_time() {
        let mut report = BenchmarkReport::new("cli");
        assert_eq!(report.mean_time_sec(), None);

        report.total_time_sec = vec![1.0, 2.0, 6.0];
        assert_eq!(report.mean_time_sec(), Some(3.0));
    }

    #[test]
    fn instance_type_from_metadata() {
        let mut report = BenchmarkReport::new("cli");
        assert_eq!(report.instance_type(), None);

        report.metadata = vec![
            serde_json::json!({"Command": "aws s3 cp"}),
            serde_json::json!({"InstanceType": "c5n.large"}),
        ];
        assert_eq!(report.instance_type(), Some("c5n.large"));
    }

    #[test]
    fn summary_has_a_row_per_job() {
        let mut ok = BenchmarkReport::new("cli");
        ok.total_time_sec = vec![2.0, 4.0];
        ok.metadata = vec![serde_json::json!({"InstanceType": "c5n.large"})];
        let failed = BenchmarkReport::failed("fio", &anyhow::anyhow!("unreachable"));

        let report = Report {
            config: RunSummary::default(),
            reports: vec![ok, failed],
        };
        let table = report.summary_table();

        assert!(table.contains("c5n.large"));
        assert!(table.contains("3.000"));
        assert!(table.contains("unreachable"));
    }

    #[test]
    fn error_is_omitted_from_json_when_successful() -> anyhow::Result<()> {
        let report = BenchmarkReport::new("cli");
        let json = serde_json::to_value(&report)?;
        assert!(json.get("Error").is_none());
        assert!(json.get("TotalTimeSec").is_some());
        Ok(())
    }
}
