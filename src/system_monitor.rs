/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod cpu;
pub mod disk_io;
pub mod memory;
pub mod network;
pub mod storage_peers;

use crate::{
    prefix::Ipv4Prefix,
    report::SystemMeasurements,
    retry::{retry, Backoff},
    target::{RemoteSession, SessionError, Target},
};
use anyhow::{anyhow, Context};
use cpu::CpuTimes;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const INSTALL_DEPENDENCIES: &str = "apt update -y && apt install -y net-tools";

const CMD_CPU: &str = "cat /proc/stat";
const CMD_DISK: &str = "cat /proc/diskstats";
const CMD_MEMORY: &str = "cat /proc/meminfo";
const CMD_NETWORK: &str = "cat /proc/net/dev";
const CMD_CONNECTIONS: &str = "netstat -n -4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between samples.
    pub period: Duration,

    /// How far a loop iteration may overrun `period` before a warning is logged.
    pub jitter_budget: Duration,

    /// Retry policy for installing the tools the monitor needs on the target.
    pub install: Backoff,
}
impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            jitter_budget: Duration::from_secs(1),
            install: Backoff::new(3, Duration::from_secs(30)),
        }
    }
}

struct StopHandle {
    token: CancellationToken,
    task: JoinHandle<SystemMeasurements>,
}

/// Samples OS telemetry from one target in a background task.
///
/// Stopping is two-phase: [`SystemMonitor::stop_monitoring`] only signals the task,
/// [`SystemMonitor::wait_until_stopped`] waits for it to exit and takes ownership of what it
/// collected. Measurements are only readable after that.
pub struct SystemMonitor {
    target: Arc<dyn Target>,
    prefixes: Arc<Vec<Ipv4Prefix>>,
    settings: MonitorSettings,
    running: Option<StopHandle>,
    measurements: Option<SystemMeasurements>,
}
impl SystemMonitor {
    pub fn new(
        target: Arc<dyn Target>,
        prefixes: Arc<Vec<Ipv4Prefix>>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            target,
            prefixes,
            settings,
            running: None,
            measurements: None,
        }
    }

    /// Installs the tools needed for sampling.
    pub async fn set_up(&self) -> anyhow::Result<()> {
        retry(
            self.settings.install,
            "installing system monitor dependencies",
            |_| self.target.run_command(INSTALL_DEPENDENCIES),
        )
        .await?;
        Ok(())
    }

    /// Opens a persistent connection to the target and starts sampling over it.
    pub async fn start_monitoring(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            return Err(anyhow!("system monitor is already running"));
        }

        let session = self
            .target
            .client()
            .await
            .context("Unable to open a monitoring connection")?;

        let token = CancellationToken::new();
        let task = tokio::spawn(keep_sampling(
            session,
            self.prefixes.clone(),
            self.settings,
            token.clone(),
        ));

        self.measurements = None;
        self.running = Some(StopHandle { token, task });
        Ok(())
    }

    /// Asks the sampling task to stop. Does not wait.
    pub fn stop_monitoring(&self) {
        if let Some(handle) = &self.running {
            handle.token.cancel();
        }
    }

    /// Waits for the sampling task to exit. Returns immediately if it was never started.
    pub async fn wait_until_stopped(&mut self) {
        let Some(handle) = self.running.take() else {
            return;
        };

        let measurements = match handle.task.await {
            Ok(measurements) => measurements,
            Err(err) => {
                error!("System monitor task failed: {err}");
                SystemMeasurements::default()
            }
        };
        self.measurements = Some(measurements);
    }

    /// The collected measurements, `None` while the sampling task is still running or if it was
    /// never started.
    pub fn system_measurements(&self) -> Option<&SystemMeasurements> {
        match self.running {
            Some(_) => None,
            None => self.measurements.as_ref(),
        }
    }

    pub fn take_system_measurements(&mut self) -> Option<SystemMeasurements> {
        match self.running {
            Some(_) => None,
            None => self.measurements.take(),
        }
    }
}

async fn keep_sampling(
    mut session: Box<dyn RemoteSession>,
    prefixes: Arc<Vec<Ipv4Prefix>>,
    settings: MonitorSettings,
    token: CancellationToken,
) -> SystemMeasurements {
    let mut sm = SystemMeasurements::default();
    let mut prev_cpu = None;
    let mut last_wake = Instant::now();

    loop {
        if token.is_cancelled() {
            break;
        }

        let jitter = last_wake.elapsed().saturating_sub(settings.period);
        if jitter > settings.jitter_budget {
            warn!(
                "System monitor overran its period by {}ms (budget {}ms)",
                jitter.as_millis(),
                settings.jitter_budget.as_millis()
            );
        }
        last_wake = Instant::now();

        if let Err(err) = sample(session.as_mut(), &mut sm, &mut prev_cpu, &prefixes).await {
            error!("Stopping system monitor, {err}");
            break;
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(settings.period) => {}
        }
    }

    debug!("System monitor stopped");
    sm
}

/// Takes one sample of every metric. Only a lost connection is an error, a single failed command
/// just leaves a gap in that metric.
async fn sample(
    session: &mut dyn RemoteSession,
    sm: &mut SystemMeasurements,
    prev_cpu: &mut Option<CpuTimes>,
    prefixes: &[Ipv4Prefix],
) -> Result<(), SessionError> {
    if let Some(stat) = read(session, CMD_CPU).await? {
        let curr = CpuTimes::parse(&stat);
        if let (Some(curr), Some(prev)) = (&curr, &prev_cpu) {
            cpu::append(sm, now(), curr, prev);
        }
        *prev_cpu = curr;
    }

    if let Some(diskstats) = read(session, CMD_DISK).await? {
        disk_io::append(sm, now(), &diskstats);
    }

    if let Some(meminfo) = read(session, CMD_MEMORY).await? {
        memory::append(sm, now(), &meminfo);
    }

    if let Some(net_dev) = read(session, CMD_NETWORK).await? {
        network::append(sm, now(), &net_dev);
    }

    if let Some(netstat) = read(session, CMD_CONNECTIONS).await? {
        storage_peers::append(sm, now(), &netstat, prefixes);
    }

    Ok(())
}

async fn read(session: &mut dyn RemoteSession, cmd: &str) -> Result<Option<String>, SessionError> {
    match session.exec(cmd).await {
        Ok(out) => Ok(Some(out)),
        Err(err) if err.is_connection_lost() => Err(err),
        Err(err) => {
            warn!("System monitor command `{cmd}` failed: {err}");
            Ok(None)
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
