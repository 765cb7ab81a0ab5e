/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{provisioner::StackHandle, LifecycleSettings, OrchestratorSettings};
use crate::{
    benchmark::{Benchmark, BenchmarkContext, BenchmarkRunner},
    cloud::{CloudApi, InstanceRequest, InstanceState},
    report::BenchmarkReport,
    retry::retry,
    target::{Target, TargetConnector},
};
use anyhow::{anyhow, Context};
use rand::Rng;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, error, info};

/// The user the image lets us log in as before root login is enabled.
pub const LOGIN_USER: &str = "ubuntu";

const ROOT_LOGIN: [(&str, &str); 3] = [
    (
        "failed to change sshd_config",
        "sudo sed -i 's/#PermitRootLogin prohibit-password/PermitRootLogin yes/g' /etc/ssh/sshd_config",
    ),
    (
        "failed to change authorized_keys",
        r#"sudo sed -i -e 's/.*exit 142" \(.*$\)/\1/' /root/.ssh/authorized_keys"#,
    ),
    ("failed to restart ssh", "sudo systemctl restart ssh"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Launching,
    WaitingHealthy,
    WaitingForPublicIp,
    WaitingReachable,
    ConfiguringRootLogin,
    Ready,
    Terminating,
    Terminated,
}
impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            LifecycleState::Launching => "launching",
            LifecycleState::WaitingHealthy => "waiting until healthy",
            LifecycleState::WaitingForPublicIp => "waiting for a public IP",
            LifecycleState::WaitingReachable => "waiting until reachable",
            LifecycleState::ConfiguringRootLogin => "configuring root login",
            LifecycleState::Ready => "ready",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(state)
    }
}

/// Read-only state every job of one run shares.
pub struct JobEnvironment {
    pub cloud: Arc<dyn CloudApi>,
    pub connector: Arc<dyn TargetConnector>,
    pub stack: StackHandle,
    pub settings: Arc<OrchestratorSettings>,
    pub keys: Arc<Vec<String>>,
    pub root_volume_gib: i32,
}

/// Runs one benchmark on a fresh instance of `instance_type`. Whatever happens after launch, the
/// instance is terminated before this returns.
pub async fn run_job(
    env: Arc<JobEnvironment>,
    benchmark: Box<dyn Benchmark>,
    instance_type: String,
) -> anyhow::Result<BenchmarkReport> {
    // spread out control plane calls of jobs started together
    let max_jitter = env.settings.lifecycle.start_jitter;
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..=max_jitter);
    tokio::time::sleep(jitter).await;

    info!("Starting benchmark {} on {instance_type}", benchmark.name());

    let bandwidth = env
        .cloud
        .instance_type_bandwidth_gbps(&instance_type)
        .await
        .context(format!("describing instance type {instance_type} failed"))?;

    let mut instance = Instance::launch(&env, &instance_type).await?;
    let outcome = instance.benchmark(&env, benchmark, bandwidth).await;
    instance.terminate().await;

    outcome
}

/// One launched instance, driven through its lifecycle.
pub struct Instance {
    cloud: Arc<dyn CloudApi>,
    settings: LifecycleSettings,
    id: String,
    state: LifecycleState,
}
impl Instance {
    pub async fn launch(env: &JobEnvironment, instance_type: &str) -> anyhow::Result<Self> {
        let request = InstanceRequest {
            name: format!("s3bench-{instance_type}"),
            image_id: env.settings.image_id.clone(),
            instance_type: instance_type.to_string(),
            subnet_id: env.stack.subnet_id.clone(),
            security_group_id: env.stack.security_group_id.clone(),
            key_name: env.stack.key_name.clone(),
            instance_profile_name: env.stack.instance_profile_name.clone(),
            root_volume_gib: env.root_volume_gib,
        };

        let lifecycle = env.settings.lifecycle;
        let id = retry(
            lifecycle.launch,
            &format!("launching {instance_type} instance"),
            |_| env.cloud.run_instance(&request),
        )
        .await?;
        info!("Launched {instance_type} instance {id}");

        Ok(Self {
            cloud: env.cloud.clone(),
            settings: lifecycle,
            id,
            state: LifecycleState::Launching,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, state: LifecycleState) {
        debug!("Instance {}: {} -> {state}", self.id, self.state);
        self.state = state;
    }

    /// Brings the instance to [`LifecycleState::Ready`], then sets up and runs the benchmark.
    async fn benchmark(
        &mut self,
        env: &JobEnvironment,
        benchmark: Box<dyn Benchmark>,
        desired_throughput_gbps: f64,
    ) -> anyhow::Result<BenchmarkReport> {
        let target = self.ready(env).await?;

        let ctx = BenchmarkContext {
            target,
            desired_throughput_gbps,
            bucket: env.settings.bucket.clone(),
            keys: env.keys.clone(),
            region: env.cloud.region().to_string(),
            install: self.settings.install,
        };

        let mut runner = BenchmarkRunner::new(
            benchmark,
            env.settings.profiler,
            &env.settings.profile_dir,
            env.settings.runs,
            env.settings.monitor,
        );
        runner
            .set_up(ctx, env.stack.storage_prefixes.clone())
            .await
            .context(format!("benchmark {} setup failed", runner.name()))?;

        Ok(runner.run().await)
    }

    /// Waits until the instance is reachable and can be logged into as root.
    pub async fn ready(&mut self, env: &JobEnvironment) -> anyhow::Result<Arc<dyn Target>> {
        if env.settings.wait_to_initialize {
            self.transition(LifecycleState::WaitingHealthy);
            self.wait_until_healthy().await?;
        }

        self.transition(LifecycleState::WaitingForPublicIp);
        let ip = self.wait_for_public_ip().await?;
        debug!("Instance {} got IP {ip}", self.id);

        self.transition(LifecycleState::WaitingReachable);
        let login = env
            .connector
            .connect(&ip, LOGIN_USER, &env.stack.private_key);
        self.wait_until_reachable(login.as_ref()).await?;

        self.transition(LifecycleState::ConfiguringRootLogin);
        configure_root_login(login.as_ref()).await?;

        self.transition(LifecycleState::Ready);
        Ok(env.connector.connect(&ip, "root", &env.stack.private_key))
    }

    async fn wait_until_healthy(&self) -> anyhow::Result<()> {
        retry(
            self.settings.health,
            &format!("waiting for instance {} to initialize", self.id),
            |_| async move {
                let health = self.cloud.instance_health(&self.id).await?;
                if health.is_healthy() {
                    Ok(())
                } else {
                    Err(anyhow!(
                        "instance status ok: {}, system status ok: {}",
                        health.instance_ok,
                        health.system_ok
                    ))
                }
            },
        )
        .await
    }

    async fn wait_for_public_ip(&self) -> anyhow::Result<String> {
        retry(
            self.settings.public_ip,
            &format!(
                "timed out waiting for instance {} to get a public IP",
                self.id
            ),
            |_| async move {
                self.cloud
                    .instance_public_ip(&self.id)
                    .await?
                    .ok_or(anyhow!("no public IP assigned yet"))
            },
        )
        .await
    }

    async fn wait_until_reachable(&self, login: &dyn Target) -> anyhow::Result<()> {
        retry(
            self.settings.reachability,
            &format!("timed out waiting for instance {} to be reachable", self.id),
            |_| async move {
                let user = login.run_command("whoami").await?;
                match user.trim() {
                    LOGIN_USER => Ok(()),
                    other => Err(anyhow!("logged in as '{other}' instead of {LOGIN_USER}")),
                }
            },
        )
        .await
    }

    /// Terminates the instance and waits until it is gone. Never fails, problems are logged.
    pub async fn terminate(&mut self) {
        self.transition(LifecycleState::Terminating);
        if let Err(err) = self.cloud.terminate_instance(&self.id).await {
            error!("Unable to terminate instance {}: {err:#}", self.id);
        }

        // the stack can't be torn down while instances still use it
        let (cloud, id) = (&self.cloud, &self.id);
        let terminated = retry(
            self.settings.termination,
            &format!("waiting for instance {id} to terminate"),
            |_| async move {
                match cloud.instance_state(id).await? {
                    InstanceState::Terminated => Ok(()),
                    state => Err(anyhow!("instance is {state}")),
                }
            },
        )
        .await;

        match terminated {
            Ok(()) => self.transition(LifecycleState::Terminated),
            Err(err) => error!("{err:#}"),
        }
    }
}

/// Permits root login over SSH and removes the forced command from root's authorized key.
async fn configure_root_login(login: &dyn Target) -> anyhow::Result<()> {
    for (failure, cmd) in ROOT_LOGIN {
        login.run_command(cmd).await.context(failure)?;
    }
    Ok(())
}
