/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::benchmark::{Benchmark, BenchmarkRegistry, BenchmarkSpec};
use anyhow::{anyhow, Context};
use itertools::Itertools;
use serde_json::{Map, Value};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tracing::error;

/// One (benchmark, instance type) pair. Its position in the job list is its identity.
pub struct Job {
    pub benchmark: Box<dyn Benchmark>,
    pub instance_type: String,
}

/// What the report needs about a job if the job never produces a report itself.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLabel {
    pub name: String,
    pub input: Map<String, Value>,
    pub instance_type: String,
}

/// Builds every job of the cross product `specs × instance_types`, benchmark major. Each job gets
/// its own benchmark instance.
pub fn expand_jobs(
    registry: &BenchmarkRegistry,
    specs: &[BenchmarkSpec],
    instance_types: &[String],
) -> anyhow::Result<Vec<Job>> {
    specs
        .iter()
        .cartesian_product(instance_types)
        .map(|(spec, instance_type)| {
            let benchmark = registry
                .create(spec)
                .context(format!("creating a {} benchmark failed", spec.kind))?;
            Ok(Job {
                benchmark,
                instance_type: instance_type.clone(),
            })
        })
        .collect()
}

impl Job {
    pub fn label(&self) -> JobLabel {
        JobLabel {
            name: self.benchmark.name().to_string(),
            input: self.benchmark.input(),
            instance_type: self.instance_type.clone(),
        }
    }
}

/// Runs `run` on every job. With `concurrency == 0` every job starts immediately, otherwise at
/// most `concurrency` run at once and the rest queue.
///
/// Jobs never affect each other: a failing or panicking job only produces an error in its own
/// slot. Outcomes are returned in job order.
pub async fn run_jobs<J, T, F, Fut>(
    jobs: Vec<J>,
    concurrency: usize,
    run: F,
) -> Vec<anyhow::Result<T>>
where
    J: Send + 'static,
    T: Send + 'static,
    F: Fn(J) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let job_count = jobs.len();
    let pool = (concurrency > 0).then(|| Arc::new(Semaphore::new(concurrency)));

    // sized so no job ever waits on the collector
    let (results_tx, mut results_rx) = mpsc::channel(job_count.max(1));

    let mut join_set = JoinSet::new();
    for (index, job) in jobs.into_iter().enumerate() {
        let pool = pool.clone();
        let results_tx = results_tx.clone();
        let fut = run(job);

        join_set.spawn(async move {
            let _permit = match pool {
                Some(pool) => match pool.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(err) => {
                        let _ = results_tx.send((index, Err(anyhow!(err)))).await;
                        return;
                    }
                },
                None => None,
            };

            let outcome = fut.await;
            let _ = results_tx.send((index, outcome)).await;
        });
    }
    drop(results_tx);

    while let Some(joined) = join_set.join_next().await {
        if let Err(err) = joined {
            error!("Benchmark job did not complete: {err}");
        }
    }

    let mut outcomes = (0..job_count).map(|_| None).collect::<Vec<_>>();
    while let Some((index, outcome)) = results_rx.recv().await {
        outcomes[index] = Some(outcome);
    }

    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|| Err(anyhow!("benchmark job panicked"))))
        .collect()
}
