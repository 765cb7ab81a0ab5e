/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{last_non_empty_line, Benchmark, BenchmarkContext, BenchmarkOutput};
use crate::retry::retry;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

const INSTALL_DEPENDENCIES: &str = "apt update -y && apt install -y unzip net-tools";
const INSTALL_CLI: [(&str, &str); 3] = [
    (
        "downloading the AWS CLI",
        "curl -sS https://awscli.amazonaws.com/awscli-exe-linux-x86_64.zip -o awscliv2.zip",
    ),
    ("unzipping the AWS CLI", "unzip -o -q awscliv2.zip"),
    ("installing the AWS CLI", "./aws/install --update"),
];

#[derive(Debug, Default, Deserialize)]
struct AwsCliInput {
    #[serde(rename = "Name", alias = "name", default)]
    name: Option<String>,
}

/// Times a recursive copy of the whole bucket with the AWS CLI.
#[derive(Debug, Clone)]
pub struct AwsCliBenchmark {
    name: String,
    bucket: Option<String>,
}
impl AwsCliBenchmark {
    pub const TYPE: &'static str = "aws_cli";

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bucket: None,
        }
    }

    pub fn from_input(input: &Map<String, Value>) -> anyhow::Result<Self> {
        let input: AwsCliInput = serde_json::from_value(Value::Object(input.clone()))
            .context("invalid input for the aws_cli benchmark")?;
        Ok(Self::new(input.name.as_deref().unwrap_or(Self::TYPE)))
    }
}

#[async_trait]
impl Benchmark for AwsCliBenchmark {
    async fn set_up(&mut self, ctx: &BenchmarkContext) -> anyhow::Result<()> {
        retry(ctx.install, "installing AWS CLI dependencies", |_| {
            ctx.target.run_command(INSTALL_DEPENDENCIES)
        })
        .await?;

        for (what, cmd) in INSTALL_CLI {
            ctx.target
                .run_command(cmd)
                .await
                .context(format!("{what} failed"))?;
        }

        self.bucket = Some(ctx.bucket.clone());
        Ok(())
    }

    fn command(&self) -> anyhow::Result<String> {
        let bucket = self
            .bucket
            .as_deref()
            .ok_or(anyhow!("the aws_cli benchmark has not been set up"))?;
        let quoted = shlex::try_quote(bucket).context("bucket name cannot be quoted")?;
        Ok(format!(
            "bash -c 'TIMEFORMAT=%R; time aws s3 cp --recursive --quiet \"s3://$0\" \"/tmp/$0\"' \
             {quoted}"
        ))
    }

    fn parse_command_output(&self, output: &str) -> anyhow::Result<BenchmarkOutput> {
        let line = last_non_empty_line(output).ok_or(anyhow!("benchmark produced no output"))?;
        debug!("aws_cli timing line: {line}");

        let total_time_sec = line
            .trim()
            .parse::<f64>()
            .context(format!("did not find the elapsed time in '{line}'"))?;
        Ok(BenchmarkOutput {
            total_time_sec,
            metadata: vec![],
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input(&self) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("Name".to_string(), Value::from(self.name.clone()));
        input
    }
}
