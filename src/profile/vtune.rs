/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::Profiler;
use crate::target::Target;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const ALPHANUMERIC: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

const SET_UP: [(&str, &str); 4] = [
    (
        "installing dependencies",
        "apt update -y && apt install -y gpg-agent wget",
    ),
    (
        "installing the oneAPI signing key",
        "wget -O- https://apt.repos.intel.com/intel-gpg-keys/GPG-PUB-KEY-INTEL-SW-PRODUCTS.PUB \
         | gpg --dearmor | tee /usr/share/keyrings/oneapi-archive-keyring.gpg > /dev/null",
    ),
    (
        "adding the oneAPI repository",
        "echo 'deb [signed-by=/usr/share/keyrings/oneapi-archive-keyring.gpg] \
         https://apt.repos.intel.com/oneapi all main' | tee /etc/apt/sources.list.d/oneAPI.list",
    ),
    (
        "installing VTune",
        "apt update -y && apt install -y intel-oneapi-vtune",
    ),
];

/// Intel VTune software sampling hotspot collection.
pub struct VTune {
    target: Arc<dyn Target>,
}
impl VTune {
    pub fn new(target: Arc<dyn Target>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Profiler for VTune {
    async fn set_up(&self) -> anyhow::Result<()> {
        for (what, cmd) in SET_UP {
            self.target
                .run_command(cmd)
                .await
                .context(format!("VTune: {what} failed"))?;
        }
        Ok(())
    }

    async fn profile_command(&self, cmd: &str) -> anyhow::Result<String> {
        let result_dir = format!("r{}", nanoid::nanoid!(8, &ALPHANUMERIC));
        let quoted = shlex::try_quote(cmd).context("benchmark command cannot be quoted")?;

        let collect = format!(
            "bash -c 'source /opt/intel/oneapi/vtune/latest/env/vars.sh && vtune -collect hotspots \
             -knob sampling-mode=sw -knob enable-stack-collection=true -result-dir={result_dir} \
             -- bash -c \"$0\"' {quoted}"
        );
        debug!("VTune collection: {collect}");
        self.target
            .run_command(&collect)
            .await
            .context("VTune: collection failed")?;

        let result_file = format!("/root/{result_dir}.tar.gz");
        self.target
            .run_command(&format!("tar -czf {result_file} {result_dir}"))
            .await
            .context("VTune: compressing the result directory failed")?;

        Ok(result_file)
    }
}
