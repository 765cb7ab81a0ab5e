/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod vtune;

use crate::target::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Wraps a benchmark command in a profiler running on the target.
#[async_trait]
pub trait Profiler: Send + Sync {
    async fn set_up(&self) -> anyhow::Result<()>;

    /// Runs `cmd` under the profiler and returns the remote path of the result archive.
    async fn profile_command(&self, cmd: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilerKind {
    #[default]
    None,
    VTune,
}
impl ProfilerKind {
    /// `None` for [`ProfilerKind::None`].
    pub fn create(&self, target: Arc<dyn Target>) -> Option<Box<dyn Profiler>> {
        match self {
            ProfilerKind::None => None,
            ProfilerKind::VTune => Some(Box::new(vtune::VTune::new(target))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfilerKind::None => "none",
            ProfilerKind::VTune => "vtune",
        }
    }
}
impl fmt::Display for ProfilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
