/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::report::RunSummary;
use anyhow::{anyhow, Context};
use std::{collections::HashSet, fs, path::Path};

/// One object the benchmarks read from the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSpec {
    pub key: String,
    pub size: u64,
}

/// The named set of objects a run benchmarks against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSet {
    pub name: String,
    pub description: String,
    pub specs: Vec<ObjectSpec>,
}
impl ObjectSet {
    pub fn new(name: &str, description: &str, specs: Vec<ObjectSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            specs,
        }
    }

    pub fn try_from_path(name: &str, description: &str, path: &Path) -> anyhow::Result<Self> {
        let csv = fs::read_to_string(path)
            .context(format!("Unable to read object specs from {}", path.display()))?;
        let specs = parse_specs(&csv)
            .context(format!("Invalid object specs in {}", path.display()))?;
        Ok(Self::new(name, description, specs))
    }

    pub fn total_bytes(&self) -> u64 {
        self.specs.iter().map(|spec| spec.size).sum()
    }

    pub fn keys(&self) -> Vec<String> {
        self.specs.iter().map(|spec| spec.key.clone()).collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            objects_name: self.name.clone(),
            objects_desc: self.description.clone(),
            object_count: self.specs.len(),
            total_object_bytes: self.total_bytes(),
        }
    }
}

/// Parses `key,size` lines. Lines with fewer than two fields are skipped.
pub fn parse_specs(csv: &str) -> anyhow::Result<Vec<ObjectSpec>> {
    let mut seen = HashSet::new();
    let mut specs = vec![];

    for (line_no, line) in csv.lines().enumerate() {
        let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
        let [key, size, ..] = fields[..] else {
            continue;
        };

        let size = size.parse::<u64>().context(format!(
            "line {}: '{size}' is not a size in bytes",
            line_no + 1
        ))?;
        if !seen.insert(key.to_string()) {
            return Err(anyhow!("line {}: duplicate key {key}", line_no + 1));
        }

        specs.push(ObjectSpec {
            key: key.to_string(),
            size,
        });
    }

    Ok(specs)
}
