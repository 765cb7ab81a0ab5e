/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{aws_cli::AwsCliBenchmark, Benchmark, BenchmarkSpec};
use anyhow::anyhow;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

pub type BenchmarkConstructor =
    Arc<dyn Fn(&Map<String, Value>) -> anyhow::Result<Box<dyn Benchmark>> + Send + Sync>;

/// Maps benchmark type tags to constructors. Built once at startup and passed to whoever needs
/// to turn a [`BenchmarkSpec`] into a [`Benchmark`].
#[derive(Clone, Default)]
pub struct BenchmarkRegistry {
    constructors: BTreeMap<String, BenchmarkConstructor>,
}
impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every benchmark shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(AwsCliBenchmark::TYPE, |input| {
            Ok(Box::new(AwsCliBenchmark::from_input(input)?))
        });
        registry
    }

    /// Registers `constructor` under `kind`, replacing any previous registration.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&Map<String, Value>) -> anyhow::Result<Box<dyn Benchmark>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn create(&self, spec: &BenchmarkSpec) -> anyhow::Result<Box<dyn Benchmark>> {
        let constructor = self
            .constructors
            .get(&spec.kind)
            .ok_or_else(|| anyhow!("unknown benchmark type: {}", spec.kind))?;
        constructor(&spec.input)
    }

    /// Registered type tags in alphabetical order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
