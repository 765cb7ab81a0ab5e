/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod benchmark;
pub mod clap_args;
pub mod cloud;
pub mod config;
pub mod objects;
pub mod orchestrator;
pub mod prefix;
pub mod profile;
pub mod report;
pub mod retry;
pub mod system_monitor;
pub mod target;

#[cfg(test)]
mod testing;
