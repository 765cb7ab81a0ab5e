/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::report::{Measurement, SystemMeasurements};

/// Cumulative jiffies from the aggregate `cpu ` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: i64,
    pub nice: i64,
    pub system: i64,
    pub idle: i64,
    pub iowait: i64,
    pub irq: i64,
    pub soft_irq: i64,
    pub steal: i64,
    pub guest: i64,
    pub guest_nice: i64,
}
impl CpuTimes {
    /// Finds the aggregate line and parses it. Per core lines are ignored.
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|line| line.starts_with("cpu "))?;
        let fields = line
            .split_whitespace()
            .skip(1)
            .map(|field| field.parse::<i64>().ok())
            .collect::<Option<Vec<_>>>()?;

        if fields.len() < 8 {
            return None;
        }
        // guest and guest_nice are missing on very old kernels
        let field = |i: usize| fields.get(i).copied().unwrap_or(0);

        Some(Self {
            user: field(0),
            nice: field(1),
            system: field(2),
            idle: field(3),
            iowait: field(4),
            irq: field(5),
            soft_irq: field(6),
            steal: field(7),
            guest: field(8),
            guest_nice: field(9),
        })
    }

    /// Guest time is already accounted for in user and nice.
    pub fn total(&self) -> i64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.soft_irq
            + self.steal
    }
}

/// Appends one sample per CPU state derived from two consecutive readings. Nothing is appended
/// when the total did not advance (counter reset or a bad read).
pub fn append(sm: &mut SystemMeasurements, now: i64, curr: &CpuTimes, prev: &CpuTimes) {
    let delta = curr.total() - prev.total();
    if delta <= 0 {
        return;
    }

    let pct = |ticks: i64| Measurement::new(now, 100.0 * ticks as f64 / delta as f64);
    let guest = curr.guest - prev.guest;
    let guest_nice = curr.guest_nice - prev.guest_nice;
    let user = curr.user - prev.user - guest;
    let nice = curr.nice - prev.nice - guest_nice;
    let soft_irq = curr.soft_irq - prev.soft_irq;

    sm.cpu_usage_user.push(pct(user));
    sm.cpu_usage_system.push(pct(curr.system - prev.system));
    sm.cpu_usage_idle.push(pct(curr.idle - prev.idle));
    sm.cpu_usage_nice.push(pct(nice));
    sm.cpu_usage_iowait.push(pct(curr.iowait - prev.iowait));
    sm.cpu_usage_irq.push(pct(curr.irq - prev.irq));
    sm.cpu_usage_soft_irq.push(pct(soft_irq));
    sm.cpu_usage_steal.push(pct(curr.steal - prev.steal));
    sm.cpu_usage_guest.push(pct(guest));
    sm.cpu_usage_guest_nice.push(pct(guest_nice));
}
