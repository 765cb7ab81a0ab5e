/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::report::{Measurement, SystemMeasurements};

/// The `/proc/meminfo` fields the monitor cares about, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: i64,
    pub free: i64,
    pub available: i64,
    pub buffers: i64,
    /// Page cache plus reclaimable slab.
    pub cached: i64,
    pub swap_total: i64,
    pub swap_free: i64,
    pub swap_cached: i64,
}
impl MemInfo {
    pub fn parse(meminfo: &str) -> Self {
        let mut info = MemInfo::default();
        for line in meminfo.lines() {
            let parts = line.split_whitespace().collect::<Vec<_>>();
            let [key, value, _unit] = parts[..] else {
                continue;
            };
            let Ok(kib) = value.parse::<i64>() else {
                continue;
            };
            let bytes = kib * 1024;

            match key.trim_end_matches(':') {
                "MemTotal" => info.total = bytes,
                "MemFree" => info.free = bytes,
                "MemAvailable" => info.available = bytes,
                "Buffers" => info.buffers = bytes,
                "Cached" | "SReclaimable" => info.cached += bytes,
                "SwapTotal" => info.swap_total = bytes,
                "SwapFree" => info.swap_free = bytes,
                "SwapCached" => info.swap_cached = bytes,
                _ => {}
            }
        }
        info
    }

    pub fn used(&self) -> i64 {
        self.total - self.free - self.buffers - self.cached
    }

    pub fn swap_used(&self) -> i64 {
        self.swap_total - self.swap_free - self.swap_cached
    }
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

pub fn append(sm: &mut SystemMeasurements, now: i64, meminfo: &str) {
    let info = MemInfo::parse(meminfo);
    let used = info.used();
    let swap_used = info.swap_used();
    let bytes = |value: i64| Measurement::new(now, value);
    let pct = |part: i64, whole: i64| Measurement::new(now, percent(part, whole));

    sm.mem_total_bytes.push(bytes(info.total));
    sm.mem_used_bytes.push(bytes(used));
    sm.mem_used_pct.push(pct(used, info.total));
    sm.mem_avail_bytes.push(bytes(info.available));
    sm.mem_avail_pct.push(pct(info.available, info.total));
    sm.swap_total_bytes.push(bytes(info.swap_total));
    sm.swap_used_bytes.push(bytes(swap_used));
    sm.swap_used_pct.push(pct(swap_used, info.swap_total));
}
