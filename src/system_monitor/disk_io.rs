/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::report::{DeviceMeasurement, SystemMeasurements};

const SECTOR_BYTES: i64 = 512;

/// One line of `/proc/diskstats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskStat {
    pub device_name: String,
    pub reads_completed: i64,
    pub reads_merged: i64,
    pub sectors_read: i64,
    pub read_time_ms: i64,
    pub writes_completed: i64,
    pub writes_merged: i64,
    pub sectors_written: i64,
    pub write_time_ms: i64,
    pub ios_in_progress: i64,
    pub io_time_ms: i64,
    pub weighted_io_time_ms: i64,
    /// Only reported by kernels 4.18 and newer.
    pub discards: Option<DiscardStat>,
    /// Only reported by kernels 5.5 and newer.
    pub flushes: Option<(i64, i64)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardStat {
    pub completed: i64,
    pub merged: i64,
    pub sectors: i64,
    pub time_ms: i64,
}
impl DiskStat {
    pub fn parse_line(line: &str) -> Option<Self> {
        let parts = line.split_whitespace().collect::<Vec<_>>();
        if parts.len() < 14 {
            return None;
        }
        let num = |i: usize| parts[i].parse::<i64>().ok();

        let discards = if parts.len() >= 18 {
            Some(DiscardStat {
                completed: num(14)?,
                merged: num(15)?,
                sectors: num(16)?,
                time_ms: num(17)?,
            })
        } else {
            None
        };
        let flushes = if parts.len() >= 20 {
            Some((num(18)?, num(19)?))
        } else {
            None
        };

        Some(Self {
            device_name: parts[2].to_string(),
            reads_completed: num(3)?,
            reads_merged: num(4)?,
            sectors_read: num(5)?,
            read_time_ms: num(6)?,
            writes_completed: num(7)?,
            writes_merged: num(8)?,
            sectors_written: num(9)?,
            write_time_ms: num(10)?,
            ios_in_progress: num(11)?,
            io_time_ms: num(12)?,
            weighted_io_time_ms: num(13)?,
            discards,
            flushes,
        })
    }
}

pub fn append(sm: &mut SystemMeasurements, now: i64, diskstats: &str) {
    for stat in diskstats.lines().filter_map(DiskStat::parse_line) {
        let name = stat.device_name.as_str();
        let sample = |value: i64| DeviceMeasurement::new(name, now, value);

        sm.disk_reads.push(sample(stat.reads_completed));
        sm.disk_reads_merged.push(sample(stat.reads_merged));
        let read_bytes = stat.sectors_read * SECTOR_BYTES;
        sm.disk_read_bytes.push(sample(read_bytes));
        sm.disk_read_time_ms.push(sample(stat.read_time_ms));
        sm.disk_writes.push(sample(stat.writes_completed));
        sm.disk_writes_merged.push(sample(stat.writes_merged));
        let write_bytes = stat.sectors_written * SECTOR_BYTES;
        sm.disk_write_bytes.push(sample(write_bytes));
        sm.disk_write_time_ms.push(sample(stat.write_time_ms));
        sm.disk_ios_in_progress.push(sample(stat.ios_in_progress));
        sm.disk_io_time_ms.push(sample(stat.io_time_ms));
        let weighted_io_time_ms = stat.weighted_io_time_ms;
        sm.disk_weighted_io_time_ms.push(sample(weighted_io_time_ms));

        if let Some(discards) = stat.discards {
            sm.disk_discards.push(sample(discards.completed));
            sm.disk_discards_merged.push(sample(discards.merged));
            let discard_bytes = discards.sectors * SECTOR_BYTES;
            sm.disk_discard_bytes.push(sample(discard_bytes));
            sm.disk_discard_time_ms.push(sample(discards.time_ms));
        }

        if let Some((flushes, flush_time_ms)) = stat.flushes {
            sm.disk_flushes.push(sample(flushes));
            sm.disk_flush_time_ms.push(sample(flush_time_ms));
        }
    }
}
