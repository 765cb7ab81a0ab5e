/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::report::{DeviceMeasurement, SystemMeasurements};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStat {
    pub interface: String,
    pub recv_bytes: i64,
    pub recv_packets: i64,
    pub sent_bytes: i64,
    pub sent_packets: i64,
}
impl InterfaceStat {
    /// Parses one interface line of `/proc/net/dev`. The two header lines have no `:` and are
    /// rejected. Large counters can run into the colon, so the name is split off first.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (interface, counters) = line.split_once(':')?;
        let counters = counters
            .split_whitespace()
            .map(|field| field.parse::<i64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if counters.len() != 16 {
            return None;
        }

        Some(Self {
            interface: interface.trim().to_string(),
            recv_bytes: counters[0],
            recv_packets: counters[1],
            sent_bytes: counters[8],
            sent_packets: counters[9],
        })
    }
}

pub fn append(sm: &mut SystemMeasurements, now: i64, net_dev: &str) {
    for stat in net_dev.lines().filter_map(InterfaceStat::parse_line) {
        let name = stat.interface.as_str();
        sm.net_bytes_recv
            .push(DeviceMeasurement::new(name, now, stat.recv_bytes));
        sm.net_packets_recv
            .push(DeviceMeasurement::new(name, now, stat.recv_packets));
        sm.net_bytes_sent
            .push(DeviceMeasurement::new(name, now, stat.sent_bytes));
        sm.net_packets_sent
            .push(DeviceMeasurement::new(name, now, stat.sent_packets));
    }
}
