/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    prefix::Ipv4Prefix,
    report::{Measurement, SystemMeasurements},
};
use std::{collections::HashSet, net::Ipv4Addr};
use tracing::warn;

/// Foreign IPv4 addresses of every connection listed by `netstat -n -4`.
fn foreign_addresses(netstat: &str) -> impl Iterator<Item = Ipv4Addr> + '_ {
    netstat
        .lines()
        // "Active Internet connections" and the column header
        .skip(2)
        .filter_map(|line| {
            let parts = line.split_whitespace().collect::<Vec<_>>();
            if parts.len() != 6 {
                return None;
            }
            let host = parts[4].split(':').next().unwrap_or_default();
            match host.parse::<Ipv4Addr>() {
                Ok(addr) => Some(addr),
                Err(err) => {
                    warn!("Unable to parse foreign address {host}: {err}");
                    None
                }
            }
        })
}

/// Counts the unique storage service peers and the unique storage prefixes they belong to.
pub fn count_peers(netstat: &str, prefixes: &[Ipv4Prefix]) -> (usize, usize) {
    let mut peers = HashSet::new();
    let mut networks = HashSet::new();

    for addr in foreign_addresses(netstat) {
        if let Some(prefix) = prefixes.iter().find(|prefix| prefix.contains(addr)) {
            peers.insert(addr);
            networks.insert(*prefix);
        }
    }

    (peers.len(), networks.len())
}

pub fn append(sm: &mut SystemMeasurements, now: i64, netstat: &str, prefixes: &[Ipv4Prefix]) {
    let (peers, networks) = count_peers(netstat, prefixes);
    sm.storage_ips.push(Measurement::new(now, peers as i64));
    sm.storage_networks
        .push(Measurement::new(now, networks as i64));
}
