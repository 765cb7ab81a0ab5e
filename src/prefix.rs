/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr, str::FromStr};

/// An IPv4 network in CIDR notation, e.g. `52.216.0.0/15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Prefix {
    addr: Ipv4Addr,
    len: u8,
}
impl Ipv4Prefix {
    pub fn new(addr: Ipv4Addr, len: u8) -> anyhow::Result<Self> {
        if len > 32 {
            return Err(anyhow!("prefix length {len} is longer than 32 bits"));
        }
        Ok(Self { addr, len })
    }

    fn mask(&self) -> u32 {
        match self.len {
            0 => 0,
            len => u32::MAX << (32 - len),
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        u32::from(addr) & mask == u32::from(self.addr) & mask
    }
}

impl FromStr for Ipv4Prefix {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .context(format!("prefix {s} is missing a '/'"))?;
        let addr = addr
            .parse::<Ipv4Addr>()
            .context(format!("invalid address in prefix {s}"))?;
        let len = len
            .parse::<u8>()
            .context(format!("invalid length in prefix {s}"))?;
        Ipv4Prefix::new(addr, len)
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl TryFrom<String> for Ipv4Prefix {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Prefix> for String {
    fn from(value: Ipv4Prefix) -> Self {
        value.to_string()
    }
}
