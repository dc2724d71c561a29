use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use clap::ValueEnum;
use itertools::iproduct;
use log::debug;
use serde_derive::Deserialize;

use super::{Target, Targets};
use crate::address::AddressRange;
use crate::errors::ScanError;

/// Transport of a multicast stream.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MulticastProtocol {
    Udp,
    Rtp,
}

impl MulticastProtocol {
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Rtp => "rtp",
        }
    }
}

impl FromStr for MulticastProtocol {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "rtp" => Ok(Self::Rtp),
            _ => Err(ScanError::UnsupportedProtocol(s.to_owned())),
        }
    }
}

impl fmt::Display for MulticastProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Cross product of multicast address ranges and ports.
///
/// Targets come out range by range, ascending address within a range, and
/// for every address the ports in the order they were configured:
/// `udp://239.1.1.1:8000`, `udp://239.1.1.1:8004`, `udp://239.1.1.2:8000`...
#[derive(Debug, Clone)]
pub struct MulticastStrategy {
    protocol: MulticastProtocol,
    ranges: Vec<AddressRange>,
    ports: Vec<u16>,
}

impl MulticastStrategy {
    /// # Example
    ///
    /// ```rust
    /// # use iptvscan::strategy::MulticastStrategy;
    /// let multicast = MulticastStrategy::new("rtp", &["239.3.1.1-239.3.1.10", "239.3.2.0/30"], &[5000, 5002]).unwrap();
    /// assert_eq!(multicast.estimated_count(), 28);
    /// ```
    pub fn new<S: AsRef<str>>(
        protocol: &str,
        ranges: &[S],
        ports: &[u16],
    ) -> Result<Self, ScanError> {
        let protocol = <MulticastProtocol as FromStr>::from_str(protocol)?;

        if ranges.is_empty() {
            return Err(ScanError::NoRanges);
        }
        if ports.is_empty() {
            return Err(ScanError::NoPorts);
        }
        if let Some(&port) = ports.iter().find(|&&port| port == 0) {
            return Err(ScanError::InvalidPort(port));
        }

        let ranges = ranges
            .iter()
            .map(|expr| {
                let range = AddressRange::parse(expr.as_ref())?;
                if range.is_multicast() {
                    Ok(range)
                } else {
                    Err(ScanError::NotMulticast(expr.as_ref().trim().to_owned()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let strategy = Self {
            protocol,
            ranges,
            ports: ports.to_vec(),
        };

        debug!(
            "Multicast strategy: {} ranges, {} ports, {} targets",
            strategy.ranges.len(),
            strategy.ports.len(),
            strategy.estimated_count()
        );

        Ok(strategy)
    }

    pub const fn protocol(&self) -> MulticastProtocol {
        self.protocol
    }

    pub fn ranges(&self) -> &[AddressRange] {
        &self.ranges
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Every configured address, range by range.
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.ranges.iter().flat_map(AddressRange::iter)
    }

    /// The first address of the first range.
    pub fn first_address(&self) -> Option<Ipv4Addr> {
        self.ranges.first().map(AddressRange::first)
    }

    pub fn address_count(&self) -> u64 {
        self.ranges.iter().map(AddressRange::count).sum()
    }

    pub fn estimated_count(&self) -> u64 {
        self.address_count() * self.ports.len() as u64
    }

    /// Formats the stream address for `ip` and `port`.
    pub fn target(&self, ip: Ipv4Addr, port: u16) -> Target {
        format_target(self.protocol, ip, port)
    }

    /// Same ranges and protocol, restricted to `ports`.
    pub(crate) fn with_ports(&self, ports: Vec<u16>) -> Self {
        Self {
            protocol: self.protocol,
            ranges: self.ranges.clone(),
            ports,
        }
    }

    /// Full cross product, skipping every occurrence of `excluded`.
    pub(crate) fn targets_excluding(self, excluded: Option<Ipv4Addr>) -> Targets {
        let protocol = self.protocol;
        let addresses = self
            .ranges
            .into_iter()
            .flat_map(|range| range.iter())
            .filter(move |&ip| Some(ip) != excluded);

        Box::new(
            iproduct!(addresses, self.ports.into_iter())
                .map(move |(ip, port)| format_target(protocol, ip, port)),
        )
    }

    pub fn produce(self) -> Targets {
        self.targets_excluding(None)
    }
}

fn format_target(protocol: MulticastProtocol, ip: Ipv4Addr, port: u16) -> Target {
    format!("{protocol}://{ip}:{port}")
}
