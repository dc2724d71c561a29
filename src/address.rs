//! Provides functions to parse IPv4 address ranges.
//!
//! A range expression is either a single address (`239.1.1.1`), an inclusive
//! pair (`239.1.1.1-239.1.1.20`) or a CIDR block (`239.1.1.0/30`).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use cidr_utils::cidr::Ipv4Cidr;

use crate::errors::ScanError;

/// An inclusive, ascending span of IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl AddressRange {
    /// Builds a range from two endpoints, both inclusive.
    ///
    /// ```rust
    /// # use iptvscan::address::AddressRange;
    /// # use std::net::Ipv4Addr;
    /// let range = AddressRange::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 3)).unwrap();
    /// assert_eq!(range.count(), 3);
    /// ```
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, ScanError> {
        if u32::from(start) > u32::from(end) {
            return Err(ScanError::ReversedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parses a range expression: single address, `A-B` pair, or CIDR.
    pub fn parse(expr: &str) -> Result<Self, ScanError> {
        let expr = expr.trim();
        let invalid = || ScanError::InvalidAddress(expr.to_owned());

        if let Some((start, end)) = expr.split_once('-') {
            let start = parse_ip(start).ok_or_else(invalid)?;
            let end = parse_ip(end).ok_or_else(invalid)?;
            return Self::new(start, end);
        }

        if expr.contains('/') {
            let cidr = Ipv4Cidr::from_str(expr).map_err(|_| invalid())?;
            return Self::new(cidr.first_address(), cidr.last_address());
        }

        let single = parse_ip(expr).ok_or_else(invalid)?;
        Ok(Self {
            start: single,
            end: single,
        })
    }

    pub const fn first(&self) -> Ipv4Addr {
        self.start
    }

    pub const fn last(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses in the range, endpoints included.
    pub fn count(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }

    /// Iterates the range in ascending numeric order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + Clone + Send + 'static {
        (u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from)
    }

    /// True when both endpoints sit inside the same RFC1918 block.
    ///
    /// The private blocks are far larger than any contiguous span between
    /// them, so checking the endpoints covers every address in between.
    pub fn is_private(&self) -> bool {
        private_block(self.start).is_some() && private_block(self.start) == private_block(self.end)
    }

    /// True when both endpoints sit inside 224.0.0.0/4.
    pub const fn is_multicast(&self) -> bool {
        self.start.is_multicast() && self.end.is_multicast()
    }
}

impl FromStr for AddressRange {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

fn parse_ip(raw: &str) -> Option<Ipv4Addr> {
    Ipv4Addr::from_str(raw.trim()).ok()
}

/// Index of the RFC1918 block holding `ip`, if any.
fn private_block(ip: Ipv4Addr) -> Option<u8> {
    match ip.octets() {
        [10, ..] => Some(0),
        [172, b, ..] if (16..=31).contains(&b) => Some(1),
        [192, 168, ..] => Some(2),
        _ => None,
    }
}
