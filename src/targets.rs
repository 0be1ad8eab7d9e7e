//! Address enumeration for the command line.
//!
//! Accepts three notations:
//! - dotted-zero networks: `10.0.0.0` walks a /8, `10.1.0.0` a /16 and
//!   `10.1.2.0` a /24, last octet first from 254 down to 1;
//! - CIDR blocks such as `192.168.1.0/24`;
//! - a single address, probed `repeat` times.
//!
//! Addresses are produced lazily so a /8 is never held in memory.

use crate::error::TargetParseError;
use crate::types::ScanMode;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetSet {
    /// Fixed leading octets of a dotted-zero network (1 to 3 of them).
    Walk(Vec<u8>),
    Cidr(IpNet),
    Host { address: IpAddr, repeat: u64 },
}

impl TargetSet {
    pub fn parse(input: &str, repeat: u64) -> Result<Self, TargetParseError> {
        let invalid = |message: String| TargetParseError::Invalid {
            input: input.to_string(),
            message,
        };

        if input.contains('/') {
            let net = IpNet::from_str(input).map_err(|e| invalid(e.to_string()))?;
            if net.prefix_len() == net.max_prefix_len() {
                return Ok(TargetSet::Host {
                    address: net.addr(),
                    repeat: repeat.max(1),
                });
            }
            return Ok(TargetSet::Cidr(net.trunc()));
        }

        let address = IpAddr::from_str(input).map_err(|e| invalid(e.to_string()))?;
        if let IpAddr::V4(v4) = address {
            let [a, b, c, d] = v4.octets();
            if d == 0 {
                let fixed = match (b, c) {
                    (0, 0) => vec![a],
                    (_, 0) => vec![a, b],
                    _ => vec![a, b, c],
                };
                return Ok(TargetSet::Walk(fixed));
            }
        }
        Ok(TargetSet::Host {
            address,
            repeat: repeat.max(1),
        })
    }

    pub fn mode(&self) -> ScanMode {
        match self {
            TargetSet::Host { .. } => ScanMode::SingleHost,
            TargetSet::Walk(_) | TargetSet::Cidr(_) => ScanMode::Range,
        }
    }

    /// Number of addresses the set yields (saturating for huge IPv6 blocks).
    pub fn len(&self) -> u64 {
        match self {
            TargetSet::Walk(fixed) => 254 * 255u64.pow(3 - fixed.len() as u32),
            TargetSet::Cidr(net) => {
                let bits = u32::from(net.max_prefix_len() - net.prefix_len());
                let total = 1u64.checked_shl(bits).unwrap_or(u64::MAX);
                match net {
                    IpNet::V4(_) if bits >= 2 => total - 2,
                    _ => total,
                }
            }
            TargetSet::Host { repeat, .. } => *repeat,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Box<dyn Iterator<Item = String> + Send + '_> {
        match self {
            TargetSet::Walk(fixed) => Box::new(walk(fixed.clone())),
            TargetSet::Cidr(net) => Box::new(net.hosts().map(|ip| ip.to_string())),
            TargetSet::Host { address, repeat } => {
                let address = address.to_string();
                Box::new((0..*repeat).map(move |_| address.clone()))
            }
        }
    }
}

/// Walks the free octets of a dotted-zero network. The last octet varies
/// slowest, descending from 254; middle octets run 0..=254.
fn walk(fixed: Vec<u8>) -> impl Iterator<Item = String> + Send {
    let free = 3 - fixed.len();
    (1..=254u8).rev().flat_map(move |last| {
        let fixed = fixed.clone();
        let middle = 255u32.pow(free as u32);
        (0..middle).map(move |n| {
            let mut octets = [0u8; 4];
            octets[..fixed.len()].copy_from_slice(&fixed);
            // the octet right after the fixed ones varies fastest
            let mut rest = n;
            for slot in fixed.len()..3 {
                octets[slot] = (rest % 255) as u8;
                rest /= 255;
            }
            octets[3] = last;
            Ipv4Addr::from(octets).to_string()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_zero_depths() {
        assert_eq!(TargetSet::parse("10.0.0.0", 1).unwrap(), TargetSet::Walk(vec![10]));
        assert_eq!(TargetSet::parse("10.1.0.0", 1).unwrap(), TargetSet::Walk(vec![10, 1]));
        assert_eq!(TargetSet::parse("10.1.2.0", 1).unwrap(), TargetSet::Walk(vec![10, 1, 2]));
        assert_eq!(TargetSet::parse("10.1.2.0", 1).unwrap().mode(), ScanMode::Range);
    }

    #[test]
    fn slash_24_walk_descends() {
        let set = TargetSet::parse("192.168.7.0", 1).unwrap();
        let all: Vec<String> = set.addresses().collect();
        assert_eq!(all.len() as u64, set.len());
        assert_eq!(all.first().unwrap(), "192.168.7.254");
        assert_eq!(all.last().unwrap(), "192.168.7.1");
    }

    #[test]
    fn slash_16_walk_varies_third_octet_first() {
        let set = TargetSet::parse("172.16.0.0", 1).unwrap();
        let head: Vec<String> = set.addresses().take(3).collect();
        assert_eq!(head, vec!["172.16.0.254", "172.16.1.254", "172.16.2.254"]);
        assert_eq!(set.len(), 254 * 255);
        assert_eq!(set.addresses().nth(255).unwrap(), "172.16.0.253");
    }

    #[test]
    fn slash_8_walk_is_lazy() {
        let set = TargetSet::parse("10.0.0.0", 1).unwrap();
        let head: Vec<String> = set.addresses().take(2).collect();
        assert_eq!(head, vec!["10.0.0.254", "10.1.0.254"]);
        assert_eq!(set.len(), 254 * 255 * 255);
    }

    #[test]
    fn single_host_repeats() {
        let set = TargetSet::parse("10.0.0.5", 3).unwrap();
        assert_eq!(set.mode(), ScanMode::SingleHost);
        assert_eq!(set.addresses().collect::<Vec<_>>(), vec!["10.0.0.5"; 3]);
    }

    #[test]
    fn cidr_blocks() {
        let set = TargetSet::parse("192.168.1.0/30", 1).unwrap();
        assert_eq!(set.addresses().collect::<Vec<_>>(), vec!["192.168.1.1", "192.168.1.2"]);
        assert_eq!(set.len(), 2);
        assert_eq!(TargetSet::parse("10.9.9.9/32", 0).unwrap().mode(), ScanMode::SingleHost);
    }

    #[test]
    fn rejects_garbage() {
        assert!(TargetSet::parse("example", 1).is_err());
        assert!(TargetSet::parse("10.0.0.0/40", 1).is_err());
    }
}
