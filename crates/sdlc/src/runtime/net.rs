//! Network value types: addresses, CIDR networks, and ports.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::runtime::error::{RtResult, RuntimeError};

/// An IPv4 or IPv6 address.
///
/// IPv4 addresses keep their family; masking with a prefix length above 32
/// treats the value as IPv4 (the prefix counts from bit 96 of the mapped
/// form, as conventional for mixed-family rule sets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(IpAddr);

impl Address {
    pub fn v4(addr: Ipv4Addr) -> Self {
        Self(IpAddr::V4(addr))
    }

    pub fn v6(addr: Ipv6Addr) -> Self {
        Self(IpAddr::V6(addr))
    }

    /// Parses a textual address of either family.
    pub fn parse(text: &str) -> RtResult<Self> {
        IpAddr::from_str(text)
            .map(Self)
            .map_err(|_| RuntimeError::invalid_value(format!("cannot parse address {text:?}")))
    }

    /// Decodes an address from raw bytes: 4 bytes for IPv4, 16 for IPv6.
    pub fn from_bytes(data: &[u8]) -> RtResult<Self> {
        match data.len() {
            4 => {
                let octets: [u8; 4] = data.try_into().expect("length checked");
                Ok(Self(IpAddr::V4(Ipv4Addr::from(octets))))
            }
            16 => {
                let octets: [u8; 16] = data.try_into().expect("length checked");
                Ok(Self(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            n => Err(RuntimeError::invalid_argument(format!(
                "cannot decode address from {n} bytes"
            ))),
        }
    }

    pub fn is_v4(self) -> bool {
        matches!(self.0, IpAddr::V4(_))
    }

    pub fn inner(self) -> IpAddr {
        self.0
    }

    /// Keeps the top `prefix` bits, zeroing the rest.
    ///
    /// For IPv4 the prefix is interpreted relative to the 32-bit address when
    /// `prefix <= 32`; larger prefixes are taken in the IPv6-mapped space.
    pub fn mask(self, prefix: u8) -> RtResult<Self> {
        match self.0 {
            IpAddr::V4(v4) => {
                let prefix = if prefix > 32 { prefix.checked_sub(96) } else { Some(prefix) };
                let Some(prefix @ ..=32) = prefix else {
                    return Err(RuntimeError::invalid_argument("IPv4 prefix length out of range"));
                };
                let bits = u32::from(v4);
                let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
                Ok(Self(IpAddr::V4(Ipv4Addr::from(bits & mask))))
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(RuntimeError::invalid_argument("IPv6 prefix length out of range"));
                }
                let bits = u128::from(v6);
                let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) };
                Ok(Self(IpAddr::V6(Ipv6Addr::from(bits & mask))))
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A CIDR network: base address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Network {
    prefix: Address,
    length: u8,
}

impl Network {
    /// Builds a network, normalizing the base address by masking.
    pub fn new(prefix: Address, length: u8) -> RtResult<Self> {
        Ok(Self {
            prefix: prefix.mask(length)?,
            length,
        })
    }

    pub fn prefix(self) -> Address {
        self.prefix
    }

    pub fn length(self) -> u8 {
        self.length
    }

    /// True if `addr` lies inside this network. Families never mix.
    pub fn contains(self, addr: Address) -> bool {
        if addr.is_v4() != self.prefix.is_v4() {
            return false;
        }
        addr.mask(self.length).is_ok_and(|masked| masked == self.prefix)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.prefix, self.length)
    }
}

/// Transport protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Undef,
}

/// A transport port: number plus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub protocol: Protocol,
}

impl Port {
    pub fn new(number: u16, protocol: Protocol) -> Self {
        Self { number, protocol }
    }

    /// Parses the `80/tcp` form.
    pub fn parse(text: &str) -> RtResult<Self> {
        let (num, proto) = text
            .split_once('/')
            .ok_or_else(|| RuntimeError::invalid_value(format!("cannot parse port {text:?}")))?;
        let number = num
            .parse::<u16>()
            .map_err(|_| RuntimeError::invalid_value(format!("cannot parse port number {num:?}")))?;
        let protocol = proto
            .parse::<Protocol>()
            .map_err(|_| RuntimeError::invalid_value(format!("unknown protocol {proto:?}")))?;
        Ok(Self { number, protocol })
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// Traffic direction a parser applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize)]
pub enum Direction {
    Originator,
    Responder,
    Both,
    #[default]
    Undef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_masking() {
        let addr = Address::parse("192.168.17.42").unwrap();
        assert_eq!(addr.mask(24).unwrap(), Address::parse("192.168.17.0").unwrap());
        assert_eq!(addr.mask(0).unwrap(), Address::parse("0.0.0.0").unwrap());
        assert_eq!(addr.mask(32).unwrap(), addr);
    }

    #[test]
    fn v4_masking_accepts_mapped_prefix() {
        let addr = Address::parse("10.1.2.3").unwrap();
        assert_eq!(addr.mask(120).unwrap(), Address::parse("10.1.2.0").unwrap());
    }

    #[test]
    fn v6_masking() {
        let addr = Address::parse("2001:db8::ff00:42:8329").unwrap();
        assert_eq!(addr.mask(32).unwrap(), Address::parse("2001:db8::").unwrap());
        assert!(addr.mask(129).is_err());
    }

    #[test]
    fn network_contains() {
        let net = Network::new(Address::parse("10.0.0.0").unwrap(), 8).unwrap();
        assert!(net.contains(Address::parse("10.255.0.1").unwrap()));
        assert!(!net.contains(Address::parse("11.0.0.1").unwrap()));
        assert!(!net.contains(Address::parse("::1").unwrap()));
    }

    #[test]
    fn address_from_bytes() {
        assert_eq!(
            Address::from_bytes(&[127, 0, 0, 1]).unwrap(),
            Address::parse("127.0.0.1").unwrap()
        );
        assert!(Address::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn port_parse_round_trip() {
        let port = Port::parse("443/tcp").unwrap();
        assert_eq!(port, Port::new(443, Protocol::Tcp));
        assert_eq!(port.to_string(), "443/tcp");
    }
}
