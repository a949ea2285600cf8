use crate::codec::{self, Decode, Encode};
use std::{
    fmt,
    io::{Read, Write},
    net::{AddrParseError, Ipv4Addr},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid IPv4 address: {0}")]
    Address(#[from] AddrParseError),
    #[error("Invalid prefix length: {0}")]
    PrefixLength(#[from] ParseIntError),
    #[error("Prefix length {0} is longer than 32 bits")]
    PrefixTooLong(u8),
}

/// IPv4 network in `address/prefix` form, e.g. `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpMask {
    address: u32,
    mask: u32,
}

impl IpMask {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, Error> {
        if prefix_len > 32 {
            return Err(Error::PrefixTooLong(prefix_len));
        }

        let mask = u32::MAX
            .checked_shl(32 - u32::from(prefix_len))
            .unwrap_or(0);

        Ok(Self {
            address: u32::from(address) & mask,
            mask,
        })
    }

    pub fn matches(&self, ip: u32) -> bool {
        ip & self.mask == self.address
    }
}

impl FromStr for IpMask {
    type Err = Error;

    fn from_str(mask: &str) -> Result<Self, Self::Err> {
        match mask.trim().split_once('/') {
            Some((address, prefix_len)) => Self::new(address.parse()?, prefix_len.parse()?),
            None => Self::new(mask.trim().parse()?, 32),
        }
    }
}

impl fmt::Display for IpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            Ipv4Addr::from(self.address),
            self.mask.count_ones()
        )
    }
}

impl Encode for IpMask {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), codec::Error> {
        self.address.encode(writer)?;
        self.mask.encode(writer)
    }
}

impl Decode for IpMask {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, codec::Error> {
        let address = u32::decode(reader)?;
        let mask = u32::decode(reader)?;

        Ok(Self {
            address: address & mask,
            mask,
        })
    }
}
