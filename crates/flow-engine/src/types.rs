//! Flow literal types
//!
//! Shared between the IR (constant and instruction result types), the
//! signature text format, and the VM value model.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flow's only numeric type
pub type FlowNumber = i64;

/// Type of a Flow value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiteralType {
    /// No value
    Void,
    /// `true` / `false`
    Boolean,
    /// 64-bit signed integer
    Number,
    /// UTF-8 string
    String,
    /// Raw byte buffer
    Buffer,
    /// IPv4 or IPv6 address
    IPAddress,
    /// Network prefix
    Cidr,
    /// Regular expression
    RegExp,
    /// Reference to a handler
    Handler,
    /// Array of numbers
    IntArray,
    /// Array of strings
    StringArray,
    /// Array of IP addresses
    IPAddrArray,
    /// Array of CIDR prefixes
    CidrArray,
}

impl LiteralType {
    /// One-letter code used in signature text
    pub fn signature_code(self) -> char {
        match self {
            Self::Void => 'V',
            Self::Boolean => 'B',
            Self::Number => 'I',
            Self::String => 'S',
            Self::Buffer => 'b',
            Self::IPAddress => 'P',
            Self::Cidr => 'C',
            Self::RegExp => 'R',
            Self::Handler => 'H',
            Self::IntArray => 'i',
            Self::StringArray => 's',
            Self::IPAddrArray => 'p',
            Self::CidrArray => 'c',
        }
    }

    /// Inverse of [`signature_code`](Self::signature_code)
    pub fn from_signature_code(code: char) -> Option<Self> {
        Some(match code {
            'V' => Self::Void,
            'B' => Self::Boolean,
            'I' => Self::Number,
            'S' => Self::String,
            'b' => Self::Buffer,
            'P' => Self::IPAddress,
            'C' => Self::Cidr,
            'R' => Self::RegExp,
            'H' => Self::Handler,
            'i' => Self::IntArray,
            's' => Self::StringArray,
            'p' => Self::IPAddrArray,
            'c' => Self::CidrArray,
            _ => return None,
        })
    }

    /// Whether this is one of the array types
    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::IntArray | Self::StringArray | Self::IPAddrArray | Self::CidrArray
        )
    }

    /// Element type of an array type
    pub fn element_type(self) -> Option<Self> {
        match self {
            Self::IntArray => Some(Self::Number),
            Self::StringArray => Some(Self::String),
            Self::IPAddrArray => Some(Self::IPAddress),
            Self::CidrArray => Some(Self::Cidr),
            _ => None,
        }
    }

    /// Array type holding elements of this type, if arrays of it exist
    pub fn array_of(self) -> Option<Self> {
        match self {
            Self::Number => Some(Self::IntArray),
            Self::String => Some(Self::StringArray),
            Self::IPAddress => Some(Self::IPAddrArray),
            Self::Cidr => Some(Self::CidrArray),
            _ => None,
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Boolean => "bool",
            Self::Number => "int",
            Self::String => "string",
            Self::Buffer => "buffer",
            Self::IPAddress => "IPAddress",
            Self::Cidr => "Cidr",
            Self::RegExp => "RegExp",
            Self::Handler => "HandlerRef",
            Self::IntArray => "IntArray",
            Self::StringArray => "StringArray",
            Self::IPAddrArray => "IPAddrArray",
            Self::CidrArray => "CidrArray",
        }
    }
}

impl fmt::Display for LiteralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the case labels of a `match` are compared against its condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchClass {
    /// Exact equality
    Same,
    /// Condition begins with the label (longest label wins)
    Head,
    /// Condition ends with the label (longest label wins)
    Tail,
    /// Label is a regular expression (first match wins)
    RegExp,
}

impl fmt::Display for MatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Same => "same",
            Self::Head => "head",
            Self::Tail => "tail",
            Self::RegExp => "regexp",
        })
    }
}

/// Error parsing a CIDR string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrParseError {
    /// Missing `/prefix` part
    #[error("missing prefix length in '{0}'")]
    MissingPrefix(String),
    /// Address part is not an IP address
    #[error("invalid address in '{0}'")]
    InvalidAddress(String),
    /// Prefix is not a number or too long for the address family
    #[error("invalid prefix length in '{0}'")]
    InvalidPrefix(String),
}

/// Network address plus prefix length, e.g. `192.168.0.0/16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    address: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Create a CIDR; returns `None` when the prefix exceeds the address width
    pub fn new(address: IpAddr, prefix: u8) -> Option<Self> {
        if prefix > max_prefix(&address) {
            return None;
        }
        Some(Self { address, prefix })
    }

    /// Network address
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Prefix length in bits
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `ip` lies within this network
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.address, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

impl Default for Cidr {
    /// `0.0.0.0/0`
    fn default() -> Self {
        Self {
            address: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            prefix: 0,
        }
    }
}

fn max_prefix(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrParseError::MissingPrefix(s.to_string()))?;
        let address: IpAddr = addr
            .parse()
            .map_err(|_| CidrParseError::InvalidAddress(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| CidrParseError::InvalidPrefix(s.to_string()))?;
        Self::new(address, prefix).ok_or_else(|| CidrParseError::InvalidPrefix(s.to_string()))
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}
