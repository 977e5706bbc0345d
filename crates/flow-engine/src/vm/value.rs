//! Runtime values held in runner registers

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use regex::Regex;

use super::{VmError, VmResult};
use crate::types::{Cidr, FlowNumber, LiteralType};

/// A value in a register, native argument, or native result
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value
    #[default]
    Void,
    /// Boolean
    Boolean(bool),
    /// Number
    Number(FlowNumber),
    /// String
    String(Arc<str>),
    /// Byte buffer
    Buffer(Arc<[u8]>),
    /// IP address
    IpAddress(IpAddr),
    /// Network prefix
    Cidr(Cidr),
    /// Compiled regular expression
    RegExp(Arc<Regex>),
    /// Index into the program's handler table
    Handler(usize),
    /// Number array
    IntArray(Arc<Vec<FlowNumber>>),
    /// String array
    StringArray(Arc<Vec<Arc<str>>>),
    /// IP address array
    IpAddrArray(Arc<Vec<IpAddr>>),
    /// CIDR array
    CidrArray(Arc<Vec<Cidr>>),
}

impl Value {
    /// Type of this value
    pub fn literal_type(&self) -> LiteralType {
        match self {
            Self::Void => LiteralType::Void,
            Self::Boolean(_) => LiteralType::Boolean,
            Self::Number(_) => LiteralType::Number,
            Self::String(_) => LiteralType::String,
            Self::Buffer(_) => LiteralType::Buffer,
            Self::IpAddress(_) => LiteralType::IPAddress,
            Self::Cidr(_) => LiteralType::Cidr,
            Self::RegExp(_) => LiteralType::RegExp,
            Self::Handler(_) => LiteralType::Handler,
            Self::IntArray(_) => LiteralType::IntArray,
            Self::StringArray(_) => LiteralType::StringArray,
            Self::IpAddrArray(_) => LiteralType::IPAddrArray,
            Self::CidrArray(_) => LiteralType::CidrArray,
        }
    }

    /// Build a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    fn type_error(&self, expected: LiteralType) -> VmError {
        VmError::TypeError(format!("expected {}, found {}", expected, self.literal_type()))
    }

    /// Boolean payload
    pub fn as_bool(&self) -> VmResult<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            other => Err(other.type_error(LiteralType::Boolean)),
        }
    }

    /// Number payload
    pub fn as_number(&self) -> VmResult<FlowNumber> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(other.type_error(LiteralType::Number)),
        }
    }

    /// String payload
    pub fn as_str(&self) -> VmResult<&str> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(other.type_error(LiteralType::String)),
        }
    }

    /// IP address payload
    pub fn as_ip(&self) -> VmResult<IpAddr> {
        match self {
            Self::IpAddress(ip) => Ok(*ip),
            other => Err(other.type_error(LiteralType::IPAddress)),
        }
    }

    /// CIDR payload
    pub fn as_cidr(&self) -> VmResult<Cidr> {
        match self {
            Self::Cidr(c) => Ok(*c),
            other => Err(other.type_error(LiteralType::Cidr)),
        }
    }

    /// Regex payload
    pub fn as_regex(&self) -> VmResult<&Regex> {
        match self {
            Self::RegExp(re) => Ok(re),
            other => Err(other.type_error(LiteralType::RegExp)),
        }
    }

    /// Handler index payload
    pub fn as_handler(&self) -> VmResult<usize> {
        match self {
            Self::Handler(h) => Ok(*h),
            other => Err(other.type_error(LiteralType::Handler)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a == b,
            (Self::IpAddress(a), Self::IpAddress(b)) => a == b,
            (Self::Cidr(a), Self::Cidr(b)) => a == b,
            // Regex has no structural equality; compare source patterns
            (Self::RegExp(a), Self::RegExp(b)) => a.as_str() == b.as_str(),
            (Self::Handler(a), Self::Handler(b)) => a == b,
            (Self::IntArray(a), Self::IntArray(b)) => a == b,
            (Self::StringArray(a), Self::StringArray(b)) => a == b,
            (Self::IpAddrArray(a), Self::IpAddrArray(b)) => a == b,
            (Self::CidrArray(a), Self::CidrArray(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<FlowNumber> for Value {
    fn from(n: FlowNumber) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<IpAddr> for Value {
    fn from(ip: IpAddr) -> Self {
        Self::IpAddress(ip)
    }
}

impl From<Cidr> for Value {
    fn from(c: Cidr) -> Self {
        Self::Cidr(c)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
            Self::Buffer(b) => f.write_str(&String::from_utf8_lossy(b)),
            Self::IpAddress(ip) => write!(f, "{}", ip),
            Self::Cidr(c) => write!(f, "{}", c),
            Self::RegExp(re) => write!(f, "/{}/", re.as_str()),
            Self::Handler(h) => write!(f, "handler#{}", h),
            Self::IntArray(a) => write_list(f, a),
            Self::StringArray(a) => write_list(f, a),
            Self::IpAddrArray(a) => write_list(f, a),
            Self::CidrArray(a) => write_list(f, a),
        }
    }
}
