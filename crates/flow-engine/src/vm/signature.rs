//! Native callable signatures
//!
//! Canonical text form is `name(ARGS)R`, one type code per argument and one
//! for the return type, e.g. `req.path.beginsWith(S)B`. The same text is the
//! lookup key of the runtime registry and is what unresolved-symbol
//! diagnostics print.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::LiteralType;

/// Error parsing signature text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No `(` separating name from arguments
    #[error("missing '(' in signature '{0}'")]
    MissingOpenParen(String),
    /// No `)` closing the argument list
    #[error("missing ')' in signature '{0}'")]
    MissingCloseParen(String),
    /// Empty callable name
    #[error("empty name in signature '{0}'")]
    EmptyName(String),
    /// Unknown type code
    #[error("unknown type code '{code}' in signature '{text}'")]
    UnknownTypeCode {
        /// Offending character
        code: char,
        /// Full signature text
        text: String,
    },
    /// Return type missing or more than one code after `)`
    #[error("expected exactly one return type code in signature '{0}'")]
    BadReturnType(String),
}

/// Name, parameter types and return type of a native callable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    name: String,
    return_type: LiteralType,
    args: Vec<LiteralType>,
}

impl Signature {
    /// Signature with no parameters, returning `Void`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: LiteralType::Void,
            args: Vec::new(),
        }
    }

    /// Fully specified signature
    pub fn with(name: impl Into<String>, return_type: LiteralType, args: Vec<LiteralType>) -> Self {
        Self {
            name: name.into(),
            return_type,
            args,
        }
    }

    /// Callable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return type
    pub fn return_type(&self) -> LiteralType {
        self.return_type
    }

    /// Parameter types in order
    pub fn args(&self) -> &[LiteralType] {
        &self.args
    }

    /// Set the return type
    pub fn set_return_type(&mut self, ty: LiteralType) {
        self.return_type = ty;
    }

    /// Append a parameter type
    pub fn push_arg(&mut self, ty: LiteralType) {
        self.args.push(ty);
    }

    /// Replace all parameter types
    pub fn set_args(&mut self, args: Vec<LiteralType>) {
        self.args = args;
    }

    /// Canonical text, same as `to_string()`
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for arg in &self.args {
            write!(f, "{}", arg.signature_code())?;
        }
        write!(f, "){}", self.return_type.signature_code())
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let open = text
            .find('(')
            .ok_or_else(|| SignatureError::MissingOpenParen(text.to_string()))?;
        let name = &text[..open];
        if name.is_empty() {
            return Err(SignatureError::EmptyName(text.to_string()));
        }
        let rest = &text[open + 1..];
        let close = rest
            .find(')')
            .ok_or_else(|| SignatureError::MissingCloseParen(text.to_string()))?;

        let decode = |code: char| {
            LiteralType::from_signature_code(code).ok_or_else(|| SignatureError::UnknownTypeCode {
                code,
                text: text.to_string(),
            })
        };

        let args = rest[..close].chars().map(decode).collect::<Result<Vec<_>, _>>()?;

        let mut ret = rest[close + 1..].chars();
        let return_type = match (ret.next(), ret.next()) {
            (Some(code), None) => decode(code)?,
            _ => return Err(SignatureError::BadReturnType(text.to_string())),
        };

        Ok(Self {
            name: name.to_string(),
            return_type,
            args,
        })
    }
}
