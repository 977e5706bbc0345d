//! IR constants
//!
//! Constants are interned per program: asking for the same payload twice
//! yields the same `ConstId`, so identity comparison of constant operands is
//! value comparison.

use std::fmt;
use std::net::IpAddr;

use rustc_hash::FxHashMap;

use super::value::{ConstId, Namer};
use crate::compiler::error::{CompileError, CompileResult};
use crate::types::{Cidr, FlowNumber, LiteralType};
use crate::vm::native::Attributes;
use crate::vm::signature::Signature;

/// Homogeneous array constant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantArray {
    element_type: LiteralType,
    elements: Vec<ConstantKind>,
}

impl ConstantArray {
    /// Build an array of `element_type` elements
    ///
    /// # Panics
    ///
    /// If `element_type` cannot be an array element or an element has a
    /// different type. Use [`try_new`](Self::try_new) to get an error instead.
    pub fn new(element_type: LiteralType, elements: Vec<ConstantKind>) -> Self {
        match Self::try_new(element_type, elements) {
            Ok(array) => array,
            Err(e) => panic!("{}", e),
        }
    }

    /// Build an array, rejecting invalid element types
    pub fn try_new(element_type: LiteralType, elements: Vec<ConstantKind>) -> CompileResult<Self> {
        if element_type.array_of().is_none() {
            return Err(CompileError::InvalidArrayElement(element_type));
        }
        if let Some(bad) = elements.iter().find(|e| e.literal_type() != element_type) {
            return Err(CompileError::InvalidArrayElement(bad.literal_type()));
        }
        Ok(Self {
            element_type,
            elements,
        })
    }

    /// Element type
    pub fn element_type(&self) -> LiteralType {
        self.element_type
    }

    /// Elements
    pub fn elements(&self) -> &[ConstantKind] {
        &self.elements
    }

    /// Array type, e.g. `StringArray`
    pub fn literal_type(&self) -> LiteralType {
        // try_new only accepts types that have an array type
        self.element_type.array_of().unwrap_or(LiteralType::Void)
    }
}

/// Reference to a native callback, by signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Builtin {
    /// Callee signature
    pub signature: Signature,
    /// Callback attributes at IR build time
    pub attributes: Attributes,
}

impl Builtin {
    /// Side-effect free callee
    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(Attributes::SIDE_EFFECT_FREE)
    }
}

/// Constant payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantKind {
    /// Boolean literal
    Boolean(bool),
    /// Number literal
    Number(FlowNumber),
    /// String literal
    String(String),
    /// IP address literal
    IpAddress(IpAddr),
    /// CIDR literal
    Cidr(Cidr),
    /// Regex literal (source pattern, validated when interned)
    RegExp(String),
    /// Array literal
    Array(ConstantArray),
    /// Native function reference
    BuiltinFunction(Builtin),
    /// Native handler reference
    BuiltinHandler(Builtin),
    /// Reference to a handler of the program, by name
    Handler(String),
}

impl ConstantKind {
    /// Type of the constant
    pub fn literal_type(&self) -> LiteralType {
        match self {
            Self::Boolean(_) => LiteralType::Boolean,
            Self::Number(_) => LiteralType::Number,
            Self::String(_) => LiteralType::String,
            Self::IpAddress(_) => LiteralType::IPAddress,
            Self::Cidr(_) => LiteralType::Cidr,
            Self::RegExp(_) => LiteralType::RegExp,
            Self::Array(a) => a.literal_type(),
            Self::BuiltinFunction(b) => b.signature.return_type(),
            Self::BuiltinHandler(_) => LiteralType::Boolean,
            Self::Handler(_) => LiteralType::Handler,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Number payload
    pub fn as_number(&self) -> Option<FlowNumber> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConstantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::IpAddress(ip) => write!(f, "{}", ip),
            Self::Cidr(c) => write!(f, "{}", c),
            Self::RegExp(re) => write!(f, "/{}/", re),
            Self::Array(a) => {
                f.write_str("[")?;
                for (i, e) in a.elements().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                f.write_str("]")
            }
            Self::BuiltinFunction(b) => write!(f, "@{}", b.signature),
            Self::BuiltinHandler(b) => write!(f, "@{}", b.signature),
            Self::Handler(name) => write!(f, "&{}", name),
        }
    }
}

/// An interned constant
#[derive(Debug, Clone)]
pub struct Constant {
    /// Payload
    pub kind: ConstantKind,
    /// Value name
    pub name: String,
}

impl Constant {
    /// Type of the constant
    pub fn literal_type(&self) -> LiteralType {
        self.kind.literal_type()
    }
}

/// Interning constant pool shared by all handlers of a program
#[derive(Debug, Clone, Default)]
pub struct IrConstantPool {
    constants: Vec<Constant>,
    index: FxHashMap<ConstantKind, ConstId>,
}

impl IrConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `kind`, interning it under a generated name if new
    pub fn intern(&mut self, kind: ConstantKind, namer: &mut Namer) -> ConstId {
        if let Some(&id) = self.index.get(&kind) {
            return id;
        }
        let id = ConstId(self.constants.len() as u32);
        self.index.insert(kind.clone(), id);
        self.constants.push(Constant {
            kind,
            name: namer.next_name(),
        });
        id
    }

    /// Id of `kind`, if interned
    pub fn find(&self, kind: &ConstantKind) -> Option<ConstId> {
        self.index.get(kind).copied()
    }

    /// Constant by id
    pub fn get(&self, id: ConstId) -> Option<&Constant> {
        self.constants.get(id.index())
    }

    /// Payload by id
    pub fn kind(&self, id: ConstId) -> Option<&ConstantKind> {
        self.get(id).map(|c| &c.kind)
    }

    /// Boolean payload of constant `id`
    pub fn get_bool(&self, id: ConstId) -> Option<bool> {
        self.kind(id).and_then(ConstantKind::as_bool)
    }

    /// Number payload of constant `id`
    pub fn get_number(&self, id: ConstId) -> Option<FlowNumber> {
        self.kind(id).and_then(ConstantKind::as_number)
    }

    /// Number of constants
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// All constants with their ids
    pub fn iter(&self) -> impl Iterator<Item = (ConstId, &Constant)> {
        self.constants
            .iter()
            .enumerate()
            .map(|(i, c)| (ConstId(i as u32), c))
    }
}
