//! IR programs
//!
//! A program is the unit of compilation: the handlers of one Flow source
//! file, the constant pool they share, and the naming context for values
//! created without an explicit name.

use std::net::IpAddr;

use super::constant::{Builtin, ConstantArray, ConstantKind, IrConstantPool};
use super::handler::IrHandler;
use super::value::{ConstId, Namer, ValueRef};
use crate::compiler::error::{CompileError, CompileResult};
use crate::types::{Cidr, FlowNumber, LiteralType};
use crate::vm::native::{Attributes, NativeCallback};
use crate::vm::signature::Signature;

/// Handlers plus their shared constants
#[derive(Debug, Clone, Default)]
pub struct IrProgram {
    handlers: Vec<IrHandler>,
    constants: IrConstantPool,
    namer: Namer,
}

impl IrProgram {
    /// Create an empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty program whose generated names start at `unnamed<seed>`
    pub fn with_namer(namer: Namer) -> Self {
        Self {
            namer,
            ..Self::default()
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Append a new handler and return its index
    pub fn create_handler(&mut self, name: impl Into<String>) -> usize {
        self.handlers.push(IrHandler::new(name));
        self.handlers.len() - 1
    }

    /// Handlers in declaration order
    pub fn handlers(&self) -> &[IrHandler] {
        &self.handlers
    }

    /// Mutable handlers
    pub fn handlers_mut(&mut self) -> &mut [IrHandler] {
        &mut self.handlers
    }

    /// Handler by index
    pub fn handler(&self, index: usize) -> Option<&IrHandler> {
        self.handlers.get(index)
    }

    /// Mutable handler by index
    pub fn handler_mut(&mut self, index: usize) -> Option<&mut IrHandler> {
        self.handlers.get_mut(index)
    }

    /// Handler by name
    pub fn find_handler(&self, name: &str) -> Option<&IrHandler> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    /// Index of the handler called `name`
    pub fn find_handler_index(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name() == name)
    }

    /// Handlers together with the constant pool, for passes that mutate one
    /// while reading the other
    pub fn split_mut(&mut self) -> (&mut [IrHandler], &IrConstantPool) {
        (&mut self.handlers, &self.constants)
    }

    // ========================================================================
    // Constants and naming
    // ========================================================================

    /// Constant pool
    pub fn constants(&self) -> &IrConstantPool {
        &self.constants
    }

    /// Naming context
    pub fn namer_mut(&mut self) -> &mut Namer {
        &mut self.namer
    }

    /// Intern a constant
    pub fn get_constant(&mut self, kind: ConstantKind) -> ConstId {
        self.constants.intern(kind, &mut self.namer)
    }

    /// Boolean constant
    pub fn get_boolean(&mut self, value: bool) -> ConstId {
        self.get_constant(ConstantKind::Boolean(value))
    }

    /// Number constant
    pub fn get_number(&mut self, value: FlowNumber) -> ConstId {
        self.get_constant(ConstantKind::Number(value))
    }

    /// String constant
    pub fn get_string(&mut self, value: impl Into<String>) -> ConstId {
        self.get_constant(ConstantKind::String(value.into()))
    }

    /// IP address constant
    pub fn get_ip(&mut self, value: IpAddr) -> ConstId {
        self.get_constant(ConstantKind::IpAddress(value))
    }

    /// CIDR constant
    pub fn get_cidr(&mut self, value: Cidr) -> ConstId {
        self.get_constant(ConstantKind::Cidr(value))
    }

    /// Regex constant; the pattern must compile
    pub fn get_regexp(&mut self, pattern: impl Into<String>) -> CompileResult<ConstId> {
        let pattern = pattern.into();
        if let Err(e) = regex::Regex::new(&pattern) {
            return Err(CompileError::InvalidRegExp {
                pattern,
                message: e.to_string(),
            });
        }
        Ok(self.get_constant(ConstantKind::RegExp(pattern)))
    }

    /// Array constant
    pub fn get_array(&mut self, array: ConstantArray) -> ConstId {
        self.get_constant(ConstantKind::Array(array))
    }

    /// Reference to a native function
    pub fn get_builtin_function(&mut self, signature: Signature, attributes: Attributes) -> ConstId {
        self.get_constant(ConstantKind::BuiltinFunction(Builtin {
            signature,
            attributes,
        }))
    }

    /// Reference to a native handler
    pub fn get_builtin_handler(&mut self, signature: Signature, attributes: Attributes) -> ConstId {
        self.get_constant(ConstantKind::BuiltinHandler(Builtin {
            signature,
            attributes,
        }))
    }

    /// Reference to a registered native callback
    pub fn get_native(&mut self, callback: &NativeCallback) -> ConstId {
        let signature = callback.signature().clone();
        if callback.is_handler() {
            self.get_builtin_handler(signature, callback.attributes())
        } else {
            self.get_builtin_function(signature, callback.attributes())
        }
    }

    /// Reference to a handler of this program
    pub fn get_handler_ref(&mut self, name: impl Into<String>) -> ConstId {
        self.get_constant(ConstantKind::Handler(name.into()))
    }

    /// Type of `value` as seen from `handler`
    pub fn value_type(&self, handler: &IrHandler, value: ValueRef) -> LiteralType {
        value_type(handler, &self.constants, value)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Validate every handler
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (i, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler.validate() {
                errors.push(format!("Handler '{}' ({}): {}", handler.name(), i, e));
            }
            for &b in handler.blocks() {
                for &id in handler.block_instrs(b) {
                    for op in handler[id].operands() {
                        if let ValueRef::Const(c) = op {
                            if self.constants.get(*c).is_none() {
                                errors.push(format!(
                                    "Handler '{}' ({}): {} uses unknown constant {}",
                                    handler.name(),
                                    i,
                                    id,
                                    c
                                ));
                            }
                        }
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Type of `value` within `handler`
pub fn value_type(handler: &IrHandler, constants: &IrConstantPool, value: ValueRef) -> LiteralType {
    match value {
        ValueRef::Const(c) => constants
            .get(c)
            .map(|c| c.literal_type())
            .unwrap_or(LiteralType::Void),
        ValueRef::Instr(i) => handler.instr(i).map(|i| i.ty).unwrap_or(LiteralType::Void),
        ValueRef::Block(_) => LiteralType::Void,
    }
}
