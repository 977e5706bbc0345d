//! Native callbacks
//!
//! A `NativeCallback` describes one native function or handler the embedder
//! exposes to Flow: its signature, parameter names and defaults, attribute
//! flags, an optional compile-time verifier for its call sites, and the bound
//! implementation. Implementations receive a `Params` holding the decoded
//! arguments and a result slot.

use std::any::Any;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use regex::Regex;

use super::signature::Signature;
use super::value::Value;
use super::{VmError, VmResult};
use crate::compiler::ir::{InstrId, IrConstantPool, IrHandler};
use crate::types::{Cidr, FlowNumber, LiteralType};

/// Native implementation
pub type NativeFn = Arc<dyn Fn(&mut Params<'_>) + Send + Sync>;

/// Call-site check run at compile time; `false` rejects the call
///
/// Receives the handler holding the call, the `Call`/`HandlerCall`
/// instruction, and the program's constants so literal arguments can be
/// inspected.
pub type Verifier = Arc<dyn Fn(&IrHandler, InstrId, &IrConstantPool) -> bool + Send + Sync>;

/// Attribute flags of a native callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Attributes(u32);

impl Attributes {
    /// Implementation is experimental; front ends may warn on use
    pub const EXPERIMENTAL: Attributes = Attributes(0x0001);
    /// Implementation never returns to program code
    pub const NO_RETURN: Attributes = Attributes(0x0002);
    /// Implementation has no side effects
    pub const SIDE_EFFECT_FREE: Attributes = Attributes(0x0004);

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag of `other` is set
    pub const fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the flags of `other`
    pub fn insert(&mut self, other: Attributes) {
        self.0 |= other.0;
    }
}

/// Arguments, result slot, and context of one native invocation
pub struct Params<'a> {
    args: Vec<Value>,
    result: Value,
    suspend: bool,
    error: Option<String>,
    userdata: Option<&'a mut dyn Any>,
}

impl<'a> Params<'a> {
    /// Params for a call with the given arguments
    pub fn new(args: Vec<Value>, userdata: Option<&'a mut dyn Any>) -> Self {
        Self {
            args,
            result: Value::Void,
            suspend: false,
            error: None,
            userdata,
        }
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the call has no arguments
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument at `index`, if present
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Argument at `index`
    pub fn arg(&self, index: usize) -> VmResult<&Value> {
        self.args
            .get(index)
            .ok_or_else(|| VmError::TypeError(format!("missing argument {}", index)))
    }

    /// All arguments
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Boolean argument
    pub fn get_bool(&self, index: usize) -> VmResult<bool> {
        self.arg(index)?.as_bool()
    }

    /// Number argument
    pub fn get_number(&self, index: usize) -> VmResult<FlowNumber> {
        self.arg(index)?.as_number()
    }

    /// String argument
    pub fn get_string(&self, index: usize) -> VmResult<&str> {
        self.arg(index)?.as_str()
    }

    /// IP address argument
    pub fn get_ip(&self, index: usize) -> VmResult<IpAddr> {
        self.arg(index)?.as_ip()
    }

    /// CIDR argument
    pub fn get_cidr(&self, index: usize) -> VmResult<Cidr> {
        self.arg(index)?.as_cidr()
    }

    /// Regex argument
    pub fn get_regex(&self, index: usize) -> VmResult<&Regex> {
        self.arg(index)?.as_regex()
    }

    /// Store the call's result; for handlers `true` means "handled"
    pub fn set_result(&mut self, value: impl Into<Value>) {
        self.result = value.into();
    }

    /// Current result
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Move the result out, leaving `Void`
    pub fn take_result(&mut self) -> Value {
        std::mem::take(&mut self.result)
    }

    /// Ask the runner to suspend after this call returns
    pub fn suspend(&mut self) {
        self.suspend = true;
    }

    /// Whether [`suspend`](Self::suspend) was called
    pub fn suspend_requested(&self) -> bool {
        self.suspend
    }

    /// Report failure; the runner traps with `VmError::Native`
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Failure reported through [`fail`](Self::fail)
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    /// Embedder context passed to the runner, downcast to `T`
    pub fn userdata<T: Any>(&mut self) -> Option<&mut T> {
        self.userdata.as_deref_mut()?.downcast_mut::<T>()
    }
}

/// Native function or handler exposed to Flow
pub struct NativeCallback {
    is_handler: bool,
    signature: Signature,
    function: Option<NativeFn>,
    verifier: Option<Verifier>,
    attributes: Attributes,
    names: Vec<String>,
    defaults: Vec<Option<Value>>,
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCallback")
            .field("signature", &self.signature.to_string())
            .field("is_handler", &self.is_handler)
            .field("attributes", &self.attributes)
            .field("bound", &self.function.is_some())
            .field("verified", &self.verifier.is_some())
            .finish()
    }
}

impl NativeCallback {
    /// Native handler: returns Boolean "handled"
    pub fn new_handler(name: impl Into<String>) -> Self {
        Self::new(true, Signature::with(name, LiteralType::Boolean, Vec::new()))
    }

    /// Native function returning `return_type`
    pub fn new_function(name: impl Into<String>, return_type: LiteralType) -> Self {
        Self::new(false, Signature::with(name, return_type, Vec::new()))
    }

    fn new(is_handler: bool, signature: Signature) -> Self {
        Self {
            is_handler,
            signature,
            function: None,
            verifier: None,
            attributes: Attributes::empty(),
            names: Vec::new(),
            defaults: Vec::new(),
        }
    }

    /// Whether this is a handler
    pub fn is_handler(&self) -> bool {
        self.is_handler
    }

    /// Whether this is a function
    pub fn is_function(&self) -> bool {
        !self.is_handler
    }

    /// Callable name
    pub fn name(&self) -> &str {
        self.signature.name()
    }

    /// Signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Declare the return type
    pub fn return_type(&mut self, ty: LiteralType) -> &mut Self {
        self.signature.set_return_type(ty);
        self
    }

    /// Declare a named parameter without default
    pub fn param(&mut self, name: impl Into<String>, ty: LiteralType) -> &mut Self {
        self.signature.push_arg(ty);
        self.names.push(name.into());
        self.defaults.push(None);
        self
    }

    /// Declare a named parameter with a default value
    pub fn param_with_default(
        &mut self,
        name: impl Into<String>,
        ty: LiteralType,
        default: impl Into<Value>,
    ) -> &mut Self {
        let default = default.into();
        debug_assert_eq!(default.literal_type(), ty, "default value type mismatch");
        self.signature.push_arg(ty);
        self.names.push(name.into());
        self.defaults.push(Some(default));
        self
    }

    /// Declare positional, unnamed parameters
    pub fn params(&mut self, types: &[LiteralType]) -> &mut Self {
        self.signature.set_args(types.to_vec());
        self.names.clear();
        self.defaults = vec![None; types.len()];
        self
    }

    /// Bind the implementation
    pub fn bind<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Params<'_>) + Send + Sync + 'static,
    {
        self.function = Some(Arc::new(f));
        self
    }

    /// Install a compile-time check for every call site
    pub fn verifier<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&IrHandler, InstrId, &IrConstantPool) -> bool + Send + Sync + 'static,
    {
        self.verifier = Some(Arc::new(f));
        self
    }

    /// Run the verifier on call `instr` of `handler`; accepts when none is set
    pub fn verify(&self, handler: &IrHandler, instr: InstrId, constants: &IrConstantPool) -> bool {
        self.verifier
            .as_ref()
            .map_or(true, |verify| verify(handler, instr, constants))
    }

    /// Mark as never returning to program code
    pub fn set_no_return(&mut self) -> &mut Self {
        self.attributes.insert(Attributes::NO_RETURN);
        self
    }

    /// Mark as side-effect free
    pub fn set_read_only(&mut self) -> &mut Self {
        self.attributes.insert(Attributes::SIDE_EFFECT_FREE);
        self
    }

    /// Mark as experimental
    pub fn set_experimental(&mut self) -> &mut Self {
        self.attributes.insert(Attributes::EXPERIMENTAL);
        self
    }

    /// Attribute flags
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// Side-effect free
    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(Attributes::SIDE_EFFECT_FREE)
    }

    /// Never returns
    pub fn is_never_returning(&self) -> bool {
        self.attributes.contains(Attributes::NO_RETURN)
    }

    /// Experimental
    pub fn is_experimental(&self) -> bool {
        self.attributes.contains(Attributes::EXPERIMENTAL)
    }

    /// Whether parameters were declared with names
    pub fn parameters_named(&self) -> bool {
        !self.names.is_empty()
    }

    /// Name of parameter `i`
    pub fn param_name_at(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    /// Default value of parameter `i`
    pub fn default_param_at(&self, i: usize) -> Option<&Value> {
        self.defaults.get(i).and_then(Option::as_ref)
    }

    /// Index of the parameter called `name`
    pub fn find_param_by_name(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Run the bound implementation
    pub fn invoke(&self, params: &mut Params<'_>) -> VmResult<()> {
        let function = self.function.as_ref().ok_or_else(|| {
            VmError::Native(format!("no implementation bound for {}", self.signature))
        })?;
        function(params);
        match params.take_error() {
            Some(message) => Err(VmError::Native(message)),
            None => Ok(()),
        }
    }
}
