//! Native callback registry
//!
//! The embedder registers its native handlers and functions here before
//! compiling. Each callback's id is its registration index; programs resolve
//! signature text to ids once at link time and dispatch by index afterwards.

use tracing::debug;

use super::native::{NativeCallback, Params};
use super::signature::Signature;
use super::{VmError, VmResult};
use crate::types::LiteralType;

/// Registry of native callbacks
#[derive(Debug, Default)]
pub struct Runtime {
    callbacks: Vec<NativeCallback>,
}

impl Runtime {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native handler and return it for configuration
    pub fn register_handler(&mut self, name: impl Into<String>) -> &mut NativeCallback {
        self.push(NativeCallback::new_handler(name))
    }

    /// Register a native function and return it for configuration
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        return_type: LiteralType,
    ) -> &mut NativeCallback {
        self.push(NativeCallback::new_function(name, return_type))
    }

    fn push(&mut self, callback: NativeCallback) -> &mut NativeCallback {
        debug!(id = self.callbacks.len(), name = callback.name(), "registering native callback");
        self.callbacks.push(callback);
        let last = self.callbacks.len() - 1;
        &mut self.callbacks[last]
    }

    /// Callback with the given canonical signature text
    pub fn find(&self, signature: &str) -> Option<&NativeCallback> {
        self.find_id(signature).map(|id| &self.callbacks[id])
    }

    /// Id of the callback with the given canonical signature text
    pub fn find_id(&self, signature: &str) -> Option<usize> {
        self.callbacks
            .iter()
            .position(|cb| cb.signature().to_string() == signature)
    }

    /// Callback matching `signature`
    pub fn find_signature(&self, signature: &Signature) -> Option<&NativeCallback> {
        self.callbacks.iter().find(|cb| cb.signature() == signature)
    }

    /// Callback by id
    pub fn get(&self, id: usize) -> Option<&NativeCallback> {
        self.callbacks.get(id)
    }

    /// All registered callbacks in id order
    pub fn callbacks(&self) -> &[NativeCallback] {
        &self.callbacks
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invoke callback `id`
    pub fn invoke(&self, id: usize, params: &mut Params<'_>) -> VmResult<()> {
        self.callbacks
            .get(id)
            .ok_or(VmError::InvalidNativeId(id))?
            .invoke(params)
    }
}
