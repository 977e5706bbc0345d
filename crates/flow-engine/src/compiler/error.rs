//! Compile and link errors

use thiserror::Error;

use crate::types::LiteralType;

/// Errors raised while building, optimizing, generating, or linking a program
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Array constant with an element type arrays cannot hold
    #[error("invalid array element type: {0}")]
    InvalidArrayElement(LiteralType),

    /// Regular expression constant that does not compile
    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidRegExp {
        /// Source pattern
        pattern: String,
        /// Regex engine message
        message: String,
    },

    /// Native signatures not present in the runtime
    #[error("unresolved symbols: {}", .0.join(", "))]
    UnresolvedSymbols(Vec<String>),

    /// Native call sites rejected by their callback's verifier
    #[error("native call verification failed: {}", .0.join("; "))]
    VerificationFailed(Vec<String>),

    /// Reference to a handler the program does not define
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    /// Structural IR check failures
    #[error("invalid IR: {}", .0.join("; "))]
    InvalidIr(Vec<String>),

    /// IR the code generator cannot lower
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed signature text
    #[error(transparent)]
    InvalidSignature(#[from] crate::vm::SignatureError),
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
