//! Compiler configuration

use serde::{Deserialize, Serialize};

/// Default optimization level, the one the server daemon runs with
pub const DEFAULT_OPTIMIZATION_LEVEL: u8 = 1;

/// Options for [`Compiler`](super::Compiler)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// 0 runs only mandatory cleanup; 1 and above add the optimizing passes
    pub optimization_level: u8,
    /// Validate IR before and after optimization
    pub validate: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: DEFAULT_OPTIMIZATION_LEVEL,
            validate: true,
        }
    }
}

impl CompileOptions {
    /// Options with the given optimization level
    pub fn with_optimization_level(level: u8) -> Self {
        Self {
            optimization_level: level,
            ..Self::default()
        }
    }
}
