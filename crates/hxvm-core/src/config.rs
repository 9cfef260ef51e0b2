//! Machine configuration

use serde::{Deserialize, Serialize};

use crate::STACK_CAPACITY;

/// Host-tunable machine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// State a freshly loaded program starts in
    pub initial_state: u32,

    /// Usable operand stack depth, capped at [`STACK_CAPACITY`]
    pub stack_limit: usize,

    /// Check the program header when a program is installed
    pub validate_on_load: bool,
}

impl MachineConfig {
    /// Stack depth actually enforced
    #[inline]
    pub fn effective_stack_limit(&self) -> usize {
        self.stack_limit.min(STACK_CAPACITY)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            initial_state: 0,
            stack_limit: STACK_CAPACITY,
            validate_on_load: true,
        }
    }
}
