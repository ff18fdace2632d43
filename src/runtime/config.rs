use std::{mem::size_of, path::Path};

use serde::{Deserialize, Serialize};

use crate::runtime::frame::Frame;

pub const DEFAULT_VALUE_STACK_SLOTS: usize = 1 << 16;
pub const DEFAULT_CALL_STACK_BYTES: usize = 1 << 20;
pub const DEFAULT_MAX_REENTRANCY: usize = 64;

const MIN_VALUE_STACK_SLOTS: usize = 16;

/// Sizing and diagnostics knobs for a VM instance. Both stacks are
/// allocated once, up front, and never grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub value_stack_slots: usize,
    /// Byte budget of the call stack; the frame capacity is derived from it.
    pub call_stack_bytes: usize,
    /// Maximum number of nested dispatch loops (host call plus native
    /// callbacks into the VM).
    pub max_reentrancy: usize,
    /// Emit a `trace`-level event per executed instruction.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            value_stack_slots: DEFAULT_VALUE_STACK_SLOTS,
            call_stack_bytes: DEFAULT_CALL_STACK_BYTES,
            max_reentrancy: DEFAULT_MAX_REENTRANCY,
            trace: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl VmConfig {
    /// Config whose call stack holds exactly `frames` frames, sentinel
    /// included.
    pub fn with_frame_capacity(mut self, frames: usize) -> Self {
        self.call_stack_bytes = frames * size_of::<Frame>();
        self
    }

    pub fn with_value_stack_slots(mut self, slots: usize) -> Self {
        self.value_stack_slots = slots;
        self
    }

    pub fn frame_capacity(&self) -> usize {
        self.call_stack_bytes / size_of::<Frame>()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.value_stack_slots < MIN_VALUE_STACK_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "value_stack_slots must be at least {MIN_VALUE_STACK_SLOTS}, got {}",
                self.value_stack_slots
            )));
        }
        if self.frame_capacity() < 2 {
            return Err(ConfigError::Invalid(format!(
                "call_stack_bytes must fit at least two frames ({} bytes), got {}",
                2 * size_of::<Frame>(),
                self.call_stack_bytes
            )));
        }
        if self.max_reentrancy == 0 {
            return Err(ConfigError::Invalid(
                "max_reentrancy must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}
