//! JSON bytecode images.
//!
//! An image is a serialized function tree. Each function carries a SHA-256
//! checksum over its instructions and constants; loading verifies every
//! checksum and decodes every instruction before the function is handed to
//! a VM.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    bytecode::{
        debug_info::{FunctionDebugInfo, LineTable},
        disassembler::{DecodeError, decode_all},
        function::{BytecodeFunction, CatchEntry, Parameters},
    },
    runtime::{registry::Registry, value::Value},
};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("cannot read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed image: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("checksum mismatch in {function}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        function: String,
        expected: String,
        actual: String,
    },
    #[error("constant of type {type_name} in {function} cannot be stored in an image")]
    UnsupportedConstant {
        function: String,
        type_name: &'static str,
    },
    #[error("invalid bytecode in {function}: {source}")]
    Decode {
        function: String,
        #[source]
        source: DecodeError,
    },
}

/// Constant pool entry. Symbols are stored by name and re-interned on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConstantImage {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Symbol(String),
    Char(char),
    Str(String),
    Function(Box<FunctionImage>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionImage {
    pub name: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    pub instructions: Vec<u8>,
    pub constants: Vec<ConstantImage>,
    #[serde(default)]
    pub lines: LineTable,
    #[serde(default)]
    pub parameters: Parameters,
    pub num_locals: usize,
    #[serde(default)]
    pub upvalue_count: usize,
    #[serde(default)]
    pub catches: Vec<CatchEntry>,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub generator: bool,
    pub checksum: String,
}

impl FunctionImage {
    pub fn from_function(
        function: &BytecodeFunction,
        registry: &Registry,
    ) -> Result<Self, ImageError> {
        let constants = function
            .constants
            .iter()
            .map(|constant| constant_image(function, constant, registry))
            .collect::<Result<Vec<_>, _>>()?;
        let checksum = checksum(&function.instructions, &constants)?;
        Ok(Self {
            name: function.debug_info.name.clone(),
            file: function.debug_info.file.clone(),
            instructions: function.instructions.clone(),
            constants,
            lines: function.debug_info.lines.clone(),
            parameters: function.parameters.clone(),
            num_locals: function.num_locals,
            upvalue_count: function.upvalue_count,
            catches: function.catches.clone(),
            sealed: function.sealed,
            generator: function.generator,
            checksum,
        })
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<anonymous>".to_string())
    }

    /// Verifies checksums and decodes every instruction, then materialises
    /// the function tree, interning symbols into `registry`.
    pub fn to_function(&self, registry: &Registry) -> Result<Arc<BytecodeFunction>, ImageError> {
        let actual = checksum(&self.instructions, &self.constants)?;
        if actual != self.checksum {
            return Err(ImageError::ChecksumMismatch {
                function: self.display_name(),
                expected: self.checksum.clone(),
                actual,
            });
        }

        let constants = self
            .constants
            .iter()
            .map(|constant| {
                Ok(match constant {
                    ConstantImage::Nil => Value::Nil,
                    ConstantImage::Bool(value) => Value::Bool(*value),
                    ConstantImage::Int(value) => Value::Int(*value),
                    ConstantImage::Float(value) => Value::Float(*value),
                    ConstantImage::Symbol(name) => Value::Symbol(registry.intern(name)),
                    ConstantImage::Char(value) => Value::Char(*value),
                    ConstantImage::Str(text) => Value::string(text.as_str()),
                    ConstantImage::Function(nested) => {
                        Value::Function(nested.to_function(registry)?)
                    }
                })
            })
            .collect::<Result<Vec<_>, ImageError>>()?;

        decode_all(&self.instructions, &constants).map_err(|source| ImageError::Decode {
            function: self.display_name(),
            source,
        })?;

        Ok(Arc::new(BytecodeFunction::new(
            self.instructions.clone(),
            constants,
            FunctionDebugInfo::new(self.name.clone(), self.file.clone(), self.lines.clone()),
            self.parameters.clone(),
            self.num_locals,
            self.upvalue_count,
            self.catches.clone(),
            self.sealed,
            self.generator,
        )))
    }

    pub fn to_json(&self) -> Result<String, ImageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ImageError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn constant_image(
    function: &BytecodeFunction,
    constant: &Value,
    registry: &Registry,
) -> Result<ConstantImage, ImageError> {
    Ok(match constant {
        Value::Nil => ConstantImage::Nil,
        Value::Bool(value) => ConstantImage::Bool(*value),
        Value::Int(value) => ConstantImage::Int(*value),
        Value::Float(value) => ConstantImage::Float(*value),
        Value::Symbol(symbol) => ConstantImage::Symbol(registry.symbol_name(*symbol).to_string()),
        Value::Char(value) => ConstantImage::Char(*value),
        Value::Str(text) => ConstantImage::Str(text.to_string()),
        Value::Function(nested) => {
            ConstantImage::Function(Box::new(FunctionImage::from_function(nested, registry)?))
        }
        other => {
            return Err(ImageError::UnsupportedConstant {
                function: function.name().to_string(),
                type_name: other.type_name(),
            });
        }
    })
}

/// Hex SHA-256 over the instruction bytes and the JSON form of the
/// constants (nested functions contribute their own checksums).
fn checksum(instructions: &[u8], constants: &[ConstantImage]) -> Result<String, ImageError> {
    let mut hasher = Sha256::new();
    hasher.update((instructions.len() as u64).to_be_bytes());
    hasher.update(instructions);
    hasher.update(serde_json::to_vec(constants)?);
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
