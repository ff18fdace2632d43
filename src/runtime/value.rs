use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    bytecode::function::BytecodeFunction,
    runtime::{
        class::{Class, Instance},
        closure::Closure,
        error::ErrorObject,
        generator::Generator,
        native::NativeFunction,
        symbol::Symbol,
        sync::{SyncMutex, SyncRwMutex},
    },
};

/// Runtime value held in stack slots, constants, upvalues and fields.
///
/// Immediates (`Bool`, `Int`, `Float`, `Symbol`, `Char`) are stored inline;
/// every other variant is a single `Arc` pointer, so the value stays two
/// machine words wide.
///
/// `Undefined` is an internal sentinel distinct from the language-level
/// `Nil`. It marks uninitialised local slots and vacated stack slots and is
/// never returned to user code: returns normalise it to `Nil`.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Symbol(Symbol),
    Char(char),
    Str(Arc<String>),
    Array(Arc<Mutex<Vec<Value>>>),
    Range(Arc<RangeValue>),
    Regex(Arc<regex::Regex>),
    Function(Arc<BytecodeFunction>),
    Closure(Arc<Closure>),
    Generator(Arc<Generator>),
    Native(Arc<NativeFunction>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    Error(Arc<ErrorObject>),
    Mutex(Arc<SyncMutex>),
    RwMutex(Arc<SyncRwMutex>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub inclusive: bool,
}

impl RangeValue {
    pub fn contains(&self, value: i64) -> bool {
        if self.inclusive {
            self.start <= value && value <= self.end
        } else {
            self.start <= value && value < self.end
        }
    }

    pub fn len(&self) -> usize {
        let end = if self.inclusive { self.end + 1 } else { self.end };
        end.saturating_sub(self.start).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coarse runtime type, used to key the native method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Undefined,
    Nil,
    Bool,
    Int,
    Float,
    Symbol,
    Char,
    Str,
    Array,
    Range,
    Regex,
    Function,
    Closure,
    Generator,
    Native,
    Class,
    Instance,
    Error,
    Mutex,
    RwMutex,
}

impl Value {
    pub fn string(text: impl Into<String>) -> Value {
        Value::Str(Arc::new(text.into()))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(elements)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Undefined => TypeTag::Undefined,
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::Char(_) => TypeTag::Char,
            Value::Str(_) => TypeTag::Str,
            Value::Array(_) => TypeTag::Array,
            Value::Range(_) => TypeTag::Range,
            Value::Regex(_) => TypeTag::Regex,
            Value::Function(_) => TypeTag::Function,
            Value::Closure(_) => TypeTag::Closure,
            Value::Generator(_) => TypeTag::Generator,
            Value::Native(_) => TypeTag::Native,
            Value::Class(_) => TypeTag::Class,
            Value::Instance(_) => TypeTag::Instance,
            Value::Error(_) => TypeTag::Error,
            Value::Mutex(_) => TypeTag::Mutex,
            Value::RwMutex(_) => TypeTag::RwMutex,
        }
    }

    /// Returns the canonical runtime type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "Undefined",
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Symbol(_) => "Symbol",
            Value::Char(_) => "Char",
            Value::Str(_) => "String",
            Value::Array(_) => "Array",
            Value::Range(_) => "Range",
            Value::Regex(_) => "Regex",
            Value::Function(_) => "Function",
            Value::Closure(_) => "Closure",
            Value::Generator(_) => "Generator",
            Value::Native(_) => "Native",
            Value::Class(_) => "Class",
            Value::Instance(_) => "Instance",
            Value::Error(_) => "Error",
            Value::Mutex(_) => "Mutex",
            Value::RwMutex(_) => "RwMutex",
        }
    }

    /// Like [`Value::type_name`], but names the class of instances.
    pub fn describe_type(&self) -> String {
        match self {
            Value::Instance(instance) => instance.class.name().to_string(),
            other => other.type_name().to_string(),
        }
    }

    /// Only `Nil`, `false` and `Undefined` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false) | Value::Undefined)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Replaces the internal sentinel with `Nil` before a value escapes.
    pub fn defined_or_nil(self) -> Value {
        match self {
            Value::Undefined => Value::Nil,
            other => other,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Display form used inside containers and disassembly: strings and
    /// chars are quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(text) => format!("{:?}", text),
            Value::Char(c) => format!("{:?}", c),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    /// Scalars and strings compare by value (ints and floats compare
    /// numerically); every heap object compares by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Generator(a), Value::Generator(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            (Value::Mutex(a), Value::Mutex(b)) => Arc::ptr_eq(a, b),
            (Value::RwMutex(a), Value::RwMutex(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(text) => write!(f, "{}", text),
            Value::Array(elements) => {
                let items: Vec<String> = elements.lock().iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Range(range) => {
                let dots = if range.inclusive { "..=" } else { ".." };
                write!(f, "{}{}{}", range.start, dots, range.end)
            }
            Value::Regex(regex) => write!(f, "/{}/", regex.as_str()),
            Value::Function(function) => write!(f, "{}", function),
            Value::Closure(closure) => write!(f, "<closure {}>", closure.function.name()),
            Value::Generator(generator) => write!(f, "<generator {}>", generator.name()),
            Value::Native(native) => write!(f, "<native {}>", native.name),
            Value::Class(class) => write!(f, "<class {}>", class.name()),
            Value::Instance(instance) => write!(f, "<{} instance>", instance.class.name()),
            Value::Error(error) => write!(f, "{}", error),
            Value::Mutex(_) => write!(f, "<mutex>"),
            Value::RwMutex(_) => write!(f, "<rw-mutex>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_two_words() {
        assert!(std::mem::size_of::<Value>() <= 16);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Float(3.5));
        assert_ne!(Value::Nil, Value::Undefined);
    }

    #[test]
    fn arrays_compare_by_identity() {
        let a = Value::array(vec![Value::Int(1)]);
        let b = Value::array(vec![Value::Int(1)]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn display_quotes_nested_strings() {
        let value = Value::array(vec![Value::string("a"), Value::Int(2), Value::Float(2.5)]);
        assert_eq!(value.to_string(), "[\"a\", 2, 2.5]");
    }

    #[test]
    fn range_length() {
        let exclusive = RangeValue {
            start: 1,
            end: 4,
            inclusive: false,
        };
        assert_eq!(exclusive.len(), 3);
        assert!(exclusive.contains(3));
        assert!(!exclusive.contains(4));
        let inclusive = RangeValue {
            inclusive: true,
            ..exclusive
        };
        assert_eq!(inclusive.len(), 4);
    }
}
