use std::sync::Arc;

use crate::runtime::{
    native::NativeFunction,
    registry::Registry,
    value::{TypeTag, Value},
};

mod array_ops;
mod error_ops;
mod generator_ops;
mod helpers;
mod io_ops;
mod scalar_ops;
mod sync_ops;

use array_ops::{array_each, array_get, array_len, array_map, array_pop, array_push};
use error_ops::{error_kind, error_message, native_error};
use generator_ops::{generator_next, generator_reset, generator_status};
use io_ops::{native_print, native_type_of};
use scalar_ops::{callable_call, range_contains, range_len, regex_is_match, string_len};
use sync_ops::{
    mutex_lock, mutex_try_lock, mutex_unlock, native_mutex, native_rw_mutex, rw_read_lock,
    rw_read_unlock, rw_try_write_lock, rw_write_lock, rw_write_unlock,
};

/// Free functions installed as globals.
pub static FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::new("print", None, native_print),
    NativeFunction::new("type_of", Some(1), native_type_of),
    NativeFunction::new("Error", Some(1), native_error),
    NativeFunction::new("Mutex", Some(0), native_mutex),
    NativeFunction::new("RwMutex", Some(0), native_rw_mutex),
];

/// Native methods keyed by receiver type.
pub static METHODS: &[(TypeTag, NativeFunction)] = &[
    (TypeTag::Array, NativeFunction::new("len", Some(0), array_len)),
    (TypeTag::Array, NativeFunction::new("push", Some(1), array_push)),
    (TypeTag::Array, NativeFunction::new("pop", Some(0), array_pop)),
    (TypeTag::Array, NativeFunction::new("get", Some(1), array_get)),
    (TypeTag::Array, NativeFunction::new("each", Some(1), array_each)),
    (TypeTag::Array, NativeFunction::new("map", Some(1), array_map)),
    (TypeTag::Str, NativeFunction::new("len", Some(0), string_len)),
    (TypeTag::Range, NativeFunction::new("contains", Some(1), range_contains)),
    (TypeTag::Range, NativeFunction::new("len", Some(0), range_len)),
    (TypeTag::Regex, NativeFunction::new("is_match", Some(1), regex_is_match)),
    (TypeTag::Closure, NativeFunction::new("call", None, callable_call)),
    (TypeTag::Native, NativeFunction::new("call", None, callable_call)),
    (TypeTag::Generator, NativeFunction::new("next", Some(0), generator_next)),
    (TypeTag::Generator, NativeFunction::new("reset", Some(0), generator_reset)),
    (TypeTag::Generator, NativeFunction::new("status", Some(0), generator_status)),
    (TypeTag::Error, NativeFunction::new("message", Some(0), error_message)),
    (TypeTag::Error, NativeFunction::new("kind", Some(0), error_kind)),
    (TypeTag::Mutex, NativeFunction::new("lock", Some(0), mutex_lock)),
    (TypeTag::Mutex, NativeFunction::new("try_lock", Some(0), mutex_try_lock)),
    (TypeTag::Mutex, NativeFunction::new("unlock", Some(0), mutex_unlock)),
    (TypeTag::RwMutex, NativeFunction::new("read_lock", Some(0), rw_read_lock)),
    (TypeTag::RwMutex, NativeFunction::new("read_unlock", Some(0), rw_read_unlock)),
    (TypeTag::RwMutex, NativeFunction::new("write_lock", Some(0), rw_write_lock)),
    (TypeTag::RwMutex, NativeFunction::new("try_write_lock", Some(0), rw_try_write_lock)),
    (TypeTag::RwMutex, NativeFunction::new("write_unlock", Some(0), rw_write_unlock)),
];

pub fn get_function(name: &str) -> Option<&'static NativeFunction> {
    FUNCTIONS.iter().find(|native| native.name == name)
}

/// Installs the core natives into `registry`.
pub(crate) fn install(registry: &Registry) {
    for native in FUNCTIONS {
        registry.define_global(native.name, Value::Native(Arc::new(native.clone())));
    }
    for (tag, native) in METHODS {
        registry.install_method(*tag, native.clone());
    }
}

#[cfg(test)]
mod array_ops_test;
