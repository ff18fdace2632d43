use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::runtime::{
    builtins,
    native::{NativeFn, NativeFunction},
    symbol::{Symbol, SymbolTable},
    value::{TypeTag, Value},
};

/// Process-wide tables shared by every VM built from the same handle:
/// interned symbols, globals (including classes) and native methods keyed
/// by receiver type.
///
/// Construct it once with [`Registry::new`], which installs the core
/// natives, before creating any VM. Reads vastly outnumber writes, so each
/// table sits behind its own `RwLock`.
#[derive(Debug, Default)]
pub struct Registry {
    symbols: RwLock<SymbolTable>,
    globals: RwLock<HashMap<Symbol, Value>>,
    methods: RwLock<HashMap<(TypeTag, Symbol), Arc<NativeFunction>>>,
}

impl Registry {
    /// Registry with the core native functions and methods installed.
    pub fn new() -> Arc<Registry> {
        let registry = Registry::empty();
        builtins::install(&registry);
        Arc::new(registry)
    }

    pub fn empty() -> Registry {
        Registry::default()
    }

    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(symbol) = self.symbols.read().lookup(name) {
            return symbol;
        }
        self.symbols.write().intern(name)
    }

    pub fn lookup_symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.read().lookup(name)
    }

    pub fn symbol_name(&self, symbol: Symbol) -> Arc<str> {
        self.symbols
            .read()
            .name(symbol)
            .unwrap_or_else(|| Arc::from(symbol.to_string()))
    }

    pub fn global(&self, name: Symbol) -> Option<Value> {
        self.globals.read().get(&name).cloned()
    }

    pub fn global_named(&self, name: &str) -> Option<Value> {
        self.lookup_symbol(name).and_then(|symbol| self.global(symbol))
    }

    pub fn set_global(&self, name: Symbol, value: Value) {
        self.globals.write().insert(name, value);
    }

    pub fn define_global(&self, name: &str, value: Value) -> Symbol {
        let symbol = self.intern(name);
        self.set_global(symbol, value);
        symbol
    }

    /// Registers a free native function as a global.
    pub fn define_native(&self, name: &'static str, arity: Option<usize>, func: NativeFn) {
        let native = NativeFunction::new(name, arity, func);
        self.define_global(name, Value::Native(Arc::new(native)));
    }

    /// Registers a native method for every receiver of type `tag`.
    pub fn define_method(
        &self,
        tag: TypeTag,
        name: &'static str,
        arity: Option<usize>,
        func: NativeFn,
    ) {
        self.install_method(tag, NativeFunction::new(name, arity, func));
    }

    pub(crate) fn install_method(&self, tag: TypeTag, native: NativeFunction) {
        let symbol = self.intern(native.name);
        self.methods.write().insert((tag, symbol), Arc::new(native));
    }

    pub fn native_method(&self, tag: TypeTag, name: Symbol) -> Option<Arc<NativeFunction>> {
        self.methods.read().get(&(tag, name)).cloned()
    }

    /// Value rendering with symbols resolved to their names.
    pub fn describe(&self, value: &Value) -> String {
        match value {
            Value::Symbol(symbol) => format!(":{}", self.symbol_name(*symbol)),
            other => other.repr(),
        }
    }
}
