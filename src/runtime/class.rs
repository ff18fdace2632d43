use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::runtime::{symbol::Symbol, value::Value};

/// User-defined class. Methods are closures or natives; a method whose
/// function is `sealed` cannot be redefined by the class or any subclass.
#[derive(Debug)]
pub struct Class {
    pub symbol: Symbol,
    name: Arc<str>,
    pub superclass: Option<Arc<Class>>,
    methods: RwLock<HashMap<Symbol, Value>>,
}

impl Class {
    pub fn new(symbol: Symbol, name: impl Into<Arc<str>>, superclass: Option<Arc<Class>>) -> Self {
        Self {
            symbol,
            name: name.into(),
            superclass,
            methods: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks the method up on this class, then along the superclass chain.
    pub fn find_method(&self, name: Symbol) -> Option<Value> {
        if let Some(method) = self.methods.read().get(&name) {
            return Some(method.clone());
        }
        self.superclass.as_ref().and_then(|parent| parent.find_method(name))
    }

    pub fn define_method(&self, name: Symbol, method: Value) -> Result<(), String> {
        let sealed = match self.find_method(name) {
            Some(Value::Closure(existing)) if existing.function.sealed => {
                Some(existing.function.clone())
            }
            Some(Value::Function(existing)) if existing.sealed => Some(existing),
            _ => None,
        };
        if let Some(existing) = sealed {
            return Err(format!(
                "cannot override sealed method {} in class {}",
                existing.name(),
                self.name
            ));
        }
        self.methods.write().insert(name, method);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Arc<Class>,
    fields: Mutex<HashMap<Symbol, Value>>,
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            fields: Mutex::new(HashMap::new()),
        }
    }

    pub fn field(&self, name: Symbol) -> Option<Value> {
        self.fields.lock().get(&name).cloned()
    }

    pub fn set_field(&self, name: Symbol, value: Value) {
        self.fields.lock().insert(name, value);
    }
}
