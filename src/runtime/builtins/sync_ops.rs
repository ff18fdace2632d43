use std::sync::Arc;

use crate::runtime::{
    error::Fault,
    sync::{SyncMutex, SyncRwMutex},
    value::Value,
    vm::Vm,
};

use super::helpers::{arg, type_error};

fn receiver_mutex(args: &[Value], name: &str) -> Result<Arc<SyncMutex>, Fault> {
    match arg(args, 0, name)? {
        Value::Mutex(mutex) => Ok(mutex.clone()),
        other => Err(type_error(name, "receiver", "Mutex", other)),
    }
}

fn receiver_rw_mutex(args: &[Value], name: &str) -> Result<Arc<SyncRwMutex>, Fault> {
    match arg(args, 0, name)? {
        Value::RwMutex(lock) => Ok(lock.clone()),
        other => Err(type_error(name, "receiver", "RwMutex", other)),
    }
}

pub(super) fn native_mutex(_vm: &mut Vm, _args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::Mutex(Arc::new(SyncMutex::new())))
}

pub(super) fn native_rw_mutex(_vm: &mut Vm, _args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::RwMutex(Arc::new(SyncRwMutex::new())))
}

/// Blocks the calling worker until the mutex is free.
pub(super) fn mutex_lock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    receiver_mutex(args, "lock")?.lock();
    Ok(Value::Nil)
}

pub(super) fn mutex_try_lock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::Bool(receiver_mutex(args, "try_lock")?.try_lock()))
}

pub(super) fn mutex_unlock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    receiver_mutex(args, "unlock")?
        .unlock()
        .map_err(Fault::resource)?;
    Ok(Value::Nil)
}

pub(super) fn rw_read_lock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    receiver_rw_mutex(args, "read_lock")?.read_lock();
    Ok(Value::Nil)
}

pub(super) fn rw_read_unlock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    receiver_rw_mutex(args, "read_unlock")?
        .read_unlock()
        .map_err(Fault::resource)?;
    Ok(Value::Nil)
}

pub(super) fn rw_write_lock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    receiver_rw_mutex(args, "write_lock")?.write_lock();
    Ok(Value::Nil)
}

pub(super) fn rw_try_write_lock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    Ok(Value::Bool(
        receiver_rw_mutex(args, "try_write_lock")?.try_write_lock(),
    ))
}

pub(super) fn rw_write_unlock(_vm: &mut Vm, args: &[Value]) -> Result<Value, Fault> {
    receiver_rw_mutex(args, "write_unlock")?
        .write_unlock()
        .map_err(Fault::resource)?;
    Ok(Value::Nil)
}
