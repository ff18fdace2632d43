use parking_lot::Mutex;

use crate::runtime::{error::Fault, value::Value};

/// Identifies the VM instance whose value stack an open upvalue aliases.
pub type VmId = u64;

#[derive(Debug, Clone)]
pub enum UpvalueState {
    /// Aliases slot `index` of the value stack owned by VM `owner`.
    Open { owner: VmId, index: usize },
    Closed(Value),
}

/// A captured variable shared by every closure that captured the same slot.
#[derive(Debug)]
pub struct Upvalue {
    state: Mutex<UpvalueState>,
}

impl Upvalue {
    pub fn open(owner: VmId, index: usize) -> Self {
        Self {
            state: Mutex::new(UpvalueState::Open { owner, index }),
        }
    }

    pub fn closed(value: Value) -> Self {
        Self {
            state: Mutex::new(UpvalueState::Closed(value)),
        }
    }

    pub fn state(&self) -> UpvalueState {
        self.state.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), UpvalueState::Open { .. })
    }

    /// Slot index if this upvalue is open on `owner`'s stack.
    pub fn open_slot(&self, owner: VmId) -> Option<usize> {
        match *self.state.lock() {
            UpvalueState::Open { owner: o, index } if o == owner => Some(index),
            _ => None,
        }
    }

    pub fn get(&self, owner: VmId, stack: &[Value]) -> Result<Value, Fault> {
        match &*self.state.lock() {
            UpvalueState::Closed(value) => Ok(value.clone()),
            UpvalueState::Open { owner: o, index } => {
                if *o != owner {
                    return Err(foreign_upvalue(*o, owner));
                }
                stack
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| Fault::Internal(format!("open upvalue slot {index} out of range")))
            }
        }
    }

    pub fn set(&self, owner: VmId, stack: &mut [Value], value: Value) -> Result<(), Fault> {
        match &mut *self.state.lock() {
            UpvalueState::Closed(cell) => {
                *cell = value;
                Ok(())
            }
            UpvalueState::Open { owner: o, index } => {
                if *o != owner {
                    return Err(foreign_upvalue(*o, owner));
                }
                let slot = stack.get_mut(*index).ok_or_else(|| {
                    Fault::Internal(format!("open upvalue slot {index} out of range"))
                })?;
                *slot = value;
                Ok(())
            }
        }
    }

    /// Copies the aliased slot into the upvalue's own cell. Closing a closed
    /// upvalue does nothing.
    pub fn close(&self, stack: &[Value]) {
        let mut state = self.state.lock();
        if let UpvalueState::Open { index, .. } = *state {
            let value = stack.get(index).cloned().unwrap_or_default();
            *state = UpvalueState::Closed(value.defined_or_nil());
        }
    }

    /// Moves a parked upvalue back onto a stack slot, writing its cell value
    /// into the slot first.
    pub(crate) fn reopen(&self, owner: VmId, index: usize, stack: &mut [Value]) {
        let mut state = self.state.lock();
        if let UpvalueState::Closed(value) = &*state {
            if let Some(slot) = stack.get_mut(index) {
                *slot = value.clone();
            }
        }
        *state = UpvalueState::Open { owner, index };
    }
}

fn foreign_upvalue(owner: VmId, current: VmId) -> Fault {
    Fault::Internal(format!(
        "upvalue is open on vm {owner} and cannot be dereferenced from vm {current}"
    ))
}
