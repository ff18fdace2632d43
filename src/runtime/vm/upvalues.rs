use std::sync::Arc;

use crate::runtime::{error::Fault, upvalue::Upvalue};

use super::Vm;

impl Vm {
    /// Returns the open upvalue for `slot`, creating it if no closure has
    /// captured that slot yet.
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> Arc<Upvalue> {
        match self
            .open_upvalues
            .binary_search_by_key(&slot, |(open, _)| *open)
        {
            Ok(i) => self.open_upvalues[i].1.clone(),
            Err(i) => {
                let upvalue = Arc::new(Upvalue::open(self.id, slot));
                self.open_upvalues.insert(i, (slot, upvalue.clone()));
                upvalue
            }
        }
    }

    /// Closes every open upvalue aliasing a slot at or above `from`.
    pub(super) fn close_upvalues(&mut self, from: usize) {
        let split = self.open_upvalues.partition_point(|(slot, _)| *slot < from);
        for (_, upvalue) in self.open_upvalues.drain(split..) {
            upvalue.close(&self.stack);
        }
    }

    /// Closes the upvalues of a suspending generator frame and returns them
    /// keyed by their offset from `base`, ready to be re-opened on resume.
    pub(super) fn park_upvalues(&mut self, base: usize) -> Vec<(usize, Arc<Upvalue>)> {
        let split = self.open_upvalues.partition_point(|(slot, _)| *slot < base);
        let stack = &self.stack;
        self.open_upvalues
            .drain(split..)
            .map(|(slot, upvalue)| {
                upvalue.close(stack);
                (slot - base, upvalue)
            })
            .collect()
    }

    /// Addresses the slot `delta` places away from an open upvalue's slot,
    /// returning the (possibly new) open upvalue shared by that slot. Each
    /// slot keeps its own upvalue, so stepping never disturbs `upvalue`.
    pub fn step_upvalue(&mut self, upvalue: &Arc<Upvalue>, delta: isize) -> Result<Arc<Upvalue>, Fault> {
        let slot = upvalue.open_slot(self.id).ok_or_else(|| {
            if upvalue.is_open() {
                Fault::Internal("upvalue is open on another vm".to_string())
            } else {
                Fault::type_error("cannot step a closed upvalue")
            }
        })?;
        let target = slot
            .checked_add_signed(delta)
            .filter(|target| *target < self.sp)
            .ok_or_else(|| {
                Fault::type_error(format!(
                    "upvalue step of {delta} from slot {slot} leaves the live stack"
                ))
            })?;
        Ok(self.capture_upvalue(target))
    }
}
