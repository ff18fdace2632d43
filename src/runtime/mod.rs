//! Runtime values and the VM that executes bytecode functions.
//!
//! # Sharing and cycles
//! Heap-backed `Value` variants are `Arc`-shared so that values, generators
//! and promises can move between worker VMs. Reference counting does not
//! collect cycles: an array stored inside itself, or an instance whose field
//! points back at it, is leaked once unreachable. Natives must not build such
//! back-edges on their own.
//!
//! Equality on heap objects is identity, so comparing cyclic values never
//! recurses.

pub mod builtins;
pub mod class;
pub mod closure;
pub mod config;
pub mod error;
pub mod frame;
pub mod generator;
pub mod native;
pub mod pool;
pub mod registry;
pub mod symbol;
pub mod sync;
pub mod upvalue;
pub mod value;
pub mod vm;
