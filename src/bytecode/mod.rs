pub mod builder;
pub mod constant_pool;
pub mod debug_info;
pub mod disassembler;
pub mod function;
pub mod image;
pub mod op_code;
