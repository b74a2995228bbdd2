#![forbid(unsafe_code)]

pub mod assembler;
pub mod condition;
pub mod options;
