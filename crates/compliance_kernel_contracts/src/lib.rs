#![forbid(unsafe_code)]

pub mod common;
pub mod config_doc;
pub mod object;
pub mod run;

pub use common::{ContractViolation, Deadline, Validate};
