#![forbid(unsafe_code)]

pub mod option_source;
pub mod run_controller;
