//! Command implementations for rfd-driver.

pub mod check_config;
pub mod classify;
pub mod run;
