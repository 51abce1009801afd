pub mod assign;
pub mod cli;
pub mod common;
pub mod config;
pub mod counter;
pub mod error;
pub mod fetch;
pub mod identifier;
pub mod lims;
