//! TSpec CLI
//!
//! Command-line interface for listing, validating, parsing and running
//! declarative API test specifications.

pub mod cli;
pub mod commands;
pub mod output;
