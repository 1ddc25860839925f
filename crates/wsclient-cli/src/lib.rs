//! # wsclient-cli
//!
//! Command-line front end for the `wsclient` SDK.
//!
//! - **convert**: upload a file, run one web service, save the result
//! - **upload**: upload a file and print the server's document record
//! - **status** / **log**: administration queries

pub mod commands;
pub mod config;

pub use config::CliConfig;
