//! Contact list validation and bulk mail campaigns.
//!
//! - [`config`]: the RON configuration file and environment overrides
//! - [`contacts`]: CSV contact files and the clean/split/canary tools
//! - [`controller`]: wires the validation and dispatch stages into commands

pub mod config;
pub mod contacts;
pub mod controller;
