//! Command-line front end for sqlw.
//!
//! Every invocation starts a controller, runs one operation against a named
//! session and prints a result envelope on stdout.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
