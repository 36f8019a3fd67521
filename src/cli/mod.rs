//! CLI module for matchfeed - command-line interface and subcommands.
//!
//! Provides the entry point for running a feed simulation against a fixture,
//! inspecting the effective configuration and printing the retry schedule.

pub mod commands;

pub use commands::Cli;
