//! Workflows exercising whole commands

pub mod config_command;
pub mod watch_command;
