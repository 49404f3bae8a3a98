//! Manage OpenStack virtual machines from a terminal.
//!
//! The pieces, leaf to root:
//!
//! - [`config`] resolves [`config::Credentials`] and [`config::Settings`]
//!   from flags, environment and an optional TOML file.
//! - [`api::SessionManager`] trades credentials for a Keystone token and keeps
//!   it fresh.
//! - [`api::InstanceRegistry`] talks to Nova and normalizes what comes back
//!   into [`models::Instance`] records.
//! - [`dispatcher::Dispatcher`] validates a [`command::Command`] and runs it.
//! - [`shell::Shell`] is the interactive loop around all of it.

pub mod api;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod render;
pub mod shell;

pub use error::{Error, Result};

/// Normal quit
pub const EXIT_OK: i32 = 0;
/// Configuration or authentication failure before the shell started
pub const EXIT_STARTUP: i32 = 1;
/// The session was lost while running
pub const EXIT_SESSION: i32 = 2;
