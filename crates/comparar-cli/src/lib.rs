//! Comparador CLI Library
//!
//! Command-line interface and HTTP intake for Comparar comparison sessions.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod error;
pub mod handlers;
mod logging;
pub mod server;

pub use commands::{Cli, Commands, ConfigArgs, DiffArgs, ServeArgs};
pub use error::{CliError, CliResult};
pub use logging::{init_logging, Verbosity};
pub use server::{
    router, ApiError, AppState, ServerConfig, SnapshotPayload, SnapshotResponse, SnapshotServer,
};
