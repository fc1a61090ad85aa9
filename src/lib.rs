//! Document operations over a uniform string-dispatched call surface.
//!
//! A call names a tool (`session`, `spreadsheet`, `email`), an operation and
//! a set of named parameters. Document operations run against a file path
//! (load, edit, save) or against a live session opened earlier.

pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod mcp;
pub mod params;
pub mod resolve;
pub mod session;
pub mod tools;

pub use dispatch::{Toolbox, ToolOutput};
pub use error::ToolError;
pub use params::ParamSet;

use config::Config;
use resolve::PathPolicy;
use session::SessionStore;

/// Shared state handed to every handler.
#[derive(Clone, Default)]
pub struct AppState {
    pub sessions: SessionStore,
    pub paths: PathPolicy,
}

impl AppState {
    pub fn new(sessions: SessionStore, paths: PathPolicy) -> Self {
        Self { sessions, paths }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SessionStore::with_max_sessions(config.sessions.limit()),
            PathPolicy::new(config.paths.allowed_roots.iter().cloned()),
        )
    }
}
