#![forbid(unsafe_code)]
//! Operend collaborators: the HTTP client used against a live server, its
//! connection settings, and an in-memory stand-in for tests and offline runs.

mod config;
mod http;
mod memory;

pub use config::{OperendConfig, CONFIG_ENV_VAR};
pub use http::HttpOperendClient;
pub use memory::{CreatedEntity, InMemoryOperend};
