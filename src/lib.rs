//! Loki
//!
//! Links studenti@UniMoRe Google accounts to Matrix users:
//! - a Matrix bot hands every user a personal link
//! - the web frontend verifies the Google account through OpenID Connect
//! - linked users are invited to the community space
//!
//! # Layers
//!
//! - `domain`: accounts and Matrix users
//! - `core`: storage interface
//! - `infrastructure`: Matrix client, Google, SQLite, web, logging
//! - `application`: bot and space access

pub mod application;
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod domain;
pub mod errors;
pub mod infrastructure;

pub use crate::config::{AppConfig, StoreType};
pub use crate::core::store::{MemoryStore, Store};
pub use domain::{Account, MatrixUser};
pub use errors::{LokiError, Result};
pub use infrastructure::matrix::{ExtendedClient, MatrixError, RequestError};
pub use infrastructure::store::SqliteStore;
